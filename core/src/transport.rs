//! Command transport to the simulation shell.
//!
//! Serializes 32-bit register reads and writes (and the session verbs
//! around them) over the telnet link as ASCII lines, and recovers value and
//! status from the replies. Every command is request/response serialized:
//! the next command is not sent until the previous terminator has been
//! consumed, so the cooked queue is the only buffer between commands.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::AteConfig;
use crate::errors::LinkError;
use crate::link::TelnetLink;

/// Bytes of a reply retained for diagnostics.
const RESPONSE_KEEP: usize = 511;

/// Backoff before the single automatic reconnect attempt.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Register transport over a [`TelnetLink`].
///
/// # Lifecycle
///
/// `new(config)` → [`connect()`](AteTransport::connect) →
/// [`start(board)`](AteTransport::start) → many
/// [`write()`](AteTransport::write)/[`read()`](AteTransport::read) →
/// [`stop()`](AteTransport::stop) → [`close()`](AteTransport::close).
///
/// Operations return `Ok(bool)` for command success and `Err` for transport
/// failures. The stored response and last value are single-writer,
/// single-reader: read them before issuing the next command.
pub struct AteTransport {
    config: AteConfig,
    link: TelnetLink,
    last_response: String,
    last_value: u32,
}

impl AteTransport {
    /// Create a disconnected transport for the given endpoint.
    pub fn new(config: AteConfig) -> Self {
        Self {
            config,
            link: TelnetLink::new(),
            last_response: String::new(),
            last_value: 0,
        }
    }

    /// Open the telnet link to the configured endpoint.
    ///
    /// On the initial failure the link is closed and, when
    /// `connect_retry` is set, reopened once after a one-second backoff.
    pub fn connect(&mut self) -> Result<(), LinkError> {
        if self.link.is_open() {
            return Err(LinkError::io("transport already connected"));
        }
        let host = self.config.host.clone();
        let port = self.config.port;
        match self.link.open(&host, port) {
            Ok(()) => Ok(()),
            Err(err) if self.config.connect_retry => {
                debug!(%err, "Initial connect failed, retrying once");
                self.link.close();
                thread::sleep(RETRY_BACKOFF);
                self.link.open(&host, port)
            }
            Err(err) => Err(err),
        }
    }

    /// Instantiate the named board model in the simulator.
    pub fn start(&mut self, board: &str) -> Result<bool, LinkError> {
        info!(board, "Starting board simulation");
        let request = format!("STARTSIM {board}\r\n");
        self.command(&request, b"OK\r\n")
    }

    /// Write a 32-bit word at a bus address.
    pub fn write(&mut self, addr: u32, data: u32) -> Result<bool, LinkError> {
        let request = format!("MW 0x{addr:08x} 0x{data:08x}\r\n");
        self.command(&request, b"OK\r\n")
    }

    /// Read a 32-bit word at a bus address.
    ///
    /// The first whitespace-delimited token of the reply is parsed as a
    /// hexadecimal value into [`last_value`](AteTransport::last_value);
    /// success means the parse succeeded.
    pub fn read(&mut self, addr: u32) -> Result<bool, LinkError> {
        let request = format!("MR 0x{addr:x}\r\n");
        if !self.command(&request, b"OK\r\n")? {
            return Ok(false);
        }
        match parse_hex_token(&self.last_response) {
            Some(value) => {
                self.last_value = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Tear down the running board model.
    pub fn stop(&mut self) -> Result<bool, LinkError> {
        info!("Stopping board simulation");
        if !self.command("STOPSIM\r\n", b"OK\r\n")? {
            return Ok(false);
        }
        Ok(self.last_response.contains("Simulation has stopped."))
    }

    /// End the shell session and close the link (in all paths).
    pub fn close(&mut self) -> Result<bool, LinkError> {
        let result = self.command("EXIT\r\n", b"Goodbye");
        self.link.close();
        match result {
            Ok(true) => Ok(self.last_response.contains("Goodbye")),
            Ok(false) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// The retained tail of the most recent reply.
    pub fn last_response(&self) -> &str {
        &self.last_response
    }

    /// The value parsed from the most recent successful [`read`](AteTransport::read).
    pub fn last_value(&self) -> u32 {
        self.last_value
    }

    pub fn config(&self) -> &AteConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_open()
    }

    /// Send one request line and wait for its distinctive terminator.
    /// Success is any non-empty reply before the deadline.
    fn command(&mut self, request: &str, terminator: &[u8]) -> Result<bool, LinkError> {
        debug!(request = request.trim_end(), "Sending shell command");
        self.link.write(request.as_bytes())?;
        let reply = self
            .link
            .read_until(terminator, self.config.telnet_timeout_s)?;
        Ok(self.store_response(&reply))
    }

    /// Retain the reply (truncated) for diagnostics; a failed command
    /// clears the previous one.
    fn store_response(&mut self, reply: &[u8]) -> bool {
        if reply.is_empty() {
            self.last_response.clear();
            return false;
        }
        let keep = reply.len().min(RESPONSE_KEEP);
        self.last_response = String::from_utf8_lossy(&reply[..keep]).into_owned();
        true
    }
}

/// Parse the first whitespace-delimited token as a hex value, with or
/// without a `0x` prefix.
fn parse_hex_token(reply: &str) -> Option<u32> {
    let token = reply.split_whitespace().next()?;
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u32::from_str_radix(digits, 16).ok()
}
