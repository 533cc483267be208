//! Minimal telnet client over a blocking TCP socket.
//!
//! The peer is a known simulation shell, so this is not a full RFC 854
//! implementation: it survives option negotiation by refusing every option
//! (WONT for DO, DONT for WILL), strips command sequences and NUL bytes from
//! the stream, and hands the remaining payload bytes to the caller through
//! `read_until`/`read_all`/`read_some`.

pub mod queue;

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::errors::LinkError;
use self::queue::RawQueue;

/// Capacity cap shared by the raw and cooked queues.
pub const RAWQLEN: usize = 2048;

/// Connection timeout for TCP connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout armed on the socket. Doubles as the poll interval at which
/// blocked reads re-check the wall-clock deadline.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

// Telnet protocol constants.
const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;

/// ECHO option code (RFC 857).
const ECHO: u8 = 1;

/// Telnet link over a blocking TCP socket.
///
/// # Lifecycle
///
/// 1. Create with [`TelnetLink::new()`] (disconnected state).
/// 2. Call [`open()`](TelnetLink::open) with host and port.
/// 3. Use [`write()`](TelnetLink::write) and the `read_*` methods.
/// 4. Call [`close()`](TelnetLink::close) to clean up (idempotent).
pub struct TelnetLink {
    /// `None` when disconnected. The link is the sole owner of the socket.
    stream: Option<TcpStream>,
    /// Bytes fresh from the socket, not yet interpreted.
    rawq: RawQueue,
    /// Payload bytes after telnet command handling, capped at [`RAWQLEN`].
    cookedq: Vec<u8>,
    /// Peer has closed its side.
    eof: bool,
    /// Send the initial option refusal before the first user write.
    first_write: bool,
    /// Per-read deadline in seconds; 0 waits indefinitely.
    timeout_s: u32,
}

impl TelnetLink {
    /// Create a new disconnected link.
    pub fn new() -> Self {
        Self {
            stream: None,
            rawq: RawQueue::new(RAWQLEN),
            cookedq: Vec::new(),
            eof: false,
            first_write: true,
            timeout_s: 0,
        }
    }

    /// Return true while the socket is held open on our side.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Peer has closed its side of the connection.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Resolve `host`, connect, and arm the read-side poll interval.
    ///
    /// Fails if the link is already open or on any socket error.
    pub fn open(&mut self, host: &str, port: u16) -> Result<(), LinkError> {
        if self.stream.is_some() {
            return Err(LinkError::io("telnet link already open"));
        }
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(LinkError::Io)?
            .next()
            .ok_or_else(|| LinkError::io(format!("no address found for {host}")))?;

        info!(host, port, "Connecting telnet link");
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;

        self.stream = Some(stream);
        self.rawq.clear();
        self.cookedq.clear();
        self.eof = false;
        self.first_write = true;
        Ok(())
    }

    /// Close the socket. Safe to call on an already-closed link.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("Telnet link closed");
        }
    }

    /// Transmit `bytes` in full.
    ///
    /// The first write is preceded by `IAC DONT ECHO`, asking the peer to
    /// stop echoing. That request is best-effort: it is not retried and some
    /// servers ignore it.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if self.first_write {
            let stream = self.stream_mut()?;
            let _ = stream.write_all(&[IAC, DONT, ECHO]);
            self.first_write = false;
        }
        let stream = self.stream_mut()?;
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    /// Read until `pattern` appears in the cooked stream, consuming and
    /// returning everything up to and including it.
    ///
    /// `timeout_s` bounds each wait for socket data (0 waits indefinitely).
    /// On deadline with buffered data the residual is returned without the
    /// pattern; on deadline with nothing buffered this is a
    /// [`LinkError::Timeout`]. At end of stream the residual is returned if
    /// any, otherwise [`LinkError::Eof`].
    pub fn read_until(&mut self, pattern: &[u8], timeout_s: u32) -> Result<Vec<u8>, LinkError> {
        if pattern.is_empty() {
            return Err(LinkError::io("read_until pattern must not be empty"));
        }
        self.timeout_s = timeout_s;

        match self.process_rawq() {
            Ok(()) => {}
            Err(LinkError::Timeout(msg)) => return self.read_very_lazy(Some(msg)),
            Err(LinkError::Eof(_)) => return self.read_very_lazy(None),
            Err(e) => return Err(e),
        }
        if let Some(pos) = find(&self.cookedq, pattern) {
            return Ok(self.take_cooked(pos + pattern.len()));
        }

        while !self.eof {
            // Rescan only the tail: previously searched bytes minus a
            // |pattern|-1 overlap for matches straddling two reads.
            let searched = self.cookedq.len().saturating_sub(pattern.len() - 1);
            let step = self.fill_rawq().and_then(|()| self.process_rawq());
            match step {
                Ok(()) => {}
                Err(LinkError::Timeout(msg)) => return self.read_very_lazy(Some(msg)),
                Err(LinkError::Eof(_)) => return self.read_very_lazy(None),
                Err(e) => return Err(e),
            }
            if let Some(pos) = find(&self.cookedq[searched..], pattern) {
                return Ok(self.take_cooked(searched + pos + pattern.len()));
            }
        }
        self.read_very_lazy(None)
    }

    /// Drain the stream until the peer closes, returning all cooked bytes.
    pub fn read_all(&mut self) -> Result<Vec<u8>, LinkError> {
        self.process_rawq()?;
        while !self.eof {
            self.fill_rawq()?;
            self.process_rawq()?;
        }
        let n = self.cookedq.len();
        Ok(self.take_cooked(n))
    }

    /// Block until at least one cooked byte is available (or end of
    /// stream), then return and clear the cooked queue.
    pub fn read_some(&mut self) -> Result<Vec<u8>, LinkError> {
        self.process_rawq()?;
        while self.cookedq.is_empty() && !self.eof {
            self.fill_rawq()?;
            self.process_rawq()?;
        }
        let n = self.cookedq.len();
        Ok(self.take_cooked(n))
    }

    /// Return whatever is buffered without touching the socket.
    ///
    /// `timeout` carries the message of the deadline that got us here, if
    /// any; with nothing buffered it decides between `Timeout` and `Eof`.
    fn read_very_lazy(&mut self, timeout: Option<String>) -> Result<Vec<u8>, LinkError> {
        if !self.cookedq.is_empty() {
            let n = self.cookedq.len();
            return Ok(self.take_cooked(n));
        }
        match timeout {
            Some(msg) => Err(LinkError::Timeout(msg)),
            None => Err(LinkError::Eof("telnet connection closed".into())),
        }
    }

    /// Remove and return the first `n` cooked bytes.
    fn take_cooked(&mut self, n: usize) -> Vec<u8> {
        let rest = self.cookedq.split_off(n);
        std::mem::replace(&mut self.cookedq, rest)
    }

    /// Interpret everything currently in the raw queue: strip and answer
    /// telnet commands, drop NUL bytes, move payload to the cooked queue.
    fn process_rawq(&mut self) -> Result<(), LinkError> {
        while !self.rawq.is_empty() {
            let c = self.rawq_getchar()?;
            if c == IAC {
                self.handle_command()?;
            } else if c == 0 {
                // NUL padding from the peer is dropped.
            } else if self.cookedq.len() >= RAWQLEN {
                return Err(LinkError::io("cooked queue overflow"));
            } else {
                self.cookedq.push(c);
            }
        }
        Ok(())
    }

    /// Consume the two bytes following an IAC and refuse any negotiation.
    fn handle_command(&mut self) -> Result<(), LinkError> {
        let command = self.rawq_getchar()?;
        let option = self.rawq_getchar()?;
        match command {
            WILL => self.send_command(DONT, option),
            DO => self.send_command(WONT, option),
            // WONT/DONT and anything else: consumed, no reply.
            _ => Ok(()),
        }
    }

    fn send_command(&mut self, command: u8, option: u8) -> Result<(), LinkError> {
        let stream = self.stream_mut()?;
        stream.write_all(&[IAC, command, option])?;
        Ok(())
    }

    /// Next raw byte, refilling from the socket if the queue has run dry
    /// (a command sequence may straddle two socket reads).
    fn rawq_getchar(&mut self) -> Result<u8, LinkError> {
        if self.rawq.is_empty() {
            self.fill_rawq()?;
        }
        self.rawq
            .pop()
            .ok_or_else(|| LinkError::Eof("telnet connection closed".into()))
    }

    /// Wait for the socket to become readable and append one read's worth
    /// of bytes to the raw queue. A zero-length read marks end of stream.
    /// The wall clock is checked against `timeout_s` on every poll tick.
    fn fill_rawq(&mut self) -> Result<(), LinkError> {
        let mut buf = [0u8; RAWQLEN];
        let start = Instant::now();
        loop {
            let free = self.rawq.free();
            if free == 0 {
                return Err(LinkError::io("raw queue overflow"));
            }
            let stream = self.stream_mut()?;
            match stream.read(&mut buf[..free]) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    if !self.rawq.extend(&buf[..n]) {
                        return Err(LinkError::io("raw queue overflow"));
                    }
                    return Ok(());
                }
                Err(ref e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    if self.timeout_s > 0
                        && start.elapsed() >= Duration::from_secs(u64::from(self.timeout_s))
                    {
                        return Err(LinkError::Timeout(
                            "no data arrived before the deadline".into(),
                        ));
                    }
                }
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, LinkError> {
        self.stream
            .as_mut()
            .ok_or_else(|| LinkError::io("telnet link is not open"))
    }
}

impl Default for TelnetLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TelnetLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// First position of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
