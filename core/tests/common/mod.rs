//! Shared test utilities for simbench core integration tests.
//!
//! Provides an in-process simulation shell: a TCP server on an ephemeral
//! loopback port speaking the same line protocol as the real service
//! (`P2654> ` prompt, STARTSIM/STOPSIM/EXIT/MW/MR with `OK\r\n`
//! terminators) over simple register models of the simulated board. Tests
//! get real end-to-end coverage without an external simulator.

// Each integration test is compiled as its own crate, so not every test
// file uses every item from this shared module. Suppress dead_code warnings.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

// Telnet bytes used in the banner probes and inbound filtering.
const IAC: u8 = 255;
const WILL: u8 = 251;
const DO: u8 = 253;

/// In-process simulation shell bound to an ephemeral loopback port.
///
/// Serves connections sequentially on a background thread. Every received
/// command line is recorded for assertions about register traffic.
pub struct SimShellServer {
    port: u16,
    log: Arc<Mutex<Vec<String>>>,
}

impl SimShellServer {
    /// Bind and start serving. Each connection gets a fresh board model.
    pub fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let port = listener.local_addr().expect("listener address").port();
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let thread_log = log.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let _ = serve(stream, &thread_log);
                    }
                    Err(_) => break,
                }
            }
        });

        Self { port, log }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Snapshot of all command lines received so far.
    pub fn log_lines(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }
}

/// Handle one shell session over `stream`.
fn serve(mut stream: TcpStream, log: &Arc<Mutex<Vec<String>>>) -> std::io::Result<()> {
    let mut board = BoardModel::new();

    // Banner with option-negotiation probes the client must survive.
    stream.write_all(&[IAC, WILL, 1, IAC, DO, 24])?;
    stream.write_all(b"P2654 Simulation Service\r\nP2654> ")?;

    loop {
        let line = match read_line(&mut stream)? {
            Some(line) => line,
            None => return Ok(()),
        };
        if line.is_empty() {
            continue;
        }
        log.lock().unwrap().push(line.clone());

        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("STARTSIM") => {
                board = BoardModel::new();
                stream.write_all(b"Simulation started.\r\nOK\r\n")?;
            }
            Some("STOPSIM") => {
                stream.write_all(b"Simulation has stopped.\r\nOK\r\n")?;
            }
            Some("EXIT") => {
                stream.write_all(b"Goodbye\r\n")?;
                return Ok(());
            }
            Some("MW") => {
                let addr = parts.next().and_then(parse_hex);
                let data = parts.next().and_then(parse_hex);
                match (addr, data) {
                    (Some(addr), Some(data)) => {
                        board.write(addr, data);
                        stream.write_all(b"OK\r\n")?;
                    }
                    _ => stream.write_all(b"ERROR bad arguments\r\nOK\r\n")?,
                }
            }
            Some("MR") => match parts.next().and_then(parse_hex) {
                Some(addr) => {
                    let value = board.read(addr);
                    stream.write_all(format!("0x{value:08x}\r\nOK\r\n").as_bytes())?;
                }
                None => stream.write_all(b"ERROR bad arguments\r\nOK\r\n")?,
            },
            _ => stream.write_all(b"ERROR unknown command\r\nOK\r\n")?,
        }
    }
}

/// Read one command line, dropping `\r` and any telnet command triples the
/// client sends (its initial option refusal and negotiation answers).
/// Returns `None` when the peer closes.
fn read_line(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if read_byte(stream, &mut byte)?.is_none() {
            return Ok(None);
        }
        match byte[0] {
            IAC => {
                // Consume the two bytes of the command sequence.
                for _ in 0..2 {
                    if read_byte(stream, &mut byte)?.is_none() {
                        return Ok(None);
                    }
                }
            }
            b'\r' => {}
            b'\n' => return Ok(Some(String::from_utf8_lossy(&line).into_owned())),
            c => line.push(c),
        }
    }
}

fn read_byte(stream: &mut TcpStream, byte: &mut [u8; 1]) -> std::io::Result<Option<()>> {
    match stream.read(byte) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(())),
        Err(e) => Err(e),
    }
}

fn parse_hex(token: &str) -> Option<u32> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u32::from_str_radix(digits, 16).ok()
}

/// Register models of the simulated board: JTAG loopback master, GPIO
/// echo, I2C register-file device, SPI FIFO.
struct BoardModel {
    gpio: u16,
    jtag_vector: [u8; 0x400],
    i2c: I2cDevice,
    spi_fifo: VecDeque<u32>,
}

impl BoardModel {
    fn new() -> Self {
        Self {
            gpio: 0,
            jtag_vector: [0; 0x400],
            i2c: I2cDevice::new(),
            spi_fifo: VecDeque::new(),
        }
    }

    fn write(&mut self, addr: u32, data: u32) {
        match addr {
            // JTAG vector buffer. The master is wired as an identity
            // loopback, so the buffer already holds TDO after a scan.
            0x0000_1000..=0x0000_13FF => {
                self.jtag_vector[(addr - 0x0000_1000) as usize] = data as u8;
            }
            // JTAG state/count/control registers: accepted; the loopback
            // scan completes instantly.
            0x0000_1400..=0x0000_1403 => {}
            0x0000_1800 => self.gpio = data as u16,
            0x0000_1C00 => self.i2c.tx = data as u8,
            0x0000_1C02 => self.i2c.control(data as u8),
            0x0000_1C30 => self.spi_fifo.push_back(data),
            _ => {}
        }
    }

    fn read(&mut self, addr: u32) -> u32 {
        match addr {
            0x0000_1000..=0x0000_13FF => {
                u32::from(self.jtag_vector[(addr - 0x0000_1000) as usize])
            }
            // JTAG status: the loopback master is never busy.
            0x0000_1404 => 0,
            // GPIO: upper half echoes the last write, lower half reads the
            // input pins, which the board wires to the outputs.
            0x0000_1800 => (u32::from(self.gpio) << 16) | u32::from(self.gpio),
            0x0000_1C01 => u32::from(self.i2c.rx),
            // I2C status: never busy, acknowledge always granted.
            0x0000_1C03 => 0,
            0x0000_1C31 => self.spi_fifo.pop_front().unwrap_or(0),
            _ => 0,
        }
    }
}

/// Register-file I2C device at the far end of the master.
///
/// A write address byte is followed by a register index; subsequent data
/// bytes fill consecutive registers. Reads return consecutive registers
/// from the current index. Registers 4..8 come up holding `0x12345678`.
struct I2cDevice {
    regs: [u8; 256],
    tx: u8,
    rx: u8,
    reg_ptr: u8,
    expect_reg_index: bool,
}

impl I2cDevice {
    fn new() -> Self {
        let mut regs = [0u8; 256];
        regs[4..8].copy_from_slice(&[0x12, 0x34, 0x56, 0x78]);
        Self {
            regs,
            tx: 0,
            rx: 0,
            reg_ptr: 0,
            expect_reg_index: false,
        }
    }

    fn control(&mut self, ctrl: u8) {
        const EXECUTE: u8 = 0x01;
        const WRITE: u8 = 0x02;
        const START: u8 = 0x08;

        if ctrl & EXECUTE == 0 {
            return;
        }
        if ctrl & WRITE != 0 {
            if ctrl & START != 0 {
                // Address byte; a write-direction address is followed by
                // the register index, a read-direction one is not.
                self.expect_reg_index = self.tx & 1 == 0;
            } else if self.expect_reg_index {
                self.reg_ptr = self.tx;
                self.expect_reg_index = false;
            } else {
                self.regs[usize::from(self.reg_ptr)] = self.tx;
                self.reg_ptr = self.reg_ptr.wrapping_add(1);
            }
        } else {
            self.rx = self.regs[usize::from(self.reg_ptr)];
            self.reg_ptr = self.reg_ptr.wrapping_add(1);
        }
    }
}
