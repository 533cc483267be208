//! JTAG scan controller.
//!
//! Drives the memory-mapped JTAG master: packs arbitrary-length bit vectors
//! into its byte-addressed buffer memory, programs the TAP start/end states
//! and bit count, polls the busy flag, and reads the captured TDO bits back.
//! Scans are exposed both as byte arrays (`ba_scan_*`, shift-first byte
//! order) and as big-endian hex strings (`scan_*`).

use tracing::debug;

use crate::controllers::{read_checked, write_checked};
use crate::errors::{DriverError, LinkError};
use crate::transport::AteTransport;

/// Wishbone base address of the JTAG master.
const JTAG_BASE: u32 = 0x0000_1000;

// Register offsets. The TDI/TDO vector buffer is byte-addressed at
// 0x000..=0x3FF; one buffer byte carries eight scan bits.
const REG_STATE_START: u32 = 0x400;
const REG_STATE_END: u32 = 0x401;
const REG_BIT_COUNT: u32 = 0x402;
const REG_CONTROL: u32 = 0x403;
const REG_STATUS: u32 = 0x404;

/// Scan cycles per `runtest` activation (the master's bit-count ceiling
/// for one pass over the vector buffer).
const RUNTEST_BLOCK: usize = 1024;

/// TAP states, encoded as the master's start/end register expects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TapState {
    TestLogicReset = 0,
    RunTestIdle = 1,
    SelectDr = 2,
    CaptureDr = 3,
    ShiftDr = 4,
    Exit1Dr = 5,
    PauseDr = 6,
    Exit2Dr = 7,
    UpdateDr = 8,
    SelectIr = 9,
    CaptureIr = 10,
    ShiftIr = 11,
    Exit1Ir = 12,
    PauseIr = 13,
    Exit2Ir = 14,
    UpdateIr = 15,
}

/// Scan engine over a borrowed [`AteTransport`].
pub struct JtagController<'a> {
    ate: &'a mut AteTransport,
}

impl<'a> JtagController<'a> {
    pub fn new(ate: &'a mut AteTransport) -> Self {
        Self { ate }
    }

    /// Shift `count` bits through the instruction register, parking in
    /// Run-Test/Idle. TDI bytes are shift-first order.
    pub fn ba_scan_ir(&mut self, tdi: &[u8], count: usize) -> Result<Vec<u8>, DriverError> {
        self.scan_vector(tdi, count, TapState::ShiftIr, TapState::RunTestIdle)
    }

    /// Shift `count` bits through the data register, parking in
    /// Run-Test/Idle. TDI bytes are shift-first order.
    pub fn ba_scan_dr(&mut self, tdi: &[u8], count: usize) -> Result<Vec<u8>, DriverError> {
        self.scan_vector(tdi, count, TapState::ShiftDr, TapState::RunTestIdle)
    }

    /// Hex-string form of [`ba_scan_ir`](JtagController::ba_scan_ir): TDI
    /// and TDO are big-endian hex text.
    pub fn scan_ir(&mut self, count: usize, tdi: &str) -> Result<String, DriverError> {
        let vector = hex_to_vector(tdi);
        let tdo = self.ba_scan_ir(&vector, count)?;
        Ok(vector_to_hex(&tdo, count))
    }

    /// Hex-string form of [`ba_scan_dr`](JtagController::ba_scan_dr).
    pub fn scan_dr(&mut self, count: usize, tdi: &str) -> Result<String, DriverError> {
        let vector = hex_to_vector(tdi);
        let tdo = self.ba_scan_dr(&vector, count)?;
        Ok(vector_to_hex(&tdo, count))
    }

    /// One scan activation: load TDI, traverse `start` → shift → `end`
    /// while shifting `count` bits, and return `ceil(count/8)` TDO bytes.
    ///
    /// # Panics
    ///
    /// Panics if `tdi` holds fewer than `ceil(count/8)` bytes.
    pub fn scan_vector(
        &mut self,
        tdi: &[u8],
        count: usize,
        start: TapState,
        end: TapState,
    ) -> Result<Vec<u8>, DriverError> {
        let full_words = count / 8;
        let remainder = count % 8;
        debug!(count, ?start, ?end, "JTAG scan");

        for (addr, &data) in tdi[..full_words].iter().enumerate() {
            self.write_reg(addr as u32, u32::from(data))?;
        }
        // A partial last word still occupies a whole buffer byte; the
        // master shifts only its low `remainder` bits.
        if remainder > 0 {
            self.write_reg(full_words as u32, u32::from(tdi[full_words]))?;
        }

        self.run_cycle(count, start, end)?;

        let mut tdo = Vec::with_capacity(full_words + usize::from(remainder > 0));
        for addr in 0..full_words {
            tdo.push(self.read_reg(addr as u32)? as u8);
        }
        if remainder > 0 {
            tdo.push(self.read_reg(full_words as u32)? as u8);
        }
        Ok(tdo)
    }

    /// Produce TCK cycles by running `ceil(ticks/1024)` idle scans from
    /// Run-Test/Idle back to Run-Test/Idle. The vector buffer contents are
    /// not meaningful on this path.
    pub fn runtest(&mut self, ticks: usize) -> Result<(), DriverError> {
        let blocks = ticks.div_ceil(RUNTEST_BLOCK);
        debug!(ticks, blocks, "JTAG runtest");
        for _ in 0..blocks {
            self.run_cycle(RUNTEST_BLOCK, TapState::RunTestIdle, TapState::RunTestIdle)?;
        }
        Ok(())
    }

    /// Program one scan activation and wait for the master to go idle.
    fn run_cycle(&mut self, count: usize, start: TapState, end: TapState) -> Result<(), DriverError> {
        self.write_reg(REG_STATE_START, u32::from(start as u8))?;
        self.write_reg(REG_STATE_END, u32::from(end as u8))?;
        self.write_reg(REG_BIT_COUNT, count as u32 & 0xFFFF)?;
        self.write_reg(REG_CONTROL, 1)?;

        let budget = self.ate.config().jtag_poll_budget;
        let mut polls: u32 = 0;
        while self.read_reg(REG_STATUS)? != 0 {
            polls += 1;
            if budget.is_some_and(|limit| polls >= limit) {
                return Err(LinkError::Timeout(
                    "JTAG master still busy after poll budget".into(),
                )
                .into());
            }
        }
        // Re-arm the trigger for the next scan cycle.
        self.write_reg(REG_CONTROL, 0)
    }

    fn write_reg(&mut self, offset: u32, value: u32) -> Result<(), DriverError> {
        write_checked(self.ate, JTAG_BASE + offset, value)
    }

    fn read_reg(&mut self, offset: u32) -> Result<u32, DriverError> {
        read_checked(self.ate, JTAG_BASE + offset)
    }
}

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Decode one hex character; unknown characters decode to 0.
fn hex_nibble(ch: u8) -> u8 {
    match ch {
        b'0'..=b'9' => ch - b'0',
        b'A'..=b'F' => ch - b'A' + 10,
        b'a'..=b'f' => ch - b'a' + 10,
        _ => 0,
    }
}

/// Pack big-endian hex text into shift-first byte order: the last two hex
/// characters land in byte 0. Odd-length input is left-padded with '0'.
fn hex_to_vector(tdi: &str) -> Vec<u8> {
    let padded;
    let text = if tdi.len() % 2 == 1 {
        padded = format!("0{tdi}");
        &padded
    } else {
        tdi
    };
    let mut vector: Vec<u8> = text
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| (hex_nibble(pair[0]) << 4) | hex_nibble(pair[1]))
        .collect();
    vector.reverse();
    vector
}

/// Format shift-first TDO bytes as big-endian uppercase hex. When the text
/// carries more bits than were scanned, the leading character is dropped.
fn vector_to_hex(tdo: &[u8], count: usize) -> String {
    let mut text = String::with_capacity(tdo.len() * 2);
    for &byte in tdo.iter().rev() {
        text.push(HEX_DIGITS[usize::from(byte >> 4)] as char);
        text.push(HEX_DIGITS[usize::from(byte & 0xF)] as char);
    }
    if text.len() * 4 > count {
        text.remove(0);
    }
    text
}
