//! I2C master controller.
//!
//! Sequences the memory-mapped I2C master byte by byte: load the transmit
//! register, pulse a control word, wait for the busy flag to clear, and
//! check for a missing acknowledge. Single-register and 32-bit multibyte
//! accessors cover the register-file style devices the boards carry.

use crate::controllers::{read_checked, write_checked};
use crate::errors::DriverError;
use crate::transport::AteTransport;

/// Wishbone base address of the I2C master.
const I2C_BASE: u32 = 0x0000_1C00;

// Register offsets.
const REG_TX: u32 = 0;
const REG_RX: u32 = 1;
const REG_CONTROL: u32 = 2;
const REG_STATUS: u32 = 3;

// Control register bits.
const CTRL_EXECUTE: u8 = 0x01;
const CTRL_WRITE: u8 = 0x02;
const CTRL_MASTER_ACK: u8 = 0x04;
const CTRL_START: u8 = 0x08;
const CTRL_STOP: u8 = 0x10;

// Status register bits.
const STATUS_BUSY: u8 = 0x01;
const STATUS_ACK_ERR: u8 = 0x02;

/// I2C master over a borrowed [`AteTransport`].
pub struct I2cController<'a> {
    ate: &'a mut AteTransport,
}

impl<'a> I2cController<'a> {
    pub fn new(ate: &'a mut AteTransport) -> Self {
        Self { ate }
    }

    /// Write one byte to a device register.
    pub fn i2c_write_reg(&mut self, dev: u8, reg: u8, value: u8) -> Result<(), DriverError> {
        self.send_byte((dev << 1) & 0xFE, CTRL_START | CTRL_WRITE | CTRL_EXECUTE)?;
        self.send_byte(reg, CTRL_WRITE | CTRL_EXECUTE)?;
        self.send_byte(value, CTRL_WRITE | CTRL_EXECUTE | CTRL_STOP)
    }

    /// Read one byte from a device register.
    pub fn i2c_read_reg(&mut self, dev: u8, reg: u8) -> Result<u8, DriverError> {
        self.send_byte((dev << 1) & 0xFE, CTRL_START | CTRL_WRITE | CTRL_EXECUTE)?;
        self.send_byte(reg, CTRL_WRITE | CTRL_EXECUTE)?;
        self.send_byte((dev << 1) | 1, CTRL_START | CTRL_WRITE | CTRL_EXECUTE)?;
        self.execute(CTRL_EXECUTE | CTRL_MASTER_ACK | CTRL_STOP)?;
        self.read_rx()
    }

    /// Write a 32-bit word to four consecutive device registers, MSB first.
    pub fn i2c_multibyte_write(&mut self, dev: u8, reg: u8, data: u32) -> Result<(), DriverError> {
        self.send_byte((dev << 1) & 0xFE, CTRL_START | CTRL_WRITE | CTRL_EXECUTE)?;
        self.send_byte(reg, CTRL_WRITE | CTRL_EXECUTE)?;
        for shift in [24, 16, 8] {
            self.send_byte((data >> shift) as u8, CTRL_WRITE | CTRL_EXECUTE)?;
        }
        self.send_byte(data as u8, CTRL_WRITE | CTRL_EXECUTE | CTRL_STOP)
    }

    /// Read a 32-bit word from four consecutive device registers, MSB
    /// first. The final byte is master-acknowledged and closes the
    /// transaction.
    pub fn i2c_multibyte_read(&mut self, dev: u8, reg: u8) -> Result<u32, DriverError> {
        self.send_byte((dev << 1) & 0xFE, CTRL_START | CTRL_WRITE | CTRL_EXECUTE)?;
        self.send_byte(reg, CTRL_WRITE | CTRL_EXECUTE)?;
        self.send_byte((dev << 1) | 1, CTRL_START | CTRL_WRITE | CTRL_EXECUTE)?;

        let mut value: u32 = 0;
        for _ in 0..3 {
            self.execute(CTRL_EXECUTE)?;
            value = (value << 8) | u32::from(self.read_rx()?);
        }
        self.execute(CTRL_EXECUTE | CTRL_MASTER_ACK | CTRL_STOP)?;
        value = (value << 8) | u32::from(self.read_rx()?);
        Ok(value)
    }

    /// Load the transmit register and run one bus cycle.
    fn send_byte(&mut self, value: u8, control: u8) -> Result<(), DriverError> {
        write_checked(self.ate, I2C_BASE + REG_TX, u32::from(value))?;
        self.execute(control)
    }

    /// Pulse the control register, poll busy until clear, check acknowledge.
    fn execute(&mut self, control: u8) -> Result<(), DriverError> {
        write_checked(self.ate, I2C_BASE + REG_CONTROL, u32::from(control))?;
        loop {
            let status = read_checked(self.ate, I2C_BASE + REG_STATUS)? as u8;
            if status & STATUS_BUSY != 0 {
                continue;
            }
            if status & STATUS_ACK_ERR != 0 {
                return Err(DriverError::Acknowledge(
                    "Acknowledge error detected during I2C transfer".into(),
                ));
            }
            return Ok(());
        }
    }

    fn read_rx(&mut self) -> Result<u8, DriverError> {
        Ok(read_checked(self.ate, I2C_BASE + REG_RX)? as u8)
    }
}
