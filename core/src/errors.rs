//! Unified error types for the simbench core crate.
//!
//! Two layers mirror the stack: [`LinkError`] for the telnet link (socket
//! failures, deadlines, peer close) and [`DriverError`] for the register
//! controllers on top of it. Callers decide locally whether to translate
//! these into their own failure mechanism.

use thiserror::Error;

/// Errors raised by the telnet link layer.
#[derive(Error, Debug)]
pub enum LinkError {
    /// A socket syscall failed, or a bounded queue overflowed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The wall-clock deadline elapsed before the expected data arrived.
    /// The link stays open; the caller may issue another command.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The peer closed the connection with nothing left buffered.
    /// The link must be reopened before further use.
    #[error("Connection closed: {0}")]
    Eof(String),
}

impl LinkError {
    /// Shorthand for a non-syscall I/O failure (queue overflow, misuse).
    pub fn io(msg: impl Into<String>) -> Self {
        LinkError::Io(std::io::Error::other(msg.into()))
    }
}

/// Errors raised by the register-sequencing controllers.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The underlying telnet link failed.
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// A command reported failure: an I2C NACK, a missing `OK` reply, or a
    /// register access the shell rejected.
    #[error("Acknowledge error: {0}")]
    Acknowledge(String),
}
