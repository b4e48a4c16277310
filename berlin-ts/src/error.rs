//! Error types for berlin-ts.

use std::io;
use thiserror::Error;

/// Result type for berlin-ts operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Transport-level failure reported by a [`Bus`](crate::bus::Bus).
///
/// Never retried by the protocol layers; it is propagated as soon as it is
/// seen.
#[derive(Debug, Error)]
pub enum BusError {
    /// The device did not acknowledge an access.
    #[error("no acknowledge at register 0x{addr:08X}")]
    Nack {
        /// Register address of the failed access.
        addr: u32,
    },

    /// Underlying I/O error (i2c-dev, spidev, file backed dumps).
    #[error("bus I/O error: {0}")]
    Io(#[from] io::Error),

    /// Any other transport specific failure.
    #[error("bus error: {0}")]
    Other(String),
}

/// Error type for berlin-ts operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Register bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Checksum mismatch after the local retry bound was exhausted.
    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum carried by the data.
        expected: u32,
        /// Checksum computed locally.
        actual: u32,
    },

    /// Ack or status never reached the expected value within its budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IcInfo is malformed or lacks a required register address.
    #[error("Invalid IC descriptor: {0}")]
    InvalidDescriptor(String),

    /// No event frame has been posted yet.
    #[error("no event data")]
    NoData,

    /// Device answered with a non-retryable status.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Firmware image is malformed.
    #[error("Invalid firmware: {0}")]
    InvalidFirmware(String),

    /// Caller supplied an out-of-range argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Device is not in a state that allows the operation.
    #[error("Device not ready: {0}")]
    NotReady(String),

    /// Operation stopped by the registered interrupt checker.
    #[error("Operation interrupted")]
    Interrupted,

    /// I/O error (firmware files, dumps).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Build a [`Error::ChecksumMismatch`] from 16-bit sums.
    pub fn checksum16(expected: u16, actual: u16) -> Self {
        Self::ChecksumMismatch {
            expected: u32::from(expected),
            actual: u32::from(actual),
        }
    }

    /// Whether this error came from the transport.
    pub fn is_bus(&self) -> bool {
        matches!(self, Self::Bus(_))
    }
}
