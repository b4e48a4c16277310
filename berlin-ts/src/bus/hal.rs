//! [`Bus`] adapter over an `embedded-hal` 1.0 I2C bus.
//!
//! Every transfer starts with the register address as four big-endian bytes:
//!
//! ```text
//! write: S | dev+W | A3 A2 A1 A0 | data...            | P
//! read:  S | dev+W | A3 A2 A1 A0 | Sr | dev+R | data... | P
//! ```
//!
//! Transfers larger than the configured chunk size are split and the
//! register address advanced between chunks.

use embedded_hal::i2c::{Error as _, ErrorKind, I2c, NoAcknowledgeSource};

use crate::bus::Bus;
use crate::error::BusError;

/// Default 7-bit I2C address of Berlin controllers.
pub const DEFAULT_I2C_ADDR: u8 = 0x5D;

/// Default maximum payload per I2C transaction.
pub const DEFAULT_MAX_TRANSFER: usize = 256;

/// Register bus on top of an `embedded_hal::i2c::I2c` implementation.
#[derive(Debug)]
pub struct HalI2cBus<I> {
    i2c: I,
    address: u8,
    max_transfer: usize,
}

impl<I: I2c> HalI2cBus<I> {
    /// Wrap an I2C bus using the default device address.
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            address: DEFAULT_I2C_ADDR,
            max_transfer: DEFAULT_MAX_TRANSFER,
        }
    }

    /// Use a different 7-bit device address.
    #[must_use]
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Limit the payload size of a single transaction.
    #[must_use]
    pub fn with_max_transfer(mut self, max_transfer: usize) -> Self {
        self.max_transfer = max_transfer.max(1);
        self
    }

    /// Release the wrapped I2C bus.
    pub fn into_inner(self) -> I {
        self.i2c
    }
}

fn map_err<E: embedded_hal::i2c::Error>(addr: u32, e: &E) -> BusError {
    match e.kind() {
        ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address | NoAcknowledgeSource::Unknown) => {
            BusError::Nack { addr }
        },
        kind => BusError::Other(format!("i2c: {kind:?} at 0x{addr:08X}")),
    }
}

#[allow(clippy::cast_possible_truncation)]
impl<I: I2c + Send> Bus for HalI2cBus<I> {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        let mut reg = addr;
        for chunk in buf.chunks_mut(self.max_transfer) {
            self.i2c
                .write_read(self.address, &reg.to_be_bytes(), chunk)
                .map_err(|e| map_err(reg, &e))?;
            reg = reg.wrapping_add(chunk.len() as u32);
        }
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        let mut reg = addr;
        let mut frame = Vec::with_capacity(4 + data.len().min(self.max_transfer));
        for chunk in data.chunks(self.max_transfer) {
            frame.clear();
            frame.extend_from_slice(&reg.to_be_bytes());
            frame.extend_from_slice(chunk);
            self.i2c
                .write(self.address, &frame)
                .map_err(|e| map_err(reg, &e))?;
            reg = reg.wrapping_add(chunk.len() as u32);
        }
        Ok(())
    }
}
