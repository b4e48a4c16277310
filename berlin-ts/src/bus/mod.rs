//! Register bus, board platform and delay abstractions.
//!
//! The protocol engine never touches hardware directly. Everything below the
//! command/ack layer is reached through three small traits:
//!
//! ```text
//! +-------------------------------------------+
//! |  Device context (HardwareOps)             |
//! +-----------+---------------+---------------+
//!             |               |               |
//!             v               v               v
//! +-----------+--+   +--------+-----+   +-----+-------+
//! |  Bus          |   |  Platform    |   |  Delay      |
//! |  read/write   |   |  power/reset |   |  sleep      |
//! +---------------+   +--------------+   +-------------+
//!   i2c / spi           gpio / regulator   thread / sim
//! ```
//!
//! Addresses are 32-bit register addresses in the controller's memory map.
//! Transports that need a framing prefix (e.g. the 4-byte big-endian address
//! sent ahead of every I2C transfer) add it themselves.

#[cfg(feature = "hal")]
pub mod hal;

use std::time::Duration;

use crate::error::BusError;

/// Byte-addressed register bus.
///
/// Implementations must complete the whole transfer or fail; partial reads
/// are reported as errors.
pub trait Bus: Send {
    /// Read `buf.len()` bytes starting at `addr`.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), BusError>;

    /// Write `data` starting at `addr`.
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), BusError>;
}

impl<B: Bus + ?Sized> Bus for &mut B {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        (**self).read(addr, buf)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        (**self).write(addr, data)
    }
}

impl<B: Bus + ?Sized> Bus for Box<B> {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        (**self).read(addr, buf)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        (**self).write(addr, data)
    }
}

/// Board glue: supply rails, reset line and the interrupt line.
pub trait Platform: Send {
    /// Switch the controller supplies on or off.
    fn set_power(&mut self, on: bool) -> Result<(), BusError>;

    /// Drive the reset line. `true` asserts reset (holds the IC in reset).
    fn set_reset(&mut self, asserted: bool) -> Result<(), BusError>;

    /// Enable or disable delivery of the touch interrupt.
    fn set_irq(&mut self, enabled: bool) -> Result<(), BusError>;
}

/// Platform that only logs. Useful when power and reset are handled
/// elsewhere (e.g. firmware already running on a bench fixture).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlatform;

impl Platform for NoPlatform {
    fn set_power(&mut self, on: bool) -> Result<(), BusError> {
        log::trace!("platform: power {}", if on { "on" } else { "off" });
        Ok(())
    }

    fn set_reset(&mut self, asserted: bool) -> Result<(), BusError> {
        log::trace!("platform: reset {}", if asserted { "asserted" } else { "released" });
        Ok(())
    }

    fn set_irq(&mut self, enabled: bool) -> Result<(), BusError> {
        log::trace!("platform: irq {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }
}

/// Injectable sleep.
///
/// Every polling loop in the crate waits through this trait so tests can run
/// against simulated time.
pub trait Delay: Send + Sync {
    /// Block the calling thread for `duration`.
    fn delay(&self, duration: Duration);
}

/// [`Delay`] backed by [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}
