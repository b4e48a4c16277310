//! Wire protocol: command/ack transactions, flash staging, event frames and
//! the descriptors read at bring-up.
//!
//! All exchanges go through a [`Session`], which borrows the bus exclusively
//! for its lifetime. Holding a session therefore *is* the single in-flight
//! transaction guarantee: the device context only creates one while it owns
//! the bus lock.

pub mod checksum;
pub mod command;
pub mod event;
pub mod flash;
pub mod ic_info;
pub mod version;

use std::time::Duration;

use log::trace;

use crate::bus::{Bus, Delay};
use crate::error::{Error, Result};

/// Exclusive, borrowed access to the register bus plus a delay source.
pub struct Session<'a, B: Bus + ?Sized> {
    bus: &'a mut B,
    delay: &'a dyn Delay,
}

impl<'a, B: Bus + ?Sized> Session<'a, B> {
    /// Create a session over `bus`.
    pub fn new(bus: &'a mut B, delay: &'a dyn Delay) -> Self {
        Self { bus, delay }
    }

    /// Raw register read.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.bus.read(addr, buf)?;
        trace!("rd 0x{addr:08X} [{}]: {:?}", buf.len(), TraceBytes(buf));
        Ok(())
    }

    /// Raw register write.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        trace!("wr 0x{addr:08X} [{}]: {:?}", data.len(), TraceBytes(data));
        self.bus.write(addr, data)?;
        Ok(())
    }

    /// Sleep through the injected delay source.
    pub fn sleep(&self, duration: Duration) {
        self.delay.delay(duration);
    }

    /// Read `len` bytes into a fresh buffer.
    pub fn read_vec(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read(addr, &mut buf)?;
        Ok(buf)
    }

    /// Poll `addr` until its first two bytes equal `sentinel`.
    ///
    /// Reads `len` bytes per poll (at least 2) and returns the last read.
    /// Waits `interval` before each poll; fails with [`Error::Timeout`] after
    /// `max_polls` reads.
    pub fn poll_sentinel(
        &mut self,
        addr: u32,
        len: usize,
        sentinel: [u8; 2],
        interval: Duration,
        max_polls: usize,
    ) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len.max(2)];
        for poll in 1..=max_polls {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            self.sleep(interval);
            self.read(addr, &mut buf)?;
            if buf[..2] == sentinel {
                trace!("sentinel {sentinel:02X?} at 0x{addr:08X} after {poll} polls");
                return Ok(buf);
            }
        }
        Err(Error::Timeout(format!(
            "status at 0x{addr:08X} is {:02X?}, want {sentinel:02X?} after {max_polls} polls",
            &buf[..2]
        )))
    }
}

/// Truncating byte formatter for trace output.
struct TraceBytes<'a>(&'a [u8]);

impl std::fmt::Debug for TraceBytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const MAX: usize = 32;
        if self.0.len() > MAX {
            write!(f, "{:02X?}..", &self.0[..MAX])
        } else {
            write!(f, "{:02X?}", self.0)
        }
    }
}
