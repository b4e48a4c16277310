//! # berlin-ts
//!
//! Protocol engine for Goodix Berlin touch controllers (GT9895, GT9916,
//! GT9896 families).
//!
//! The crate drives the controller firmware over a register bus:
//!
//! - checksum-framed command/ack transactions with bounded retries
//! - flash reads and writes through the firmware staging buffer
//! - touch event frame decoding (coordinates, status, gestures)
//! - an ESD watchdog that detects firmware lockups and recovers
//! - production self-tests (open, short, jitter, SRAM, SNR) reported by
//!   physical pin
//! - firmware image parsing, update decision and flashing
//!
//! ## Supported Generations
//!
//! - Berlin B ([`BerlinB`])
//! - Berlin D ([`BerlinD`])
//!
//! ## Features
//!
//! - `serde`: Serialization support for data types
//! - `hal`: [`Bus`] adapter for any `embedded-hal` 1.0 I2C bus
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use berlin_ts::{
//!     BerlinD, Bus, BusError, Device, DeviceConfig, HardwareOps, NoPlatform, StdDelay,
//!     TouchEvent,
//! };
//!
//! struct MyBus;
//!
//! impl Bus for MyBus {
//!     fn read(&mut self, _addr: u32, _buf: &mut [u8]) -> Result<(), BusError> {
//!         Ok(())
//!     }
//!     fn write(&mut self, _addr: u32, _data: &[u8]) -> Result<(), BusError> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> berlin_ts::Result<()> {
//!     let device = Device::<BerlinD, _, _>::new(
//!         MyBus,
//!         NoPlatform,
//!         Arc::new(StdDelay),
//!         DeviceConfig::default(),
//!     );
//!     device.probe()?;
//!
//!     // From the interrupt handler
//!     let mut events: Vec<TouchEvent> = Vec::new();
//!     device.event_handler(&mut events)?;
//!
//!     println!("{}", device.open_test()?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod bus;
pub mod device;
pub mod error;
pub mod esd;
pub mod image;
pub mod protocol;
pub mod selftest;
pub mod target;

#[cfg(test)]
pub(crate) mod testutil;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Polling loops
/// and chunked flash writes check it between steps.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Interrupt the calling thread's operation after `checks` more polls of
/// the checker; `None` clears it. Other threads never see the request.
#[cfg(test)]
pub(crate) fn test_interrupt_after(checks: Option<usize>) {
    use std::cell::Cell;
    use std::sync::Once;

    thread_local! {
        static REMAINING: Cell<Option<usize>> = const { Cell::new(None) };
    }
    static INSTALL: Once = Once::new();

    INSTALL.call_once(|| {
        set_interrupt_checker(|| {
            REMAINING.with(|remaining| match remaining.get() {
                None => false,
                Some(0) => true,
                Some(n) => {
                    remaining.set(Some(n - 1));
                    false
                },
            })
        });
    });
    REMAINING.with(|remaining| remaining.set(checks));
}

// Re-exports for convenience
#[cfg(feature = "hal")]
pub use bus::hal::HalI2cBus;
pub use {
    bus::{Bus, Delay, NoPlatform, Platform, StdDelay},
    device::{
        CapacitanceData, CapacitanceKind, Device, DeviceConfig, EarDetect, GripZone, HardwareOps,
        PowerState, ProxIntensity, ShortThresholds, SoftConfig,
        update::UpdateOutcome,
    },
    error::{BusError, Error, Result},
    esd::{EsdState, EsdStatus, EsdWatchdog},
    image::{FirmwareImage, Subsystem},
    protocol::{
        command::{Command, ids},
        event::{Coordinate, EventFrame, EventSink, Gesture, Status, TouchAction, TouchEvent},
        ic_info::IcInfo,
        version::FirmwareVersion,
    },
    selftest::{
        ChannelMap, DieChannel, Pin, ShortFault, ShortPeer, SnrMode, TestKind, TestReport,
        TestResult,
    },
    target::{BerlinB, BerlinD, Generation, IcVariant},
};
