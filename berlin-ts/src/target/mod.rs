//! Per-generation constants and the variant trait.

pub mod chip;

pub use chip::{BerlinB, BerlinD, Generation, IcVariant};

/// IcInfo record address (all Berlin generations).
pub const BERLIN_IC_INFO_ADDR: u32 = 0x1_0068;

/// Firmware version record, Berlin B.
pub const BERLIN_B_VERSION_ADDR: u32 = 0x1_000C;

/// Firmware version record, Berlin D.
pub const BERLIN_D_VERSION_ADDR: u32 = 0x1_0014;
