//! Firmware version record.
//!
//! ```text
//! +---------+---------+-----+-----------+-----------+-----+--------+-----+----------+
//! | rom_pid | rom_vid | rsv | patch_pid | patch_vid | rsv | sensor | rsv | checksum |
//! +---------+---------+-----+-----------+-----------+-----+--------+-----+----------+
//! |    6    |    3    |  1  |     8     |     4     |  1  |   1    |  2  | 2 (LE)   |
//! +---------+---------+-----+-----------+-----------+-----+--------+-----+----------+
//! ```

use std::fmt;
use std::time::Duration;

use log::{debug, warn};

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::protocol::Session;
use crate::protocol::checksum::{append_checksum16, verify_checksum16};

/// Size of the on-device version record.
pub const VERSION_RECORD_LEN: usize = 28;

const VERSION_READ_ATTEMPTS: usize = 3;
const VERSION_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Running firmware identification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareVersion {
    /// ROM product id (ASCII).
    pub rom_pid: [u8; 6],
    /// ROM version.
    pub rom_vid: [u8; 3],
    /// Patch product id (ASCII, NUL padded).
    pub patch_pid: [u8; 8],
    /// Patch version, most significant byte first.
    pub patch_vid: [u8; 4],
    /// Sensor id strapped on the module.
    pub sensor_id: u8,
}

impl FirmwareVersion {
    /// Parse a record, checksum included.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < VERSION_RECORD_LEN {
            return Err(Error::InvalidArgument(format!(
                "version record is {} bytes, need {VERSION_RECORD_LEN}",
                data.len()
            )));
        }
        let data = &data[..VERSION_RECORD_LEN];
        verify_checksum16(data)?;

        let mut v = Self::default();
        v.rom_pid.copy_from_slice(&data[0..6]);
        v.rom_vid.copy_from_slice(&data[6..9]);
        v.patch_pid.copy_from_slice(&data[10..18]);
        v.patch_vid.copy_from_slice(&data[18..22]);
        v.sensor_id = data[23];
        Ok(v)
    }

    /// Serialize to the on-device layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(VERSION_RECORD_LEN);
        buf.extend_from_slice(&self.rom_pid);
        buf.extend_from_slice(&self.rom_vid);
        buf.push(0);
        buf.extend_from_slice(&self.patch_pid);
        buf.extend_from_slice(&self.patch_vid);
        buf.push(0);
        buf.push(self.sensor_id);
        buf.extend_from_slice(&[0, 0]);
        append_checksum16(&mut buf);
        buf
    }

    /// Patch product id with padding stripped.
    pub fn product_id(&self) -> String {
        ascii_id(&self.patch_pid)
    }

    /// Patch version as a comparable integer.
    pub fn patch_version(&self) -> u32 {
        u32::from_be_bytes(self.patch_vid)
    }
}

/// Render a NUL padded ASCII id.
pub(crate) fn ascii_id(raw: &[u8]) -> String {
    raw.iter()
        .take_while(|b| **b != 0)
        .map(|b| char::from(*b))
        .collect()
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rom {} {:02X?} patch {} {:02X}{:02X}{:02X}{:02X} sensor {}",
            ascii_id(&self.rom_pid),
            self.rom_vid,
            self.product_id(),
            self.patch_vid[0],
            self.patch_vid[1],
            self.patch_vid[2],
            self.patch_vid[3],
            self.sensor_id
        )
    }
}

impl<B: Bus + ?Sized> Session<'_, B> {
    /// Read the version record at `addr`, retrying checksum failures.
    pub fn read_version(&mut self, addr: u32) -> Result<FirmwareVersion> {
        let mut last_err = Error::NoData;
        for attempt in 1..=VERSION_READ_ATTEMPTS {
            if attempt > 1 {
                self.sleep(VERSION_RETRY_DELAY);
            }
            let raw = self.read_vec(addr, VERSION_RECORD_LEN)?;
            match FirmwareVersion::parse(&raw) {
                Ok(v) => {
                    debug!("firmware version: {v}");
                    return Ok(v);
                },
                Err(e) => {
                    warn!("version record (attempt {attempt}/{VERSION_READ_ATTEMPTS}): {e}");
                    last_err = e;
                },
            }
        }
        Err(last_err)
    }
}
