//! Berlin firmware binary format.
//!
//! ## Layout
//!
//! ```text
//! +-------------------+  0
//! | size      u32 LE  |  bytes following offset 8
//! | checksum  u32 LE  |  sum of LE u16 words from offset 8
//! +-------------------+  8
//! | hw_pid[6]         |
//! | hw_vid[3]         |
//! | fw_pid[8]         |  product id
//! | fw_vid[4]         |  patch version, big-endian
//! | subsys_num        |
//! | chip_type         |
//! | protocol_ver      |
//! | bus_type          |
//! | flash_protect     |
//! | reserved[8]       |
//! +-------------------+  42
//! | subsystem[0] 10B  |  type u8, size u32, flash_addr u32, rsv u8
//! | subsystem[1] 10B  |
//! | ...               |
//! +-------------------+  512
//! | payloads          |  concatenated in table order
//! +-------------------+
//! ```

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;

use crate::error::{Error, Result};
use crate::protocol::version::{FirmwareVersion, ascii_id};

/// Offset of the first subsystem payload.
pub const FW_HEADER_SIZE: usize = 512;

/// Offset of the subsystem table.
pub const SUBSYS_TABLE_OFFSET: usize = 42;

/// Bytes per subsystem table entry.
pub const SUBSYS_ENTRY_SIZE: usize = 10;

/// Largest table that fits before the payloads.
pub const MAX_SUBSYSTEMS: usize = (FW_HEADER_SIZE - SUBSYS_TABLE_OFFSET) / SUBSYS_ENTRY_SIZE;

/// Subsystem type of the in-system-programming loader, never flashed.
pub const SUBSYS_TYPE_ISP: u8 = 0x01;

/// Subsystem type of the configuration block.
pub const SUBSYS_TYPE_CONFIG: u8 = 0x04;

/// Fixed header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareHeader {
    /// Bytes following offset 8.
    pub size: u32,
    /// Word checksum.
    pub checksum: u32,
    /// Hardware product id.
    pub hw_pid: [u8; 6],
    /// Hardware version.
    pub hw_vid: [u8; 3],
    /// Firmware product id.
    pub fw_pid: [u8; 8],
    /// Firmware patch version.
    pub fw_vid: [u8; 4],
    /// Subsystem count.
    pub subsys_num: u8,
    /// Chip type.
    pub chip_type: u8,
    /// Protocol version.
    pub protocol_ver: u8,
    /// Bus type.
    pub bus_type: u8,
    /// Flash protection flag.
    pub flash_protect: u8,
}

impl FirmwareHeader {
    /// Read the fixed header.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let size = reader.read_u32::<LittleEndian>()?;
        let checksum = reader.read_u32::<LittleEndian>()?;
        let mut hw_pid = [0u8; 6];
        reader.read_exact(&mut hw_pid)?;
        let mut hw_vid = [0u8; 3];
        reader.read_exact(&mut hw_vid)?;
        let mut fw_pid = [0u8; 8];
        reader.read_exact(&mut fw_pid)?;
        let mut fw_vid = [0u8; 4];
        reader.read_exact(&mut fw_vid)?;
        let subsys_num = reader.read_u8()?;
        let chip_type = reader.read_u8()?;
        let protocol_ver = reader.read_u8()?;
        let bus_type = reader.read_u8()?;
        let flash_protect = reader.read_u8()?;
        let mut reserved = [0u8; 8];
        reader.read_exact(&mut reserved)?;

        Ok(Self {
            size,
            checksum,
            hw_pid,
            hw_vid,
            fw_pid,
            fw_vid,
            subsys_num,
            chip_type,
            protocol_ver,
            bus_type,
            flash_protect,
        })
    }

    /// Product id with padding stripped.
    pub fn product_id(&self) -> String {
        ascii_id(&self.fw_pid)
    }

    /// Patch version as a comparable integer.
    pub fn patch_version(&self) -> u32 {
        u32::from_be_bytes(self.fw_vid)
    }
}

/// One flashable region.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Subsystem {
    /// Region type.
    pub kind: u8,
    /// Payload size.
    pub size: u32,
    /// Destination flash address.
    pub flash_addr: u32,
    /// Payload offset within the image.
    pub offset: usize,
}

impl Subsystem {
    /// Whether this region is the ISP loader.
    pub fn is_isp(&self) -> bool {
        self.kind == SUBSYS_TYPE_ISP
    }
}

/// Parsed firmware image.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    /// Fixed header.
    pub header: FirmwareHeader,
    /// Subsystem table.
    pub subsystems: Vec<Subsystem>,
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Load an image from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading firmware from: {}", path.display());

        let mut reader = BufReader::new(File::open(path)?);
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(data)
    }

    /// Parse and verify an image held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() < FW_HEADER_SIZE {
            return Err(Error::InvalidFirmware(format!(
                "image is {} bytes, header alone is {FW_HEADER_SIZE}",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(&data);
        let header = FirmwareHeader::read_from(&mut cursor)?;

        let declared = header.size as usize + 8;
        if declared != data.len() {
            return Err(Error::InvalidFirmware(format!(
                "header declares {declared} bytes, image is {}",
                data.len()
            )));
        }
        let actual = word_checksum(&data[8..])?;
        if actual != header.checksum {
            return Err(Error::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }

        let count = usize::from(header.subsys_num);
        if count > MAX_SUBSYSTEMS {
            return Err(Error::InvalidFirmware(format!(
                "{count} subsystems, table holds {MAX_SUBSYSTEMS}"
            )));
        }

        cursor.set_position(SUBSYS_TABLE_OFFSET as u64);
        let mut offset = FW_HEADER_SIZE;
        let mut subsystems = Vec::with_capacity(count);
        for i in 0..count {
            let kind = cursor.read_u8()?;
            let size = cursor.read_u32::<LittleEndian>()?;
            let flash_addr = cursor.read_u32::<LittleEndian>()?;
            let _reserved = cursor.read_u8()?;

            let end = offset + size as usize;
            if end > data.len() {
                return Err(Error::InvalidFirmware(format!(
                    "subsystem {i} ends at {end}, image is {} bytes",
                    data.len()
                )));
            }
            debug!("  [{i}] type 0x{kind:02X}, {size} bytes -> 0x{flash_addr:08X}");
            subsystems.push(Subsystem {
                kind,
                size,
                flash_addr,
                offset,
            });
            offset = end;
        }

        Ok(Self {
            header,
            subsystems,
            data,
        })
    }

    /// Payload of `subsystem`.
    pub fn payload(&self, subsystem: &Subsystem) -> &[u8] {
        &self.data[subsystem.offset..subsystem.offset + subsystem.size as usize]
    }

    /// Subsystems written during an update, in table order.
    pub fn flashable(&self) -> impl Iterator<Item = &Subsystem> {
        self.subsystems.iter().filter(|s| !s.is_isp())
    }

    /// Whether the running firmware should be replaced by this image.
    ///
    /// True when the product ids differ or this image carries a newer patch
    /// version.
    pub fn need_update(&self, running: &FirmwareVersion) -> bool {
        if self.header.fw_pid != running.patch_pid {
            debug!(
                "product id differs: image {} device {}",
                self.header.product_id(),
                running.product_id()
            );
            return true;
        }
        let (bin, dev) = (self.header.patch_version(), running.patch_version());
        debug!("patch version: image {bin:08X} device {dev:08X}");
        bin > dev
    }

    /// Raw image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Wrapping sum of little-endian u16 words.
pub fn word_checksum(data: &[u8]) -> Result<u32> {
    if data.len() % 2 != 0 {
        return Err(Error::InvalidFirmware(format!(
            "checksummed span has odd length {}",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(2)
        .fold(0u32, |acc, w| acc.wrapping_add(u32::from(u16::from_le_bytes([w[0], w[1]])))))
}
