//! IcInfo descriptor.
//!
//! Read once at bring-up (and after every firmware update or full reset) from
//! a fixed, generation specific address. Every other component takes its
//! register addresses from here.
//!
//! ## Layout
//!
//! All fields little-endian.
//!
//! ```text
//! +-----------+------------------+------------------+
//! | length    | u16              | whole record     |
//! +-----------+------------------+------------------+
//! | version   | 16 bytes         | ids, config id   |
//! | feature   | 5 x u16          | feature bitmaps  |
//! | param     | 4 x u8 + arrays  | channel counts   |
//! | misc      | register map     | cmd/fw/touch/esd |
//! | product   | 12 bytes         | names, sponge    |
//! +-----------+------------------+------------------+
//! | checksum  | u16              | sum of the above |
//! +-----------+------------------+------------------+
//! ```
//!
//! The parameter block carries five count-prefixed `u16` arrays (scan rates
//! and frequency tables), so the record length varies between firmwares.

use std::fmt;
use std::io::{Cursor, Read};
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::protocol::Session;
use crate::protocol::checksum::{CHECKSUM16_LEN, checksum16, verify_checksum16};

/// Upper bound on a sane IcInfo record.
pub const IC_INFO_MAX_LEN: usize = 1024;

/// Lower bound: length field, fixed blocks with empty arrays, checksum.
pub const IC_INFO_MIN_LEN: usize = 2 + 16 + 10 + 4 + 5 + MISC_LEN + PRODUCT_LEN + CHECKSUM16_LEN;

/// Maximum entries in one parameter array.
pub const MAX_PARAM_ARRAY: usize = 8;

/// Read attempts before a checksum error is surfaced.
const IC_INFO_READ_ATTEMPTS: usize = 3;

/// Delay between read attempts.
const IC_INFO_RETRY_DELAY: Duration = Duration::from_millis(10);

const MISC_LEN: usize = 114;
const PRODUCT_LEN: usize = 12;

/// Identification block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IcVersionBlock {
    /// Descriptor customer id.
    pub info_customer_id: u8,
    /// Descriptor format version.
    pub info_version_id: u8,
    /// Die id.
    pub ic_die_id: u8,
    /// Silicon version.
    pub ic_version_id: u8,
    /// Active configuration id.
    pub config_id: u32,
    /// Active configuration version.
    pub config_version: u8,
    /// Frame data customer id.
    pub frame_data_customer_id: u8,
    /// Frame data format version.
    pub frame_data_version_id: u8,
    /// Touch data customer id.
    pub touch_data_customer_id: u8,
    /// Touch data format version.
    pub touch_data_version_id: u8,
}

/// Feature bitmaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IcFeatureBlock {
    /// Frequency hopping.
    pub freqhop_feature: u16,
    /// Calibration.
    pub calibration_feature: u16,
    /// Gestures.
    pub gesture_feature: u16,
    /// Side touch.
    pub side_touch_feature: u16,
    /// Stylus.
    pub stylus_feature: u16,
}

/// Panel parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IcParamBlock {
    /// Drive channels.
    pub drv_num: u8,
    /// Sense channels.
    pub sen_num: u8,
    /// Touch keys.
    pub button_num: u8,
    /// Force channels.
    pub force_num: u8,
    /// Active scan rates.
    pub active_scan_rate: Vec<u16>,
    /// Mutual scan frequencies.
    pub mutual_freq: Vec<u16>,
    /// Self TX frequencies.
    pub self_tx_freq: Vec<u16>,
    /// Self RX frequencies.
    pub self_rx_freq: Vec<u16>,
    /// Stylus frequencies.
    pub stylus_freq: Vec<u16>,
}

/// Register map.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IcMiscBlock {
    pub cmd_addr: u32,
    pub cmd_max_len: u16,
    pub cmd_reply_addr: u32,
    pub cmd_reply_len: u16,
    pub fw_state_addr: u32,
    pub fw_state_len: u16,
    pub fw_buffer_addr: u32,
    pub fw_buffer_max_len: u16,
    pub frame_data_addr: u32,
    pub frame_data_head_len: u16,
    pub fw_attr_len: u16,
    pub fw_log_len: u16,
    pub pack_max_num: u8,
    pub pack_compress_version: u8,
    pub stylus_struct_len: u16,
    pub mutual_struct_len: u16,
    pub self_struct_len: u16,
    pub noise_struct_len: u16,
    pub touch_data_addr: u32,
    pub touch_data_head_len: u16,
    pub point_struct_len: u16,
    pub mutual_rawdata_addr: u32,
    pub mutual_diffdata_addr: u32,
    pub mutual_refdata_addr: u32,
    pub self_rawdata_addr: u32,
    pub self_diffdata_addr: u32,
    pub self_refdata_addr: u32,
    pub iq_rawdata_addr: u32,
    pub iq_refdata_addr: u32,
    pub im_rawdata_addr: u32,
    pub im_rawdata_len: u16,
    pub noise_rawdata_addr: u32,
    pub noise_rawdata_len: u16,
    pub stylus_rawdata_addr: u32,
    pub stylus_rawdata_len: u16,
    pub noise_data_addr: u32,
    pub esd_addr: u32,
}

/// Product identification and auxiliary regions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IcProductBlock {
    /// IC name index.
    pub ic_name_list: u8,
    /// Project id.
    pub project_id: u8,
    /// Module version.
    pub module_version: u8,
    /// Firmware version.
    pub firmware_version: u8,
    /// Sponge (low power gesture) region.
    pub sponge_addr: u32,
    /// Production test result region.
    pub production_test_addr: u32,
}

/// Parsed IcInfo record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IcInfo {
    /// Identification.
    pub version: IcVersionBlock,
    /// Feature bitmaps.
    pub feature: IcFeatureBlock,
    /// Panel parameters.
    pub parm: IcParamBlock,
    /// Register map.
    pub misc: IcMiscBlock,
    /// Product block.
    pub other: IcProductBlock,
}

fn eof(e: std::io::Error) -> Error {
    Error::InvalidDescriptor(format!("record truncated: {e}"))
}

fn read_array<R: Read>(reader: &mut R, name: &str) -> Result<Vec<u16>> {
    let count = usize::from(reader.read_u8().map_err(eof)?);
    if count > MAX_PARAM_ARRAY {
        return Err(Error::InvalidDescriptor(format!(
            "{name} has {count} entries, max {MAX_PARAM_ARRAY}"
        )));
    }
    (0..count)
        .map(|_| reader.read_u16::<LittleEndian>().map_err(eof))
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn write_array(buf: &mut Vec<u8>, values: &[u16]) {
    buf.push(values.len() as u8);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

impl IcVersionBlock {
    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let block = Self {
            info_customer_id: r.read_u8().map_err(eof)?,
            info_version_id: r.read_u8().map_err(eof)?,
            ic_die_id: r.read_u8().map_err(eof)?,
            ic_version_id: r.read_u8().map_err(eof)?,
            config_id: r.read_u32::<LittleEndian>().map_err(eof)?,
            config_version: r.read_u8().map_err(eof)?,
            frame_data_customer_id: r.read_u8().map_err(eof)?,
            frame_data_version_id: r.read_u8().map_err(eof)?,
            touch_data_customer_id: r.read_u8().map_err(eof)?,
            touch_data_version_id: r.read_u8().map_err(eof)?,
        };
        let mut reserved = [0u8; 3];
        r.read_exact(&mut reserved).map_err(eof)?;
        Ok(block)
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&[
            self.info_customer_id,
            self.info_version_id,
            self.ic_die_id,
            self.ic_version_id,
        ]);
        buf.extend_from_slice(&self.config_id.to_le_bytes());
        buf.extend_from_slice(&[
            self.config_version,
            self.frame_data_customer_id,
            self.frame_data_version_id,
            self.touch_data_customer_id,
            self.touch_data_version_id,
            0,
            0,
            0,
        ]);
    }
}

impl IcFeatureBlock {
    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            freqhop_feature: r.read_u16::<LittleEndian>().map_err(eof)?,
            calibration_feature: r.read_u16::<LittleEndian>().map_err(eof)?,
            gesture_feature: r.read_u16::<LittleEndian>().map_err(eof)?,
            side_touch_feature: r.read_u16::<LittleEndian>().map_err(eof)?,
            stylus_feature: r.read_u16::<LittleEndian>().map_err(eof)?,
        })
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        for v in [
            self.freqhop_feature,
            self.calibration_feature,
            self.gesture_feature,
            self.side_touch_feature,
            self.stylus_feature,
        ] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }
}

impl IcParamBlock {
    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            drv_num: r.read_u8().map_err(eof)?,
            sen_num: r.read_u8().map_err(eof)?,
            button_num: r.read_u8().map_err(eof)?,
            force_num: r.read_u8().map_err(eof)?,
            active_scan_rate: read_array(r, "active_scan_rate")?,
            mutual_freq: read_array(r, "mutual_freq")?,
            self_tx_freq: read_array(r, "self_tx_freq")?,
            self_rx_freq: read_array(r, "self_rx_freq")?,
            stylus_freq: read_array(r, "stylus_freq")?,
        })
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&[self.drv_num, self.sen_num, self.button_num, self.force_num]);
        write_array(buf, &self.active_scan_rate);
        write_array(buf, &self.mutual_freq);
        write_array(buf, &self.self_tx_freq);
        write_array(buf, &self.self_rx_freq);
        write_array(buf, &self.stylus_freq);
    }
}

impl IcMiscBlock {
    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let u32le = |r: &mut R| r.read_u32::<LittleEndian>().map_err(eof);
        let u16le = |r: &mut R| r.read_u16::<LittleEndian>().map_err(eof);

        let mut m = Self {
            cmd_addr: u32le(r)?,
            cmd_max_len: u16le(r)?,
            cmd_reply_addr: u32le(r)?,
            cmd_reply_len: u16le(r)?,
            fw_state_addr: u32le(r)?,
            fw_state_len: u16le(r)?,
            fw_buffer_addr: u32le(r)?,
            fw_buffer_max_len: u16le(r)?,
            frame_data_addr: u32le(r)?,
            frame_data_head_len: u16le(r)?,
            fw_attr_len: u16le(r)?,
            fw_log_len: u16le(r)?,
            pack_max_num: r.read_u8().map_err(eof)?,
            pack_compress_version: r.read_u8().map_err(eof)?,
            stylus_struct_len: u16le(r)?,
            mutual_struct_len: u16le(r)?,
            self_struct_len: u16le(r)?,
            noise_struct_len: u16le(r)?,
            touch_data_addr: u32le(r)?,
            touch_data_head_len: u16le(r)?,
            point_struct_len: u16le(r)?,
            ..Self::default()
        };
        // two reserved u16
        u16le(r)?;
        u16le(r)?;
        m.mutual_rawdata_addr = u32le(r)?;
        m.mutual_diffdata_addr = u32le(r)?;
        m.mutual_refdata_addr = u32le(r)?;
        m.self_rawdata_addr = u32le(r)?;
        m.self_diffdata_addr = u32le(r)?;
        m.self_refdata_addr = u32le(r)?;
        m.iq_rawdata_addr = u32le(r)?;
        m.iq_refdata_addr = u32le(r)?;
        m.im_rawdata_addr = u32le(r)?;
        m.im_rawdata_len = u16le(r)?;
        m.noise_rawdata_addr = u32le(r)?;
        m.noise_rawdata_len = u16le(r)?;
        m.stylus_rawdata_addr = u32le(r)?;
        m.stylus_rawdata_len = u16le(r)?;
        m.noise_data_addr = u32le(r)?;
        m.esd_addr = u32le(r)?;
        Ok(m)
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        let w32 = |buf: &mut Vec<u8>, v: u32| buf.extend_from_slice(&v.to_le_bytes());
        w32(buf, self.cmd_addr);
        buf.extend_from_slice(&self.cmd_max_len.to_le_bytes());
        w32(buf, self.cmd_reply_addr);
        buf.extend_from_slice(&self.cmd_reply_len.to_le_bytes());
        w32(buf, self.fw_state_addr);
        buf.extend_from_slice(&self.fw_state_len.to_le_bytes());
        w32(buf, self.fw_buffer_addr);
        buf.extend_from_slice(&self.fw_buffer_max_len.to_le_bytes());
        w32(buf, self.frame_data_addr);
        for v in [self.frame_data_head_len, self.fw_attr_len, self.fw_log_len] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.push(self.pack_max_num);
        buf.push(self.pack_compress_version);
        for v in [
            self.stylus_struct_len,
            self.mutual_struct_len,
            self.self_struct_len,
            self.noise_struct_len,
        ] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        w32(buf, self.touch_data_addr);
        for v in [self.touch_data_head_len, self.point_struct_len, 0, 0] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        for v in [
            self.mutual_rawdata_addr,
            self.mutual_diffdata_addr,
            self.mutual_refdata_addr,
            self.self_rawdata_addr,
            self.self_diffdata_addr,
            self.self_refdata_addr,
            self.iq_rawdata_addr,
            self.iq_refdata_addr,
            self.im_rawdata_addr,
        ] {
            w32(buf, v);
        }
        buf.extend_from_slice(&self.im_rawdata_len.to_le_bytes());
        w32(buf, self.noise_rawdata_addr);
        buf.extend_from_slice(&self.noise_rawdata_len.to_le_bytes());
        w32(buf, self.stylus_rawdata_addr);
        buf.extend_from_slice(&self.stylus_rawdata_len.to_le_bytes());
        w32(buf, self.noise_data_addr);
        w32(buf, self.esd_addr);
        debug_assert_eq!(buf.len() - start, MISC_LEN);
    }
}

impl IcProductBlock {
    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            ic_name_list: r.read_u8().map_err(eof)?,
            project_id: r.read_u8().map_err(eof)?,
            module_version: r.read_u8().map_err(eof)?,
            firmware_version: r.read_u8().map_err(eof)?,
            sponge_addr: r.read_u32::<LittleEndian>().map_err(eof)?,
            production_test_addr: r.read_u32::<LittleEndian>().map_err(eof)?,
        })
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&[
            self.ic_name_list,
            self.project_id,
            self.module_version,
            self.firmware_version,
        ]);
        buf.extend_from_slice(&self.sponge_addr.to_le_bytes());
        buf.extend_from_slice(&self.production_test_addr.to_le_bytes());
    }
}

impl IcInfo {
    /// Parse a complete record (length prefix through checksum).
    ///
    /// Verifies length, checksum and the presence of the mandatory register
    /// addresses.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let length = declared_len(data)?;
        if data.len() < length {
            return Err(Error::InvalidDescriptor(format!(
                "record declares {length} bytes, got {}",
                data.len()
            )));
        }
        let record = &data[..length];
        verify_checksum16(record)?;

        let mut cursor = Cursor::new(&record[2..length - CHECKSUM16_LEN]);
        let info = Self {
            version: IcVersionBlock::read_from(&mut cursor)?,
            feature: IcFeatureBlock::read_from(&mut cursor)?,
            parm: IcParamBlock::read_from(&mut cursor)?,
            misc: IcMiscBlock::read_from(&mut cursor)?,
            other: IcProductBlock::read_from(&mut cursor)?,
        };
        info.validate()?;
        Ok(info)
    }

    /// Serialize to the on-device layout, length and checksum included.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8, 0u8];
        self.version.write_to(&mut buf);
        self.feature.write_to(&mut buf);
        self.parm.write_to(&mut buf);
        self.misc.write_to(&mut buf);
        self.other.write_to(&mut buf);
        let total = (buf.len() + CHECKSUM16_LEN) as u16;
        buf[..2].copy_from_slice(&total.to_le_bytes());
        let ck = checksum16(&buf);
        buf.extend_from_slice(&ck.to_le_bytes());
        buf
    }

    /// Check that the mandatory register addresses are present.
    pub fn validate(&self) -> Result<()> {
        for (name, addr) in [
            ("cmd_addr", self.misc.cmd_addr),
            ("fw_buffer_addr", self.misc.fw_buffer_addr),
            ("touch_data_addr", self.misc.touch_data_addr),
        ] {
            if addr == 0 {
                return Err(Error::InvalidDescriptor(format!("{name} is zero")));
            }
        }
        if self.misc.fw_buffer_max_len == 0 {
            return Err(Error::InvalidDescriptor("fw_buffer_max_len is zero".into()));
        }
        Ok(())
    }

    /// Firmware identification string, e.g. `GT98950107`.
    pub fn firmware_string(&self) -> String {
        format!(
            "GT{:02X}{:02X}{:02X}{:02X}",
            self.other.ic_name_list,
            self.other.project_id,
            self.other.module_version,
            self.other.firmware_version
        )
    }

    /// Configuration identification string, e.g. `GT_12345678_02`.
    pub fn config_string(&self) -> String {
        format!(
            "GT_{:08X}_{:02X}",
            self.version.config_id, self.version.config_version
        )
    }
}

impl fmt::Display for IcInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} drv={} sen={} cmd=0x{:08X} touch=0x{:08X} esd=0x{:08X}",
            self.firmware_string(),
            self.config_string(),
            self.parm.drv_num,
            self.parm.sen_num,
            self.misc.cmd_addr,
            self.misc.touch_data_addr,
            self.misc.esd_addr
        )
    }
}

fn declared_len(data: &[u8]) -> Result<usize> {
    if data.len() < 2 {
        return Err(Error::InvalidDescriptor("missing length field".into()));
    }
    let length = usize::from(u16::from_le_bytes([data[0], data[1]]));
    if !(IC_INFO_MIN_LEN..=IC_INFO_MAX_LEN).contains(&length) {
        return Err(Error::InvalidDescriptor(format!(
            "implausible record length {length}"
        )));
    }
    Ok(length)
}

impl<B: Bus + ?Sized> Session<'_, B> {
    /// Read and parse the IcInfo record at `addr`.
    ///
    /// Checksum failures and implausible lengths are retried; missing
    /// register addresses are not.
    pub fn read_ic_info(&mut self, addr: u32) -> Result<IcInfo> {
        let mut last_err = Error::InvalidDescriptor("not read".into());
        for attempt in 1..=IC_INFO_READ_ATTEMPTS {
            if attempt > 1 {
                self.sleep(IC_INFO_RETRY_DELAY);
            }
            let mut len_buf = [0u8; 2];
            self.read(addr, &mut len_buf)?;
            let length = match declared_len(&len_buf) {
                Ok(l) => l,
                Err(e) => {
                    warn!("ic info length (attempt {attempt}/{IC_INFO_READ_ATTEMPTS}): {e}");
                    last_err = e;
                    continue;
                },
            };
            let raw = self.read_vec(addr, length)?;
            match IcInfo::parse(&raw) {
                Ok(info) => {
                    debug!("ic info: {info}");
                    return Ok(info);
                },
                Err(e @ Error::ChecksumMismatch { .. }) => {
                    warn!("ic info checksum (attempt {attempt}/{IC_INFO_READ_ATTEMPTS}): {e}");
                    last_err = e;
                },
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{RecordingDelay, SimDevice, sample_ic_info};

    const ADDR: u32 = 0x10068;

    #[test]
    fn test_round_trip() {
        let info = sample_ic_info();
        let raw = info.to_bytes();
        assert_eq!(usize::from(u16::from_le_bytes([raw[0], raw[1]])), raw.len());
        assert_eq!(IcInfo::parse(&raw).unwrap(), info);
    }

    #[test]
    fn test_min_len_matches_empty_record() {
        let mut info = IcInfo::default();
        info.misc.cmd_addr = 1;
        info.misc.fw_buffer_addr = 1;
        info.misc.fw_buffer_max_len = 1;
        info.misc.touch_data_addr = 1;
        assert_eq!(info.to_bytes().len(), IC_INFO_MIN_LEN);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut raw = sample_ic_info().to_bytes();
        raw[20] ^= 0x01;
        assert!(matches!(
            IcInfo::parse(&raw),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_cmd_addr_is_invalid_descriptor() {
        let mut info = sample_ic_info();
        info.misc.cmd_addr = 0;
        let err = IcInfo::parse(&info.to_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidDescriptor(ref m) if m.contains("cmd_addr")));
    }

    #[test]
    fn test_missing_touch_data_addr_is_invalid_descriptor() {
        let mut info = sample_ic_info();
        info.misc.touch_data_addr = 0;
        assert!(matches!(
            IcInfo::parse(&info.to_bytes()),
            Err(Error::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn test_oversized_array_rejected() {
        let mut info = sample_ic_info();
        info.parm.mutual_freq = vec![1; MAX_PARAM_ARRAY + 1];
        assert!(matches!(
            IcInfo::parse(&info.to_bytes()),
            Err(Error::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn test_strings() {
        let info = sample_ic_info();
        assert_eq!(info.firmware_string(), "GT98950107");
        assert_eq!(info.config_string(), "GT_12345678_02");
    }

    #[test]
    fn test_read_retries_on_checksum() {
        let info = sample_ic_info();
        let raw = info.to_bytes();
        let mut bad = raw.clone();
        bad[30] ^= 0xFF;

        let sim = SimDevice::new();
        sim.poke(ADDR, &raw);
        // length read then full read of the first attempt
        sim.queue_read(ADDR, &raw[..2]);
        sim.queue_read(ADDR, &bad);
        let delay = RecordingDelay::default();
        let mut bus = sim.clone();
        let mut session = Session::new(&mut bus, &delay);
        assert_eq!(session.read_ic_info(ADDR).unwrap(), info);
        assert_eq!(sim.reads_at(ADDR), 4);
    }

    #[test]
    fn test_read_gives_up_after_three_attempts() {
        let mut raw = sample_ic_info().to_bytes();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let sim = SimDevice::new();
        sim.poke(ADDR, &raw);
        let delay = RecordingDelay::default();
        let mut bus = sim.clone();
        let mut session = Session::new(&mut bus, &delay);
        assert!(matches!(
            session.read_ic_info(ADDR),
            Err(Error::ChecksumMismatch { .. })
        ));
        assert_eq!(sim.reads_at(ADDR), 6);
    }
}
