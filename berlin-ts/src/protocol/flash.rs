//! Flash staging handshake.
//!
//! Flash is never addressed directly. Data moves through the firmware's
//! staging buffer (`fw_buffer_addr`) under a small handshake driven through
//! `cmd_addr`:
//!
//! ```text
//!  host                               firmware
//!   | -- W_START / R_START ---------->  |
//!   | <------------------- READY -----  |
//!   | -- package / read request ----->  |  (fw_buffer_addr)
//!   | -- RW_FINISH ------------------>  |
//!   | <------------------- OKAY ------  |
//!   | <-- package (reads only) -------  |  (fw_buffer_addr)
//!   | -- finish echo ---------------->  |
//! ```
//!
//! ## Flash Command Frame
//!
//! ```text
//! +-------+-----+-----+-----+-------+-------+
//! | state | ack | len | cmd | ck_lo | ck_hi |
//! +-------+-----+-----+-----+-------+-------+
//! |   0   |  0  |  4  | op  |   4 + op      |
//! +-------+-----+-----+-----+---------------+
//! ```
//!
//! The firmware replies in place: byte 0 carries the status and byte 3
//! echoes the opcode.
//!
//! ## Package
//!
//! ```text
//! +-------------+-------------+-------------+-----------------+
//! | checksum u32| address u32 | length u32  |  payload[len]   |
//! +-------------+-------------+-------------+-----------------+
//! ```
//!
//! `checksum` is the 16-bit additive sum of the address, length and payload
//! bytes, zero-extended. A read request is the same header without payload
//! and with the checksum last.

use std::io::Cursor;
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, info, warn};

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::protocol::Session;
use crate::protocol::checksum::checksum16;
use crate::protocol::ic_info::IcInfo;

/// Begin a flash read.
pub const FLASH_R_START: u8 = 0x09;
/// Begin a flash write.
pub const FLASH_W_START: u8 = 0x0A;
/// Commit the staged read or write.
pub const FLASH_RW_FINISH: u8 = 0x0B;

/// Staging buffer ready.
pub const FLASH_READY: u8 = 0x04;
/// Package checksum rejected.
pub const FLASH_CHECK_ERR: u8 = 0x05;
/// Request refused.
pub const FLASH_DENY: u8 = 0x06;
/// Operation completed.
pub const FLASH_OKAY: u8 = 0x07;

/// Idle command written after every transfer.
pub const FINISH_ECHO: [u8; 6] = [0x00, 0x00, 0x04, 0x00, 0x04, 0x00];

/// Package header size (checksum, address, length).
pub const FLASH_PACKAGE_HEADER_LEN: usize = 12;

/// Polls allowed for the start handshake.
pub const START_MAX_POLLS: usize = 15;

/// Polls allowed for the finish handshake.
pub const FINISH_MAX_POLLS: usize = 50;

/// Resends allowed when the firmware echoes the wrong opcode.
const FLASH_CMD_MAX_RESENDS: usize = 5;

/// Write-and-confirm attempts for the staging buffer.
const STAGE_WRITE_ATTEMPTS: usize = 3;

/// Delay between status polls.
const FLASH_POLL_DELAY: Duration = Duration::from_millis(3);

/// Settle after the finish echo.
const FINISH_SETTLE: Duration = Duration::from_millis(20);

/// Location and size of the firmware staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashBuffer {
    /// Command register.
    pub cmd_addr: u32,
    /// Staging buffer address.
    pub buffer_addr: u32,
    /// Staging buffer size in bytes.
    pub max_len: usize,
}

impl FlashBuffer {
    /// Staging buffer described by `info`.
    pub fn from_ic_info(info: &IcInfo) -> Self {
        Self {
            cmd_addr: info.misc.cmd_addr,
            buffer_addr: info.misc.fw_buffer_addr,
            max_len: usize::from(info.misc.fw_buffer_max_len),
        }
    }

    /// Largest payload that fits in one package.
    pub fn max_payload(&self) -> usize {
        self.max_len.saturating_sub(FLASH_PACKAGE_HEADER_LEN)
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_payload() {
            return Err(Error::InvalidArgument(format!(
                "flash transfer of {len} bytes exceeds staging buffer payload of {} bytes",
                self.max_payload()
            )));
        }
        Ok(())
    }
}

/// A flash transfer package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPackage {
    /// Flash address.
    pub address: u32,
    /// Payload.
    pub payload: Vec<u8>,
}

impl FlashPackage {
    /// Create a package for `payload` at `address`.
    pub fn new(address: u32, payload: &[u8]) -> Self {
        Self {
            address,
            payload: payload.to_vec(),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn len_field(&self) -> u32 {
        // bounded by the u16 staging buffer size
        self.payload.len() as u32
    }

    /// Package checksum.
    pub fn checksum(&self) -> u32 {
        let mut sum = checksum16(&self.address.to_le_bytes());
        sum = sum.wrapping_add(checksum16(&self.len_field().to_le_bytes()));
        sum = sum.wrapping_add(checksum16(&self.payload));
        u32::from(sum)
    }

    /// Serialize header and payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FLASH_PACKAGE_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.checksum().to_le_bytes());
        buf.extend_from_slice(&self.address.to_le_bytes());
        buf.extend_from_slice(&self.len_field().to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse and verify a package.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FLASH_PACKAGE_HEADER_LEN {
            return Err(Error::Protocol(format!(
                "flash package too short: {} bytes",
                data.len()
            )));
        }
        let mut cursor = Cursor::new(data);
        let checksum = cursor.read_u32::<LittleEndian>()?;
        let address = cursor.read_u32::<LittleEndian>()?;
        let len = cursor.read_u32::<LittleEndian>()? as usize;
        let body = &data[FLASH_PACKAGE_HEADER_LEN..];
        if body.len() < len {
            return Err(Error::Protocol(format!(
                "flash package declares {len} bytes, {} available",
                body.len()
            )));
        }
        let pkg = Self::new(address, &body[..len]);
        let actual = pkg.checksum();
        if actual != checksum {
            return Err(Error::ChecksumMismatch {
                expected: checksum,
                actual,
            });
        }
        Ok(pkg)
    }
}

/// Read request header: address, length, checksum.
#[allow(clippy::cast_possible_truncation)]
fn read_request(address: u32, len: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FLASH_PACKAGE_HEADER_LEN);
    buf.extend_from_slice(&address.to_le_bytes());
    buf.extend_from_slice(&(len as u32).to_le_bytes());
    let ck = checksum16(&buf);
    buf.extend_from_slice(&u32::from(ck).to_le_bytes());
    buf
}

impl<B: Bus + ?Sized> Session<'_, B> {
    /// Send one flash handshake command and wait for `want` status.
    ///
    /// A wrong opcode echo resends the command. A zero status keeps polling.
    /// Any other status is a non-retryable [`Error::Protocol`].
    pub fn flash_cmd(&mut self, cmd_addr: u32, cmd: u8, want: u8, max_polls: usize) -> Result<()> {
        let ck = 4u16 + u16::from(cmd);
        let [ck_lo, ck_hi] = ck.to_le_bytes();
        let frame = [0x00, 0x00, 0x04, cmd, ck_lo, ck_hi];
        let mut reg = [0u8; 6];

        for send in 1..=FLASH_CMD_MAX_RESENDS {
            self.write(cmd_addr, &frame)?;

            let mut echo_mismatch = false;
            for _ in 0..max_polls {
                self.read(cmd_addr, &mut reg)?;
                if reg[3] != cmd {
                    debug!(
                        "flash cmd 0x{cmd:02X} echo 0x{:02X} (send {send}/{FLASH_CMD_MAX_RESENDS})",
                        reg[3]
                    );
                    echo_mismatch = true;
                    break;
                }
                match reg[0] {
                    0 => self.sleep(FLASH_POLL_DELAY),
                    s if s == want => return Ok(()),
                    s => {
                        return Err(Error::Protocol(format!(
                            "flash cmd 0x{cmd:02X}: status 0x{s:02X}, want 0x{want:02X}"
                        )));
                    },
                }
            }

            if !echo_mismatch {
                return Err(Error::Timeout(format!(
                    "flash cmd 0x{cmd:02X}: no status after {max_polls} polls"
                )));
            }
            self.sleep(FLASH_POLL_DELAY);
        }

        Err(Error::Timeout(format!(
            "flash cmd 0x{cmd:02X} not echoed after {FLASH_CMD_MAX_RESENDS} sends"
        )))
    }

    /// Write `data` to flash at `address` through the staging buffer.
    pub fn write_to_flash(&mut self, buffer: &FlashBuffer, address: u32, data: &[u8]) -> Result<()> {
        buffer.check_len(data.len())?;
        debug!("flash write 0x{address:08X} [{} bytes]", data.len());

        self.flash_cmd(buffer.cmd_addr, FLASH_W_START, FLASH_READY, START_MAX_POLLS)?;
        let package = FlashPackage::new(address, data).encode();
        self.write_confirmed(buffer.buffer_addr, &package)?;
        self.flash_cmd(buffer.cmd_addr, FLASH_RW_FINISH, FLASH_OKAY, FINISH_MAX_POLLS)?;
        self.finish_echo(buffer.cmd_addr)
    }

    /// Read `len` bytes of flash at `address` through the staging buffer.
    ///
    /// The finish echo is sent whatever the outcome.
    pub fn read_from_flash(&mut self, buffer: &FlashBuffer, address: u32, len: usize) -> Result<Vec<u8>> {
        buffer.check_len(len)?;
        debug!("flash read 0x{address:08X} [{len} bytes]");

        let result = self.read_staged(buffer, address, len);
        let echo = self.finish_echo(buffer.cmd_addr);
        let data = result?;
        echo?;
        Ok(data)
    }

    fn read_staged(&mut self, buffer: &FlashBuffer, address: u32, len: usize) -> Result<Vec<u8>> {
        self.flash_cmd(buffer.cmd_addr, FLASH_R_START, FLASH_READY, START_MAX_POLLS)?;
        self.write(buffer.buffer_addr, &read_request(address, len))?;
        self.flash_cmd(buffer.cmd_addr, FLASH_RW_FINISH, FLASH_OKAY, FINISH_MAX_POLLS)?;

        let raw = self.read_vec(buffer.buffer_addr, len + FLASH_PACKAGE_HEADER_LEN)?;
        let package = FlashPackage::decode(&raw).inspect_err(|e| {
            warn!("flash read 0x{address:08X}: {e}");
        })?;
        if package.address != address || package.payload.len() != len {
            return Err(Error::Protocol(format!(
                "flash read returned 0x{:08X}[{}], requested 0x{address:08X}[{len}]",
                package.address,
                package.payload.len()
            )));
        }
        Ok(package.payload)
    }

    /// Write `data` and read it back until the copy matches.
    fn write_confirmed(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut readback = vec![0u8; data.len()];
        for attempt in 1..=STAGE_WRITE_ATTEMPTS {
            self.write(addr, data)?;
            self.read(addr, &mut readback)?;
            if readback == data {
                return Ok(());
            }
            warn!("staging buffer readback mismatch (attempt {attempt}/{STAGE_WRITE_ATTEMPTS})");
        }
        Err(Error::Protocol(format!(
            "staging buffer at 0x{addr:08X} did not hold data after {STAGE_WRITE_ATTEMPTS} attempts"
        )))
    }

    fn finish_echo(&mut self, cmd_addr: u32) -> Result<()> {
        let result = self.write(cmd_addr, &FINISH_ECHO);
        self.sleep(FINISH_SETTLE);
        result
    }
}

/// Write `data` in staging-buffer sized chunks starting at `address`.
///
/// `progress` receives `(written, total)` after each chunk.
#[allow(clippy::cast_possible_truncation)]
pub fn write_chunked<B, F>(
    session: &mut Session<'_, B>,
    buffer: &FlashBuffer,
    address: u32,
    data: &[u8],
    mut progress: F,
) -> Result<()>
where
    B: Bus + ?Sized,
    F: FnMut(usize, usize),
{
    let chunk_len = buffer.max_payload();
    if chunk_len == 0 {
        return Err(Error::InvalidDescriptor("firmware buffer has no room for payload".into()));
    }
    let mut written = 0usize;
    for chunk in data.chunks(chunk_len) {
        if crate::is_interrupted_requested() {
            return Err(Error::Interrupted);
        }
        session.write_to_flash(buffer, address + written as u32, chunk)?;
        written += chunk.len();
        progress(written, data.len());
    }
    info!("flashed {written} bytes at 0x{address:08X}");
    Ok(())
}
