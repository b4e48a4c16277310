//! Command/ack transaction protocol.
//!
//! ## Frame Format
//!
//! Commands are written to `cmd_addr`; the firmware rewrites the same
//! register with its acknowledgement.
//!
//! ```text
//! +-------+-----+-----+-----+--------------+-------------+
//! | state | ack | len | cmd |   data[n]    |  checksum16 |
//! +-------+-----+-----+-----+--------------+-------------+
//! |   1   |  1  |  1  |  1  |  0..=10      |   2 (LE)    |
//! +-------+-----+-----+-----+--------------+-------------+
//! |   0   |  0  | 4+n | op  |   payload    | sum(len..)  |
//! +-------+-----+-----+-----+--------------+-------------+
//! ```
//!
//! The checksum covers `len`, `cmd` and `data`. The frame is `len + 2` bytes.
//!
//! ## Transaction
//!
//! Write the frame, then poll the ack byte. `OK` completes the command;
//! `BUSY` or a zero byte keep polling; `BUFFER_OVERFLOW` backs off 10 ms and
//! resends; anything else resends immediately. The worst case is bounded by
//! [`CMD_MAX_RETRIES`] × [`ACK_MAX_POLLS`] reads.

use std::time::Duration;

use log::{debug, trace, warn};

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::protocol::Session;
use crate::protocol::checksum::checksum16;

/// Maximum payload bytes in one command.
pub const MAX_CMD_DATA_LEN: usize = 10;

/// Bytes read back when polling an ack.
pub const ACK_LEN: usize = 8;

/// Number of times a command frame is (re)sent.
pub const CMD_MAX_RETRIES: usize = 6;

/// Ack polls per send.
pub const ACK_MAX_POLLS: usize = 6;

/// Delay between ack polls.
const ACK_POLL_DELAY: Duration = Duration::from_millis(1);

/// Back-off after the firmware reports its command buffer overflowed.
const OVERFLOW_BACKOFF: Duration = Duration::from_millis(10);

/// Command opcodes understood by Berlin firmware.
pub mod ids {
    /// Switch output to coordinate (normal) mode.
    pub const COORD: u8 = 0x00;
    /// Switch output to raw capacitance frames.
    pub const RAWDATA: u8 = 0x01;
    /// Switch output to differential capacitance frames.
    pub const DIFFDATA: u8 = 0x02;
    /// Sensing on/off (`data[0]`: 1 = off).
    pub const SENSE_CTRL: u8 = 0x03;
    /// Enter or leave the production-test configuration.
    pub const TEST_CONFIG: u8 = 0x90;
    /// Open circuit test.
    pub const OPEN_TEST: u8 = 0x63;
    /// Short circuit test.
    pub const SHORT_TEST: u8 = 0x64;
    /// Jitter test (`data[0]`: 0 = 100 frames, 1 = 1000 frames).
    pub const JITTER_TEST: u8 = 0x65;
    /// SRAM test.
    pub const SRAM_TEST: u8 = 0x66;
    /// Single driving mode (BerlinD only).
    pub const SINGLE_DRIVING: u8 = 0x67;
    /// SNR test (`data`: mode, frame count u16 LE).
    pub const SNR_TEST: u8 = 0x68;
    /// Glove mode.
    pub const GLOVE: u8 = 0x6A;
    /// Cover mode (`data`: closed flag, cover type).
    pub const COVER: u8 = 0x6B;
    /// Ear detect mode.
    pub const EAR_DETECT: u8 = 0x70;
    /// Pocket mode.
    pub const POCKET: u8 = 0x71;
    /// Sensitivity measurement mode.
    pub const SENSITIVITY: u8 = 0x72;
    /// SIP mode.
    pub const SIP: u8 = 0x73;
    /// Note mode.
    pub const NOTE: u8 = 0x74;
    /// Dead zone reporting (`data[0]`: 1 = report edge).
    pub const DEAD_ZONE: u8 = 0x75;
    /// Grip / edge rejection zones.
    pub const GRIP: u8 = 0x76;
    /// Proximity intensity test.
    pub const PROX_TEST: u8 = 0x79;
    /// Enter sleep.
    pub const SLEEP: u8 = 0x84;
    /// Scan refresh rate.
    pub const REFRESH_RATE: u8 = 0x9D;
    /// Idle control (`data[0]`: 1 = idle allowed, 2 = fixed active).
    pub const IDLE: u8 = 0x9F;
    /// Enter gesture (low power) mode.
    pub const GESTURE: u8 = 0xA6;
    /// Charger connected.
    pub const CHARGER: u8 = 0xAF;
    /// Game mode.
    pub const GAME: u8 = 0xC2;
}

/// Ack status byte reported by firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Nothing written yet (0x00).
    Pending,
    /// Firmware idle (0x01).
    Idle,
    /// Command accepted, still executing (0x02).
    Busy,
    /// Command buffer overflowed (0x03).
    BufferOverflow,
    /// Frame checksum rejected (0x04).
    ChecksumError,
    /// Command completed (0x80).
    Ok,
    /// Any other value.
    Unknown(u8),
}

impl From<u8> for AckStatus {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Pending,
            0x01 => Self::Idle,
            0x02 => Self::Busy,
            0x03 => Self::BufferOverflow,
            0x04 => Self::ChecksumError,
            0x80 => Self::Ok,
            other => Self::Unknown(other),
        }
    }
}

impl From<AckStatus> for u8 {
    fn from(value: AckStatus) -> Self {
        match value {
            AckStatus::Pending => 0x00,
            AckStatus::Idle => 0x01,
            AckStatus::Busy => 0x02,
            AckStatus::BufferOverflow => 0x03,
            AckStatus::ChecksumError => 0x04,
            AckStatus::Ok => 0x80,
            AckStatus::Unknown(v) => v,
        }
    }
}

/// A command to the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    cmd: u8,
    data: Vec<u8>,
    settle: Duration,
}

impl Command {
    /// Command without payload.
    pub fn new(cmd: u8) -> Self {
        Self {
            cmd,
            data: Vec::new(),
            settle: Duration::ZERO,
        }
    }

    /// Command with a single payload byte.
    pub fn with_byte(cmd: u8, value: u8) -> Self {
        Self {
            cmd,
            data: vec![value],
            settle: Duration::ZERO,
        }
    }

    /// Command with an arbitrary payload of at most [`MAX_CMD_DATA_LEN`] bytes.
    pub fn with_data(cmd: u8, data: &[u8]) -> Result<Self> {
        if data.len() > MAX_CMD_DATA_LEN {
            return Err(Error::InvalidArgument(format!(
                "command 0x{cmd:02X} payload is {} bytes, max {MAX_CMD_DATA_LEN}",
                data.len()
            )));
        }
        Ok(Self {
            cmd,
            data: data.to_vec(),
            settle: Duration::ZERO,
        })
    }

    /// Wait this long after the firmware acknowledges the command.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Opcode.
    pub fn cmd(&self) -> u8 {
        self.cmd
    }

    /// Payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Settle delay after `OK`.
    pub fn settle(&self) -> Duration {
        self.settle
    }

    /// Value of the `len` field.
    #[allow(clippy::cast_possible_truncation)]
    pub fn wire_len(&self) -> u8 {
        // data is bounded by MAX_CMD_DATA_LEN
        (4 + self.data.len()) as u8
    }

    /// Build the complete frame.
    pub fn build(&self) -> Vec<u8> {
        let len = self.wire_len();
        let mut buf = Vec::with_capacity(usize::from(len) + 2);
        buf.push(0); // state
        buf.push(0); // ack
        buf.push(len);
        buf.push(self.cmd);
        buf.extend_from_slice(&self.data);
        let ck = checksum16(&buf[2..]);
        buf.extend_from_slice(&ck.to_le_bytes());
        buf
    }
}

/// Acknowledgement read back from `cmd_addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Firmware state byte.
    pub state: u8,
    /// Ack status.
    pub status: AckStatus,
    /// Echoed length.
    pub len: u8,
    /// Echoed opcode.
    pub cmd: u8,
}

impl Ack {
    /// Parse the first four bytes of an ack frame.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        Some(Self {
            state: data[0],
            status: AckStatus::from(data[1]),
            len: data[2],
            cmd: data[3],
        })
    }
}

impl<B: Bus + ?Sized> Session<'_, B> {
    /// Run one command transaction against `cmd_addr`.
    ///
    /// Bus errors abort immediately. Exhausting the retry budget yields
    /// [`Error::Timeout`].
    pub fn send_cmd(&mut self, cmd_addr: u32, cmd: &Command) -> Result<()> {
        let frame = cmd.build();
        let mut last = AckStatus::Pending;

        for attempt in 1..=CMD_MAX_RETRIES {
            if attempt > 1 {
                debug!(
                    "resend cmd 0x{:02X} (attempt {attempt}/{CMD_MAX_RETRIES}), last ack {last:?}",
                    cmd.cmd
                );
            }
            self.write(cmd_addr, &frame)?;

            let mut raw = [0u8; ACK_LEN];
            for _ in 0..ACK_MAX_POLLS {
                self.read(cmd_addr, &mut raw)?;
                // parse cannot fail on an ACK_LEN buffer
                let status = Ack::parse(&raw).map_or(AckStatus::Pending, |a| a.status);
                last = status;
                match status {
                    AckStatus::Ok => {
                        trace!("cmd 0x{:02X} acked", cmd.cmd);
                        self.sleep(cmd.settle);
                        return Ok(());
                    },
                    AckStatus::Busy | AckStatus::Pending => {
                        self.sleep(ACK_POLL_DELAY);
                    },
                    AckStatus::BufferOverflow => {
                        self.sleep(OVERFLOW_BACKOFF);
                        break;
                    },
                    _ => break,
                }
            }
        }

        warn!(
            "cmd 0x{:02X} {:02X?} failed, last ack {last:?}",
            cmd.cmd, cmd.data
        );
        Err(Error::Timeout(format!(
            "command 0x{:02X} not acknowledged after {CMD_MAX_RETRIES} attempts (last {last:?})",
            cmd.cmd
        )))
    }
}
