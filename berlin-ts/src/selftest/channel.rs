//! Die channel to package pin mapping.
//!
//! Test results identify channels by their index on the die. Drive and
//! sense channels share one "unified" index space: sense channels come
//! first, drive channel `n` is `max_sen_num + n`. A [`ChannelMap`] holds
//! two ordered tables of unified die indices; the position of a die index
//! in a table is the physical pin number.

use std::fmt;

use crate::target::Generation;

/// Bytes in the drive-channel failure bitmap.
pub const DRV_CHAN_BYTES: usize = 7;

/// Bytes in the sense-channel failure bitmap.
pub const SEN_CHAN_BYTES: usize = 10;

/// A physical pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Pin {
    /// Receive (sense) pin.
    Rx(u16),
    /// Transmit (drive) pin.
    Tx(u16),
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rx(n) => write!(f, "RX{n}"),
            Self::Tx(n) => write!(f, "TX{n}"),
        }
    }
}

/// Die channel kind, as reported in failure bitmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DieChannel {
    /// Drive channel by die index.
    Drive(usize),
    /// Sense channel by die index.
    Sense(usize),
}

/// Sense and drive lookup tables.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelMap {
    /// Sense channels on the die.
    pub max_sen_num: usize,
    /// Unified die index of each sense pin.
    pub sense: Vec<u16>,
    /// Unified die index of each drive pin.
    pub drive: Vec<u16>,
}

impl ChannelMap {
    /// One-to-one map for `generation`: every die channel is bonded to the
    /// pin of the same number.
    #[allow(clippy::cast_possible_truncation)]
    pub fn identity(generation: Generation) -> Self {
        let sen = generation.max_sen_num();
        let drv = generation.max_drv_num();
        Self {
            max_sen_num: sen,
            sense: (0..sen).map(|i| i as u16).collect(),
            drive: (sen..sen + drv).map(|i| i as u16).collect(),
        }
    }

    /// Custom tables for a module whose bonding differs from the die order.
    pub fn new(max_sen_num: usize, sense: Vec<u16>, drive: Vec<u16>) -> Self {
        Self {
            max_sen_num,
            sense,
            drive,
        }
    }

    /// Unified die index of a channel.
    pub fn unified(&self, channel: DieChannel) -> usize {
        match channel {
            DieChannel::Sense(n) => n,
            DieChannel::Drive(n) => n + self.max_sen_num,
        }
    }

    /// Channel for a unified die index.
    pub fn channel(&self, unified: usize) -> DieChannel {
        if unified < self.max_sen_num {
            DieChannel::Sense(unified)
        } else {
            DieChannel::Drive(unified - self.max_sen_num)
        }
    }

    /// Pin bonded to unified die index `die`.
    ///
    /// The sense table is searched first.
    #[allow(clippy::cast_possible_truncation)]
    pub fn die2pin(&self, die: usize) -> Option<Pin> {
        if let Some(pos) = self.sense.iter().position(|&d| usize::from(d) == die) {
            return Some(Pin::Rx(pos as u16));
        }
        self.drive
            .iter()
            .position(|&d| usize::from(d) == die)
            .map(|pos| Pin::Tx(pos as u16))
    }

    /// Pin of a die channel.
    pub fn map(&self, channel: DieChannel) -> Option<Pin> {
        self.die2pin(self.unified(channel))
    }
}

/// Channels flagged in a drive bitmap followed by a sense bitmap.
///
/// Bit `j` of byte `i` is channel `i * 8 + j`.
pub fn decode_bitmap(bitmap: &[u8]) -> Vec<DieChannel> {
    let (drv, sen) = bitmap.split_at(DRV_CHAN_BYTES.min(bitmap.len()));
    let sen = &sen[..SEN_CHAN_BYTES.min(sen.len())];
    let mut out: Vec<DieChannel> = set_bits(drv).into_iter().map(DieChannel::Drive).collect();
    out.extend(set_bits(sen).into_iter().map(DieChannel::Sense));
    out
}

fn set_bits(bytes: &[u8]) -> Vec<usize> {
    let mut out = Vec::new();
    for (i, b) in bytes.iter().enumerate() {
        for j in 0..8 {
            if b & (1 << j) != 0 {
                out.push(i * 8 + j);
            }
        }
    }
    out
}
