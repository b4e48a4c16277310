//! Self-test result payload decoding.
//!
//! Payloads arrive without their status sentinel and checksum. Channel
//! results are reported by physical pin; a die channel missing from the
//! [`ChannelMap`] is a configuration error, not a test failure.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use super::channel::{ChannelMap, DRV_CHAN_BYTES, DieChannel, Pin, SEN_CHAN_BYTES, decode_bitmap};
use crate::device::ShortThresholds;
use crate::error::{Error, Result};
use crate::target::Generation;

/// Drive bitmap followed by sense bitmap.
pub const BITMAP_LEN: usize = DRV_CHAN_BYTES + SEN_CHAN_BYTES;

/// Bytes per short record.
pub const SHORT_RECORD_LEN: usize = 6;

/// Short peer code for ground.
pub const SHORT_PEER_GND: u8 = 0xFE;

/// Short peer code for the analog supply.
pub const SHORT_PEER_AVDD: u8 = 0xFF;

/// Number of SNR measurement points.
pub const SNR_POINTS: usize = 9;

fn pin_of(map: &ChannelMap, channel: DieChannel) -> Result<Pin> {
    map.map(channel)
        .ok_or_else(|| Error::Protocol(format!("{channel:?} has no bonded pin")))
}

/// Pins flagged in an open-test bitmap.
pub fn decode_open(payload: &[u8], map: &ChannelMap) -> Result<Vec<Pin>> {
    if payload.len() < BITMAP_LEN {
        return Err(Error::Protocol(format!(
            "open result is {} bytes, want {BITMAP_LEN}",
            payload.len()
        )));
    }
    decode_bitmap(&payload[..BITMAP_LEN])
        .into_iter()
        .map(|ch| pin_of(map, ch))
        .collect()
}

/// What a shorted pin is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ShortPeer {
    /// Another pin.
    Pin(Pin),
    /// Ground.
    Gnd,
    /// Analog supply.
    Avdd,
}

impl fmt::Display for ShortPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pin(p) => write!(f, "{p}"),
            Self::Gnd => write!(f, "GND"),
            Self::Avdd => write!(f, "AVDD"),
        }
    }
}

/// One short circuit below threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShortFault {
    /// Flagged pin.
    pub pin: Pin,
    /// Other end of the short.
    pub peer: ShortPeer,
    /// Estimated resistance in kΩ.
    pub kohm: i32,
}

impl fmt::Display for ShortFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} {}kΩ", self.pin, self.peer, self.kohm)
    }
}

/// Bytes of a short payload with `flagged` set bits.
pub fn short_payload_len(flagged: usize) -> usize {
    BITMAP_LEN + flagged * SHORT_RECORD_LEN
}

/// Number of channels flagged in a short bitmap.
pub fn short_flag_count(bitmap: &[u8]) -> usize {
    bitmap
        .iter()
        .take(BITMAP_LEN)
        .map(|b| b.count_ones() as usize)
        .sum()
}

/// Shorts whose estimated resistance is below its threshold.
///
/// Records follow the bitmap in flag order (drive bits, then sense bits).
pub fn decode_short(
    payload: &[u8],
    map: &ChannelMap,
    generation: Generation,
    thresholds: &ShortThresholds,
) -> Result<Vec<ShortFault>> {
    if payload.len() < BITMAP_LEN {
        return Err(Error::Protocol(format!(
            "short result is {} bytes, want at least {BITMAP_LEN}",
            payload.len()
        )));
    }
    let channels = decode_bitmap(&payload[..BITMAP_LEN]);
    let want = short_payload_len(channels.len());
    if payload.len() < want {
        return Err(Error::Protocol(format!(
            "short result is {} bytes, {} flags need {want}",
            payload.len(),
            channels.len()
        )));
    }

    let mut faults = Vec::new();
    for (i, channel) in channels.into_iter().enumerate() {
        let rec = &payload[BITMAP_LEN + i * SHORT_RECORD_LEN..][..SHORT_RECORD_LEN];
        let v1 = LittleEndian::read_u16(&rec[2..]);
        let v2 = LittleEndian::read_u16(&rec[4..]);
        let pin = pin_of(map, channel)?;
        let (peer, kohm, limit) = match rec[0] {
            SHORT_PEER_GND => (
                ShortPeer::Gnd,
                generation.short_to_gnd_kohm(v1),
                thresholds.channel_to_gnd,
            ),
            SHORT_PEER_AVDD => (
                ShortPeer::Avdd,
                generation.short_to_avdd_kohm(v1, v2),
                thresholds.channel_to_avdd,
            ),
            die => {
                let peer = map.die2pin(usize::from(die)).ok_or_else(|| {
                    Error::Protocol(format!("short peer die {die} has no bonded pin"))
                })?;
                (
                    ShortPeer::Pin(peer),
                    generation.short_to_channel_kohm(v1, v2),
                    thresholds.channel_to_channel,
                )
            },
        };
        if kohm < limit {
            faults.push(ShortFault { pin, peer, kohm });
        }
    }
    Ok(faults)
}

/// 100-frame jitter extremes.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Jitter100 {
    pub mutual_max: i16,
    pub mutual_min: i16,
    pub self_max: i16,
    pub self_min: i16,
}

/// 1000-frame jitter delta ranges, each `(min, max)`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Jitter1000 {
    pub delta_min: (i16, i16),
    pub delta_max: (i16, i16),
    pub delta_avg: (i16, i16),
}

fn read_i16s<const N: usize>(payload: &[u8], what: &str) -> Result<[i16; N]> {
    if payload.len() < N * 2 {
        return Err(Error::Protocol(format!(
            "{what} result is {} bytes, want {}",
            payload.len(),
            N * 2
        )));
    }
    let mut out = [0i16; N];
    LittleEndian::read_i16_into(&payload[..N * 2], &mut out);
    Ok(out)
}

/// Decode a 100-frame jitter payload.
pub fn decode_jitter100(payload: &[u8]) -> Result<Jitter100> {
    let [mutual_max, mutual_min, self_max, self_min] = read_i16s::<4>(payload, "jitter100")?;
    Ok(Jitter100 {
        mutual_max,
        mutual_min,
        self_max,
        self_min,
    })
}

/// Decode a 1000-frame jitter payload.
pub fn decode_jitter1000(payload: &[u8]) -> Result<Jitter1000> {
    let v = read_i16s::<6>(payload, "jitter1000")?;
    Ok(Jitter1000 {
        delta_min: (v[0], v[1]),
        delta_max: (v[2], v[3]),
        delta_avg: (v[4], v[5]),
    })
}

/// One SNR measurement point.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SnrPoint {
    pub average: i16,
    pub snr1: i16,
    pub snr2: i16,
}

/// Decode an SNR payload.
pub fn decode_snr(payload: &[u8]) -> Result<Vec<SnrPoint>> {
    let v = read_i16s::<{ SNR_POINTS * 3 }>(payload, "snr")?;
    Ok(v.chunks_exact(3)
        .map(|c| SnrPoint {
            average: c[0],
            snr1: c[1],
            snr2: c[2],
        })
        .collect())
}
