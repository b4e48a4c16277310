//! Additive checksums used on the wire.
//!
//! Two flavours are in use:
//!
//! | Name         | Width | Where                                            |
//! |--------------|-------|--------------------------------------------------|
//! | `checksum16` | 2 B   | commands, point records, flash packages, IcInfo, |
//! |              |       | version record, self-test results                |
//! | `zero_sum8`  | 1 B   | event frame header                               |
//!
//! `checksum16` is a wrapping 16-bit sum of the covered bytes, stored
//! little-endian after them. `zero_sum8` stores one trailing byte chosen so
//! the covered bytes plus the trailer sum to zero modulo 256.

use crate::error::{Error, Result};

/// Size of the trailing `checksum16` field.
pub const CHECKSUM16_LEN: usize = 2;

/// Wrapping 16-bit sum of every byte in `data`.
pub fn checksum16(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Append `checksum16(buf)` to `buf` (little-endian).
pub fn append_checksum16(buf: &mut Vec<u8>) {
    let ck = checksum16(buf);
    buf.extend_from_slice(&ck.to_le_bytes());
}

/// Verify a buffer whose last two bytes are the little-endian `checksum16`
/// of everything before them.
pub fn verify_checksum16(buf: &[u8]) -> Result<()> {
    if buf.len() < CHECKSUM16_LEN {
        return Err(Error::InvalidArgument(format!(
            "checksummed buffer too short: {} bytes",
            buf.len()
        )));
    }
    let (data, tail) = buf.split_at(buf.len() - CHECKSUM16_LEN);
    let expected = u16::from_le_bytes([tail[0], tail[1]]);
    let actual = checksum16(data);
    if expected != actual {
        return Err(Error::checksum16(expected, actual));
    }
    Ok(())
}

/// Trailer byte that makes `data ++ [trailer]` sum to zero modulo 256.
pub fn zero_sum8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

/// Append the [`zero_sum8`] trailer to `buf`.
pub fn append_zero_sum8(buf: &mut Vec<u8>) {
    let ck = zero_sum8(buf);
    buf.push(ck);
}

/// Check that all bytes in `buf` (trailer included) sum to zero modulo 256.
pub fn verify_zero_sum8(buf: &[u8]) -> Result<()> {
    let sum = buf.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    if sum != 0 {
        let (stored, covered) = buf
            .split_last()
            .map_or((0, &[][..]), |(last, rest)| (*last, rest));
        return Err(Error::ChecksumMismatch {
            expected: u32::from(stored),
            actual: u32::from(zero_sum8(covered)),
        });
    }
    Ok(())
}
