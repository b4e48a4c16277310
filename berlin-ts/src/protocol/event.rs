//! Touch event frames.
//!
//! ## Frame Format
//!
//! ```text
//! +--------+-----+-------+-----------+-----------+----------+------------+
//! | flags  | rsv | count | rsv[4]    | hdr sum8  | records  | checksum16 |
//! +--------+-----+-------+-----------+-----------+----------+------------+
//! |   1    |  1  |   1   |    4      |     1     | 16 x n   |   2 (LE)   |
//! +--------+-----+-------+-----------+-----------+----------+------------+
//! ```
//!
//! Header flags: `0x80` data present, `0x40` firmware request, `0x20`
//! gesture. The low nibble of byte 2 is the record count. Byte 7 makes the
//! header sum to zero. The trailing checksum covers the records only and is
//! absent when the count is zero.
//!
//! ## Point Records
//!
//! Bits 0..=1 of the first byte select the record kind:
//!
//! | id | kind       | layout                                           |
//! |----|------------|--------------------------------------------------|
//! | 0  | coordinate | slot b0[2..6], action b0[6..8], x/y 12 bit, size |
//! | 1  | status     | type b0[2..6], id b1, data b2..b7                |
//! | 2  | gesture    | type b0[2..6], id b1, data b2..b6                |
//!
//! Frames are posted by the firmware and must be acknowledged by writing a
//! zero byte to `touch_data_addr` before the next one is posted.

use std::time::Duration;

use log::{debug, trace, warn};

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::protocol::Session;
use crate::protocol::checksum::{CHECKSUM16_LEN, checksum16, verify_zero_sum8};

/// Header length.
pub const EVENT_HEADER_LEN: usize = 8;

/// Point record length.
pub const POINT_RECORD_LEN: usize = 16;

/// Records covered by the first read.
pub const PRE_READ_RECORDS: usize = 2;

/// Bytes fetched by the first read: header, two records, checksum.
pub const PRE_READ_LEN: usize = EVENT_HEADER_LEN + PRE_READ_RECORDS * POINT_RECORD_LEN + CHECKSUM16_LEN;

/// Data present.
pub const FLAG_TOUCH: u8 = 0x80;
/// Firmware request pending.
pub const FLAG_REQUEST: u8 = 0x40;
/// Gesture wakeup.
pub const FLAG_GESTURE: u8 = 0x20;

/// Header reads before a checksum error is surfaced.
const HEADER_READ_ATTEMPTS: usize = 3;

const HEADER_RETRY_DELAY: Duration = Duration::from_millis(1);

const EVENT_ID_COORD: u8 = 0;
const EVENT_ID_STATUS: u8 = 1;
const EVENT_ID_GESTURE: u8 = 2;

/// Contact transition reported with a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TouchAction {
    /// No change.
    None,
    /// Finger down.
    Press,
    /// Finger moved.
    Move,
    /// Finger up.
    Release,
}

impl From<u8> for TouchAction {
    fn from(value: u8) -> Self {
        match value & 0x03 {
            1 => Self::Press,
            2 => Self::Move,
            3 => Self::Release,
            _ => Self::None,
        }
    }
}

/// One contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Coordinate {
    /// Tracking slot.
    pub slot: u8,
    /// Contact transition.
    pub action: TouchAction,
    /// 12-bit X.
    pub x: u16,
    /// 12-bit Y.
    pub y: u16,
    /// Contact ellipse major axis.
    pub major: u8,
    /// Contact ellipse minor axis.
    pub minor: u8,
    /// Pressure, 6 bits.
    pub z: u8,
}

/// Firmware status notification.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Status {
    pub kind: u8,
    pub id: u8,
    pub data: [u8; 5],
}

/// Gesture report.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Gesture {
    pub kind: u8,
    pub id: u8,
    pub data: [u8; 4],
}

/// Decoded event.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "lowercase"))]
pub enum TouchEvent {
    Coordinate(Coordinate),
    Status(Status),
    Gesture(Gesture),
    /// Data flagged but no records; every contact should be released.
    Empty,
}

impl TouchEvent {
    /// Decode one 16-byte point record. Unknown kinds give `None`.
    pub fn decode(record: &[u8]) -> Option<Self> {
        if record.len() < POINT_RECORD_LEN {
            return None;
        }
        let kind = (record[0] >> 2) & 0x0F;
        match record[0] & 0x03 {
            EVENT_ID_COORD => Some(Self::Coordinate(Coordinate {
                slot: kind,
                action: TouchAction::from(record[0] >> 6),
                x: (u16::from(record[1]) << 4) | u16::from(record[3] >> 4),
                y: (u16::from(record[2]) << 4) | u16::from(record[3] & 0x0F),
                major: record[4],
                minor: record[5],
                z: record[6] & 0x3F,
            })),
            EVENT_ID_STATUS => {
                let mut data = [0u8; 5];
                data.copy_from_slice(&record[2..7]);
                Some(Self::Status(Status {
                    kind,
                    id: record[1],
                    data,
                }))
            },
            EVENT_ID_GESTURE => {
                let mut data = [0u8; 4];
                data.copy_from_slice(&record[2..6]);
                Some(Self::Gesture(Gesture {
                    kind,
                    id: record[1],
                    data,
                }))
            },
            _ => None,
        }
    }
}

/// Consumer of decoded events.
///
/// Every handler defaults to doing nothing.
pub trait EventSink {
    /// Contact update.
    fn on_coordinate(&mut self, _event: &Coordinate) {}
    /// Firmware status.
    fn on_status(&mut self, _event: &Status) {}
    /// Gesture wakeup.
    fn on_gesture(&mut self, _event: &Gesture) {}
    /// Frame flagged data without records.
    fn on_empty(&mut self) {}
}

impl EventSink for Vec<TouchEvent> {
    fn on_coordinate(&mut self, event: &Coordinate) {
        self.push(TouchEvent::Coordinate(*event));
    }

    fn on_status(&mut self, event: &Status) {
        self.push(TouchEvent::Status(*event));
    }

    fn on_gesture(&mut self, event: &Gesture) {
        self.push(TouchEvent::Gesture(*event));
    }

    fn on_empty(&mut self) {
        self.push(TouchEvent::Empty);
    }
}

/// A validated, decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventFrame {
    /// Header flag byte.
    pub flags: u8,
    /// Record count from the header.
    pub event_num: u8,
    /// Decoded events in record order.
    pub events: Vec<TouchEvent>,
}

impl EventFrame {
    /// Bytes occupied by a frame of `event_num` records.
    pub fn wire_len(event_num: usize) -> usize {
        EVENT_HEADER_LEN + event_num * POINT_RECORD_LEN + CHECKSUM16_LEN
    }

    /// Record count announced by a header.
    pub fn event_num(header: &[u8]) -> usize {
        header.get(2).map_or(0, |b| usize::from(b & 0x0F))
    }

    /// Validate and decode a complete frame.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < EVENT_HEADER_LEN {
            return Err(Error::InvalidArgument(format!(
                "event frame is {} bytes, header needs {EVENT_HEADER_LEN}",
                raw.len()
            )));
        }
        if raw[0] == 0 {
            return Err(Error::NoData);
        }
        verify_zero_sum8(&raw[..EVENT_HEADER_LEN])?;

        let flags = raw[0];
        let event_num = Self::event_num(raw);
        let mut events = Vec::with_capacity(event_num.max(1));

        if event_num == 0 {
            if flags & FLAG_TOUCH != 0 {
                events.push(TouchEvent::Empty);
            }
        } else {
            let need = Self::wire_len(event_num);
            if raw.len() < need {
                return Err(Error::InvalidArgument(format!(
                    "frame announces {event_num} records ({need} bytes), got {}",
                    raw.len()
                )));
            }
            let span_end = EVENT_HEADER_LEN + event_num * POINT_RECORD_LEN;
            let records = &raw[EVENT_HEADER_LEN..span_end];
            let expected = u16::from_le_bytes([raw[span_end], raw[span_end + 1]]);
            let actual = checksum16(records);
            if expected != actual {
                return Err(Error::checksum16(expected, actual));
            }
            for record in records.chunks_exact(POINT_RECORD_LEN) {
                match TouchEvent::decode(record) {
                    Some(event) => events.push(event),
                    None => debug!("skipping record of unknown kind 0x{:02X}", record[0]),
                }
            }
        }

        Ok(Self {
            flags,
            event_num: raw[2] & 0x0F,
            events,
        })
    }

    /// Hand every event to its typed handler.
    pub fn dispatch(&self, sink: &mut dyn EventSink) {
        for event in &self.events {
            match event {
                TouchEvent::Coordinate(c) => sink.on_coordinate(c),
                TouchEvent::Status(s) => sink.on_status(s),
                TouchEvent::Gesture(g) => sink.on_gesture(g),
                TouchEvent::Empty => sink.on_empty(),
            }
        }
    }

    /// Whether the gesture flag is set.
    pub fn is_gesture(&self) -> bool {
        self.flags & FLAG_GESTURE != 0
    }

    /// Whether the firmware flagged a pending request.
    pub fn has_request(&self) -> bool {
        self.flags & FLAG_REQUEST != 0
    }
}

impl<B: Bus + ?Sized> Session<'_, B> {
    /// Read, validate and acknowledge the frame at `touch_data_addr`.
    ///
    /// A frame that fails validation is still acknowledged so the firmware
    /// can post the next one. `ack` is false while an external tool owns the
    /// frame handshake.
    pub fn read_event_frame(&mut self, touch_data_addr: u32, ack: bool) -> Result<EventFrame> {
        let result = self.fetch_event_frame(touch_data_addr);
        let consumed = match &result {
            Ok(_) | Err(Error::ChecksumMismatch { .. } | Error::InvalidArgument(_)) => true,
            Err(_) => false,
        };
        if consumed && ack {
            self.write(touch_data_addr, &[0x00])?;
        }
        result
    }

    fn fetch_event_frame(&mut self, addr: u32) -> Result<EventFrame> {
        let mut buf = vec![0u8; PRE_READ_LEN];
        let mut attempt = 1;
        loop {
            self.read(addr, &mut buf)?;
            if buf[0] == 0 {
                return Err(Error::NoData);
            }
            match verify_zero_sum8(&buf[..EVENT_HEADER_LEN]) {
                Ok(()) => break,
                Err(e) if attempt >= HEADER_READ_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!("event header (attempt {attempt}/{HEADER_READ_ATTEMPTS}): {e}");
                    attempt += 1;
                    self.sleep(HEADER_RETRY_DELAY);
                },
            }
        }

        let event_num = EventFrame::event_num(&buf);
        if event_num > PRE_READ_RECORDS {
            let extra = (event_num - PRE_READ_RECORDS) * POINT_RECORD_LEN;
            #[allow(clippy::cast_possible_truncation)]
            let tail = self.read_vec(addr + PRE_READ_LEN as u32, extra)?;
            buf.extend_from_slice(&tail);
        }
        trace!("event frame: flags 0x{:02X}, {event_num} records", buf[0]);
        EventFrame::parse(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::checksum::{append_checksum16, zero_sum8};
    use crate::testutil::{RecordingDelay, SimDevice};

    const TOUCH_ADDR: u32 = 0x10308;

    fn header(flags: u8, count: u8) -> Vec<u8> {
        let mut h = vec![flags, 0x00, count, 0, 0, 0, 0];
        h.push(zero_sum8(&h));
        h
    }

    fn coord(slot: u8, action: u8, x: u16, y: u16) -> [u8; 16] {
        let mut r = [0u8; 16];
        r[0] = (action << 6) | (slot << 2);
        r[1] = (x >> 4) as u8;
        r[2] = (y >> 4) as u8;
        r[3] = (((x & 0x0F) << 4) | (y & 0x0F)) as u8;
        r[4] = 10;
        r[5] = 8;
        r[6] = 0x7F;
        r
    }

    fn frame(flags: u8, records: &[[u8; 16]]) -> Vec<u8> {
        let mut f = header(flags, records.len() as u8);
        let mut body: Vec<u8> = records.iter().flatten().copied().collect();
        append_checksum16(&mut body);
        f.extend(body);
        f
    }

    #[test]
    fn test_decode_coordinate() {
        let rec = coord(3, 1, 0x4A5, 0x7B2);
        assert_eq!(
            TouchEvent::decode(&rec),
            Some(TouchEvent::Coordinate(Coordinate {
                slot: 3,
                action: TouchAction::Press,
                x: 0x4A5,
                y: 0x7B2,
                major: 10,
                minor: 8,
                z: 0x3F,
            }))
        );
    }

    #[test]
    fn test_decode_status_and_gesture() {
        let mut rec = [0u8; 16];
        rec[0] = (5 << 2) | EVENT_ID_STATUS;
        rec[1] = 0x22;
        rec[2..7].copy_from_slice(&[1, 2, 3, 4, 5]);
        assert_eq!(
            TouchEvent::decode(&rec),
            Some(TouchEvent::Status(Status {
                kind: 5,
                id: 0x22,
                data: [1, 2, 3, 4, 5],
            }))
        );
        rec[0] = (2 << 2) | EVENT_ID_GESTURE;
        assert_eq!(
            TouchEvent::decode(&rec),
            Some(TouchEvent::Gesture(Gesture {
                kind: 2,
                id: 0x22,
                data: [1, 2, 3, 4],
            }))
        );
        rec[0] = 0x03;
        assert_eq!(TouchEvent::decode(&rec), None);
    }

    #[test]
    fn test_two_coordinates() {
        let raw = frame(0x83, &[coord(0, 1, 100, 200), coord(1, 2, 300, 400)]);
        assert_eq!(&raw[..3], &[0x83, 0x00, 0x02]);
        let f = EventFrame::parse(&raw).unwrap();
        assert_eq!(f.event_num, 2);
        let coords = f
            .events
            .iter()
            .filter(|e| matches!(e, TouchEvent::Coordinate(_)))
            .count();
        assert_eq!(coords, 2);
        assert_eq!(f.events.len(), 2);
    }

    #[test]
    fn test_parse_is_idempotent() {
        let raw = frame(0x80, &[coord(0, 2, 1, 2), coord(4, 3, 5, 6), coord(9, 1, 7, 8)]);
        assert_eq!(EventFrame::parse(&raw).unwrap(), EventFrame::parse(&raw).unwrap());
    }

    #[test]
    fn test_empty_frame() {
        let f = EventFrame::parse(&header(0x80, 0)).unwrap();
        assert_eq!(f.events, vec![TouchEvent::Empty]);
        let f = EventFrame::parse(&header(0x40, 0)).unwrap();
        assert!(f.events.is_empty());
        assert!(f.has_request());
    }

    #[test]
    fn test_no_data() {
        assert!(matches!(EventFrame::parse(&[0u8; 8]), Err(Error::NoData)));
    }

    #[test]
    fn test_point_checksum_mismatch() {
        let mut raw = frame(0x80, &[coord(0, 1, 10, 10)]);
        raw[10] ^= 0x01;
        assert!(matches!(
            EventFrame::parse(&raw),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_dispatch_to_sink() {
        let raw = frame(0x80, &[coord(0, 1, 10, 10), coord(1, 1, 20, 20)]);
        let f = EventFrame::parse(&raw).unwrap();
        let mut sink: Vec<TouchEvent> = Vec::new();
        f.dispatch(&mut sink);
        assert_eq!(sink, f.events);
    }

    #[test]
    fn test_read_two_events_single_read_and_ack() {
        let sim = SimDevice::new();
        sim.poke(TOUCH_ADDR, &frame(0x83, &[coord(0, 1, 1, 1), coord(1, 1, 2, 2)]));
        let delay = RecordingDelay::default();
        let mut bus = sim.clone();
        let mut session = Session::new(&mut bus, &delay);
        let f = session.read_event_frame(TOUCH_ADDR, true).unwrap();
        assert_eq!(f.events.len(), 2);
        assert_eq!(sim.reads_at(TOUCH_ADDR), 1);
        assert_eq!(sim.writes_to(TOUCH_ADDR), vec![vec![0x00]]);
    }

    #[test]
    fn test_read_five_events_reads_tail() {
        let records: Vec<[u8; 16]> = (0..5).map(|i| coord(i, 2, u16::from(i) * 10, 5)).collect();
        let sim = SimDevice::new();
        sim.poke(TOUCH_ADDR, &frame(0x80, &records));
        let delay = RecordingDelay::default();
        let mut bus = sim.clone();
        let mut session = Session::new(&mut bus, &delay);
        let f = session.read_event_frame(TOUCH_ADDR, true).unwrap();
        assert_eq!(f.events.len(), 5);
        assert_eq!(sim.reads_at(TOUCH_ADDR + PRE_READ_LEN as u32), 1);
    }

    #[test]
    fn test_header_retry_then_success() {
        let good = frame(0x80, &[coord(0, 1, 1, 1)]);
        let mut bad = good.clone();
        bad[7] ^= 0xFF;
        let sim = SimDevice::new();
        sim.poke(TOUCH_ADDR, &good);
        sim.queue_read(TOUCH_ADDR, &bad);
        let delay = RecordingDelay::default();
        let mut bus = sim.clone();
        let mut session = Session::new(&mut bus, &delay);
        assert!(session.read_event_frame(TOUCH_ADDR, true).is_ok());
        assert_eq!(sim.reads_at(TOUCH_ADDR), 2);
    }

    #[test]
    fn test_header_failure_still_acknowledged() {
        let mut bad = frame(0x80, &[coord(0, 1, 1, 1)]);
        bad[7] ^= 0xFF;
        let sim = SimDevice::new();
        sim.poke(TOUCH_ADDR, &bad);
        let delay = RecordingDelay::default();
        let mut bus = sim.clone();
        let mut session = Session::new(&mut bus, &delay);
        assert!(matches!(
            session.read_event_frame(TOUCH_ADDR, true),
            Err(Error::ChecksumMismatch { .. })
        ));
        assert_eq!(sim.reads_at(TOUCH_ADDR), 3);
        assert_eq!(sim.writes_to(TOUCH_ADDR), vec![vec![0x00]]);
    }

    #[test]
    fn test_no_data_not_acknowledged() {
        let sim = SimDevice::new();
        let delay = RecordingDelay::default();
        let mut bus = sim.clone();
        let mut session = Session::new(&mut bus, &delay);
        assert!(matches!(
            session.read_event_frame(TOUCH_ADDR, true),
            Err(Error::NoData)
        ));
        assert!(sim.writes_to(TOUCH_ADDR).is_empty());
    }

    #[test]
    fn test_tools_sync_suppresses_ack() {
        let sim = SimDevice::new();
        sim.poke(TOUCH_ADDR, &header(0x80, 0));
        let delay = RecordingDelay::default();
        let mut bus = sim.clone();
        let mut session = Session::new(&mut bus, &delay);
        session.read_event_frame(TOUCH_ADDR, false).unwrap();
        assert!(sim.writes_to(TOUCH_ADDR).is_empty());
    }
}
