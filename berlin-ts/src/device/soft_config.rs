//! Volatile device configuration that must survive resets.
//!
//! A reset or power cycle clears every mode the host has set. Each setter
//! records its value here before sending it, and [`SoftConfig::commands`]
//! plus [`SoftConfig::sponge_writes`] rebuild the full state afterwards.

use crate::error::Result;
use crate::protocol::command::{Command, ids};

/// Sponge offset of the low-power feature byte.
pub const SPONGE_LOWPOWER_OFFSET: u16 = 0x00;

/// Sponge offset of the AOD rectangle.
pub const SPONGE_AOD_RECT_OFFSET: u16 = 0x02;

/// Sponge offset of the FOD rectangle.
pub const SPONGE_FOD_RECT_OFFSET: u16 = 0x4B;

/// Low-power feature bits (sponge byte 0).
pub mod lowpower {
    /// Swipe up to wake.
    pub const SWIPE: u8 = 1 << 1;
    /// Always-on display touch.
    pub const AOD: u8 = 1 << 2;
    /// Single tap.
    pub const SINGLE_TAP: u8 = 1 << 3;
    /// Fingerprint press.
    pub const PRESS: u8 = 1 << 4;
    /// Double tap to wake.
    pub const DOUBLETAP_TO_WAKEUP: u8 = 1 << 5;
}

/// Ear detection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EarDetect {
    /// Off.
    #[default]
    Off,
    /// Call mode.
    Call,
    /// Call mode with proximity intensity reporting.
    Prox,
}

impl EarDetect {
    /// Wire value.
    pub fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Call => 1,
            Self::Prox => 3,
        }
    }

    /// From the wire value; 0, 1 and 3 are valid.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Off),
            1 => Some(Self::Call),
            3 => Some(Self::Prox),
            _ => None,
        }
    }
}

/// Edge rejection zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GripZone {
    /// Edge handler band; direction 0 clears it.
    EdgeHandler {
        /// 0 off, 1 left, 2 right.
        direction: u8,
        /// Band start.
        start_y: u16,
        /// Band end.
        end_y: u16,
    },
    /// Portrait rejection.
    Portrait {
        /// Edge width.
        edge_range: u16,
        /// Dead zone width, upper part.
        deadzone_up_x: u16,
        /// Dead zone width, lower part.
        deadzone_dn_x: u16,
        /// Split between upper and lower.
        deadzone_y: u16,
    },
    /// Landscape rejection; `None` falls back to portrait.
    Landscape(Option<LandscapeGrip>),
}

/// Landscape rejection widths.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LandscapeGrip {
    pub edge: u16,
    pub deadzone: u16,
    pub top_deadzone: u16,
    pub bottom_deadzone: u16,
    pub top_gripzone: u16,
    pub bottom_gripzone: u16,
}

const GRIP_EDGE_HANDLER: u8 = 0;
const GRIP_PORTRAIT: u8 = 1;
const GRIP_LANDSCAPE: u8 = 2;
const GRIP_LANDSCAPE_ZONES: u8 = 3;

fn u16_payload(mode: u8, values: &[u16]) -> Vec<u8> {
    let mut data = vec![mode];
    for v in values {
        data.extend_from_slice(&v.to_le_bytes());
    }
    data
}

impl GripZone {
    /// Commands programming this zone.
    pub fn commands(&self) -> Result<Vec<Command>> {
        let payloads = match *self {
            Self::EdgeHandler {
                direction,
                start_y,
                end_y,
            } => {
                let mut data = vec![GRIP_EDGE_HANDLER, direction];
                data.extend_from_slice(&start_y.to_le_bytes());
                data.extend_from_slice(&end_y.to_le_bytes());
                vec![data]
            },
            Self::Portrait {
                edge_range,
                deadzone_up_x,
                deadzone_dn_x,
                deadzone_y,
            } => vec![u16_payload(
                GRIP_PORTRAIT,
                &[edge_range, deadzone_up_x, deadzone_dn_x, deadzone_y],
            )],
            Self::Landscape(None) => vec![vec![GRIP_LANDSCAPE, 0]],
            Self::Landscape(Some(l)) => vec![
                u16_payload(
                    GRIP_LANDSCAPE,
                    &[l.edge, l.deadzone, l.top_deadzone, l.bottom_deadzone],
                ),
                u16_payload(GRIP_LANDSCAPE_ZONES, &[l.top_gripzone, l.bottom_gripzone]),
            ],
        };
        payloads
            .iter()
            .map(|p| Command::with_data(ids::GRIP, p))
            .collect()
    }

    fn slot(&self) -> u8 {
        match self {
            Self::EdgeHandler { .. } => GRIP_EDGE_HANDLER,
            Self::Portrait { .. } => GRIP_PORTRAIT,
            Self::Landscape(_) => GRIP_LANDSCAPE,
        }
    }
}

/// Modes the host has set since bring-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SoftConfig {
    /// Low-power feature byte.
    pub lowpower_mode: u8,
    /// AOD rectangle (w, h, x, y).
    pub aod_rect: Option<[u16; 4]>,
    /// FOD rectangle (l, t, r, b).
    pub fod_rect: Option<[u16; 4]>,
    /// Cover closed flag and cover type.
    pub cover: Option<(bool, u8)>,
    /// Refresh-rate mode: 0 normal, 1 adaptive, 2 always high.
    pub refresh_rate: Option<u8>,
    /// Grip zones, one per kind.
    pub grip: Vec<GripZone>,
    /// Charger attached.
    pub charger: Option<bool>,
    /// Game mode.
    pub game: Option<bool>,
    /// Glove mode.
    pub glove: Option<bool>,
    /// Note mode.
    pub note: Option<bool>,
    /// Sip mode.
    pub sip: Option<bool>,
    /// Edge reporting disabled.
    pub dead_zone: Option<bool>,
    /// Ear detection.
    pub ear_detect: EarDetect,
    /// Pocket detection.
    pub pocket: bool,
}

impl SoftConfig {
    /// Record a grip zone, replacing an earlier one of the same kind.
    pub fn set_grip(&mut self, zone: GripZone) {
        self.grip.retain(|z| z.slot() != zone.slot());
        self.grip.push(zone);
    }

    /// Whether suspend should keep the controller in low-power gesture mode.
    pub fn lowpower_enabled(&self) -> bool {
        self.lowpower_mode != 0 || self.ear_detect != EarDetect::Off || self.pocket
    }

    /// Sponge contents to restore, as `(offset, bytes)`.
    pub fn sponge_writes(&self) -> Vec<(u16, Vec<u8>)> {
        let rect = |r: &[u16; 4]| r.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>();
        let mut out = vec![(SPONGE_LOWPOWER_OFFSET, vec![self.lowpower_mode])];
        if let Some(r) = &self.aod_rect {
            out.push((SPONGE_AOD_RECT_OFFSET, rect(r)));
        }
        if let Some(r) = &self.fod_rect {
            out.push((SPONGE_FOD_RECT_OFFSET, rect(r)));
        }
        out
    }

    /// Commands restoring every recorded mode, in replay order.
    pub fn commands(&self) -> Result<Vec<Command>> {
        let mut cmds = Vec::new();
        let flag = |id: u8, v: Option<bool>| v.map(|on| Command::with_byte(id, u8::from(on)));

        if let Some((closed, kind)) = self.cover {
            cmds.push(Command::with_data(ids::COVER, &[u8::from(closed), kind])?);
        }
        if let Some(rate) = self.refresh_rate {
            cmds.push(Command::with_byte(ids::REFRESH_RATE, rate));
        }
        for zone in &self.grip {
            cmds.extend(zone.commands()?);
        }
        cmds.extend(flag(ids::CHARGER, self.charger));
        cmds.extend(flag(ids::GAME, self.game));
        cmds.extend(flag(ids::GLOVE, self.glove));
        cmds.extend(flag(ids::NOTE, self.note));
        cmds.extend(flag(ids::SIP, self.sip));
        if let Some(off) = self.dead_zone {
            cmds.push(Command::with_byte(ids::DEAD_ZONE, u8::from(!off)));
        }
        if self.ear_detect != EarDetect::Off {
            cmds.push(Command::with_byte(ids::EAR_DETECT, self.ear_detect.code()));
        }
        if self.pocket {
            cmds.push(Command::with_byte(ids::POCKET, 1));
        }
        Ok(cmds)
    }
}
