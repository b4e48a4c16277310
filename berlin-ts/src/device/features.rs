//! Host-visible features built on the transaction and flash engines.
//!
//! | Feature              | Path                                            |
//! |----------------------|-------------------------------------------------|
//! | Mode setters         | `send_cmd`, recorded in [`SoftConfig`]          |
//! | Low-power / AOD      | sponge writes, recorded in [`SoftConfig`]       |
//! | Capacitance frames   | output-mode command + `frame_data_addr` polling |
//! | Prox / sensitivity   | `production_test_addr` result blocks            |
//! | NVM user data        | flash staging buffer at the variant NVM address |

use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};

use super::soft_config::{
    EarDetect, GripZone, SPONGE_AOD_RECT_OFFSET, SPONGE_FOD_RECT_OFFSET, SPONGE_LOWPOWER_OFFSET,
    SoftConfig,
};
use super::{Device, HardwareOps, PowerState};
use crate::bus::{Bus, Platform};
use crate::error::{Error, Result};
use crate::protocol::Session;
use crate::protocol::checksum::verify_checksum16;
use crate::protocol::command::{Command, ids};
use crate::protocol::flash::FlashBuffer;
use crate::protocol::ic_info::IcMiscBlock;
use crate::target::IcVariant;

/// Largest NVM user-data transfer.
pub const NVM_MAX_LEN: usize = 32;

/// `frame_data_addr` byte 0 once a capacitance frame is ready.
const FRAME_READY: u8 = 0x80;
const CAP_POLL_DELAY: Duration = Duration::from_millis(5);
const CAP_MAX_POLLS: usize = 50;

const PROX_RECORD_LEN: usize = 11;
const PROX_READY: u8 = 0xAA;
const PROX_POLL_DELAY: Duration = Duration::from_millis(5);
const PROX_MAX_POLLS: usize = 20;

const SENSITIVITY_LEN: usize = 40;
const SENSITIVITY_POINTS: usize = 9;
const SENSITIVITY_POLL_DELAY: Duration = Duration::from_millis(5);
const SENSITIVITY_MAX_POLLS: usize = 20;

/// Token written by the connection check; live firmware overwrites it.
const CONNECTION_TOKEN: u8 = 0xAA;
const CONNECTION_SETTLE: Duration = Duration::from_millis(100);

/// Disassemble counter value of an erased NVM byte.
const NVM_ERASED: u8 = 0xFF;
/// Counter saturation point.
const DISASSEMBLE_MAX: u8 = 0xFE;

/// Capacitance frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CapacitanceKind {
    /// Raw counts.
    Raw,
    /// Difference against the baseline.
    Diff,
}

impl CapacitanceKind {
    fn command(self) -> u8 {
        match self {
            Self::Raw => ids::RAWDATA,
            Self::Diff => ids::DIFFDATA,
        }
    }
}

/// One captured capacitance frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CapacitanceData {
    /// Frame kind.
    pub kind: CapacitanceKind,
    /// Drive channels.
    pub drv_num: usize,
    /// Sense channels.
    pub sen_num: usize,
    /// `drv_num × sen_num` mutual values, drive-major.
    pub mutual: Vec<i16>,
    /// `drv_num + sen_num` self values.
    pub self_cap: Vec<i16>,
}

impl CapacitanceData {
    /// Mutual value at a node.
    pub fn mutual_at(&self, drv: usize, sen: usize) -> Option<i16> {
        if drv >= self.drv_num || sen >= self.sen_num {
            return None;
        }
        self.mutual.get(drv * self.sen_num + sen).copied()
    }
}

/// Proximity sums and thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProxIntensity {
    /// Sum along X.
    pub sum_x: u16,
    /// Sum along Y.
    pub sum_y: u16,
    /// Threshold along X.
    pub thd_x: u16,
    /// Threshold along Y.
    pub thd_y: u16,
}

#[allow(clippy::cast_possible_truncation)]
fn offset(n: usize) -> u32 {
    n as u32
}

fn read_i16s<B: Bus + ?Sized>(session: &mut Session<'_, B>, addr: u32, count: usize) -> Result<Vec<i16>> {
    let raw = session.read_vec(addr, count * 2)?;
    let mut values = vec![0i16; count];
    LittleEndian::read_i16_into(&raw, &mut values);
    Ok(values)
}

impl<V, B, P> Device<V, B, P>
where
    V: IcVariant,
    B: Bus + 'static,
    P: Platform + 'static,
{
    // -- mode setters ------------------------------------------------------

    /// Cover closed flag and cover type.
    pub fn set_cover(&self, closed: bool, kind: u8) -> Result<()> {
        let cmd = Command::with_data(ids::COVER, &[u8::from(closed), kind])?;
        self.apply_mode(|soft| soft.cover = Some((closed, kind)), &[cmd])
    }

    /// Refresh-rate mode: 0 normal, 1 adaptive, 2 always high.
    pub fn set_refresh_rate(&self, mode: u8) -> Result<()> {
        if mode > 2 {
            return Err(Error::InvalidArgument(format!("refresh rate mode {mode}")));
        }
        self.apply_mode(
            |soft| soft.refresh_rate = Some(mode),
            &[Command::with_byte(ids::REFRESH_RATE, mode)],
        )
    }

    /// Program a grip zone.
    pub fn set_grip(&self, zone: GripZone) -> Result<()> {
        let cmds = zone.commands()?;
        self.apply_mode(|soft| soft.set_grip(zone), &cmds)
    }

    /// Charger attached.
    pub fn set_charger(&self, on: bool) -> Result<()> {
        self.set_flag(ids::CHARGER, on, |soft| soft.charger = Some(on))
    }

    /// Game mode.
    pub fn set_game(&self, on: bool) -> Result<()> {
        self.set_flag(ids::GAME, on, |soft| soft.game = Some(on))
    }

    /// Glove mode.
    pub fn set_glove(&self, on: bool) -> Result<()> {
        self.set_flag(ids::GLOVE, on, |soft| soft.glove = Some(on))
    }

    /// Note mode.
    pub fn set_note(&self, on: bool) -> Result<()> {
        self.set_flag(ids::NOTE, on, |soft| soft.note = Some(on))
    }

    /// Sip mode.
    pub fn set_sip(&self, on: bool) -> Result<()> {
        self.set_flag(ids::SIP, on, |soft| soft.sip = Some(on))
    }

    /// Disable (true) or restore (false) edge reporting.
    pub fn set_dead_zone(&self, off: bool) -> Result<()> {
        self.apply_mode(
            |soft| soft.dead_zone = Some(off),
            &[Command::with_byte(ids::DEAD_ZONE, u8::from(!off))],
        )
    }

    fn set_flag(&self, id: u8, on: bool, record: impl FnOnce(&mut SoftConfig)) -> Result<()> {
        self.apply_mode(record, &[Command::with_byte(id, u8::from(on))])
    }

    /// Low-power feature byte (see [`super::soft_config::lowpower`]).
    pub fn set_lowpower_mode(&self, mode: u8) -> Result<()> {
        super::lock(&self.soft).lowpower_mode = mode;
        self.write_to_sponge(SPONGE_LOWPOWER_OFFSET, &[mode])
    }

    /// AOD active rectangle (w, h, x, y).
    pub fn set_aod_rect(&self, rect: [u16; 4]) -> Result<()> {
        super::lock(&self.soft).aod_rect = Some(rect);
        self.write_to_sponge(SPONGE_AOD_RECT_OFFSET, &rect_bytes(rect))
    }

    /// FOD rectangle (l, t, r, b).
    pub fn set_fod_rect(&self, rect: [u16; 4]) -> Result<()> {
        super::lock(&self.soft).fod_rect = Some(rect);
        self.write_to_sponge(SPONGE_FOD_RECT_OFFSET, &rect_bytes(rect))
    }

    // -- sponge ------------------------------------------------------------

    fn sponge_addr(&self) -> Result<u32> {
        let addr = self.with_info(|i| i.other.sponge_addr)?;
        if addr == 0 {
            return Err(Error::InvalidDescriptor("no sponge region".into()));
        }
        Ok(addr)
    }

    /// Read `len` bytes at `offset` in the sponge region.
    pub fn read_from_sponge(&self, offset: u16, len: usize) -> Result<Vec<u8>> {
        let addr = self.sponge_addr()? + u32::from(offset);
        self.with_session(|s| s.read_vec(addr, len))
    }

    /// Write `data` at `offset` in the sponge region.
    pub fn write_to_sponge(&self, offset: u16, data: &[u8]) -> Result<()> {
        let addr = self.sponge_addr()? + u32::from(offset);
        self.with_session(|s| s.write(addr, data))
    }

    // -- NVM ---------------------------------------------------------------

    /// Read `len` bytes of NVM user data.
    pub fn read_nvm_data(&self, len: usize) -> Result<Vec<u8>> {
        check_nvm_len(len)?;
        let buffer = self.with_info(FlashBuffer::from_ic_info)?;
        let _esd = self.pause_esd();
        let _irq = self.mask_irq()?;
        let _op = self.lock_ops();
        self.with_session(|s| s.read_from_flash(&buffer, V::nvm_addr(), len))
    }

    /// Write NVM user data.
    pub fn write_nvm_data(&self, data: &[u8]) -> Result<()> {
        check_nvm_len(data.len())?;
        let buffer = self.with_info(FlashBuffer::from_ic_info)?;
        let _esd = self.pause_esd();
        let _irq = self.mask_irq()?;
        let _op = self.lock_ops();
        self.with_session(|s| s.write_to_flash(&buffer, V::nvm_addr(), data))
    }

    /// Disassemble counter; an erased byte is reset to zero.
    pub fn disassemble_count(&self) -> Result<u8> {
        let count = self.read_nvm_data(1)?[0];
        if count == NVM_ERASED {
            warn!("nvm: erased disassemble count, clearing");
            self.write_nvm_data(&[0])?;
            return Ok(0);
        }
        Ok(count)
    }

    /// Increment the disassemble counter, saturating at 0xFE.
    pub fn increase_disassemble_count(&self) -> Result<u8> {
        let mut count = self.read_nvm_data(1)?[0];
        if count == NVM_ERASED {
            count = 0;
        }
        if count < DISASSEMBLE_MAX {
            count += 1;
        }
        self.write_nvm_data(&[count])?;
        info!("nvm: disassemble count {count}");
        Ok(count)
    }

    // -- diagnostics -------------------------------------------------------

    /// Whether the firmware is running: it must overwrite a token written
    /// to the ESD register within 100 ms.
    pub fn check_connection(&self) -> Result<bool> {
        if self.power_state() != PowerState::On {
            return Err(Error::NotReady(format!("power state {:?}", self.power_state())));
        }
        let esd_addr = self.with_info(|i| i.misc.esd_addr)?;
        let _esd = self.pause_esd();
        let _irq = self.mask_irq()?;
        self.with_session(|s| {
            s.write(esd_addr, &[CONNECTION_TOKEN])?;
            s.sleep(CONNECTION_SETTLE);
            let reg = s.read_vec(esd_addr, 1)?;
            Ok(reg[0] != CONNECTION_TOKEN)
        })
    }

    pub(crate) fn read_capacitance(&self, kind: CapacitanceKind) -> Result<CapacitanceData> {
        let (misc, drv_num, sen_num) = self.with_info(|i| {
            (
                i.misc.clone(),
                usize::from(i.parm.drv_num),
                usize::from(i.parm.sen_num),
            )
        })?;
        let _irq = self.mask_irq()?;

        self.with_session(|s| {
            s.send_cmd(misc.cmd_addr, &Command::new(kind.command()))?;
            let result = capture_frame(s, &misc, kind, drv_num, sen_num);
            let restore = s
                .write(misc.frame_data_addr, &[0x00])
                .and_then(|()| s.send_cmd(misc.cmd_addr, &Command::new(ids::COORD)));
            let data = result?;
            restore?;
            debug!("{kind:?} frame: {drv_num}x{sen_num}");
            Ok(data)
        })
    }

    /// Sum and threshold of the proximity channels. Needs call mode with
    /// intensity reporting, which is entered and left around the read if
    /// not already active.
    pub fn read_prox_intensity(&self) -> Result<ProxIntensity> {
        if self.power_state() != PowerState::On {
            return Err(Error::NotReady(format!("power state {:?}", self.power_state())));
        }
        let (cmd_addr, test_addr) =
            self.with_info(|i| (i.misc.cmd_addr, i.other.production_test_addr))?;
        let ear_detect = self.soft_config().ear_detect;
        let enter_call_mode = ear_detect != EarDetect::Prox;

        self.with_session(|s| {
            let result = measure_prox(s, cmd_addr, test_addr, enter_call_mode);
            let disable = s.send_cmd(cmd_addr, &Command::with_byte(ids::PROX_TEST, 0));
            let restore = if enter_call_mode {
                s.send_cmd(cmd_addr, &Command::with_byte(ids::EAR_DETECT, ear_detect.code()))
            } else {
                Ok(())
            };
            let intensity = result?;
            disable?;
            restore?;
            Ok(intensity)
        })
    }

    /// Enter or leave sensitivity measurement. The watchdog is off while
    /// the mode is active.
    pub fn set_sensitivity_mode(&self, enable: bool) -> Result<()> {
        self.send_cmd(&Command::with_byte(ids::SENSITIVITY, u8::from(enable)))?;
        if enable {
            self.disarm_esd();
        } else {
            self.arm_esd()?;
        }
        info!("sensitivity mode {}", if enable { "on" } else { "off" });
        Ok(())
    }

    /// Nine sensitivity points measured in sensitivity mode.
    pub fn read_sensitivity(&self) -> Result<[i16; SENSITIVITY_POINTS]> {
        let addr = self.with_info(|i| i.other.production_test_addr)?;
        self.with_session(|s| {
            s.poll_sentinel(
                addr,
                2,
                [0xAA, 0xAA],
                SENSITIVITY_POLL_DELAY,
                SENSITIVITY_MAX_POLLS,
            )?;
            let buf = s.read_vec(addr, SENSITIVITY_LEN)?;
            verify_checksum16(&buf[2..])?;
            s.write(addr, &[0, 0])?;

            let mut points = [0i16; SENSITIVITY_POINTS];
            for (i, p) in points.iter_mut().enumerate() {
                *p = LittleEndian::read_i16(&buf[i * 4 + 2..]);
            }
            Ok(points)
        })
    }
}

fn capture_frame<B: Bus + ?Sized>(
    s: &mut Session<'_, B>,
    misc: &IcMiscBlock,
    kind: CapacitanceKind,
    drv_num: usize,
    sen_num: usize,
) -> Result<CapacitanceData> {
    let mut flag = [0u8; 1];
    let mut ready = false;
    for _ in 0..CAP_MAX_POLLS {
        s.sleep(CAP_POLL_DELAY);
        s.read(misc.frame_data_addr, &mut flag)?;
        if flag[0] == FRAME_READY {
            ready = true;
            break;
        }
    }
    if !ready {
        return Err(Error::Timeout(format!(
            "{kind:?} frame not ready after {CAP_MAX_POLLS} polls"
        )));
    }

    let mutual_addr = misc.frame_data_addr
        + u32::from(misc.frame_data_head_len)
        + u32::from(misc.mutual_struct_len);
    let mutual = read_i16s(s, mutual_addr, drv_num * sen_num)?;
    let self_addr =
        mutual_addr + offset(drv_num * sen_num * 2) + u32::from(misc.self_struct_len);
    let self_cap = read_i16s(s, self_addr, drv_num + sen_num)?;
    Ok(CapacitanceData {
        kind,
        drv_num,
        sen_num,
        mutual,
        self_cap,
    })
}

fn measure_prox<B: Bus + ?Sized>(
    s: &mut Session<'_, B>,
    cmd_addr: u32,
    test_addr: u32,
    enter_call_mode: bool,
) -> Result<ProxIntensity> {
    if enter_call_mode {
        s.send_cmd(cmd_addr, &Command::with_byte(ids::EAR_DETECT, EarDetect::Prox.code()))?;
    }
    s.send_cmd(cmd_addr, &Command::with_byte(ids::PROX_TEST, 1))?;

    let mut buf = [0u8; PROX_RECORD_LEN];
    let mut ready = false;
    for _ in 0..PROX_MAX_POLLS {
        s.sleep(PROX_POLL_DELAY);
        s.read(test_addr, &mut buf)?;
        if buf[0] == PROX_READY {
            ready = true;
            break;
        }
    }
    if !ready {
        return Err(Error::Timeout(format!(
            "prox sums not ready, status 0x{:02X}",
            buf[0]
        )));
    }
    verify_checksum16(&buf[1..])?;
    Ok(ProxIntensity {
        sum_x: LittleEndian::read_u16(&buf[1..]),
        sum_y: LittleEndian::read_u16(&buf[3..]),
        thd_x: LittleEndian::read_u16(&buf[5..]),
        thd_y: LittleEndian::read_u16(&buf[7..]),
    })
}

fn rect_bytes(rect: [u16; 4]) -> Vec<u8> {
    let mut out = vec![0u8; 8];
    LittleEndian::write_u16_into(&rect, &mut out);
    out
}

fn check_nvm_len(len: usize) -> Result<()> {
    if len == 0 || len > NVM_MAX_LEN {
        return Err(Error::InvalidArgument(format!(
            "nvm transfer of {len} bytes, allowed 1..={NVM_MAX_LEN}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::checksum::append_checksum16;
    use crate::testutil::{PlatformEvent, bench};

    const FRAME_ADDR: u32 = 0x10308;
    const TEST_ADDR: u32 = 0x15D4C;
    const ESD_ADDR: u32 = 0x10170;
    const SPONGE_ADDR: u32 = 0x14000;
    const NVM_ADDR: u32 = 0x7_F000;

    fn le(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_capacitance_frame_layout() {
        let b = bench();
        // flag + 7 header bytes + 4 mutual struct bytes
        b.sim.poke(FRAME_ADDR, &[FRAME_READY]);
        b.sim.poke(FRAME_ADDR + 12, &le(&[10, -20, 30, 40, 50, 60]));
        // 12 mutual bytes + 4 self struct bytes
        b.sim.poke(FRAME_ADDR + 12 + 12 + 4, &le(&[1, 2, 3, 4, -5]));

        let data = b.device.get_capacitance_data(CapacitanceKind::Raw).unwrap();
        assert_eq!(data.mutual, vec![10, -20, 30, 40, 50, 60]);
        assert_eq!(data.self_cap, vec![1, 2, 3, 4, -5]);
        assert_eq!(data.mutual_at(1, 0), Some(40));
        assert_eq!(data.mutual_at(2, 0), None);

        assert_eq!(b.sim.command_ids(), vec![ids::RAWDATA, ids::COORD]);
        assert_eq!(b.sim.writes_to(FRAME_ADDR), vec![vec![0x00]]);
        assert_eq!(
            b.platform.events(),
            vec![PlatformEvent::Irq(false), PlatformEvent::Irq(true)]
        );
    }

    #[test]
    fn test_capacitance_timeout_restores_normal_mode() {
        let b = bench();
        let err = b
            .device
            .get_capacitance_data(CapacitanceKind::Diff)
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(b.sim.command_ids(), vec![ids::DIFFDATA, ids::COORD]);
        assert_eq!(b.sim.reads_at(FRAME_ADDR), CAP_MAX_POLLS);
        assert!(b.device.irq_enabled());
    }

    fn prox_record(values: [u16; 4]) -> Vec<u8> {
        let mut body: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        append_checksum16(&mut body);
        let mut rec = vec![PROX_READY];
        rec.extend(body);
        rec
    }

    #[test]
    fn test_prox_intensity_enters_and_leaves_call_mode() {
        let b = bench();
        b.sim.poke(TEST_ADDR, &prox_record([100, 200, 30, 40]));

        let prox = b.device.read_prox_intensity().unwrap();
        assert_eq!(
            prox,
            ProxIntensity {
                sum_x: 100,
                sum_y: 200,
                thd_x: 30,
                thd_y: 40
            }
        );
        assert_eq!(
            b.sim.commands(),
            vec![
                (ids::EAR_DETECT, vec![3]),
                (ids::PROX_TEST, vec![1]),
                (ids::PROX_TEST, vec![0]),
                (ids::EAR_DETECT, vec![0]),
            ]
        );
    }

    #[test]
    fn test_prox_checksum_error_still_disables_test() {
        let b = bench();
        b.device.set_ear_detect(EarDetect::Prox).unwrap();
        b.sim.clear_log();
        let mut rec = prox_record([1, 2, 3, 4]);
        rec[2] ^= 0xFF;
        b.sim.poke(TEST_ADDR, &rec);

        assert!(matches!(
            b.device.read_prox_intensity(),
            Err(Error::ChecksumMismatch { .. })
        ));
        assert_eq!(
            b.sim.commands(),
            vec![(ids::PROX_TEST, vec![1]), (ids::PROX_TEST, vec![0])]
        );
    }

    #[test]
    fn test_sensitivity_points() {
        let b = bench();
        let mut body = vec![0u8; SENSITIVITY_LEN - 4];
        for i in 0..SENSITIVITY_POINTS {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let v = (i as i16 - 4) * 100;
            body[i * 4..i * 4 + 2].copy_from_slice(&v.to_le_bytes());
        }
        append_checksum16(&mut body);
        let mut block = vec![0xAA, 0xAA];
        block.extend(body);
        b.sim.poke(TEST_ADDR, &block);

        let points = b.device.read_sensitivity().unwrap();
        assert_eq!(points[0], -400);
        assert_eq!(points[8], 400);
        assert_eq!(b.sim.peek(TEST_ADDR, 2), vec![0, 0]);
    }

    #[test]
    fn test_disassemble_count_clears_erased_byte() {
        let b = bench();
        b.sim.set_flash(NVM_ADDR, &[NVM_ERASED]);
        assert_eq!(b.device.disassemble_count().unwrap(), 0);
        assert_eq!(b.sim.flash_contents(NVM_ADDR, 1), vec![0]);
        assert_eq!(b.device.increase_disassemble_count().unwrap(), 1);
        assert_eq!(b.device.disassemble_count().unwrap(), 1);
    }

    #[test]
    fn test_disassemble_count_saturates() {
        let b = bench();
        b.sim.set_flash(NVM_ADDR, &[DISASSEMBLE_MAX]);
        assert_eq!(b.device.increase_disassemble_count().unwrap(), DISASSEMBLE_MAX);
    }

    #[test]
    fn test_nvm_length_bounds() {
        let b = bench();
        assert!(matches!(b.device.read_nvm_data(0), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            b.device.write_nvm_data(&[0; NVM_MAX_LEN + 1]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_nvm_transfers_run_with_irq_masked() {
        let b = bench();
        b.sim.watch_irq(&b.platform);

        b.device.write_nvm_data(&[0x12]).unwrap();
        assert_eq!(
            b.platform.events(),
            vec![PlatformEvent::Irq(false), PlatformEvent::Irq(true)]
        );
        assert_eq!(b.device.read_nvm_data(1).unwrap(), vec![0x12]);

        let states = b.sim.flash_irq_states();
        // W_START, RW_FINISH, R_START, RW_FINISH
        assert_eq!(states.len(), 4);
        assert!(states.iter().all(|s| *s == Some(false)));
        assert_eq!(
            b.platform.events(),
            vec![
                PlatformEvent::Irq(false),
                PlatformEvent::Irq(true),
                PlatformEvent::Irq(false),
                PlatformEvent::Irq(true),
            ]
        );
        assert!(b.device.irq_enabled());
        assert_eq!(b.device.esd_state(), crate::esd::EsdState::Armed);
    }

    #[test]
    fn test_check_connection() {
        let b = bench();
        // simulator never rewrites the register: dead firmware
        assert!(!b.device.check_connection().unwrap());
        b.sim.queue_read(ESD_ADDR, &[0x00]);
        assert!(b.device.check_connection().unwrap());
        assert!(b.delay.calls().contains(&CONNECTION_SETTLE));
        assert_eq!(
            b.platform.events(),
            vec![
                PlatformEvent::Irq(false),
                PlatformEvent::Irq(true),
                PlatformEvent::Irq(false),
                PlatformEvent::Irq(true),
            ]
        );
    }

    #[test]
    fn test_sponge_and_lowpower_setters() {
        let b = bench();
        b.device.set_aod_rect([1080, 500, 0, 0]).unwrap();
        assert_eq!(
            b.sim.peek(SPONGE_ADDR + u32::from(SPONGE_AOD_RECT_OFFSET), 4),
            vec![0x38, 0x04, 0xF4, 0x01]
        );
        b.device.write_to_sponge(0x10, &[1, 2]).unwrap();
        assert_eq!(b.device.read_from_sponge(0x10, 2).unwrap(), vec![1, 2]);

        b.device.set_lowpower_mode(0x24).unwrap();
        assert_eq!(b.sim.peek(SPONGE_ADDR, 1), vec![0x24]);
        assert_eq!(b.device.soft_config().lowpower_mode, 0x24);
        assert!(b.sim.commands().is_empty());
    }

    #[test]
    fn test_mode_setters_record_and_send() {
        let b = bench();
        b.device.set_game(true).unwrap();
        b.device.set_dead_zone(true).unwrap();
        assert!(matches!(
            b.device.set_refresh_rate(3),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(
            b.sim.commands(),
            vec![(ids::GAME, vec![1]), (ids::DEAD_ZONE, vec![0])]
        );
        let soft = b.device.soft_config();
        assert_eq!(soft.game, Some(true));
        assert_eq!(soft.dead_zone, Some(true));
        assert_eq!(soft.refresh_rate, None);
    }

    #[test]
    fn test_idle_and_sense_commands() {
        let b = bench();
        b.device.enable_idle(false).unwrap();
        b.device.sense_off(true).unwrap();
        assert_eq!(
            b.sim.commands(),
            vec![(ids::IDLE, vec![2]), (ids::SENSE_CTRL, vec![1])]
        );
    }
}
