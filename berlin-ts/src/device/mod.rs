//! Device context.
//!
//! A [`Device`] is created when a controller is bound and owns every
//! subsystem handle: the register bus, the board platform, the parsed
//! descriptors, the ESD watchdog and the soft configuration that is
//! replayed after every reset. It is shared as an `Arc` so the watchdog
//! thread can reach it; all operations take `&self`.
//!
//! ## Locking
//!
//! ```text
//! +--------------+   firmware update, self-test, suspend/resume, recovery
//! |  op_lock     |
//! +------+-------+
//!        |
//!        v
//! +--------------+   exactly one Session (transaction) at a time
//! |  bus         |
//! +--------------+
//! ```
//!
//! The watchdog is disarmed *before* `op_lock` is taken. Its recovery path
//! takes `op_lock` itself and disarming waits for a running tick.
//!
//! ## Power states
//!
//! ```text
//!            power_on / resume
//!   Off ─────────────────────────▶ On
//!    ▲  ◀── suspend (sleep) ─────  │ │
//!    │  ◀── power_off ───────────  │ │ suspend (low-power features set)
//!    │                             │ ▼
//!    └──────────── resume ──── LowPower
//! ```

pub mod config;
pub mod features;
pub mod soft_config;
pub mod update;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use log::{debug, info, warn};

use crate::bus::{Bus, Delay, Platform};
use crate::error::{Error, Result};
use crate::esd::{EsdState, EsdStatus, EsdTarget, EsdWatchdog};
use crate::protocol::Session;
use crate::protocol::command::{Command, ids};
use crate::protocol::event::{EventFrame, EventSink};
use crate::protocol::ic_info::IcInfo;
use crate::protocol::version::FirmwareVersion;
use crate::target::IcVariant;

pub use config::{DeviceConfig, ShortThresholds};
pub use features::{CapacitanceData, CapacitanceKind, ProxIntensity};
pub use soft_config::{EarDetect, GripZone, LandscapeGrip, SoftConfig};

/// Width of the reset pulse.
const RESET_PULSE: Duration = Duration::from_millis(2);

/// Controller power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerState {
    /// Unpowered or sleeping; only `power_on` and `resume` are accepted.
    #[default]
    Off,
    /// Scanning.
    On,
    /// Gesture (low-power) scanning, interrupt enabled.
    LowPower,
}

/// Capability set exposed to the rest of the driver.
pub trait HardwareOps {
    /// Enable supplies and release reset.
    fn power_on(&self) -> Result<()>;

    /// Disable the interrupt, hold reset and cut supplies.
    fn power_off(&self) -> Result<()>;

    /// Pulse the reset line, then wait `settle`.
    fn reset(&self, settle: Duration) -> Result<()>;

    /// Enable or disable interrupt delivery.
    fn irq_enable(&self, enable: bool) -> Result<()>;

    /// Enter sleep, or gesture mode when a low-power feature is set.
    fn suspend(&self) -> Result<()>;

    /// Leave sleep or gesture mode.
    fn resume(&self) -> Result<()>;

    /// Run one command transaction.
    fn send_cmd(&self, cmd: &Command) -> Result<()>;

    /// Raw register read.
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Raw register write.
    fn write(&self, addr: u32, data: &[u8]) -> Result<()>;

    /// Read the firmware version record.
    fn read_version(&self) -> Result<FirmwareVersion>;

    /// Read the IcInfo record from the device.
    fn get_ic_info(&self) -> Result<IcInfo>;

    /// One liveness check of the ESD register.
    fn esd_check(&self) -> Result<EsdStatus>;

    /// Read, acknowledge and dispatch the pending event frame.
    fn event_handler(&self, sink: &mut dyn EventSink) -> Result<EventFrame>;

    /// Capture one raw or differential capacitance frame.
    fn get_capacitance_data(&self, kind: CapacitanceKind) -> Result<CapacitanceData>;

    /// Allow (true) or forbid (false) the firmware idle state.
    fn enable_idle(&self, enable: bool) -> Result<()>;

    /// Stop (true) or restart (false) sensing.
    fn sense_off(&self, off: bool) -> Result<()>;

    /// Set the ear detection mode.
    fn set_ear_detect(&self, mode: EarDetect) -> Result<()>;

    /// Enable or disable pocket detection.
    fn set_pocket(&self, enable: bool) -> Result<()>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A bound controller of generation `V`.
pub struct Device<V: IcVariant, B: Bus + 'static, P: Platform + 'static> {
    me: Weak<Device<V, B, P>>,
    bus: Mutex<B>,
    platform: Mutex<P>,
    delay: Arc<dyn Delay>,
    config: DeviceConfig,
    ic_info: RwLock<Option<IcInfo>>,
    version: RwLock<Option<FirmwareVersion>>,
    soft: Mutex<SoftConfig>,
    power: Mutex<PowerState>,
    op_lock: Mutex<()>,
    irq_enabled: AtomicBool,
    irq_seen: AtomicBool,
    tools_sync: AtomicBool,
    esd: Mutex<EsdWatchdog>,
    _variant: PhantomData<fn() -> V>,
}

impl<V, B, P> Device<V, B, P>
where
    V: IcVariant,
    B: Bus + 'static,
    P: Platform + 'static,
{
    /// Bind a controller. Nothing touches the bus until [`Device::probe`].
    pub fn new(bus: B, platform: P, delay: Arc<dyn Delay>, config: DeviceConfig) -> Arc<Self> {
        let esd = EsdWatchdog::new(config.esd_period);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            bus: Mutex::new(bus),
            platform: Mutex::new(platform),
            delay,
            config,
            ic_info: RwLock::new(None),
            version: RwLock::new(None),
            soft: Mutex::new(SoftConfig::default()),
            power: Mutex::new(PowerState::Off),
            op_lock: Mutex::new(()),
            irq_enabled: AtomicBool::new(false),
            irq_seen: AtomicBool::new(false),
            tools_sync: AtomicBool::new(false),
            esd: Mutex::new(esd),
            _variant: PhantomData,
        })
    }

    /// Bring-up: power on, read descriptors, restore soft configuration,
    /// enable the interrupt and arm the watchdog.
    pub fn probe(&self) -> Result<()> {
        info!("probing {} controller", V::GENERATION);
        self.power_up()?;
        let info = self.load_descriptors()?;
        debug!("{info}");
        self.replay()?;
        self.irq_enable(true)?;
        self.arm_esd()
    }

    /// Configuration the device was bound with.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Current power state.
    pub fn power_state(&self) -> PowerState {
        *lock(&self.power)
    }

    /// Cached IcInfo.
    pub fn ic_info(&self) -> Option<IcInfo> {
        self.ic_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cached firmware version.
    pub fn version(&self) -> Option<FirmwareVersion> {
        self.version
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the soft configuration.
    pub fn soft_config(&self) -> SoftConfig {
        lock(&self.soft).clone()
    }

    /// Watchdog state.
    pub fn esd_state(&self) -> EsdState {
        lock(&self.esd).state()
    }

    /// Whether interrupt delivery is enabled.
    pub fn irq_enabled(&self) -> bool {
        self.irq_enabled.load(Ordering::SeqCst)
    }

    /// While set, event frames are not acknowledged; an external tool
    /// reads them and owns the handshake.
    pub fn set_tools_sync(&self, enable: bool) {
        self.tools_sync.store(enable, Ordering::SeqCst);
    }

    pub(crate) fn with_session<T>(&self, f: impl FnOnce(&mut Session<'_, B>) -> Result<T>) -> Result<T> {
        let mut bus = lock(&self.bus);
        let mut session = Session::new(&mut *bus, self.delay.as_ref());
        f(&mut session)
    }

    pub(crate) fn with_info<T>(&self, f: impl FnOnce(&IcInfo) -> T) -> Result<T> {
        self.ensure_powered()?;
        self.ic_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(f)
            .ok_or_else(|| Error::NotReady("IcInfo not loaded".into()))
    }

    pub(crate) fn ensure_powered(&self) -> Result<()> {
        match self.power_state() {
            PowerState::Off => Err(Error::NotReady("device is powered off".into())),
            PowerState::On | PowerState::LowPower => Ok(()),
        }
    }

    pub(crate) fn sleep(&self, duration: Duration) {
        self.delay.delay(duration);
    }

    fn set_power_state(&self, state: PowerState) {
        *lock(&self.power) = state;
    }

    /// Supplies on with reset held, then release reset.
    fn power_up(&self) -> Result<()> {
        {
            let mut platform = lock(&self.platform);
            platform.set_reset(true)?;
            platform.set_power(true)?;
        }
        self.sleep(self.config.power_on_settle);
        lock(&self.platform).set_reset(false)?;
        self.sleep(self.config.reset_settle);
        self.set_power_state(PowerState::On);
        info!("power on");
        Ok(())
    }

    fn power_down(&self) -> Result<()> {
        {
            let mut platform = lock(&self.platform);
            platform.set_reset(true)?;
            platform.set_power(false)?;
        }
        self.sleep(self.config.power_off_settle);
        self.set_power_state(PowerState::Off);
        info!("power off");
        Ok(())
    }

    /// Read version and IcInfo into the cache. A failed IcInfo read leaves
    /// the device without a descriptor until the next successful read.
    pub(crate) fn load_descriptors(&self) -> Result<IcInfo> {
        let result = self.with_session(|s| {
            let version = s.read_version(V::version_addr())?;
            let info = s.read_ic_info(V::ic_info_addr())?;
            Ok((version, info))
        });
        let mut cached = self.ic_info.write().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok((version, info)) => {
                info!("firmware {version}, {}", info.firmware_string());
                *self.version.write().unwrap_or_else(PoisonError::into_inner) = Some(version);
                *cached = Some(info.clone());
                Ok(info)
            },
            Err(e) => {
                *cached = None;
                Err(e)
            },
        }
    }

    /// Restore sponge contents and every recorded mode.
    pub(crate) fn replay(&self) -> Result<()> {
        let soft = self.soft_config();
        let commands = soft.commands()?;
        let (cmd_addr, sponge_addr) = self.with_info(|i| (i.misc.cmd_addr, i.other.sponge_addr))?;
        self.with_session(|s| {
            if sponge_addr != 0 {
                for (offset, bytes) in soft.sponge_writes() {
                    s.write(sponge_addr + u32::from(offset), &bytes)?;
                }
            }
            for cmd in &commands {
                s.send_cmd(cmd_addr, cmd)?;
            }
            Ok(())
        })?;
        debug!("soft config replayed ({} commands)", commands.len());
        Ok(())
    }

    /// Record a mode change, then send its commands.
    pub(crate) fn apply_mode(&self, record: impl FnOnce(&mut SoftConfig), commands: &[Command]) -> Result<()> {
        let cmd_addr = self.with_info(|i| i.misc.cmd_addr)?;
        record(&mut *lock(&self.soft));
        self.with_session(|s| {
            for cmd in commands {
                s.send_cmd(cmd_addr, cmd)?;
            }
            Ok(())
        })
    }

    pub(crate) fn arm_esd(&self) -> Result<()> {
        let esd_addr = self.with_info(|i| i.misc.esd_addr)?;
        if esd_addr == 0 {
            debug!("esd: no register, watchdog stays off");
            return Ok(());
        }
        let target: Weak<dyn EsdTarget> = self.me.clone();
        lock(&self.esd).arm(target)
    }

    pub(crate) fn disarm_esd(&self) {
        lock(&self.esd).disarm();
    }

    /// Disarm the watchdog until the guard drops.
    pub(crate) fn pause_esd(&self) -> EsdPause<'_, V, B, P> {
        let mut esd = lock(&self.esd);
        let rearm = esd.is_armed();
        esd.disarm();
        EsdPause { device: self, rearm }
    }

    /// Mask the interrupt until the guard drops.
    pub(crate) fn mask_irq(&self) -> Result<IrqMask<'_, V, B, P>> {
        let restore = self.irq_enabled();
        if restore {
            self.irq_enable(false)?;
        }
        Ok(IrqMask { device: self, restore })
    }

    pub(crate) fn lock_ops(&self) -> MutexGuard<'_, ()> {
        lock(&self.op_lock)
    }

    /// Full reset with descriptor re-read and soft configuration replay.
    fn recover_locked(&self) -> Result<()> {
        let _op = self.lock_ops();
        self.power_down()?;
        self.power_up()?;
        self.load_descriptors()?;
        self.replay()?;
        if self.irq_enabled() {
            lock(&self.platform).set_irq(true)?;
        }
        Ok(())
    }
}

/// Re-arms the watchdog on drop if it was armed.
pub(crate) struct EsdPause<'a, V: IcVariant, B: Bus + 'static, P: Platform + 'static> {
    device: &'a Device<V, B, P>,
    rearm: bool,
}

impl<V: IcVariant, B: Bus + 'static, P: Platform + 'static> Drop for EsdPause<'_, V, B, P> {
    fn drop(&mut self) {
        if !self.rearm {
            return;
        }
        if let Err(e) = self.device.arm_esd() {
            warn!("esd: re-arm failed: {e}");
        }
    }
}

/// Re-enables the interrupt on drop if it was enabled.
pub(crate) struct IrqMask<'a, V: IcVariant, B: Bus + 'static, P: Platform + 'static> {
    device: &'a Device<V, B, P>,
    restore: bool,
}

impl<V: IcVariant, B: Bus + 'static, P: Platform + 'static> Drop for IrqMask<'_, V, B, P> {
    fn drop(&mut self) {
        if !self.restore {
            return;
        }
        if let Err(e) = self.device.irq_enable(true) {
            warn!("irq: re-enable failed: {e}");
        }
    }
}

impl<V, B, P> HardwareOps for Device<V, B, P>
where
    V: IcVariant,
    B: Bus + 'static,
    P: Platform + 'static,
{
    fn power_on(&self) -> Result<()> {
        self.power_up()
    }

    fn power_off(&self) -> Result<()> {
        self.disarm_esd();
        let _op = self.lock_ops();
        self.irq_enable(false)?;
        self.power_down()
    }

    fn reset(&self, settle: Duration) -> Result<()> {
        self.ensure_powered()?;
        lock(&self.platform).set_reset(true)?;
        self.sleep(RESET_PULSE);
        lock(&self.platform).set_reset(false)?;
        self.sleep(settle);
        self.set_power_state(PowerState::On);
        info!("reset, settle {settle:?}");
        Ok(())
    }

    fn irq_enable(&self, enable: bool) -> Result<()> {
        lock(&self.platform).set_irq(enable)?;
        self.irq_enabled.store(enable, Ordering::SeqCst);
        debug!("irq {}", if enable { "enabled" } else { "disabled" });
        Ok(())
    }

    fn suspend(&self) -> Result<()> {
        match self.power_state() {
            PowerState::Off => return Err(Error::NotReady("device is powered off".into())),
            PowerState::LowPower => return Ok(()),
            PowerState::On => {},
        }
        self.disarm_esd();
        let _op = self.lock_ops();
        let soft = self.soft_config();
        let (cmd_addr, sponge_addr) = self.with_info(|i| (i.misc.cmd_addr, i.other.sponge_addr))?;

        if soft.lowpower_enabled() {
            self.with_session(|s| {
                if sponge_addr != 0 {
                    let addr = sponge_addr + u32::from(soft_config::SPONGE_LOWPOWER_OFFSET);
                    s.write(addr, &[soft.lowpower_mode])?;
                }
                s.send_cmd(cmd_addr, &Command::new(ids::GESTURE))
            })?;
            self.set_power_state(PowerState::LowPower);
            info!("suspended, gesture mode 0x{:02X}", soft.lowpower_mode);
        } else {
            self.with_session(|s| s.send_cmd(cmd_addr, &Command::new(ids::SLEEP)))?;
            self.irq_enable(false)?;
            self.set_power_state(PowerState::Off);
            info!("suspended");
        }
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        {
            let _op = self.lock_ops();
            self.power_up()?;
            self.replay()?;
        }
        self.irq_enable(true)?;
        self.arm_esd()?;
        info!("resumed");
        Ok(())
    }

    fn send_cmd(&self, cmd: &Command) -> Result<()> {
        let cmd_addr = self.with_info(|i| i.misc.cmd_addr)?;
        self.with_session(|s| s.send_cmd(cmd_addr, cmd))
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.ensure_powered()?;
        self.with_session(|s| s.read(addr, buf))
    }

    fn write(&self, addr: u32, data: &[u8]) -> Result<()> {
        self.ensure_powered()?;
        self.with_session(|s| s.write(addr, data))
    }

    fn read_version(&self) -> Result<FirmwareVersion> {
        self.ensure_powered()?;
        let version = self.with_session(|s| s.read_version(V::version_addr()))?;
        *self.version.write().unwrap_or_else(PoisonError::into_inner) = Some(version.clone());
        Ok(version)
    }

    fn get_ic_info(&self) -> Result<IcInfo> {
        self.ensure_powered()?;
        let info = self.with_session(|s| s.read_ic_info(V::ic_info_addr()))?;
        *self.ic_info.write().unwrap_or_else(PoisonError::into_inner) = Some(info.clone());
        Ok(info)
    }

    fn esd_check(&self) -> Result<EsdStatus> {
        let esd_addr = self.with_info(|i| i.misc.esd_addr)?;
        if esd_addr == 0 {
            return Ok(EsdStatus::Alive);
        }
        let sentinel = V::esd_sentinel();
        self.with_session(|s| {
            let mut reg = [0u8; 1];
            s.read(esd_addr, &mut reg)?;
            if reg[0] == sentinel {
                warn!("esd: register 0x{esd_addr:08X} still holds 0x{sentinel:02X}");
                return Ok(EsdStatus::Hung);
            }
            s.write(esd_addr, &[sentinel])?;
            Ok(EsdStatus::Alive)
        })
    }

    fn event_handler(&self, sink: &mut dyn EventSink) -> Result<EventFrame> {
        self.irq_seen.store(true, Ordering::SeqCst);
        let addr = self.with_info(|i| i.misc.touch_data_addr)?;
        let ack = !self.tools_sync.load(Ordering::SeqCst);
        let frame = self.with_session(|s| s.read_event_frame(addr, ack))?;
        if frame.has_request() {
            debug!("event frame carries a firmware request");
        }
        frame.dispatch(sink);
        Ok(frame)
    }

    fn get_capacitance_data(&self, kind: CapacitanceKind) -> Result<CapacitanceData> {
        self.read_capacitance(kind)
    }

    fn enable_idle(&self, enable: bool) -> Result<()> {
        self.send_cmd(&Command::with_byte(ids::IDLE, if enable { 1 } else { 2 }))
    }

    fn sense_off(&self, off: bool) -> Result<()> {
        self.send_cmd(&Command::with_byte(ids::SENSE_CTRL, u8::from(off)))
    }

    fn set_ear_detect(&self, mode: EarDetect) -> Result<()> {
        self.apply_mode(
            |soft| soft.ear_detect = mode,
            &[Command::with_byte(ids::EAR_DETECT, mode.code())],
        )
    }

    fn set_pocket(&self, enable: bool) -> Result<()> {
        self.apply_mode(
            |soft| soft.pocket = enable,
            &[Command::with_byte(ids::POCKET, u8::from(enable))],
        )
    }
}

impl<V, B, P> EsdTarget for Device<V, B, P>
where
    V: IcVariant,
    B: Bus + 'static,
    P: Platform + 'static,
{
    fn take_irq_seen(&self) -> bool {
        self.irq_seen.swap(false, Ordering::SeqCst)
    }

    fn check_alive(&self) -> Result<EsdStatus> {
        if self.power_state() != PowerState::On {
            return Ok(EsdStatus::Alive);
        }
        HardwareOps::esd_check(self)
    }

    fn recover(&self) -> Result<()> {
        warn!("recovering controller");
        self.recover_locked()
    }
}
