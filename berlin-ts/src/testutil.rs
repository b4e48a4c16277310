//! Simulated Berlin firmware for unit tests.
//!
//! [`SimDevice`] is a cloneable handle to a shared register map that
//! implements [`Bus`]. Tests keep one clone for inspection and hand another
//! to the code under test.

#![allow(clippy::unwrap_used, missing_docs)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bus::{Bus, Delay, Platform};
use crate::device::{Device, DeviceConfig};
use crate::error::BusError;
use crate::protocol::checksum::checksum16;
use crate::protocol::flash::{
    FINISH_ECHO, FLASH_CHECK_ERR, FLASH_DENY, FLASH_OKAY, FLASH_READY, FLASH_R_START,
    FLASH_RW_FINISH, FLASH_W_START,
};
use crate::protocol::ic_info::IcInfo;
use crate::protocol::version::FirmwareVersion;
use crate::target::{BerlinD, IcVariant};

/// Register contents addressable by command hooks.
#[derive(Debug, Default)]
pub struct SimMemory {
    bytes: BTreeMap<u32, u8>,
}

impl SimMemory {
    pub fn poke(&mut self, addr: u32, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.bytes.insert(addr + i as u32, *b);
        }
    }

    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| self.bytes.get(&(addr + i as u32)).copied().unwrap_or(0))
            .collect()
    }
}

type Hook = Box<dyn FnMut(&mut SimMemory, &[u8]) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlashMode {
    Idle,
    Write,
    Read,
}

struct SimState {
    mem: SimMemory,
    cmd_addr: Option<u32>,
    fw_buffer_addr: Option<u32>,
    cmd_reg: Vec<u8>,
    last_was_flash: bool,
    ack_script: VecDeque<u8>,
    flash_status_script: VecDeque<u8>,
    flash_echo_mismatch: usize,
    flash_mode: FlashMode,
    flash_status: u8,
    flash_echo: u8,
    flash: BTreeMap<u32, u8>,
    corrupt_flash_reads: usize,
    queued_reads: HashMap<u32, VecDeque<Vec<u8>>>,
    fail_reads: usize,
    fail_writes: Option<(u32, usize)>,
    commands: Vec<(u8, Vec<u8>)>,
    command_writes: usize,
    flash_cmds: Vec<u8>,
    finish_echoes: usize,
    irq_watch: Option<SimPlatform>,
    flash_irq: Vec<Option<bool>>,
    reads: HashMap<u32, usize>,
    writes: Vec<(u32, Vec<u8>)>,
    hooks: HashMap<u8, Hook>,
}

/// Cloneable handle to a simulated controller.
#[derive(Clone)]
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                mem: SimMemory::default(),
                cmd_addr: None,
                fw_buffer_addr: None,
                cmd_reg: vec![0; 8],
                last_was_flash: false,
                ack_script: VecDeque::new(),
                flash_status_script: VecDeque::new(),
                flash_echo_mismatch: 0,
                flash_mode: FlashMode::Idle,
                flash_status: 0,
                flash_echo: 0,
                flash: BTreeMap::new(),
                corrupt_flash_reads: 0,
                queued_reads: HashMap::new(),
                fail_reads: 0,
                fail_writes: None,
                commands: Vec::new(),
                command_writes: 0,
                flash_cmds: Vec::new(),
                finish_echoes: 0,
                irq_watch: None,
                flash_irq: Vec::new(),
                reads: HashMap::new(),
                writes: Vec::new(),
                hooks: HashMap::new(),
            })),
        }
    }

    /// Fully provisioned controller: IcInfo and version record at the
    /// addresses of `V`, command and flash handling enabled.
    ///
    /// The B and D version records overlap, so only one is populated.
    pub fn berlin<V: IcVariant>(info: &IcInfo) -> Self {
        let sim = Self::new()
            .with_cmd_addr(info.misc.cmd_addr)
            .with_fw_buffer(info.misc.fw_buffer_addr);
        sim.poke(V::ic_info_addr(), &info.to_bytes());
        sim.poke(V::version_addr(), &sample_version().to_bytes());
        sim
    }

    /// Record the IRQ line of `platform` at every flash handshake.
    pub fn watch_irq(&self, platform: &SimPlatform) {
        self.state.lock().unwrap().irq_watch = Some(platform.clone());
    }

    /// IRQ line state seen by each flash handshake command, in order.
    pub fn flash_irq_states(&self) -> Vec<Option<bool>> {
        self.state.lock().unwrap().flash_irq.clone()
    }

    /// Finish echoes received after a flash handshake.
    pub fn finish_echoes(&self) -> usize {
        self.state.lock().unwrap().finish_echoes
    }

    #[must_use]
    pub fn with_cmd_addr(self, addr: u32) -> Self {
        self.state.lock().unwrap().cmd_addr = Some(addr);
        self
    }

    #[must_use]
    pub fn with_fw_buffer(self, addr: u32) -> Self {
        self.state.lock().unwrap().fw_buffer_addr = Some(addr);
        self
    }

    pub fn poke(&self, addr: u32, data: &[u8]) {
        self.state.lock().unwrap().mem.poke(addr, data);
    }

    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        self.state.lock().unwrap().mem.peek(addr, len)
    }

    /// Ack bytes returned by successive command polls (then `OK`).
    pub fn script_acks(&self, acks: &[u8]) {
        self.state.lock().unwrap().ack_script.extend(acks);
    }

    /// Status bytes returned by successive flash polls (then the model's).
    pub fn script_flash_status(&self, status: &[u8]) {
        self.state.lock().unwrap().flash_status_script.extend(status);
    }

    /// Next `n` flash polls echo the wrong command.
    pub fn script_flash_echo_mismatch(&self, n: usize) {
        self.state.lock().unwrap().flash_echo_mismatch = n;
    }

    /// Corrupt the payload of the next `n` flash read-backs.
    pub fn corrupt_next_flash_reads(&self, n: usize) {
        self.state.lock().unwrap().corrupt_flash_reads = n;
    }

    /// Queue a one-shot response for the next read at `addr`.
    pub fn queue_read(&self, addr: u32, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .queued_reads
            .entry(addr)
            .or_default()
            .push_back(data.to_vec());
    }

    pub fn fail_next_reads(&self, n: usize) {
        self.state.lock().unwrap().fail_reads = n;
    }

    /// Nack the next `n` writes to `addr`.
    pub fn fail_next_writes_to(&self, addr: u32, n: usize) {
        self.state.lock().unwrap().fail_writes = Some((addr, n));
    }

    /// Run `hook` whenever command `cmd` is received.
    pub fn on_command<F>(&self, cmd: u8, hook: F)
    where
        F: FnMut(&mut SimMemory, &[u8]) + Send + 'static,
    {
        self.state.lock().unwrap().hooks.insert(cmd, Box::new(hook));
    }

    pub fn set_flash(&self, addr: u32, data: &[u8]) {
        let mut st = self.state.lock().unwrap();
        for (i, b) in data.iter().enumerate() {
            st.flash.insert(addr + i as u32, *b);
        }
    }

    pub fn flash_contents(&self, addr: u32, len: usize) -> Vec<u8> {
        let st = self.state.lock().unwrap();
        (0..len)
            .map(|i| st.flash.get(&(addr + i as u32)).copied().unwrap_or(0xFF))
            .collect()
    }

    /// Regular commands received, in order.
    pub fn commands(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Opcodes of regular commands received, in order.
    pub fn command_ids(&self) -> Vec<u8> {
        self.commands().into_iter().map(|(c, _)| c).collect()
    }

    /// Number of regular command frames written.
    pub fn command_writes(&self) -> usize {
        self.state.lock().unwrap().command_writes
    }

    /// Flash handshake commands received, in order.
    pub fn flash_cmds(&self) -> Vec<u8> {
        self.state.lock().unwrap().flash_cmds.clone()
    }

    pub fn reads_at(&self, addr: u32) -> usize {
        self.state
            .lock()
            .unwrap()
            .reads
            .get(&addr)
            .copied()
            .unwrap_or(0)
    }

    pub fn writes_to(&self, addr: u32) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn clear_log(&self) {
        let mut st = self.state.lock().unwrap();
        st.commands.clear();
        st.command_writes = 0;
        st.flash_cmds.clear();
        st.finish_echoes = 0;
        st.flash_irq.clear();
        st.reads.clear();
        st.writes.clear();
    }
}

impl SimState {
    fn handle_command(&mut self, frame: &[u8]) {
        let len = usize::from(frame[2]);
        let cmd = frame[3];
        let data = frame[4..len].to_vec();
        let ck_ok = u16::from_le_bytes([frame[len], frame[len + 1]]) == checksum16(&frame[2..len]);

        if data.is_empty() && matches!(cmd, FLASH_R_START | FLASH_W_START | FLASH_RW_FINISH) {
            self.handle_flash(cmd);
            return;
        }

        self.last_was_flash = false;
        self.command_writes += 1;
        self.commands.push((cmd, data.clone()));
        self.cmd_reg = vec![0; 8];
        self.cmd_reg[2] = frame[2];
        self.cmd_reg[3] = cmd;
        if !ck_ok {
            self.ack_script.push_front(0x04);
        }
        if let Some(hook) = self.hooks.get_mut(&cmd) {
            hook(&mut self.mem, &data);
        }
    }

    /// A finish echo has the same bytes as an empty `COORD` command and is
    /// told apart by following a flash handshake.
    fn handle_finish_echo(&mut self) {
        self.finish_echoes += 1;
        self.last_was_flash = false;
    }

    fn handle_flash(&mut self, cmd: u8) {
        self.last_was_flash = true;
        self.flash_cmds.push(cmd);
        if let Some(platform) = &self.irq_watch {
            self.flash_irq.push(platform.irq_state());
        }
        self.flash_echo = cmd;
        match cmd {
            FLASH_W_START => {
                self.flash_mode = FlashMode::Write;
                self.flash_status = FLASH_READY;
            },
            FLASH_R_START => {
                self.flash_mode = FlashMode::Read;
                self.flash_status = FLASH_READY;
            },
            _ => {
                let Some(buf) = self.fw_buffer_addr else {
                    self.flash_status = FLASH_DENY;
                    return;
                };
                self.flash_status = match self.flash_mode {
                    FlashMode::Write => self.commit_write(buf),
                    FlashMode::Read => self.stage_read(buf),
                    FlashMode::Idle => FLASH_DENY,
                };
                self.flash_mode = FlashMode::Idle;
            },
        }
    }

    fn commit_write(&mut self, buf: u32) -> u8 {
        let head = self.mem.peek(buf, 12);
        let ck = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        let addr = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
        let len = u32::from_le_bytes([head[8], head[9], head[10], head[11]]) as usize;
        let body = self.mem.peek(buf + 4, 8 + len);
        if u32::from(checksum16(&body)) != ck {
            return FLASH_CHECK_ERR;
        }
        for (i, b) in body[8..].iter().enumerate() {
            self.flash.insert(addr + i as u32, *b);
        }
        FLASH_OKAY
    }

    fn stage_read(&mut self, buf: u32) -> u8 {
        let head = self.mem.peek(buf, 12);
        let addr = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        let len = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as usize;
        let mut body = Vec::with_capacity(8 + len);
        body.extend_from_slice(&addr.to_le_bytes());
        body.extend_from_slice(&(len as u32).to_le_bytes());
        body.extend((0..len).map(|i| {
            self.flash
                .get(&(addr + i as u32))
                .copied()
                .unwrap_or(0xFF)
        }));
        let ck = u32::from(checksum16(&body));
        if self.corrupt_flash_reads > 0 && len > 0 {
            self.corrupt_flash_reads -= 1;
            body[8] ^= 0x5A;
        }
        let mut pkg = ck.to_le_bytes().to_vec();
        pkg.extend_from_slice(&body);
        self.mem.poke(buf, &pkg);
        FLASH_OKAY
    }

    fn cmd_reg_read(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        if self.last_was_flash {
            let status = self
                .flash_status_script
                .pop_front()
                .unwrap_or(self.flash_status);
            let echo = if self.flash_echo_mismatch > 0 {
                self.flash_echo_mismatch -= 1;
                self.flash_echo.wrapping_add(0x40)
            } else {
                self.flash_echo
            };
            let reg = [status, 0, 4, echo, 0, 0];
            for (o, r) in out.iter_mut().zip(reg) {
                *o = r;
            }
        } else {
            let ack = self.ack_script.pop_front().unwrap_or(0x80);
            self.cmd_reg[1] = ack;
            for (o, r) in out.iter_mut().zip(self.cmd_reg.iter()) {
                *o = *r;
            }
        }
        out
    }
}

impl Bus for SimDevice {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        let mut st = self.state.lock().unwrap();
        if st.fail_reads > 0 {
            st.fail_reads -= 1;
            return Err(BusError::Nack { addr });
        }
        *st.reads.entry(addr).or_default() += 1;

        if let Some(data) = st.queued_reads.get_mut(&addr).and_then(VecDeque::pop_front) {
            let rest = st.mem.peek(addr, buf.len());
            buf.copy_from_slice(&rest);
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            return Ok(());
        }

        if st.cmd_addr == Some(addr) {
            let reg = st.cmd_reg_read(buf.len());
            buf.copy_from_slice(&reg);
            return Ok(());
        }

        let data = st.mem.peek(addr, buf.len());
        buf.copy_from_slice(&data);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        let mut st = self.state.lock().unwrap();
        if st.fail_writes.is_some_and(|(target, n)| target == addr && n > 0) {
            st.fail_writes = st.fail_writes.map(|(target, n)| (target, n - 1));
            return Err(BusError::Nack { addr });
        }
        st.writes.push((addr, data.to_vec()));

        if st.cmd_addr == Some(addr) && st.last_was_flash && data == FINISH_ECHO {
            st.handle_finish_echo();
            return Ok(());
        }

        if st.cmd_addr == Some(addr)
            && data.len() >= 6
            && usize::from(data[2]) + 2 == data.len()
        {
            st.handle_command(data);
            return Ok(());
        }

        st.mem.poke(addr, data);
        Ok(())
    }
}

/// Delay that returns immediately and records each request.
#[derive(Debug, Default)]
pub struct RecordingDelay {
    calls: Mutex<Vec<Duration>>,
}

impl RecordingDelay {
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap().clone()
    }

    pub fn total(&self) -> Duration {
        self.calls.lock().unwrap().iter().sum()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl Delay for RecordingDelay {
    fn delay(&self, duration: Duration) {
        self.calls.lock().unwrap().push(duration);
    }
}

impl Delay for Arc<RecordingDelay> {
    fn delay(&self, duration: Duration) {
        self.as_ref().delay(duration);
    }
}

/// Platform that records every line change.
#[derive(Debug, Clone, Default)]
pub struct SimPlatform {
    log: Arc<Mutex<Vec<PlatformEvent>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    Power(bool),
    Reset(bool),
    Irq(bool),
}

impl SimPlatform {
    pub fn events(&self) -> Vec<PlatformEvent> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn irq_state(&self) -> Option<bool> {
        self.events().iter().rev().find_map(|e| match e {
            PlatformEvent::Irq(on) => Some(*on),
            _ => None,
        })
    }
}

impl Platform for SimPlatform {
    fn set_power(&mut self, on: bool) -> Result<(), BusError> {
        self.log.lock().unwrap().push(PlatformEvent::Power(on));
        Ok(())
    }

    fn set_reset(&mut self, asserted: bool) -> Result<(), BusError> {
        self.log.lock().unwrap().push(PlatformEvent::Reset(asserted));
        Ok(())
    }

    fn set_irq(&mut self, enabled: bool) -> Result<(), BusError> {
        self.log.lock().unwrap().push(PlatformEvent::Irq(enabled));
        Ok(())
    }
}

/// Descriptor of a 2-drive × 3-sense panel with every address populated.
pub fn sample_ic_info() -> IcInfo {
    let mut info = IcInfo::default();
    info.version.config_id = 0x1234_5678;
    info.version.config_version = 0x02;
    info.feature.freqhop_feature = 0x0001;
    info.parm.drv_num = 2;
    info.parm.sen_num = 3;
    info.parm.active_scan_rate = vec![120, 60];
    info.parm.mutual_freq = vec![0x1000];
    info.misc.cmd_addr = 0x10174;
    info.misc.cmd_max_len = 16;
    info.misc.cmd_reply_addr = 0x10184;
    info.misc.cmd_reply_len = 16;
    info.misc.fw_state_addr = 0x10194;
    info.misc.fw_state_len = 8;
    info.misc.fw_buffer_addr = 0x13B74;
    info.misc.fw_buffer_max_len = 4096;
    info.misc.frame_data_addr = 0x10308;
    info.misc.frame_data_head_len = 8;
    info.misc.mutual_struct_len = 4;
    info.misc.self_struct_len = 4;
    info.misc.touch_data_addr = 0x10308;
    info.misc.touch_data_head_len = 8;
    info.misc.point_struct_len = 16;
    info.misc.esd_addr = 0x10170;
    info.other.ic_name_list = 0x98;
    info.other.project_id = 0x95;
    info.other.module_version = 0x01;
    info.other.firmware_version = 0x07;
    info.other.sponge_addr = 0x14000;
    info.other.production_test_addr = 0x15D4C;
    info
}

/// Version record matching [`sample_ic_info`].
pub fn sample_version() -> FirmwareVersion {
    FirmwareVersion {
        rom_pid: *b"BERLIN",
        rom_vid: [0x01, 0x00, 0x00],
        patch_pid: *b"9895\0\0\0\0",
        patch_vid: [0x01, 0x00, 0x00, 0x05],
        sensor_id: 0,
    }
}

/// Berlin D device over the simulator.
pub type SimBerlin = Device<BerlinD, SimDevice, SimPlatform>;

/// A probed device with handles to its simulated surroundings.
pub struct Bench {
    pub device: Arc<SimBerlin>,
    pub sim: SimDevice,
    pub platform: SimPlatform,
    pub delay: Arc<RecordingDelay>,
}

/// Probed [`SimBerlin`] with default configuration and cleared logs.
pub fn bench() -> Bench {
    bench_with(DeviceConfig::default())
}

/// Probed [`SimBerlin`] with cleared logs. The watchdog period is
/// stretched so the worker never ticks during a test.
pub fn bench_with(config: DeviceConfig) -> Bench {
    let sim = SimDevice::berlin::<BerlinD>(&sample_ic_info());
    let platform = SimPlatform::default();
    let delay = Arc::new(RecordingDelay::default());
    let device = Device::new(
        sim.clone(),
        platform.clone(),
        delay.clone(),
        config.with_esd_period(Duration::from_secs(3600)),
    );
    device.probe().unwrap();
    sim.clear_log();
    platform.clear();
    delay.clear();
    Bench {
        device,
        sim,
        platform,
        delay,
    }
}
