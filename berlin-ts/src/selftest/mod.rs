//! Production self-tests.
//!
//! Every test follows one shape, parameterised by [`TestKind`]:
//!
//! | Kind       | config | start          | sentinel | poll   | budget | payload          |
//! |------------|--------|----------------|----------|--------|--------|------------------|
//! | Open       | yes    | 0x63           | AA AA    | 50 ms  | 30     | 17 B bitmap      |
//! | Short      | yes    | 0x64           | BB BB    | 100 ms | 50     | bitmap + records |
//! | Jitter100  | yes    | 0x65 [0]       | AA AA    | 100 ms | 30     | 4 × i16          |
//! | Jitter1000 | yes    | 0x65 [1]       | AA AA    | 100 ms | 50     | 6 × i16          |
//! | SRAM       | no     | 0x66           | AA AA    | 40 ms  | 15     | u8               |
//! | SNR        | yes    | 0x68 [m, n, n] | AA AA    | 100 ms | 50     | 27 × i16         |
//!
//! Results live at `production_test_addr`: two status bytes, the payload,
//! then `checksum16` of the payload.
//!
//! A run masks the interrupt, pauses the ESD watchdog and holds the
//! operation lock throughout. Each attempt ends with the wrap-up (leave
//! test configuration, reset, replay soft configuration) whatever its
//! outcome. Timeouts and checksum errors retry the whole attempt up to
//! `DeviceConfig::test_retries` times.

pub mod channel;
pub mod result;

use std::fmt;
use std::time::Duration;

use log::{debug, error, info, warn};

pub use channel::{ChannelMap, DieChannel, Pin};
pub use result::{Jitter100, Jitter1000, ShortFault, ShortPeer, SnrPoint};

use crate::bus::{Bus, Platform};
use crate::device::{Device, HardwareOps, PowerState};
use crate::error::{Error, Result};
use crate::protocol::Session;
use crate::protocol::checksum::verify_checksum16;
use crate::protocol::command::{Command, ids};
use crate::target::IcVariant;

const SENTINEL_DONE: [u8; 2] = [0xAA, 0xAA];
const SENTINEL_SHORT_DONE: [u8; 2] = [0xBB, 0xBB];
const STATUS_LEN: usize = 2;
const CHECKSUM_LEN: usize = 2;

/// Largest SNR frame count.
pub const SNR_MAX_FRAMES: u16 = 1000;

/// SNR measurement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SnrMode {
    /// Panel untouched.
    NonTouched,
    /// Reference touch applied.
    Touched,
}

impl SnrMode {
    fn code(self) -> u8 {
        match self {
            Self::NonTouched => 0,
            Self::Touched => 1,
        }
    }
}

/// Self-test kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TestKind {
    /// Open circuit per channel.
    Open,
    /// Short circuits between channels and to the supplies.
    Short,
    /// Noise over 100 frames.
    Jitter100,
    /// Noise deltas over 1000 frames.
    Jitter1000,
    /// On-chip SRAM.
    Sram,
    /// Signal to noise ratio over `frames` frames (1..=1000).
    Snr {
        /// Touched or untouched.
        mode: SnrMode,
        /// Frames to accumulate.
        frames: u16,
    },
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Short => write!(f, "short"),
            Self::Jitter100 => write!(f, "jitter100"),
            Self::Jitter1000 => write!(f, "jitter1000"),
            Self::Sram => write!(f, "sram"),
            Self::Snr { mode, frames } => write!(f, "snr({mode:?}, {frames})"),
        }
    }
}

/// Wire parameters of one test kind.
#[derive(Debug, Clone)]
struct TestPlan {
    test_config: bool,
    start: Command,
    sentinel: [u8; 2],
    poll: Duration,
    budget: usize,
    /// Fixed payload length; `None` for the variable short payload.
    payload_len: Option<usize>,
}

impl TestKind {
    fn plan(self) -> Result<TestPlan> {
        let ms = Duration::from_millis;
        let plan = |test_config, start, sentinel, poll, budget, payload_len| TestPlan {
            test_config,
            start,
            sentinel,
            poll,
            budget,
            payload_len,
        };
        Ok(match self {
            Self::Open => plan(
                true,
                Command::new(ids::OPEN_TEST),
                SENTINEL_DONE,
                ms(50),
                30,
                Some(result::BITMAP_LEN),
            ),
            Self::Short => plan(
                true,
                Command::new(ids::SHORT_TEST),
                SENTINEL_SHORT_DONE,
                ms(100),
                50,
                None,
            ),
            Self::Jitter100 => plan(
                true,
                Command::with_byte(ids::JITTER_TEST, 0),
                SENTINEL_DONE,
                ms(100),
                30,
                Some(8),
            ),
            Self::Jitter1000 => plan(
                true,
                Command::with_byte(ids::JITTER_TEST, 1),
                SENTINEL_DONE,
                ms(100),
                50,
                Some(12),
            ),
            Self::Sram => plan(
                false,
                Command::new(ids::SRAM_TEST),
                SENTINEL_DONE,
                ms(40),
                15,
                Some(1),
            ),
            Self::Snr { mode, frames } => {
                if !(1..=SNR_MAX_FRAMES).contains(&frames) {
                    return Err(Error::InvalidArgument(format!(
                        "snr frame count {frames}, allowed 1..={SNR_MAX_FRAMES}"
                    )));
                }
                let [lo, hi] = frames.to_le_bytes();
                plan(
                    true,
                    Command::with_data(ids::SNR_TEST, &[mode.code(), lo, hi])?,
                    SENTINEL_DONE,
                    ms(100),
                    50,
                    Some(result::SNR_POINTS * 3 * 2),
                )
            },
        })
    }
}

/// Decoded result of one test.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TestResult {
    /// Pins reading open.
    Open(Vec<Pin>),
    /// Shorts below threshold.
    Short(Vec<ShortFault>),
    /// 100-frame jitter.
    Jitter100(Jitter100),
    /// 1000-frame jitter.
    Jitter1000(Jitter1000),
    /// SRAM result code; zero passes.
    Sram(u8),
    /// SNR points.
    Snr(Vec<SnrPoint>),
}

/// Outcome of a self-test run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TestReport {
    /// Test that ran.
    pub kind: TestKind,
    /// Attempts used, including the successful one.
    pub attempts: u8,
    /// Decoded result.
    pub result: TestResult,
}

impl TestReport {
    /// Whether the panel passed.
    pub fn passed(&self) -> bool {
        match &self.result {
            TestResult::Open(pins) => pins.is_empty(),
            TestResult::Short(faults) => faults.is_empty(),
            TestResult::Sram(code) => *code == 0,
            TestResult::Jitter100(_) | TestResult::Jitter1000(_) | TestResult::Snr(_) => true,
        }
    }

    /// Failing pins, in report order, without duplicates.
    pub fn failing_pins(&self) -> Vec<Pin> {
        let mut pins: Vec<Pin> = match &self.result {
            TestResult::Open(pins) => pins.clone(),
            TestResult::Short(faults) => faults
                .iter()
                .flat_map(|f| match f.peer {
                    ShortPeer::Pin(p) => vec![f.pin, p],
                    ShortPeer::Gnd | ShortPeer::Avdd => vec![f.pin],
                })
                .collect(),
            _ => Vec::new(),
        };
        let mut seen = std::collections::HashSet::new();
        pins.retain(|p| seen.insert(*p));
        pins
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, if self.passed() { "OK" } else { "NG" })?;
        let pins = self.failing_pins();
        if !pins.is_empty() {
            let list: Vec<String> = pins.iter().map(ToString::to_string).collect();
            write!(f, " [{}]", list.join(", "))?;
        }
        Ok(())
    }
}

fn retryable(e: &Error) -> bool {
    matches!(e, Error::Timeout(_) | Error::ChecksumMismatch { .. })
}

/// Poll for the sentinel, read the payload and verify its checksum.
fn collect_payload<B: Bus + ?Sized>(
    s: &mut Session<'_, B>,
    addr: u32,
    plan: &TestPlan,
    poll: Duration,
) -> Result<Vec<u8>> {
    let status = s.poll_sentinel(
        addr,
        STATUS_LEN + plan.payload_len.unwrap_or(result::BITMAP_LEN),
        plan.sentinel,
        poll,
        plan.budget,
    )?;
    let payload_len = match plan.payload_len {
        Some(len) => len,
        None => result::short_payload_len(result::short_flag_count(&status[STATUS_LEN..])),
    };
    let block = s.read_vec(addr, STATUS_LEN + payload_len + CHECKSUM_LEN)?;
    verify_checksum16(&block[STATUS_LEN..])?;
    Ok(block[STATUS_LEN..STATUS_LEN + payload_len].to_vec())
}

impl<V, B, P> Device<V, B, P>
where
    V: IcVariant,
    B: Bus + 'static,
    P: Platform + 'static,
{
    /// Run a self-test.
    pub fn run_test(&self, kind: TestKind) -> Result<TestReport> {
        let plan = kind.plan()?;
        if self.power_state() != PowerState::On {
            return Err(Error::NotReady(format!(
                "{kind} test needs an active device, state {:?}",
                self.power_state()
            )));
        }
        let (cmd_addr, test_addr) =
            self.with_info(|i| (i.misc.cmd_addr, i.other.production_test_addr))?;
        if test_addr == 0 {
            return Err(Error::InvalidDescriptor("no production test region".into()));
        }

        let _esd = self.pause_esd();
        let _irq = self.mask_irq()?;
        let _op = self.lock_ops();

        let attempts = self.config().test_retries.saturating_add(1);
        info!("{kind} test start");
        let mut attempt = 1u8;
        loop {
            let outcome = self.test_attempt(kind, &plan, cmd_addr, test_addr);
            let wrapup = self.test_wrapup(&plan, cmd_addr);
            match outcome {
                Ok(result) => {
                    wrapup?;
                    let report = TestReport {
                        kind,
                        attempts: attempt,
                        result,
                    };
                    info!("{report}");
                    return Ok(report);
                },
                Err(e) if retryable(&e) && attempt < attempts => {
                    warn!("{kind} test attempt {attempt}/{attempts}: {e}");
                    wrapup?;
                    attempt += 1;
                },
                Err(e) => {
                    error!("{kind} test failed: {e}");
                    if let Err(w) = wrapup {
                        warn!("{kind} test wrap-up: {w}");
                    }
                    return Err(e);
                },
            }
        }
    }

    fn test_attempt(&self, kind: TestKind, plan: &TestPlan, cmd_addr: u32, test_addr: u32) -> Result<TestResult> {
        let poll = self.config().test_poll_interval.unwrap_or(plan.poll);
        let payload = self.with_session(|s| {
            if plan.test_config {
                s.send_cmd(cmd_addr, &Command::with_byte(ids::TEST_CONFIG, 1))?;
            }
            // drop a stale status from an earlier run
            s.write(test_addr, &[0; STATUS_LEN])?;
            s.send_cmd(cmd_addr, &plan.start)?;
            collect_payload(s, test_addr, plan, poll)
        })?;
        debug!("{kind} payload: {} bytes", payload.len());

        let map = self
            .config()
            .channel_map
            .clone()
            .unwrap_or_else(|| ChannelMap::identity(V::GENERATION));
        Ok(match kind {
            TestKind::Open => TestResult::Open(result::decode_open(&payload, &map)?),
            TestKind::Short => TestResult::Short(result::decode_short(
                &payload,
                &map,
                V::GENERATION,
                &self.config().short_thresholds,
            )?),
            TestKind::Jitter100 => TestResult::Jitter100(result::decode_jitter100(&payload)?),
            TestKind::Jitter1000 => TestResult::Jitter1000(result::decode_jitter1000(&payload)?),
            TestKind::Sram => TestResult::Sram(payload[0]),
            TestKind::Snr { .. } => TestResult::Snr(result::decode_snr(&payload)?),
        })
    }

    /// Leave test configuration, reset and restore soft configuration.
    fn test_wrapup(&self, plan: &TestPlan, cmd_addr: u32) -> Result<()> {
        let leave = if plan.test_config {
            self.with_session(|s| s.send_cmd(cmd_addr, &Command::with_byte(ids::TEST_CONFIG, 0)))
        } else {
            Ok(())
        };
        if let Err(e) = &leave {
            warn!("leaving test configuration: {e}");
        }
        self.reset(self.config().reset_settle)?;
        self.replay()
    }

    /// Open test.
    pub fn open_test(&self) -> Result<TestReport> {
        self.run_test(TestKind::Open)
    }

    /// Short test.
    pub fn short_test(&self) -> Result<TestReport> {
        self.run_test(TestKind::Short)
    }

    /// Jitter test over 100 frames.
    pub fn jitter100_test(&self) -> Result<TestReport> {
        self.run_test(TestKind::Jitter100)
    }

    /// Jitter delta test over 1000 frames.
    pub fn jitter1000_test(&self) -> Result<TestReport> {
        self.run_test(TestKind::Jitter1000)
    }

    /// SRAM test.
    pub fn sram_test(&self) -> Result<TestReport> {
        self.run_test(TestKind::Sram)
    }

    /// SNR test.
    pub fn snr_test(&self, mode: SnrMode, frames: u16) -> Result<TestReport> {
        self.run_test(TestKind::Snr { mode, frames })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceConfig;
    use crate::esd::EsdState;
    use crate::protocol::checksum::append_checksum16;
    use crate::testutil::{PlatformEvent, bench, bench_with};

    const TEST_ADDR: u32 = 0x15D4C;

    fn block(sentinel: [u8; 2], payload: &[u8]) -> Vec<u8> {
        let mut body = payload.to_vec();
        append_checksum16(&mut body);
        let mut out = sentinel.to_vec();
        out.extend(body);
        out
    }

    fn open_payload(drv_bit: usize) -> Vec<u8> {
        let mut p = vec![0u8; result::BITMAP_LEN];
        p[drv_bit / 8] |= 1 << (drv_bit % 8);
        p
    }

    #[test]
    fn test_open_reports_mapped_pin() {
        let b = bench();
        let data = block(SENTINEL_DONE, &open_payload(3));
        b.sim.on_command(ids::OPEN_TEST, move |mem, _| mem.poke(TEST_ADDR, &data));

        let report = b.device.open_test().unwrap();
        assert!(!report.passed());
        let pin = ChannelMap::identity(crate::target::Generation::BerlinD)
            .map(DieChannel::Drive(3))
            .unwrap();
        assert_eq!(report.failing_pins(), vec![pin]);
        assert_eq!(report.to_string(), "open: NG [TX3]");
        assert_eq!(report.attempts, 1);

        assert_eq!(
            b.sim.commands(),
            vec![
                (ids::TEST_CONFIG, vec![1]),
                (ids::OPEN_TEST, vec![]),
                (ids::TEST_CONFIG, vec![0]),
            ]
        );
    }

    #[test]
    fn test_guards_restored_after_test() {
        let b = bench();
        let data = block(SENTINEL_DONE, &[0x00]);
        b.sim.on_command(ids::SRAM_TEST, move |mem, _| mem.poke(TEST_ADDR, &data));

        let report = b.device.sram_test().unwrap();
        assert!(report.passed());
        // SRAM runs outside test configuration
        assert_eq!(b.sim.command_ids(), vec![ids::SRAM_TEST]);

        let events = b.platform.events();
        assert_eq!(events.first(), Some(&PlatformEvent::Irq(false)));
        assert!(events.contains(&PlatformEvent::Reset(true)));
        assert_eq!(events.last(), Some(&PlatformEvent::Irq(true)));
        assert_eq!(b.device.esd_state(), EsdState::Armed);
    }

    #[test]
    fn test_interrupted_poll_is_not_retried() {
        let b = bench();
        crate::test_interrupt_after(Some(2));
        let err = b.device.open_test().unwrap_err();
        crate::test_interrupt_after(None);

        assert!(matches!(err, Error::Interrupted));
        assert_eq!(b.sim.reads_at(TEST_ADDR), 2);
        // wrap-up still leaves test configuration and resets once
        assert_eq!(
            b.sim.commands(),
            vec![
                (ids::TEST_CONFIG, vec![1]),
                (ids::OPEN_TEST, vec![]),
                (ids::TEST_CONFIG, vec![0]),
            ]
        );
        let events = b.platform.events();
        let resets = events
            .iter()
            .filter(|e| **e == PlatformEvent::Reset(true))
            .count();
        assert_eq!(resets, 1);
        assert_eq!(events.last(), Some(&PlatformEvent::Irq(true)));
        assert!(b.device.irq_enabled());
        assert_eq!(b.device.esd_state(), EsdState::Armed);
    }

    #[test]
    fn test_checksum_error_retries_with_reset() {
        let b = bench();
        let good = block(SENTINEL_DONE, &[0u8; 8]);
        let mut bad = good.clone();
        bad[3] ^= 0x01;
        let mut runs = 0;
        b.sim.on_command(ids::JITTER_TEST, move |mem, _| {
            runs += 1;
            mem.poke(TEST_ADDR, if runs == 1 { &bad } else { &good });
        });

        let report = b.device.jitter100_test().unwrap();
        assert_eq!(report.attempts, 2);
        let resets = b
            .platform
            .events()
            .iter()
            .filter(|e| **e == PlatformEvent::Reset(true))
            .count();
        assert_eq!(resets, 2);
    }

    #[test]
    fn test_timeout_exhausts_retries() {
        let b = bench_with(
            DeviceConfig::default()
                .with_test_retries(1)
                .with_test_poll_interval(Duration::from_millis(1)),
        );
        let err = b.device.open_test().unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(
            b.sim.command_ids().iter().filter(|c| **c == ids::OPEN_TEST).count(),
            2
        );
        // 30 polls per attempt at the overridden interval
        assert_eq!(b.sim.reads_at(TEST_ADDR), 60);
        assert!(b.device.irq_enabled());
        assert_eq!(b.device.esd_state(), EsdState::Armed);
    }

    #[test]
    fn test_short_reads_variable_payload() {
        let b = bench();
        let mut payload = vec![0u8; result::BITMAP_LEN];
        payload[0] = 0b0000_0001;
        // peer die 2 (RX2), (300/100 - 1) * 55 + 45 = 155 kΩ
        payload.extend([2, 0, 0x2C, 0x01, 0x64, 0x00]);
        let data = block(SENTINEL_SHORT_DONE, &payload);
        b.sim.on_command(ids::SHORT_TEST, move |mem, _| mem.poke(TEST_ADDR, &data));

        let report = b.device.short_test().unwrap();
        let TestResult::Short(faults) = &report.result else {
            panic!("unexpected result {:?}", report.result);
        };
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].kohm, 155);
        assert_eq!(report.failing_pins(), vec![Pin::Tx(0), Pin::Rx(2)]);
    }

    #[test]
    fn test_snr_frame_count_validated() {
        let b = bench();
        assert!(matches!(
            b.device.snr_test(SnrMode::Touched, 0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            b.device.snr_test(SnrMode::Touched, 1001),
            Err(Error::InvalidArgument(_))
        ));
        assert!(b.sim.commands().is_empty());
    }

    #[test]
    fn test_snr_touched() {
        let b = bench();
        let raw: Vec<u8> = (0..27i16).flat_map(|v| v.to_le_bytes()).collect();
        let data = block(SENTINEL_DONE, &raw);
        b.sim.on_command(ids::SNR_TEST, move |mem, _| mem.poke(TEST_ADDR, &data));

        let report = b.device.snr_test(SnrMode::Touched, 500).unwrap();
        let TestResult::Snr(points) = report.result else {
            panic!("expected snr points");
        };
        assert_eq!(points.len(), 9);
        assert_eq!(points[0].snr2, 2);
        assert!(b.sim.commands().contains(&(ids::SNR_TEST, vec![1, 0xF4, 0x01])));
    }

    #[test]
    fn test_suspended_device_refuses_tests() {
        let b = bench();
        b.device.suspend().unwrap();
        assert!(matches!(b.device.open_test(), Err(Error::NotReady(_))));
    }
}
