//! ESD watchdog: periodic firmware liveness check.
//!
//! ## States
//!
//! ```text
//!            arm                tick
//!   Off ──────────▶ Armed ─────────────▶ Checking
//!    ▲                ▲                     │
//!    │ disarm         │  alive / skipped    │ hung
//!    └──────────── Armed ◀──── RecoveryTriggered
//! ```
//!
//! Each tick first consumes the "interrupt seen" flag: touch traffic since
//! the previous tick proves the firmware is alive and the check is skipped.
//! Otherwise the target reads its ESD register; the generation specific
//! sentinel means the firmware stopped rewriting it and a recovery (reset
//! plus soft configuration replay) is triggered.
//!
//! The worker thread holds only a weak reference to its target and is
//! stopped through a channel. [`EsdWatchdog::disarm`] joins it, so a tick
//! that is running when disarm is called completes first.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::Result;

/// Watchdog state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsdState {
    /// Not running.
    Off,
    /// Waiting for the next tick.
    Armed,
    /// Tick in progress.
    Checking,
    /// Tick found the firmware hung and is recovering it.
    RecoveryTriggered,
}

/// Result of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsdStatus {
    /// Firmware cleared the token; a fresh one was written.
    Alive,
    /// Register holds the hazard sentinel.
    Hung,
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Interrupt traffic seen, no bus access.
    Skipped,
    /// Check passed.
    Alive,
    /// Check failed and recovery succeeded.
    Recovered,
    /// Check or recovery returned an error.
    Failed,
}

/// Device side of the watchdog.
pub trait EsdTarget: Send + Sync {
    /// Return and clear the "interrupt seen since last tick" flag.
    fn take_irq_seen(&self) -> bool;

    /// Read the ESD register and refresh the token.
    fn check_alive(&self) -> Result<EsdStatus>;

    /// Reset the controller and restore its volatile configuration.
    fn recover(&self) -> Result<()>;
}

fn set_state(state: &Mutex<EsdState>, next: EsdState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

/// Run one watchdog tick against `target`.
pub fn tick(target: &dyn EsdTarget, state: &Mutex<EsdState>) -> TickOutcome {
    if target.take_irq_seen() {
        debug!("esd: interrupt seen, skipping check");
        return TickOutcome::Skipped;
    }

    set_state(state, EsdState::Checking);
    let outcome = match target.check_alive() {
        Ok(EsdStatus::Alive) => TickOutcome::Alive,
        Ok(EsdStatus::Hung) => {
            warn!("esd: firmware hung, recovering");
            set_state(state, EsdState::RecoveryTriggered);
            match target.recover() {
                Ok(()) => {
                    info!("esd: recovery complete");
                    TickOutcome::Recovered
                },
                Err(e) => {
                    error!("esd: recovery failed: {e}");
                    TickOutcome::Failed
                },
            }
        },
        Err(e) => {
            warn!("esd: check failed: {e}");
            TickOutcome::Failed
        },
    };
    set_state(state, EsdState::Armed);
    outcome
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodic liveness task.
pub struct EsdWatchdog {
    period: Duration,
    state: Arc<Mutex<EsdState>>,
    worker: Option<Worker>,
}

impl EsdWatchdog {
    /// Create a disarmed watchdog ticking every `period`.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            state: Arc::new(Mutex::new(EsdState::Off)),
            worker: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> EsdState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the worker is running.
    pub fn is_armed(&self) -> bool {
        self.worker.is_some()
    }

    /// Start ticking against `target`. Arming an armed watchdog does nothing.
    pub fn arm(&mut self, target: Weak<dyn EsdTarget>) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (stop, rx) = mpsc::channel::<()>();
        let period = self.period;
        let state = Arc::clone(&self.state);
        set_state(&state, EsdState::Armed);

        let handle = thread::Builder::new()
            .name("berlin-esd".into())
            .spawn(move || {
                loop {
                    match rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {
                            let Some(target) = target.upgrade() else {
                                break;
                            };
                            tick(target.as_ref(), &state);
                        },
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                set_state(&state, EsdState::Off);
            })
            .inspect_err(|_| set_state(&self.state, EsdState::Off))?;

        info!("esd: armed, period {:?}", self.period);
        self.worker = Some(Worker { stop, handle });
        Ok(())
    }

    /// Stop the worker and wait for it to exit.
    pub fn disarm(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // A send error means the worker already exited.
        let _ = worker.stop.send(());
        if worker.handle.thread().id() == thread::current().id() {
            // Dropped from inside a tick; the loop exits on the stop message.
            debug!("esd: disarmed from worker thread");
        } else if worker.handle.join().is_err() {
            error!("esd: worker panicked");
        }
        set_state(&self.state, EsdState::Off);
        info!("esd: disarmed");
    }
}

impl Drop for EsdWatchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}
