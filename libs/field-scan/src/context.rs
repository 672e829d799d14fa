//! Scan context
//!
//! State shared between a `ScanThread` handle and the task running its
//! loop. The loop only observes suspension and termination at its yield
//! point (`yield_for`, or the run signal for group slaves).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use field_comlink::{LinkError, LinkLogger, Result, ScanClock, SharedObserver};

use crate::event::Event;

// ============================================================================
// Thread state
// ============================================================================

/// Lifecycle of a scan thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadState {
    Created,
    Running,
    Suspended,
    Terminating,
    Terminated,
}

impl ThreadState {
    pub fn is_alive(&self) -> bool {
        matches!(
            self,
            ThreadState::Running | ThreadState::Suspended | ThreadState::Terminating
        )
    }
}

impl std::fmt::Display for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThreadState::Created => "created",
            ThreadState::Running => "running",
            ThreadState::Suspended => "suspended",
            ThreadState::Terminating => "terminating",
            ThreadState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Per-thread cycle statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub cycles: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_cycle_ms: u64,
    pub average_cycle_ms: f64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl ScanStats {
    pub(crate) fn record_success(&mut self, duration_ms: u64) {
        self.record_cycle(duration_ms);
    }

    pub(crate) fn record_failure(&mut self, duration_ms: u64, error: String) {
        self.record_cycle(duration_ms);
        self.failures += 1;
        self.last_error = Some(error);
    }

    fn record_cycle(&mut self, duration_ms: u64) {
        self.cycles += 1;
        self.last_cycle_ms = duration_ms;
        self.last_cycle_at = Some(Utc::now());
        let total = self.average_cycle_ms * (self.cycles - 1) as f64 + duration_ms as f64;
        self.average_cycle_ms = total / self.cycles as f64;
    }

    /// Successful cycles as a percentage of all cycles
    pub fn success_rate(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            ((self.cycles - self.failures) as f64 / self.cycles as f64) * 100.0
        }
    }
}

// ============================================================================
// Pacing
// ============================================================================

/// Run/done signal pair linking a slave to its master
#[derive(Debug, Clone)]
pub struct SlaveSignals {
    pub(crate) run: Arc<Event>,
    pub(crate) done: Arc<Event>,
    pub(crate) cancel: CancellationToken,
}

impl SlaveSignals {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            run: Arc::new(Event::new()),
            done: Arc::new(Event::new()),
            cancel,
        }
    }

    /// Whether the slave finished the cycle it was last released for
    pub fn notified(&self) -> bool {
        self.done.is_set()
    }

    /// Release the slave for one cycle
    pub fn set(&self) {
        self.run.set();
    }

    /// Withdraw a pending release
    pub fn reset(&self) {
        self.run.reset();
    }
}

/// How a thread waits between cycles
#[derive(Debug, Clone)]
pub(crate) enum Pace {
    /// Fixed cycle period
    Interval(Duration),
    /// Wait for the master's run signal, report done after each tick
    Signal(SlaveSignals),
}

// ============================================================================
// Shared control block
// ============================================================================

pub(crate) struct Control {
    pub(crate) name: Arc<str>,
    pub(crate) cancel: CancellationToken,
    pub(crate) suspended: AtomicBool,
    pub(crate) resumed: Notify,
    pub(crate) exit_code: AtomicI32,
    pub(crate) raise_on_terminate: bool,
    pub(crate) raised: AtomicBool,
    pub(crate) state: watch::Sender<ThreadState>,
    pub(crate) clock: ScanClock,
    pub(crate) cycle: AtomicU64,
    pub(crate) stats: Mutex<ScanStats>,
    pub(crate) logger: LinkLogger,
    pub(crate) observer: SharedObserver,
    pub(crate) pace: Pace,
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Control")
            .field("name", &self.name)
            .field("state", &*self.state.borrow())
            .field("cycle", &self.cycle.load(Ordering::Relaxed))
            .field("pace", &self.pace)
            .finish_non_exhaustive()
    }
}

impl Control {
    /// Move Running -> Suspended or back; never overrides Terminating
    pub(crate) fn transition(&self, from: ThreadState, to: ThreadState) {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
    }
}

/// Handle passed to `ScanLoop::tick`
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub(crate) control: Arc<Control>,
}

impl ScanContext {
    pub fn name(&self) -> &str {
        &self.control.name
    }

    /// Current cycle number (1 for the first tick)
    pub fn cycle(&self) -> u64 {
        self.control.cycle.load(Ordering::Acquire)
    }

    pub fn clock(&self) -> &ScanClock {
        &self.control.clock
    }

    pub fn logger(&self) -> &LinkLogger {
        &self.control.logger
    }

    pub fn observer(&self) -> &SharedObserver {
        &self.control.observer
    }

    pub fn state(&self) -> ThreadState {
        *self.control.state.borrow()
    }

    pub fn is_terminating(&self) -> bool {
        self.control.cancel.is_cancelled()
    }

    pub fn is_suspended(&self) -> bool {
        self.control.suspended.load(Ordering::Acquire)
    }

    pub fn exit_code(&self) -> i32 {
        self.control.exit_code.load(Ordering::Acquire)
    }

    /// Token cancelled once when the thread is asked to terminate
    pub fn cancellation(&self) -> CancellationToken {
        self.control.cancel.clone()
    }

    /// Cooperative yield point
    ///
    /// While suspended, parks the clock and blocks until resumed or
    /// terminated. Otherwise sleeps for `interval`, waking early on
    /// termination. With `raise_on_terminate` and a nonzero exit code this
    /// returns `Terminated` the first time it runs after termination.
    pub async fn yield_for(&self, interval: Duration) -> Result<()> {
        if self.is_suspended() {
            self.wait_while_suspended().await;
        } else if !self.is_terminating() {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = self.control.cancel.cancelled() => {},
            }
        }
        self.check_terminated()
    }

    /// Raise the termination signal if it is due and has not fired yet
    pub fn check_terminated(&self) -> Result<()> {
        let control = &self.control;
        if !control.raise_on_terminate || !control.cancel.is_cancelled() {
            return Ok(());
        }
        let code = self.exit_code();
        if code != 0 && !control.raised.swap(true, Ordering::AcqRel) {
            return Err(LinkError::Terminated { code });
        }
        Ok(())
    }

    /// Slave yield point: block until released by the master
    pub(crate) async fn wait_run(&self, signals: &SlaveSignals) -> Result<()> {
        if self.is_suspended() {
            self.wait_while_suspended().await;
        }
        if !self.is_terminating() {
            tokio::select! {
                _ = signals.run.wait() => signals.run.reset(),
                _ = self.control.cancel.cancelled() => {},
            }
        }
        self.check_terminated()
    }

    async fn wait_while_suspended(&self) {
        let control = &self.control;
        control.clock.park();
        control.transition(ThreadState::Running, ThreadState::Suspended);
        tracing::debug!("[{}] suspended", control.name);

        loop {
            let resumed = control.resumed.notified();
            tokio::pin!(resumed);
            resumed.as_mut().enable();
            if !self.is_suspended() || self.is_terminating() {
                break;
            }
            tokio::select! {
                _ = resumed => {},
                _ = control.cancel.cancelled() => {},
            }
        }

        control.clock.unpark();
        control.transition(ThreadState::Suspended, ThreadState::Running);
        tracing::debug!("[{}] resumed", control.name);
    }
}
