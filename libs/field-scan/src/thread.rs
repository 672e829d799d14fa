//! Cooperative scan thread
//!
//! One tokio task per thread. The task repeatedly calls `ScanLoop::tick`
//! and then yields; suspension and termination are only observed at the
//! yield point, so a loop that never returns from `tick` never sees them.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use field_comlink::{
    noop_observer, LinkError, LinkLogger, LogLevel, Result, ScanClock, SharedObserver,
};

use crate::context::{Control, Pace, ScanContext, ScanStats, SlaveSignals, ThreadState};

/// Default cycle period
pub const DEFAULT_INTERVAL_MS: u64 = 100;

// ============================================================================
// Scan loop
// ============================================================================

/// Body of a scan thread
#[async_trait]
pub trait ScanLoop: Send + 'static {
    /// One scan cycle
    async fn tick(&mut self, ctx: &ScanContext) -> Result<()>;

    /// Called once after the loop exits, before the thread reports
    /// `Terminated`
    async fn on_stop(&mut self, _ctx: &ScanContext) {}
}

#[async_trait]
impl<L: ScanLoop + ?Sized> ScanLoop for Box<L> {
    async fn tick(&mut self, ctx: &ScanContext) -> Result<()> {
        (**self).tick(ctx).await
    }

    async fn on_stop(&mut self, ctx: &ScanContext) {
        (**self).on_stop(ctx).await
    }
}

// ============================================================================
// Options
// ============================================================================

/// Scan thread settings
#[derive(Clone)]
pub struct ThreadOptions {
    pub name: String,
    pub interval: Duration,
    /// Return `Terminated` from the yield point once a nonzero exit code
    /// is set
    pub raise_on_terminate: bool,
    pub log_level: LogLevel,
    pub observer: SharedObserver,
}

impl std::fmt::Debug for ThreadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadOptions")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("raise_on_terminate", &self.raise_on_terminate)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

impl ThreadOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            raise_on_terminate: false,
            log_level: LogLevel::default(),
            observer: noop_observer(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_raise_on_terminate(mut self, raise: bool) -> Self {
        self.raise_on_terminate = raise;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }
}

// ============================================================================
// Thread handle
// ============================================================================

/// Handle to a cooperative scan thread
///
/// Dropping the handle cancels the thread.
pub struct ScanThread {
    control: Arc<Control>,
    pending: Option<Box<dyn ScanLoop>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ScanThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanThread")
            .field("name", &self.control.name)
            .field("state", &self.state())
            .finish()
    }
}

impl ScanThread {
    /// Create a thread in the `Created` state
    pub fn new<L: ScanLoop>(scan: L, options: ThreadOptions) -> Self {
        let interval = options.interval;
        Self::with_pace(Box::new(scan), options, |_| Pace::Interval(interval))
    }

    /// Create and start a thread
    pub async fn spawn<L: ScanLoop>(scan: L, options: ThreadOptions) -> Result<Self> {
        let mut thread = Self::new(scan, options);
        thread.start().await?;
        Ok(thread)
    }

    pub(crate) fn with_pace(
        scan: Box<dyn ScanLoop>,
        options: ThreadOptions,
        pace: impl FnOnce(&CancellationToken) -> Pace,
    ) -> Self {
        let cancel = CancellationToken::new();
        let pace = pace(&cancel);
        let (state, _) = watch::channel(ThreadState::Created);
        let name: Arc<str> = Arc::from(options.name.as_str());

        let control = Arc::new(Control {
            logger: LinkLogger::new(name.clone(), options.log_level),
            name,
            cancel,
            suspended: AtomicBool::new(false),
            resumed: Notify::new(),
            exit_code: AtomicI32::new(0),
            raise_on_terminate: options.raise_on_terminate,
            raised: AtomicBool::new(false),
            state,
            clock: ScanClock::new(),
            cycle: AtomicU64::new(0),
            stats: Mutex::new(ScanStats::default()),
            observer: options.observer,
            pace,
        });

        Self {
            control,
            pending: Some(scan),
            handle: None,
        }
    }

    /// Launch the task; returns once the task reports alive
    pub async fn start(&mut self) -> Result<()> {
        let scan = self.pending.take().ok_or_else(|| {
            LinkError::config(format!("scan thread '{}' already started", self.control.name))
        })?;

        let (alive_tx, alive_rx) = oneshot::channel();
        let ctx = ScanContext {
            control: self.control.clone(),
        };
        self.handle = Some(tokio::spawn(run_loop(scan, ctx, alive_tx)));

        alive_rx.await.map_err(|_| {
            LinkError::connection(format!(
                "scan thread '{}' exited before reporting alive",
                self.control.name
            ))
        })?;

        info!("[{}] scan thread started", self.control.name);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.control.name
    }

    pub fn state(&self) -> ThreadState {
        *self.control.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_alive()
    }

    pub fn stats(&self) -> ScanStats {
        self.control.stats.lock().clone()
    }

    /// Context shared with the loop
    pub fn context(&self) -> ScanContext {
        ScanContext {
            control: self.control.clone(),
        }
    }

    /// Request suspension; takes effect at the next yield point
    pub fn suspend(&self) {
        self.control.suspended.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.control.suspended.store(false, Ordering::Release);
        self.control.resumed.notify_waiters();
    }

    /// Request termination with `code`, optionally waiting for exit
    ///
    /// A suspended thread is resumed so it can observe the request.
    pub async fn terminate(&self, code: i32, wait: bool) {
        let control = &self.control;
        if !control.cancel.is_cancelled() {
            control.exit_code.store(code, Ordering::Release);
            control.state.send_if_modified(|state| {
                if state.is_alive() {
                    *state = ThreadState::Terminating;
                    true
                } else {
                    false
                }
            });
            control.cancel.cancel();
            debug!("[{}] terminate requested (code {})", control.name, code);
        }
        self.resume();

        if wait {
            self.wait_terminated().await;
        }
    }

    /// Wait until the loop has exited
    pub async fn wait_terminated(&self) {
        // A thread that was never started has nothing to wait for
        if self.handle.is_none() {
            return;
        }
        let mut rx = self.control.state.subscribe();
        let _ = rx.wait_for(|state| *state == ThreadState::Terminated).await;
    }

    /// Wait for the task itself; surfaces a panic inside the loop
    pub async fn join(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.await.map_err(|e| {
                LinkError::stream(format!("scan thread '{}' failed: {}", self.control.name, e))
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn slave_signals(&self) -> Option<SlaveSignals> {
        match &self.control.pace {
            Pace::Signal(signals) => Some(signals.clone()),
            Pace::Interval(_) => None,
        }
    }
}

impl Drop for ScanThread {
    fn drop(&mut self) {
        self.control.cancel.cancel();
        self.control.resumed.notify_waiters();
    }
}

// ============================================================================
// Loop driver
// ============================================================================

/// Marks the thread terminated however the task ends
struct ExitGuard(Arc<Control>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.state.send_replace(ThreadState::Terminated);
    }
}

async fn run_loop(mut scan: Box<dyn ScanLoop>, ctx: ScanContext, alive: oneshot::Sender<()>) {
    let control = ctx.control.clone();
    let _guard = ExitGuard(control.clone());

    control.transition(ThreadState::Created, ThreadState::Running);
    let _ = alive.send(());

    loop {
        if let Pace::Signal(signals) = &control.pace {
            if ctx.wait_run(signals).await.is_err() || ctx.is_terminating() {
                break;
            }
        }
        if ctx.is_terminating() {
            break;
        }

        let cycle = control.cycle.fetch_add(1, Ordering::AcqRel) + 1;
        control.observer.on_scanning(cycle);

        let started = Instant::now();
        let result = scan.tick(&ctx).await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        match result {
            Ok(()) => control.stats.lock().record_success(elapsed_ms),
            Err(e) if e.is_terminated() => {
                debug!("[{}] loop stopped by termination signal", control.name);
                break;
            },
            Err(e) => {
                control.logger.exception(&format!("scan cycle {}", cycle), &e);
                control.stats.lock().record_failure(elapsed_ms, e.to_string());
            },
        }

        control.observer.on_after_scan(cycle);

        match &control.pace {
            Pace::Interval(interval) => {
                if ctx
                    .yield_for(interval.saturating_sub(elapsed))
                    .await
                    .is_err()
                {
                    break;
                }
            },
            Pace::Signal(signals) => signals.done.set(),
        }
    }

    scan.on_stop(&ctx).await;

    let stats = control.stats.lock().clone();
    if stats.failures > 0 {
        warn!(
            "[{}] scan thread stopped after {} cycles ({} failed, {:.1}% ok, last error: {})",
            control.name,
            stats.cycles,
            stats.failures,
            stats.success_rate(),
            stats.last_error.as_deref().unwrap_or("-")
        );
    } else {
        info!(
            "[{}] scan thread stopped after {} cycles",
            control.name, stats.cycles
        );
    }
}
