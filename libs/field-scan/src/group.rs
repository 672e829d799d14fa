//! Master/slave scan groups
//!
//! A master thread drives N slave threads in lockstep. Each master cycle
//! runs the master's own tick, releases every slave (`execute_slaves`),
//! waits until all of them report done (`wait_one_slaves`) and only then
//! fires `on_after_scan`. Slaves pace themselves on the run signal instead
//! of a fixed interval.

use async_trait::async_trait;
use tracing::{debug, info};

use field_comlink::{LinkError, Result};

use crate::context::{Pace, ScanContext, SlaveSignals};
use crate::thread::{ScanLoop, ScanThread, ThreadOptions};

// ============================================================================
// Slave set
// ============================================================================

/// Signals of every slave in a group, held by the master loop
#[derive(Debug, Clone, Default)]
pub struct SlaveSet {
    slaves: Vec<SlaveSignals>,
}

impl SlaveSet {
    pub fn len(&self) -> usize {
        self.slaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }

    /// Reset each slave's done flag and release it for one cycle
    pub fn execute_slaves(&self) {
        for slave in &self.slaves {
            slave.done.reset();
            slave.set();
        }
    }

    /// Block until every slave has reported done
    ///
    /// Returns `false` when the master was asked to terminate while
    /// waiting. A slave that terminated on its own counts as done.
    pub async fn wait_one_slaves(&self, ctx: &ScanContext) -> bool {
        let master = ctx.cancellation();
        for slave in &self.slaves {
            tokio::select! {
                _ = slave.done.wait() => {},
                _ = slave.cancel.cancelled() => {},
                _ = master.cancelled() => return false,
            }
        }
        true
    }
}

/// Master loop wrapper: own tick, then one lockstep slave cycle
struct MasterLoop {
    inner: Box<dyn ScanLoop>,
    slaves: SlaveSet,
}

#[async_trait]
impl ScanLoop for MasterLoop {
    async fn tick(&mut self, ctx: &ScanContext) -> Result<()> {
        let result = self.inner.tick(ctx).await;
        if matches!(&result, Err(e) if e.is_terminated()) {
            return result;
        }

        self.slaves.execute_slaves();
        if !self.slaves.wait_one_slaves(ctx).await {
            debug!("[{}] slave barrier interrupted by termination", ctx.name());
            return Err(LinkError::Terminated {
                code: ctx.exit_code(),
            });
        }
        result
    }

    async fn on_stop(&mut self, ctx: &ScanContext) {
        self.inner.on_stop(ctx).await
    }
}

// ============================================================================
// Group
// ============================================================================

/// Running master/slave group
#[derive(Debug)]
pub struct ScanGroup {
    master: ScanThread,
    slaves: Vec<ScanThread>,
}

impl ScanGroup {
    pub fn builder() -> ScanGroupBuilder {
        ScanGroupBuilder::default()
    }

    pub fn master(&self) -> &ScanThread {
        &self.master
    }

    pub fn slaves(&self) -> &[ScanThread] {
        &self.slaves
    }

    /// Run/done signals of slave `index`
    pub fn slave_signals(&self, index: usize) -> Option<SlaveSignals> {
        self.slaves.get(index).and_then(ScanThread::slave_signals)
    }

    pub fn suspend(&self) {
        self.master.suspend();
        for slave in &self.slaves {
            slave.suspend();
        }
    }

    pub fn resume(&self) {
        for slave in &self.slaves {
            slave.resume();
        }
        self.master.resume();
    }

    /// Terminate the master first, then every slave
    pub async fn terminate(&self, code: i32, wait: bool) {
        self.master.terminate(code, wait).await;
        for slave in &self.slaves {
            slave.terminate(code, wait).await;
        }
        info!("[{}] scan group terminated", self.master.name());
    }
}

type PendingThread = (Box<dyn ScanLoop>, ThreadOptions);

/// Wires a master and its slaves, then starts them
#[derive(Default)]
pub struct ScanGroupBuilder {
    master: Option<PendingThread>,
    slaves: Vec<PendingThread>,
}

impl ScanGroupBuilder {
    pub fn master<L: ScanLoop>(mut self, scan: L, options: ThreadOptions) -> Self {
        self.master = Some((Box::new(scan), options));
        self
    }

    /// Add a slave; its `interval` is ignored
    pub fn slave<L: ScanLoop>(mut self, scan: L, options: ThreadOptions) -> Self {
        self.slaves.push((Box::new(scan), options));
        self
    }

    pub fn slave_boxed(mut self, scan: Box<dyn ScanLoop>, options: ThreadOptions) -> Self {
        self.slaves.push((scan, options));
        self
    }

    pub fn master_boxed(mut self, scan: Box<dyn ScanLoop>, options: ThreadOptions) -> Self {
        self.master = Some((scan, options));
        self
    }

    /// Start slaves first (they wait for the run signal), then the master
    pub async fn start(self) -> Result<ScanGroup> {
        let (master_loop, master_options) = self
            .master
            .ok_or_else(|| LinkError::config("scan group has no master"))?;

        let mut slaves = Vec::with_capacity(self.slaves.len());
        let mut signals = Vec::with_capacity(self.slaves.len());
        for (scan, options) in self.slaves {
            let mut thread = ScanThread::with_pace(scan, options, |cancel| {
                Pace::Signal(SlaveSignals::new(cancel.clone()))
            });
            if let Some(s) = thread.slave_signals() {
                signals.push(s);
            }
            thread.start().await?;
            slaves.push(thread);
        }

        let interval = master_options.interval;
        let mut master = ScanThread::with_pace(
            Box::new(MasterLoop {
                inner: master_loop,
                slaves: SlaveSet { slaves: signals },
            }),
            master_options,
            |_| Pace::Interval(interval),
        );
        master.start().await?;

        info!(
            "[{}] scan group started with {} slaves",
            master.name(),
            slaves.len()
        );
        Ok(ScanGroup { master, slaves })
    }
}
