//! Field Scan Scheduler
//!
//! Cooperative scan threads for periodic device polling.
//!
//! # Architecture
//!
//! - **ScanThread**: one tokio task running a `ScanLoop`, with
//!   suspend/resume/terminate observed at the yield point
//! - **ScanContext**: what a loop sees of its thread (clock, cycle,
//!   cancellation, yield point)
//! - **ScanGroup**: master/slave lockstep, the master's `on_after_scan`
//!   fires only after every slave finished the same cycle
//! - **Event**: manual-reset flag used for the run/done handshake

pub mod context;
pub mod event;
pub mod group;
pub mod thread;

pub use context::{ScanContext, ScanStats, SlaveSignals, ThreadState};
pub use event::Event;
pub use group::{ScanGroup, ScanGroupBuilder, SlaveSet};
pub use thread::{ScanLoop, ScanThread, ThreadOptions, DEFAULT_INTERVAL_MS};
