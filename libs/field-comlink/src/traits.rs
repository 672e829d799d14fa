//! Core Communication Traits
//!
//! Connection state shared by the transports and the observer hooks fired
//! around scan cycles and frame exchanges.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Connection State
// ============================================================================

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// No socket
    #[default]
    Closed,
    /// Open in progress
    Connecting,
    /// Socket established
    Open,
}

impl ConnectionState {
    /// Check if state represents an active connection
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Closed => write!(f, "Closed"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
        }
    }
}

// ============================================================================
// Observer
// ============================================================================

/// Callbacks around scan cycles and frame exchanges
///
/// All methods default to no-ops. Implementations must not block: they run
/// inline on the scan task.
pub trait ScanObserver: Send + Sync {
    /// Before the tick of cycle `cycle`
    fn on_scanning(&self, _cycle: u64) {}

    /// After cycle `cycle` completed (for a group master: after every slave
    /// reported done)
    fn on_after_scan(&self, _cycle: u64) {}

    /// Request frame about to be written
    fn on_sending(&self, _frame: &[u8]) {}

    /// Response bytes as received, before validation
    fn on_receiving(&self, _frame: &[u8]) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ScanObserver for NoopObserver {}

/// Shared observer handle
pub type SharedObserver = Arc<dyn ScanObserver>;

/// Observer handle that does nothing
pub fn noop_observer() -> SharedObserver {
    Arc::new(NoopObserver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct Counting {
        scans: AtomicU64,
        bytes: AtomicU64,
    }

    impl ScanObserver for Counting {
        fn on_scanning(&self, _cycle: u64) {
            self.scans.fetch_add(1, Ordering::Relaxed);
        }

        fn on_sending(&self, frame: &[u8]) {
            self.bytes.fetch_add(frame.len() as u64, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_default_methods_are_noops() {
        let observer = noop_observer();
        observer.on_scanning(1);
        observer.on_after_scan(1);
        observer.on_sending(&[1, 2]);
        observer.on_receiving(&[3]);
    }

    #[test]
    fn test_partial_override() {
        let observer = Counting::default();
        observer.on_scanning(0);
        observer.on_sending(&[0u8; 21]);
        observer.on_receiving(&[0u8; 4]);
        assert_eq!(observer.scans.load(Ordering::Relaxed), 1);
        assert_eq!(observer.bytes.load(Ordering::Relaxed), 21);
    }

    #[test]
    fn test_connection_state() {
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
        assert!(ConnectionState::Open.is_open());
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
    }
}
