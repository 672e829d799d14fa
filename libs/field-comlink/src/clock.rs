//! Monotonic scan clock
//!
//! Wraps a free-running `tokio::time::Instant` and reports elapsed
//! milliseconds. A suspended scan thread parks the clock so the time spent
//! suspended does not count towards its next interval.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct ClockState {
    parked_at: Option<Instant>,
    parked_total: Duration,
}

/// Monotonic millisecond clock with park support
#[derive(Debug)]
pub struct ScanClock {
    origin: Instant,
    state: Mutex<ClockState>,
}

impl Default for ScanClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ClockState {
                parked_at: None,
                parked_total: Duration::ZERO,
            }),
        }
    }

    /// Elapsed time since creation, excluding parked time
    pub fn now(&self) -> Duration {
        let state = self.state.lock();
        let reference = state.parked_at.unwrap_or_else(Instant::now);
        reference
            .saturating_duration_since(self.origin)
            .saturating_sub(state.parked_total)
    }

    /// Elapsed milliseconds (ticks)
    pub fn now_ms(&self) -> u64 {
        self.now().as_millis() as u64
    }

    /// Milliseconds elapsed since `reference` (a previous `now_ms()`)
    pub fn elapsed_ms(&self, reference: u64) -> u64 {
        self.now_ms().saturating_sub(reference)
    }

    /// `elapsed(reference) > delay`
    pub fn is_timeout(&self, reference: u64, delay_ms: u64) -> bool {
        self.elapsed_ms(reference) > delay_ms
    }

    /// Freeze the clock; repeated calls keep the first park point
    pub fn park(&self) {
        let mut state = self.state.lock();
        if state.parked_at.is_none() {
            state.parked_at = Some(Instant::now());
        }
    }

    /// Resume the clock, discarding the parked interval
    pub fn unpark(&self) {
        let mut state = self.state.lock();
        if let Some(at) = state.parked_at.take() {
            state.parked_total += Instant::now().saturating_duration_since(at);
        }
    }

    pub fn is_parked(&self) -> bool {
        self.state.lock().parked_at.is_some()
    }
}
