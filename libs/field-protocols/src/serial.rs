//! Request serial numbers
//!
//! Each client owns its generator; serials correlate a response with the
//! request that produced it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// How a client numbers its requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialMode {
    /// Counter starting at the given value, wrapping at u16::MAX
    Sequential(u16),
    /// Pseudo-random serials from a seeded generator
    Seeded(u64),
}

impl Default for SerialMode {
    fn default() -> Self {
        SerialMode::Sequential(1)
    }
}

#[derive(Debug)]
enum Source {
    Counter(u16),
    Random(StdRng),
}

/// Per-client serial generator
#[derive(Debug)]
pub struct SerialGenerator {
    source: Source,
}

impl SerialGenerator {
    pub fn new(mode: SerialMode) -> Self {
        let source = match mode {
            SerialMode::Sequential(start) => Source::Counter(start),
            SerialMode::Seeded(seed) => Source::Random(StdRng::seed_from_u64(seed)),
        };
        Self { source }
    }

    pub fn sequential(start: u16) -> Self {
        Self::new(SerialMode::Sequential(start))
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(SerialMode::Seeded(seed))
    }

    /// Next serial
    pub fn next_serial(&mut self) -> u16 {
        match &mut self.source {
            Source::Counter(next) => {
                let serial = *next;
                *next = next.wrapping_add(1);
                serial
            },
            Source::Random(rng) => rng.gen(),
        }
    }
}

impl Default for SerialGenerator {
    fn default() -> Self {
        Self::new(SerialMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_wraps() {
        let mut serials = SerialGenerator::sequential(u16::MAX - 1);
        assert_eq!(serials.next_serial(), u16::MAX - 1);
        assert_eq!(serials.next_serial(), u16::MAX);
        assert_eq!(serials.next_serial(), 0);
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let mut a = SerialGenerator::seeded(42);
        let mut b = SerialGenerator::seeded(42);
        let first: Vec<u16> = (0..8).map(|_| a.next_serial()).collect();
        let second: Vec<u16> = (0..8).map(|_| b.next_serial()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_generators_are_independent() {
        let mut a = SerialGenerator::default();
        let mut b = SerialGenerator::default();
        a.next_serial();
        a.next_serial();
        assert_eq!(b.next_serial(), 1);
    }
}
