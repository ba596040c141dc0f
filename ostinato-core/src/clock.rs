//! Shared engine clock.
//!
//! One logical time source governs all scheduling: the engine thread advances
//! it once per tick, scene timers read it lock-free while polling. Values are
//! nanoseconds since engine start.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Clock {
    now_ns: AtomicU64,
}

pub type SharedClock = Arc<Clock>;

impl Clock {
    pub fn new() -> SharedClock {
        Arc::new(Clock::default())
    }

    /// Current engine time in nanoseconds since start.
    pub fn now(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }

    /// Advance the clock. Only the engine tick loop calls this; the clock
    /// never moves backwards.
    pub(crate) fn advance_to(&self, ns: u64) {
        self.now_ns.fetch_max(ns, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_monotonically() {
        let clock = Clock::new();
        clock.advance_to(100);
        clock.advance_to(50);
        assert_eq!(clock.now(), 100);
        clock.advance_to(200);
        assert_eq!(clock.now(), 200);
    }
}
