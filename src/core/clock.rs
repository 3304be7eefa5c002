use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A source of timestamps for progress rate limiting.
///
/// Implementations only need to be monotonic relative to themselves; the
/// absolute value is never stored in a container.
pub trait Clock: Send + Sync {
    /// Returns the current timestamp in nanoseconds.
    fn now_ns(&self) -> u64;
}

/// Monotonic TSC-backed clock from the `quanta` crate.
#[derive(Debug, Clone)]
pub struct QuantaClock {
    clock: quanta::Clock,
    start: quanta::Instant,
}

impl Default for QuantaClock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        let start = clock.now();
        Self { clock, start }
    }
}

impl QuantaClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for QuantaClock {
    fn now_ns(&self) -> u64 {
        self.clock.now().duration_since(self.start).as_nanos() as u64
    }
}

/// Clock that only moves when told to. Cloned handles share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_ns(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta: u64) {
        self.advance_ns(delta.saturating_mul(1_000_000));
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_handles_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance_ms(5);
        assert_eq!(other.now_ns(), 5_000_000);
    }

    #[test]
    fn quanta_clock_is_monotonic() {
        let clock = QuantaClock::new();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }
}
