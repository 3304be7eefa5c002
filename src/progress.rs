//! Rate-limited, byte-granular progress reporting.
//!
//! The writer and reader own a [`ProgressTracker`] for the duration of one
//! call and feed it every chunk they stream. The tracker decides when the
//! observer actually hears about it: at most once per interval while work
//! is running, and exactly once with a completed count at the end.

use std::time::Duration;

use crate::core::{Clock, QuantaClock};

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Receives progress updates as `(bytes processed, total if known)`.
pub trait ProgressObserver {
    fn on_progress(&mut self, processed: u64, total: Option<u64>);
}

impl<F> ProgressObserver for F
where
    F: FnMut(u64, Option<u64>),
{
    fn on_progress(&mut self, processed: u64, total: Option<u64>) {
        self(processed, total)
    }
}

pub struct ProgressTracker<'a> {
    observer: Option<&'a mut dyn ProgressObserver>,
    clock: Box<dyn Clock + 'a>,
    processed: u64,
    total: Option<u64>,
    interval_ns: u64,
    last_emit_ns: Option<u64>,
    finished: bool,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(observer: &'a mut dyn ProgressObserver, interval: Duration) -> Self {
        Self::with_clock(Some(observer), interval, QuantaClock::new())
    }

    /// A tracker that counts bytes but never calls anyone.
    pub fn disabled() -> Self {
        Self::with_clock(None, DEFAULT_PROGRESS_INTERVAL, QuantaClock::new())
    }

    pub fn with_clock(
        observer: Option<&'a mut dyn ProgressObserver>,
        interval: Duration,
        clock: impl Clock + 'a,
    ) -> Self {
        Self {
            observer,
            clock: Box::new(clock),
            processed: 0,
            total: None,
            interval_ns: interval.as_nanos().min(u64::MAX as u128) as u64,
            last_emit_ns: None,
            finished: false,
        }
    }

    pub fn set_total(&mut self, total: Option<u64>) {
        self.total = total;
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn advance(&mut self, bytes: u64) {
        if self.finished {
            return;
        }
        self.processed = self.processed.saturating_add(bytes);

        // The completed count is reserved for finish().
        if matches!(self.total, Some(total) if self.processed >= total) {
            return;
        }

        let now = self.clock.now_ns();
        let due = match self.last_emit_ns {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.interval_ns,
        };
        if due {
            self.last_emit_ns = Some(now);
            if let Some(observer) = self.observer.as_mut() {
                observer.on_progress(self.processed, self.total);
            }
        }
    }

    /// Reports completion. Only the first call reaches the observer.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let total = self.total.unwrap_or(self.processed).max(self.processed);
        self.processed = total;
        self.total = Some(total);
        if let Some(observer) = self.observer.as_mut() {
            observer.on_progress(total, Some(total));
        }
    }
}
