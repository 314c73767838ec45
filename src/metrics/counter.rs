//! Counter metric type.
//!
//! See [`Counter`] for more details.

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use crate::reporter::{StatsReporter, TagMap};

/// A monotonic event counter that reports deltas.
///
/// Increments accumulate into `current`; each report takes the delta since
/// the previous report and advances the baseline, so every increment is
/// reported exactly once across reporting cycles.
///
/// Counters are cheap-clone handles over shared state: the scope that
/// created one keeps a handle for reporting, the application keeps another
/// for incrementing.
pub struct Counter {
    inner: Arc<CounterCore>,
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter").finish_non_exhaustive()
    }
}

#[derive(Default)]
pub(crate) struct CounterCore {
    current: AtomicI64,
    previous: AtomicI64,
}

impl Counter {
    pub(crate) fn new() -> Self {
        Self { inner: Arc::new(CounterCore::default()) }
    }

    /// Increments the counter by 1.
    #[inline]
    pub fn inc(&self) {
        self.inc_by(1);
    }

    /// Increments the counter by `delta`.
    #[inline]
    pub fn inc_by(&self, delta: i64) {
        self.inner.inc(delta);
    }

    /// Returns the delta accumulated since the last call and advances the
    /// baseline, so subsequent calls only observe newer increments.
    pub fn value(&self) -> i64 {
        self.inner.value()
    }

    pub(crate) fn report(&self, name: &str, tags: &TagMap, reporter: &dyn StatsReporter) {
        let value = self.value();
        if value != 0 {
            reporter.report_counter(name, tags, value);
        }
    }
}

impl CounterCore {
    #[inline]
    pub(crate) fn inc(&self, delta: i64) {
        self.current.fetch_add(delta, Ordering::Relaxed);
    }

    pub(crate) fn value(&self) -> i64 {
        let current = self.current.load(Ordering::Relaxed);
        let previous = self.previous.swap(current, Ordering::Relaxed);
        current - previous
    }
}
