//! Gauge metric type.
//!
//! See [`Gauge`] for more details.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    metrics::atomic::AtomicF64,
    reporter::{StatsReporter, TagMap},
};

/// A last-write-wins instantaneous value.
///
/// Updates overwrite the stored value and mark it dirty; a report emits the
/// value only when at least one update happened since the previous report.
pub struct Gauge {
    inner: Arc<GaugeCore>,
}

impl Clone for Gauge {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl std::fmt::Debug for Gauge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gauge").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct GaugeCore {
    current: AtomicF64,
    updated: AtomicBool,
}

impl Gauge {
    pub(crate) fn new() -> Self {
        Self { inner: Arc::new(GaugeCore::default()) }
    }

    /// Records an instantaneous value. Concurrent updates race; the last
    /// writer wins.
    pub fn update(&self, value: f64) {
        self.inner.current.store(value);
        self.inner.updated.store(true, Ordering::Release);
    }

    pub(crate) fn report(&self, name: &str, tags: &TagMap, reporter: &dyn StatsReporter) {
        // Whoever flips the flag owns this reporting cycle; a report with no
        // intervening update emits nothing.
        if self
            .inner
            .updated
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            reporter.report_gauge(name, tags, self.inner.current.load());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::reporter::mock::MockStatsReporter;

    #[test]
    fn test_gauge_reports_once_per_update() {
        let reporter = MockStatsReporter::new();
        let tags = BTreeMap::new();
        let gauge = Gauge::new();

        gauge.update(1.5);
        gauge.report("foo", &tags, &reporter);
        gauge.report("foo", &tags, &reporter);

        let gauges = reporter.gauges();
        assert_eq!(gauges.len(), 1);
        assert_eq!(gauges[0], ("foo".to_owned(), tags.clone(), 1.5));
    }

    #[test]
    fn test_gauge_last_write_wins() {
        let reporter = MockStatsReporter::new();
        let tags = BTreeMap::new();
        let gauge = Gauge::new();

        gauge.update(1.0);
        gauge.update(2.0);
        gauge.update(3.0);
        gauge.report("foo", &tags, &reporter);

        let gauges = reporter.gauges();
        assert_eq!(gauges.len(), 1);
        assert_eq!(gauges[0].2, 3.0);
    }

    #[test]
    fn test_gauge_no_update_no_report() {
        let reporter = MockStatsReporter::new();
        let gauge = Gauge::new();

        gauge.report("foo", &BTreeMap::new(), &reporter);
        assert!(reporter.gauges().is_empty());
    }

    #[test]
    fn test_gauge_clone_shares_state() {
        let reporter = MockStatsReporter::new();
        let gauge = Gauge::new();
        let clone = gauge.clone();

        clone.update(42.0);
        gauge.report("foo", &BTreeMap::new(), &reporter);
        assert_eq!(reporter.gauges()[0].2, 42.0);
    }
}
