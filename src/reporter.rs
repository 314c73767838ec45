//! The reporting seam between scopes and metric backends.
//!
//! A [`StatsReporter`] receives every value the scope tree reports. One
//! implementation ships with the crate ([`m3::Reporter`](crate::m3::Reporter));
//! [`NoopStatsReporter`] is the sink used when none is configured.

use std::{collections::BTreeMap, time::Duration};

/// Tags attached to a metric, keyed by tag name.
///
/// A `BTreeMap` keeps tags ordered by name, which is the order every
/// downstream consumer (scope IDs, wire tag sets) relies on.
pub type TagMap = BTreeMap<String, String>;

/// What a reporter is able to do with the values it receives.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    reporting: bool,
    tagging: bool,
}

impl Capabilities {
    /// Creates a capabilities value.
    pub const fn new(reporting: bool, tagging: bool) -> Self {
        Self { reporting, tagging }
    }

    /// Whether the reporter forwards values anywhere.
    pub const fn reporting(&self) -> bool {
        self.reporting
    }

    /// Whether the reporter understands tags.
    pub const fn tagging(&self) -> bool {
        self.tagging
    }
}

/// A sink that accepts reported metric values for forwarding.
///
/// Counter, gauge, and histogram methods are invoked from the scope
/// reporting thread; timer methods are invoked directly from user threads.
/// Implementations must be thread-safe and must not block user threads on
/// I/O.
pub trait StatsReporter: Send + Sync {
    /// Returns what this reporter can do.
    fn capabilities(&self) -> Capabilities;

    /// Flushes any buffered values to the backend.
    fn flush(&self);

    /// Reports a counter delta.
    fn report_counter(&self, name: &str, tags: &TagMap, value: i64);

    /// Reports a gauge value.
    fn report_gauge(&self, name: &str, tags: &TagMap, value: f64);

    /// Reports one timer observation.
    fn report_timer(&self, name: &str, tags: &TagMap, value: Duration);

    /// Reports the new samples in one value-histogram bucket.
    ///
    /// `lower_bound`/`upper_bound` use the minimum/maximum double values as
    /// the −∞/+∞ sentinels.
    #[allow(clippy::too_many_arguments)]
    fn report_histogram_value_samples(
        &self,
        name: &str,
        tags: &TagMap,
        bucket_id: u64,
        num_buckets: u64,
        lower_bound: f64,
        upper_bound: f64,
        samples: u64,
    );

    /// Reports the new samples in one duration-histogram bucket.
    ///
    /// Bounds are nanoseconds; `i64::MIN`/`i64::MAX` are the −∞/+∞
    /// sentinels.
    #[allow(clippy::too_many_arguments)]
    fn report_histogram_duration_samples(
        &self,
        name: &str,
        tags: &TagMap,
        bucket_id: u64,
        num_buckets: u64,
        lower_bound_ns: i64,
        upper_bound_ns: i64,
        samples: u64,
    );
}

/// A reporter that discards everything it is given.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopStatsReporter;

impl NoopStatsReporter {
    /// Creates a no-op reporter.
    pub const fn new() -> Self {
        Self
    }
}

impl StatsReporter for NoopStatsReporter {
    fn capabilities(&self) -> Capabilities {
        Capabilities::new(false, false)
    }

    fn flush(&self) {}

    fn report_counter(&self, _name: &str, _tags: &TagMap, _value: i64) {}

    fn report_gauge(&self, _name: &str, _tags: &TagMap, _value: f64) {}

    fn report_timer(&self, _name: &str, _tags: &TagMap, _value: Duration) {}

    fn report_histogram_value_samples(
        &self,
        _name: &str,
        _tags: &TagMap,
        _bucket_id: u64,
        _num_buckets: u64,
        _lower_bound: f64,
        _upper_bound: f64,
        _samples: u64,
    ) {
    }

    fn report_histogram_duration_samples(
        &self,
        _name: &str,
        _tags: &TagMap,
        _bucket_id: u64,
        _num_buckets: u64,
        _lower_bound_ns: i64,
        _upper_bound_ns: i64,
        _samples: u64,
    ) {
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use parking_lot::Mutex;

    use super::*;

    type ValueSample = (String, TagMap, u64, u64, f64, f64, u64);
    type DurationSample = (String, TagMap, u64, u64, i64, i64, u64);

    /// Captures every reported value for assertions.
    #[derive(Default)]
    pub(crate) struct MockStatsReporter {
        counters: Mutex<Vec<(String, TagMap, i64)>>,
        gauges: Mutex<Vec<(String, TagMap, f64)>>,
        timers: Mutex<Vec<(String, TagMap, Duration)>>,
        value_samples: Mutex<Vec<ValueSample>>,
        duration_samples: Mutex<Vec<DurationSample>>,
        flushes: Mutex<usize>,
    }

    impl MockStatsReporter {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn counters(&self) -> Vec<(String, TagMap, i64)> {
            self.counters.lock().clone()
        }

        pub(crate) fn gauges(&self) -> Vec<(String, TagMap, f64)> {
            self.gauges.lock().clone()
        }

        pub(crate) fn timers(&self) -> Vec<(String, TagMap, Duration)> {
            self.timers.lock().clone()
        }

        pub(crate) fn histogram_value_samples(&self) -> Vec<ValueSample> {
            self.value_samples.lock().clone()
        }

        pub(crate) fn histogram_duration_samples(&self) -> Vec<DurationSample> {
            self.duration_samples.lock().clone()
        }

        pub(crate) fn flushes(&self) -> usize {
            *self.flushes.lock()
        }
    }

    impl StatsReporter for MockStatsReporter {
        fn capabilities(&self) -> Capabilities {
            Capabilities::new(true, true)
        }

        fn flush(&self) {
            *self.flushes.lock() += 1;
        }

        fn report_counter(&self, name: &str, tags: &TagMap, value: i64) {
            self.counters.lock().push((name.to_owned(), tags.clone(), value));
        }

        fn report_gauge(&self, name: &str, tags: &TagMap, value: f64) {
            self.gauges.lock().push((name.to_owned(), tags.clone(), value));
        }

        fn report_timer(&self, name: &str, tags: &TagMap, value: Duration) {
            self.timers.lock().push((name.to_owned(), tags.clone(), value));
        }

        fn report_histogram_value_samples(
            &self,
            name: &str,
            tags: &TagMap,
            bucket_id: u64,
            num_buckets: u64,
            lower_bound: f64,
            upper_bound: f64,
            samples: u64,
        ) {
            self.value_samples.lock().push((
                name.to_owned(),
                tags.clone(),
                bucket_id,
                num_buckets,
                lower_bound,
                upper_bound,
                samples,
            ));
        }

        fn report_histogram_duration_samples(
            &self,
            name: &str,
            tags: &TagMap,
            bucket_id: u64,
            num_buckets: u64,
            lower_bound_ns: i64,
            upper_bound_ns: i64,
            samples: u64,
        ) {
            self.duration_samples.lock().push((
                name.to_owned(),
                tags.clone(),
                bucket_id,
                num_buckets,
                lower_bound_ns,
                upper_bound_ns,
                samples,
            ));
        }
    }

    #[test]
    fn test_noop_reporter_capabilities() {
        let reporter = NoopStatsReporter::new();
        assert_eq!(reporter.capabilities(), Capabilities::new(false, false));
        reporter.flush();
        reporter.report_counter("foo", &TagMap::new(), 1);
    }
}
