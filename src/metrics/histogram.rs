//! Histogram metric type.
//!
//! See [`Histogram`] for more details.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    metrics::{
        buckets::{Buckets, BucketsKind},
        counter::CounterCore,
        stopwatch::{Stopwatch, StopwatchRecorder},
    },
    reporter::{StatsReporter, TagMap},
};

/// A bucketed distribution of samples.
///
/// The bucket layout is fixed at construction from a [`Buckets`] descriptor:
/// bound `b[i]` yields the half-open bucket `[b[i-1], b[i])`, the first
/// bucket's lower bound is the minimum-double sentinel, and a catch-all
/// bucket up to the maximum-double sentinel is appended so every sample
/// lands somewhere. Each bucket counts samples with the same delta counter
/// the [`Counter`](crate::Counter) primitive uses, so reports only carry
/// buckets that saw new samples.
pub struct Histogram {
    inner: Arc<HistogramCore>,
}

impl Clone for Histogram {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram")
            .field("kind", &self.inner.kind)
            .field("buckets", &self.inner.buckets.len())
            .finish()
    }
}

struct HistogramCore {
    kind: BucketsKind,
    buckets: Vec<HistogramBucket>,
}

struct HistogramBucket {
    bucket_id: u64,
    num_buckets: u64,
    lower_bound: f64,
    upper_bound: f64,
    samples: CounterCore,
}

impl Histogram {
    pub(crate) fn new(buckets: &Buckets) -> Self {
        let num = buckets.len();
        let mut histogram_buckets = Vec::with_capacity(num as usize + 1);

        let mut lower_bound = f64::MIN;
        for (index, upper_bound) in buckets.iter().enumerate() {
            histogram_buckets.push(HistogramBucket {
                bucket_id: index as u64,
                num_buckets: num,
                lower_bound,
                upper_bound,
                samples: CounterCore::default(),
            });
            lower_bound = upper_bound;
        }
        // Catch-all for anything past the last bound.
        histogram_buckets.push(HistogramBucket {
            bucket_id: num,
            num_buckets: num,
            lower_bound,
            upper_bound: f64::MAX,
            samples: CounterCore::default(),
        });

        Self { inner: Arc::new(HistogramCore { kind: buckets.kind(), buckets: histogram_buckets }) }
    }

    /// Records a sample value into the bucket whose range contains it.
    pub fn record_value(&self, value: f64) {
        self.inner.record(value);
    }

    /// Records a duration sample, carried as nanoseconds.
    pub fn record_duration(&self, value: Duration) {
        self.inner.record(value.as_nanos() as f64);
    }

    /// Returns a [`Stopwatch`] that records into this histogram on stop.
    pub fn start(&self) -> Stopwatch {
        Stopwatch::new(Instant::now(), self.inner.clone())
    }

    pub(crate) fn report(&self, name: &str, tags: &TagMap, reporter: &dyn StatsReporter) {
        for bucket in &self.inner.buckets {
            let samples = bucket.samples.value();
            if samples == 0 {
                continue;
            }
            match self.inner.kind {
                BucketsKind::Values => reporter.report_histogram_value_samples(
                    name,
                    tags,
                    bucket.bucket_id,
                    bucket.num_buckets,
                    bucket.lower_bound,
                    bucket.upper_bound,
                    samples as u64,
                ),
                BucketsKind::Durations => reporter.report_histogram_duration_samples(
                    name,
                    tags,
                    bucket.bucket_id,
                    bucket.num_buckets,
                    bucket.lower_bound as i64,
                    bucket.upper_bound as i64,
                    samples as u64,
                ),
            }
        }
    }
}

impl HistogramCore {
    fn record(&self, value: f64) {
        // First bucket whose upper bound is strictly greater than the sample;
        // the max-double catch-all keeps the index in range for any finite
        // sample, the clamp covers the sentinel itself.
        let index = self
            .buckets
            .partition_point(|bucket| bucket.upper_bound <= value)
            .min(self.buckets.len() - 1);
        self.buckets[index].samples.inc(1);
    }
}

impl StopwatchRecorder for HistogramCore {
    fn record_stopwatch(&self, start: Instant) {
        self.record(start.elapsed().as_nanos() as f64);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::reporter::mock::MockStatsReporter;

    #[test]
    fn test_histogram_value_samples() {
        let reporter = MockStatsReporter::new();
        let tags = BTreeMap::new();

        let buckets = Buckets::linear_values(0.0, 1.0, 10).unwrap();
        let histogram = Histogram::new(&buckets);
        histogram.record_value(0.5);
        histogram.record_value(2.5);
        histogram.record_value(2.5);
        histogram.report("foo", &tags, &reporter);

        let samples = reporter.histogram_value_samples();
        assert_eq!(samples.len(), 2);
        // (name, tags, bucket_id, num_buckets, lower, upper, samples)
        assert_eq!(samples[0], ("foo".to_owned(), tags.clone(), 1, 10, 0.0, 1.0, 1));
        assert_eq!(samples[1], ("foo".to_owned(), tags.clone(), 3, 10, 2.0, 3.0, 2));
    }

    #[test]
    fn test_histogram_every_sample_lands_once() {
        let reporter = MockStatsReporter::new();
        let buckets = Buckets::linear_values(0.0, 10.0, 3).unwrap();
        let histogram = Histogram::new(&buckets);

        // Below the first bound, on a boundary, inside a range, and far past
        // the last bound.
        for value in [-5.0, 0.0, 10.0, 14.9, 25.0, 1e12] {
            histogram.record_value(value);
        }
        histogram.report("foo", &BTreeMap::new(), &reporter);

        let samples = reporter.histogram_value_samples();
        let total: u64 = samples.iter().map(|s| s.6).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_histogram_sentinel_bounds() {
        let reporter = MockStatsReporter::new();
        let buckets = Buckets::linear_values(0.0, 1.0, 1).unwrap();
        let histogram = Histogram::new(&buckets);

        histogram.record_value(-1.0);
        histogram.record_value(1.0);
        histogram.report("foo", &BTreeMap::new(), &reporter);

        let samples = reporter.histogram_value_samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].4, f64::MIN);
        assert_eq!(samples[0].5, 0.0);
        assert_eq!(samples[1].4, 0.0);
        assert_eq!(samples[1].5, f64::MAX);
    }

    #[test]
    fn test_histogram_duration_samples() {
        let reporter = MockStatsReporter::new();
        let buckets =
            Buckets::linear_durations(Duration::ZERO, Duration::from_millis(10), 10).unwrap();
        let histogram = Histogram::new(&buckets);

        histogram.record_duration(Duration::from_millis(25));
        histogram.report("foo", &BTreeMap::new(), &reporter);

        let samples = reporter.histogram_duration_samples();
        assert_eq!(samples.len(), 1);
        let (_, _, bucket_id, num_buckets, lower, upper, count) = samples[0].clone();
        assert_eq!(bucket_id, 3);
        assert_eq!(num_buckets, 10);
        assert_eq!(lower, 20_000_000);
        assert_eq!(upper, 30_000_000);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_histogram_duration_sentinels_saturate() {
        let reporter = MockStatsReporter::new();
        let buckets =
            Buckets::linear_durations(Duration::from_millis(10), Duration::from_millis(10), 1)
                .unwrap();
        let histogram = Histogram::new(&buckets);

        histogram.record_duration(Duration::ZERO);
        histogram.record_duration(Duration::from_secs(1));
        histogram.report("foo", &BTreeMap::new(), &reporter);

        let samples = reporter.histogram_duration_samples();
        assert_eq!(samples[0].4, i64::MIN);
        assert_eq!(samples[1].5, i64::MAX);
    }

    #[test]
    fn test_histogram_reports_deltas() {
        let reporter = MockStatsReporter::new();
        let buckets = Buckets::linear_values(0.0, 1.0, 2).unwrap();
        let histogram = Histogram::new(&buckets);

        histogram.record_value(0.5);
        histogram.report("foo", &BTreeMap::new(), &reporter);
        histogram.report("foo", &BTreeMap::new(), &reporter);

        // The second report had no new samples in any bucket.
        assert_eq!(reporter.histogram_value_samples().len(), 1);
    }

    #[test]
    fn test_histogram_stopwatch() {
        let reporter = MockStatsReporter::new();
        let buckets =
            Buckets::linear_durations(Duration::ZERO, Duration::from_secs(3600), 1).unwrap();
        let histogram = Histogram::new(&buckets);

        let mut sw = histogram.start();
        sw.stop();
        histogram.report("foo", &BTreeMap::new(), &reporter);

        let samples = reporter.histogram_duration_samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].6, 1);
    }
}
