//! Timer metric type.
//!
//! See [`Timer`] for more details.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    metrics::stopwatch::{Stopwatch, StopwatchRecorder},
    reporter::{StatsReporter, TagMap},
};

/// A duration metric that emits directly on each record.
///
/// Timers are not aggregated: every [`record`](Timer::record) reaches the
/// reporter immediately, which is why a timer carries its fully qualified
/// name and tags from construction rather than receiving them at report
/// time.
pub struct Timer {
    inner: Arc<TimerCore>,
}

impl Clone for Timer {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer").field("name", &self.inner.name).finish_non_exhaustive()
    }
}

struct TimerCore {
    name: String,
    tags: TagMap,
    reporter: Arc<dyn StatsReporter>,
}

impl Timer {
    pub(crate) fn new(name: String, tags: TagMap, reporter: Arc<dyn StatsReporter>) -> Self {
        Self { inner: Arc::new(TimerCore { name, tags, reporter }) }
    }

    /// Records a duration.
    pub fn record(&self, value: Duration) {
        self.inner.record(value);
    }

    /// Returns a [`Stopwatch`] that records into this timer on stop.
    pub fn start(&self) -> Stopwatch {
        Stopwatch::new(Instant::now(), self.inner.clone())
    }
}

impl TimerCore {
    fn record(&self, value: Duration) {
        self.reporter.report_timer(&self.name, &self.tags, value);
    }
}

impl StopwatchRecorder for TimerCore {
    fn record_stopwatch(&self, start: Instant) {
        self.record(start.elapsed());
    }
}
