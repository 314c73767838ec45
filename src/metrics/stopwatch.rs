//! Scoped duration capture.

use std::{sync::Arc, time::Instant};

/// A recorder a [`Stopwatch`] delivers its elapsed time to on stop.
///
/// Implemented by timers and histograms.
pub trait StopwatchRecorder: Send + Sync {
    /// Records the time elapsed since `start`.
    fn record_stopwatch(&self, start: Instant);
}

/// Captures a monotonic start instant and reports the elapsed duration to
/// its recorder when stopped.
///
/// # Example
///
/// ```rust
/// # use tally::ScopeBuilder;
/// let scope = ScopeBuilder::default().build();
/// let timer = scope.timer("latency");
///
/// let mut sw = timer.start();
/// // ... timed section ...
/// sw.stop();
/// ```
pub struct Stopwatch {
    start: Instant,
    recorder: Option<Arc<dyn StopwatchRecorder>>,
}

impl Stopwatch {
    pub(crate) fn new(start: Instant, recorder: Arc<dyn StopwatchRecorder>) -> Self {
        Self { start, recorder: Some(recorder) }
    }

    /// Delivers the elapsed time to the recorder. A second call is a no-op.
    pub fn stop(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            recorder.record_stopwatch(self.start);
        }
    }
}

impl std::fmt::Debug for Stopwatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stopwatch")
            .field("start", &self.start)
            .field("stopped", &self.recorder.is_none())
            .finish()
    }
}
