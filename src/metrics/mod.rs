//! The metric primitives: counters, gauges, timers, histograms, and the
//! bucket descriptors and stopwatches that support them.
//!
//! Primitives are created through a [`Scope`](crate::Scope) and handed out
//! as cheap-clone handles; the scope keeps its own handle for periodic
//! reporting.

mod atomic;
pub mod buckets;
pub mod counter;
pub mod gauge;
pub mod histogram;
pub mod stopwatch;
pub mod timer;

pub use self::{
    buckets::{Buckets, BucketsIter, BucketsKind},
    counter::Counter,
    gauge::Gauge,
    histogram::Histogram,
    stopwatch::{Stopwatch, StopwatchRecorder},
    timer::Timer,
};
