//! # tally
//!
//! Client-side metrics instrumentation with an M3 emission reporter.
//!
//! Application code records counters, gauges, timers, and histograms
//! through a hierarchical [`Scope`] tree. A root scope built with a
//! reporting interval periodically aggregates per-metric state and
//! delivers it to a pluggable [`StatsReporter`]; the bundled
//! [`m3::Reporter`] serializes metrics as M3 Thrift compact-protocol
//! messages and ships them over UDP, batching multiple metrics per
//! datagram.
//!
//! ## Features
//!
//! - Lock-free hot paths: incrementing a counter or updating a gauge never
//!   takes a lock and never performs I/O
//! - Delta-reporting counters, latched gauges, bucketed histograms, and
//!   direct-emit timers with stopwatch support
//! - Hierarchical naming and tagging via sub-scopes and tagged scopes
//! - MTU-aware batching over UDP with a bounded queue and at-most-once
//!   delivery
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use tally::{Buckets, ScopeBuilder};
//!
//! # fn main() -> Result<(), tally::Error> {
//! // A root scope with no reporter discards everything it records, which
//! // is handy in tests; pass an `m3::Reporter` (or your own
//! // `StatsReporter`) to ship metrics somewhere real.
//! let scope = ScopeBuilder::default()
//!     .with_prefix("myapp")
//!     .with_tags([("env", "prod")])
//!     .build();
//!
//! // Counters, gauges, and histograms aggregate until the next report.
//! scope.counter("requests").inc();
//! scope.gauge("queue_depth").update(17.0);
//!
//! let latency = scope.histogram(
//!     "latency",
//!     Buckets::linear_durations(Duration::ZERO, Duration::from_millis(10), 100)?,
//! );
//! latency.record_duration(Duration::from_millis(3));
//!
//! // Timers emit on every record.
//! let mut sw = scope.timer("render").start();
//! // ... timed section ...
//! sw.stop();
//!
//! // Tags and names compose down the tree.
//! let db = scope.sub_scope("db").tagged([("shard", "7")]);
//! db.counter("queries").inc();
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod m3;
pub mod metrics;
pub mod reporter;
pub mod scope;

pub use self::{
    error::{Error, ErrorKind, Result},
    metrics::{Buckets, BucketsKind, Counter, Gauge, Histogram, Stopwatch, Timer},
    reporter::{Capabilities, NoopStatsReporter, StatsReporter, TagMap},
    scope::{RootScope, Scope, ScopeBuilder},
};
