//! The scope tree: named, tagged containers of metric primitives.
//!
//! A [`Scope`] names and tags the primitives created through it and
//! periodically reports their state to the configured
//! [`StatsReporter`]. Scopes form a tree: [`Scope::sub_scope`] extends the
//! prefix, [`Scope::tagged`] extends the tag set, and the root scope built
//! by [`ScopeBuilder`] drives reporting for everything beneath it.

use std::{
    collections::HashMap,
    ops::Deref,
    sync::Arc,
    thread,
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

use crate::{
    metrics::{Buckets, Counter, Gauge, Histogram, Timer},
    reporter::{Capabilities, NoopStatsReporter, StatsReporter, TagMap},
};

const DEFAULT_SEPARATOR: &str = ".";

/// A builder for constructing a root [`Scope`].
///
/// # Example
///
/// ```rust
/// # use std::time::Duration;
/// # use tally::ScopeBuilder;
/// let scope = ScopeBuilder::default()
///     .with_prefix("myapp")
///     .with_tags([("env", "prod")])
///     .with_reporting_interval(Duration::from_secs(1))
///     .build();
///
/// scope.counter("requests").inc();
/// ```
pub struct ScopeBuilder {
    prefix: String,
    separator: String,
    tags: TagMap,
    reporting_interval: Duration,
    reporter: Arc<dyn StatsReporter>,
}

impl Default for ScopeBuilder {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            separator: DEFAULT_SEPARATOR.to_owned(),
            tags: TagMap::new(),
            reporting_interval: Duration::ZERO,
            reporter: Arc::new(NoopStatsReporter::new()),
        }
    }
}

impl ScopeBuilder {
    /// Sets the name prefix of the root scope.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the separator joining scope prefixes to metric names.
    /// Defaults to `"."`.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Sets the tags attached to every metric under the root scope.
    pub fn with_tags<N, V>(mut self, tags: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.tags = tags.into_iter().map(|(name, value)| (name.into(), value.into())).collect();
        self
    }

    /// Sets the reporter metrics are delivered to. Defaults to a no-op sink.
    pub fn with_reporter(mut self, reporter: Arc<dyn StatsReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Sets the periodic reporting interval. The default of zero disables
    /// background reporting.
    pub fn with_reporting_interval(mut self, interval: Duration) -> Self {
        self.reporting_interval = interval;
        self
    }

    /// Builds the root scope and, for a non-zero interval, starts its
    /// reporting thread.
    pub fn build(self) -> RootScope {
        let scope = Scope::new(self.prefix, self.separator, self.tags, self.reporter);
        let lifecycle = Arc::new(Lifecycle { running: Mutex::new(false), cv: Condvar::new() });

        let handle = if self.reporting_interval > Duration::ZERO {
            *lifecycle.running.lock() = true;
            let thread_scope = scope.clone();
            let thread_lifecycle = lifecycle.clone();
            let interval = self.reporting_interval;
            let handle = thread::Builder::new()
                .name("scope-reporter".to_owned())
                .spawn(move || run_report_loop(thread_scope, thread_lifecycle, interval))
                .expect("failed to spawn scope reporting thread");
            Some(handle)
        } else {
            None
        };

        RootScope { scope, lifecycle, handle }
    }
}

struct Lifecycle {
    running: Mutex<bool>,
    cv: Condvar,
}

fn run_report_loop(scope: Scope, lifecycle: Arc<Lifecycle>, interval: Duration) {
    let mut running = lifecycle.running.lock();
    loop {
        let _ = lifecycle.cv.wait_for(&mut running, interval);

        scope.report();
        scope.core.reporter.flush();

        // Checked after reporting so a shutdown wakeup still flushes the
        // final interval's metrics.
        if !*running {
            return;
        }
    }
}

/// The owner of a scope tree and its reporting thread.
///
/// Built by [`ScopeBuilder::build`]; dereferences to [`Scope`] for all
/// metric operations. Dropping the root stops the reporting thread, joins
/// it, and performs one final report so no recorded values are lost.
pub struct RootScope {
    scope: Scope,
    lifecycle: Arc<Lifecycle>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Deref for RootScope {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        &self.scope
    }
}

impl Drop for RootScope {
    fn drop(&mut self) {
        {
            let mut running = self.lifecycle.running.lock();
            if !*running {
                return;
            }
            *running = false;
        }
        self.lifecycle.cv.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        // Emit anything recorded after the loop's last pass.
        self.scope.report();
    }
}

impl std::fmt::Debug for RootScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootScope").field("scope", &self.scope).finish()
    }
}

struct ScopeCore {
    prefix: String,
    separator: String,
    tags: TagMap,
    reporter: Arc<dyn StatsReporter>,

    // One mutex per registry to limit contention between user threads
    // touching different primitive kinds.
    children: Mutex<HashMap<String, Scope>>,
    counters: Mutex<HashMap<String, Counter>>,
    gauges: Mutex<HashMap<String, Gauge>>,
    timers: Mutex<HashMap<String, Timer>>,
    histograms: Mutex<HashMap<String, Histogram>>,
}

/// A named, tagged container of metric primitives.
///
/// Cheap to clone; all clones share the same registries. Primitives are
/// memoized by name: repeated calls with the same name return handles to
/// the same underlying state.
#[derive(Clone)]
pub struct Scope {
    core: Arc<ScopeCore>,
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("prefix", &self.core.prefix)
            .field("tags", &self.core.tags)
            .finish_non_exhaustive()
    }
}

impl Scope {
    fn new(prefix: String, separator: String, tags: TagMap, reporter: Arc<dyn StatsReporter>) -> Self {
        Self {
            core: Arc::new(ScopeCore {
                prefix,
                separator,
                tags,
                reporter,
                children: Mutex::new(HashMap::new()),
                counters: Mutex::new(HashMap::new()),
                gauges: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                histograms: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the counter registered under `name`, creating it on first use.
    pub fn counter(&self, name: &str) -> Counter {
        let mut counters = self.core.counters.lock();
        counters.entry(name.to_owned()).or_insert_with(Counter::new).clone()
    }

    /// Returns the gauge registered under `name`, creating it on first use.
    pub fn gauge(&self, name: &str) -> Gauge {
        let mut gauges = self.core.gauges.lock();
        gauges.entry(name.to_owned()).or_insert_with(Gauge::new).clone()
    }

    /// Returns the timer registered under `name`, creating it on first use.
    pub fn timer(&self, name: &str) -> Timer {
        let mut timers = self.core.timers.lock();
        timers
            .entry(name.to_owned())
            .or_insert_with(|| {
                // Timers report directly, so they carry the fully qualified
                // name from the start.
                Timer::new(
                    self.fully_qualified_name(name),
                    self.core.tags.clone(),
                    self.core.reporter.clone(),
                )
            })
            .clone()
    }

    /// Returns the histogram registered under `name`, creating it with
    /// `buckets` on first use. Later calls with the same name return the
    /// existing histogram and ignore the buckets argument.
    pub fn histogram(&self, name: &str, buckets: Buckets) -> Histogram {
        let mut histograms = self.core.histograms.lock();
        histograms.entry(name.to_owned()).or_insert_with(|| Histogram::new(&buckets)).clone()
    }

    /// Returns the child scope whose prefix extends this scope's by `name`.
    /// Identical names return the same child.
    pub fn sub_scope(&self, name: &str) -> Scope {
        self.child(self.fully_qualified_name(name), TagMap::new())
    }

    /// Returns the child scope carrying this scope's tags merged with
    /// `tags`, the argument winning on key collisions. Identical tag sets
    /// return the same child.
    pub fn tagged<N, V>(&self, tags: impl IntoIterator<Item = (N, V)>) -> Scope
    where
        N: Into<String>,
        V: Into<String>,
    {
        let tags = tags.into_iter().map(|(name, value)| (name.into(), value.into())).collect();
        self.child(self.core.prefix.clone(), tags)
    }

    /// Returns the configured reporter's capabilities.
    pub fn capabilities(&self) -> Capabilities {
        self.core.reporter.capabilities()
    }

    fn child(&self, prefix: String, tags: TagMap) -> Scope {
        let mut merged = self.core.tags.clone();
        merged.extend(tags);

        let id = scope_id(&prefix, &merged);
        let mut children = self.core.children.lock();
        children
            .entry(id)
            .or_insert_with(|| {
                Scope::new(
                    prefix,
                    self.core.separator.clone(),
                    merged,
                    self.core.reporter.clone(),
                )
            })
            .clone()
    }

    fn fully_qualified_name(&self, name: &str) -> String {
        if self.core.prefix.is_empty() {
            return name.to_owned();
        }
        format!("{}{}{}", self.core.prefix, self.core.separator, name)
    }

    /// Reports every counter, gauge, and histogram under this scope and its
    /// children, recursively.
    pub(crate) fn report(&self) {
        let reporter = self.core.reporter.as_ref();

        {
            let counters = self.core.counters.lock();
            for (name, counter) in counters.iter() {
                counter.report(&self.fully_qualified_name(name), &self.core.tags, reporter);
            }
        }

        {
            let gauges = self.core.gauges.lock();
            for (name, gauge) in gauges.iter() {
                gauge.report(&self.fully_qualified_name(name), &self.core.tags, reporter);
            }
        }

        {
            let histograms = self.core.histograms.lock();
            for (name, histogram) in histograms.iter() {
                histogram.report(&self.fully_qualified_name(name), &self.core.tags, reporter);
            }
        }

        {
            let children = self.core.children.lock();
            for child in children.values() {
                child.report();
            }
        }
    }
}

/// A unique ID for a scope: the prefix plus the sorted `k=v` tag pairs.
/// Distinct tag sets keep scopes with equal prefixes distinct.
fn scope_id(prefix: &str, tags: &TagMap) -> String {
    let mut id = String::with_capacity(prefix.len() + 1 + tags.len() * 20);
    id.push_str(prefix);
    id.push('+');
    for (index, (key, value)) in tags.iter().enumerate() {
        if index > 0 {
            id.push(',');
        }
        id.push_str(key);
        id.push('=');
        id.push_str(value);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::mock::MockStatsReporter;

    fn tags(pairs: &[(&str, &str)]) -> TagMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_scope_id() {
        assert_eq!(scope_id("foo", &TagMap::new()), "foo+");
        assert_eq!(scope_id("foo", &tags(&[("b", "2"), ("a", "1")])), "foo+a=1,b=2");
    }

    #[test]
    fn test_counter_memoization() {
        let scope = ScopeBuilder::default().build();

        let foo = scope.counter("foo");
        foo.inc();
        // Same name returns the same primitive.
        assert_eq!(scope.counter("foo").value(), 1);
        // A different name is a different primitive.
        assert_eq!(scope.counter("bar").value(), 0);
    }

    #[test]
    fn test_histogram_first_buckets_win() {
        let reporter = Arc::new(MockStatsReporter::new());
        let scope = ScopeBuilder::default().with_reporter(reporter.clone()).build();

        let buckets = Buckets::linear_values(0.0, 1.0, 10).unwrap();
        let other = Buckets::linear_values(0.0, 100.0, 2).unwrap();
        scope.histogram("h", buckets).record_value(2.5);
        scope.histogram("h", other).record_value(2.5);
        scope.report();

        // Ten-bucket layout from the first call applies to both records.
        let samples = reporter.histogram_value_samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].2, 3);
        assert_eq!(samples[0].3, 10);
        assert_eq!(samples[0].6, 2);
    }

    #[test]
    fn test_sub_scope_memoization() {
        let scope = ScopeBuilder::default().with_prefix("foo").build();

        let bar = scope.sub_scope("bar");
        bar.counter("c").inc();
        let again = scope.sub_scope("bar");
        assert_eq!(again.counter("c").value(), 1);

        assert_eq!(scope.core.children.lock().len(), 1);
    }

    #[test]
    fn test_tagged_merges_with_override() {
        let scope = ScopeBuilder::default()
            .with_prefix("foo")
            .with_tags([("a", "1"), ("b", "1")])
            .build();

        let child = scope.tagged([("b", "2"), ("c", "3")]);
        assert_eq!(child.core.tags, tags(&[("a", "1"), ("b", "2"), ("c", "3")]));
        assert_eq!(child.core.prefix, "foo");
    }

    #[test]
    fn test_distinct_tags_distinct_children() {
        let scope = ScopeBuilder::default().with_prefix("foo").build();

        scope.tagged([("a", "1")]).counter("c").inc();
        scope.tagged([("a", "2")]).counter("c").inc();

        assert_eq!(scope.core.children.lock().len(), 2);
    }

    #[test]
    fn test_fully_qualified_names_on_report() {
        let reporter = Arc::new(MockStatsReporter::new());
        let scope = ScopeBuilder::default()
            .with_prefix("foo")
            .with_tags([("a", "1")])
            .with_reporter(reporter.clone())
            .build();

        let child = scope.sub_scope("bar").tagged([("b", "2")]);
        child.counter("baz").inc();
        scope.report();

        let counters = reporter.counters();
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].0, "foo.bar.baz");
        assert_eq!(counters[0].1, tags(&[("a", "1"), ("b", "2")]));
        assert_eq!(counters[0].2, 1);
    }

    #[test]
    fn test_timer_reports_directly_with_qualified_name() {
        let reporter = Arc::new(MockStatsReporter::new());
        let scope =
            ScopeBuilder::default().with_prefix("foo").with_reporter(reporter.clone()).build();

        scope.timer("t").record(Duration::from_nanos(42));

        let timers = reporter.timers();
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].0, "foo.t");
        assert_eq!(timers[0].2, Duration::from_nanos(42));
    }

    #[test]
    fn test_capabilities_delegate() {
        let scope = ScopeBuilder::default().build();
        assert!(!scope.capabilities().reporting());
        assert!(!scope.capabilities().tagging());

        let scope =
            ScopeBuilder::default().with_reporter(Arc::new(MockStatsReporter::new())).build();
        assert!(scope.capabilities().reporting());
        assert!(scope.capabilities().tagging());
    }

    #[test]
    fn test_periodic_reporting() {
        let reporter = Arc::new(MockStatsReporter::new());
        let scope = ScopeBuilder::default()
            .with_prefix("foo")
            .with_tags([("a", "1")])
            .with_reporter(reporter.clone())
            .with_reporting_interval(Duration::from_millis(10))
            .build();

        scope.sub_scope("bar").tagged([("b", "2")]).counter("baz").inc();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while reporter.counters().is_empty() {
            assert!(std::time::Instant::now() < deadline, "report loop never fired");
            thread::sleep(Duration::from_millis(5));
        }

        let counters = reporter.counters();
        assert_eq!(counters[0].0, "foo.bar.baz");
        assert_eq!(counters[0].1, tags(&[("a", "1"), ("b", "2")]));
        assert_eq!(counters[0].2, 1);
        assert!(reporter.flushes() >= 1);
    }

    #[test]
    fn test_drop_performs_final_report() {
        let reporter = Arc::new(MockStatsReporter::new());
        let scope = ScopeBuilder::default()
            .with_reporter(reporter.clone())
            .with_reporting_interval(Duration::from_secs(3600))
            .build();

        scope.counter("c").inc_by(5);
        drop(scope);

        let counters = reporter.counters();
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].2, 5);
    }

    #[test]
    fn test_no_interval_no_thread() {
        let reporter = Arc::new(MockStatsReporter::new());
        let scope = ScopeBuilder::default().with_reporter(reporter.clone()).build();
        scope.counter("c").inc();
        drop(scope);

        // Without a reporting thread, drop does not report either.
        assert!(reporter.counters().is_empty());
    }
}
