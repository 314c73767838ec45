//! The M3 emission reporter.
//!
//! [`Reporter`] serializes reported metrics as M3 Thrift messages and ships
//! them over UDP to a collector. Reporting threads only build an envelope
//! and push it onto a bounded queue; a background emitter drains the queue,
//! packs metrics into batches sized against the effective packet budget
//! (80% of the configured packet size, the rest reserved for encoding
//! overhead), and sends one datagram per batch.
//!
//! Delivery is at most once: a full queue drops the newest metric and a
//! failed send drops its batch, both with an error log line.

pub mod udp;
pub mod wire;

mod calc;

use std::{
    collections::{BTreeSet, VecDeque},
    mem,
    sync::Arc,
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use thrift::protocol::{TCompactOutputProtocol, TSerializable};
use tracing::error;

use crate::{
    error::{Error, Result},
    reporter::{Capabilities, StatsReporter, TagMap},
};

use self::{
    calc::CalcTransport,
    udp::{UdpTransport, UdpTransportKind, UdpWriter},
    wire::{
        CountValue, GaugeValue, M3Client, Metric, MetricBatch, MetricTag, MetricValue, TimerValue,
    },
};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 9052;
const DEFAULT_MAX_QUEUE_SIZE: usize = 1024;
const DEFAULT_MAX_PACKET_SIZE: u16 = 1440;

const HISTOGRAM_BUCKET_NAME: &str = "bucket";
const HISTOGRAM_BUCKET_ID_NAME: &str = "bucketid";

const NANOS_PER_MICRO: u64 = 1_000;
const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_SEC: u64 = 1_000_000_000;
const NANOS_PER_MINUTE: u64 = 60 * NANOS_PER_SEC;
const NANOS_PER_HOUR: u64 = 60 * NANOS_PER_MINUTE;

/// A builder for constructing an M3 [`Reporter`].
///
/// # Example
///
/// ```rust,no_run
/// # use tally::m3::ReporterBuilder;
/// let reporter = ReporterBuilder::default()
///     .with_host("127.0.0.1")
///     .with_port(9052)
///     .with_common_tags([("service", "myapp")])
///     .build()
///     .unwrap();
/// ```
pub struct ReporterBuilder {
    host: String,
    port: u16,
    common_tags: TagMap,
    max_queue_size: usize,
    max_packet_size: u16,
}

impl Default for ReporterBuilder {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            common_tags: TagMap::new(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl ReporterBuilder {
    /// Sets the collector host. Defaults to `127.0.0.1`.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the collector UDP port. Defaults to `9052`.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the tags installed on every outgoing batch.
    pub fn with_common_tags<N, V>(mut self, tags: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.common_tags =
            tags.into_iter().map(|(name, value)| (name.into(), value.into())).collect();
        self
    }

    /// Sets the bound on the metric queue. Defaults to `1024`.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Sets the maximum UDP packet size in bytes. Defaults to `1440`.
    pub fn with_max_packet_size(mut self, size: u16) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Opens the transport and starts the emitter thread.
    pub fn build(self) -> Result<Reporter> {
        let transport = UdpTransport::open(
            &self.host,
            self.port,
            UdpTransportKind::Client,
            self.max_packet_size,
        )?;
        let client = M3Client::new(TCompactOutputProtocol::new(UdpWriter::new(transport.clone())));

        let inner = Arc::new(Inner {
            common_tags: convert_tags(&self.common_tags),
            max_queue_size: self.max_queue_size,
            // Reserve 20% of the packet size for encoding overhead.
            packet_budget: (self.max_packet_size as usize / 5) * 4,
            transport,
            queue: Mutex::new(QueueState { items: VecDeque::new(), shutdown: false }),
            queue_cv: Condvar::new(),
            emission: Mutex::new(Emission { batch_metrics: Vec::new(), client }),
        });

        let emitter_inner = inner.clone();
        let emitter = thread::Builder::new()
            .name("m3-emitter".to_owned())
            .spawn(move || run_emitter(emitter_inner))
            .map_err(|e| Error::unexpected("failed to spawn M3 emitter thread").set_source(e))?;

        Ok(Reporter { inner, emitter: Some(emitter) })
    }
}

/// A [`StatsReporter`] that batches metrics into M3 Thrift messages over
/// UDP.
///
/// Dropping the reporter shuts it down cooperatively: the emitter drains
/// the queue, flushes a final batch, and the transport completes the
/// in-flight send before the socket closes.
pub struct Reporter {
    inner: Arc<Inner>,
    emitter: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

impl Reporter {
    /// Creates a [`ReporterBuilder`] with default configuration.
    pub fn builder() -> ReporterBuilder {
        ReporterBuilder::default()
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        {
            let mut queue = self.inner.queue.lock();
            queue.shutdown = true;
        }
        self.inner.queue_cv.notify_one();
        if let Some(handle) = self.emitter.take() {
            let _ = handle.join();
        }
        self.inner.transport.close();
    }
}

struct QueueState {
    items: VecDeque<Metric>,
    shutdown: bool,
}

struct Emission {
    batch_metrics: Vec<Metric>,
    client: M3Client<TCompactOutputProtocol<UdpWriter>>,
}

struct Inner {
    common_tags: BTreeSet<MetricTag>,
    max_queue_size: usize,
    packet_budget: usize,
    transport: Arc<UdpTransport>,

    queue: Mutex<QueueState>,
    queue_cv: Condvar,
    emission: Mutex<Emission>,
}

impl Inner {
    fn report_metric(&self, name: &str, tags: BTreeSet<MetricTag>, value: MetricValue) {
        let metric = Metric {
            name: name.to_owned(),
            tags: Some(tags),
            metric_value: Some(value),
            timestamp: Some(timestamp_ns()),
        };
        self.enqueue(metric);
    }

    fn enqueue(&self, metric: Metric) {
        let mut queue = self.queue.lock();
        if queue.shutdown {
            error!("Dropping metric enqueued after the M3 reporter has shut down");
            return;
        }
        if queue.items.len() == self.max_queue_size {
            error!("Failed to enqueue metric because queue is full");
            return;
        }
        queue.items.push_back(metric);
        drop(queue);
        self.queue_cv.notify_one();
    }

    /// Accounts the metric against the packet budget and appends it to the
    /// in-flight batch, flushing the batch first when it would overflow.
    fn process(
        &self,
        metric: Metric,
        calc: &CalcTransport,
        probe: &mut TCompactOutputProtocol<CalcTransport>,
    ) {
        if let Err(e) = metric.write_to_out_protocol(probe) {
            error!("Encountered error sizing M3 metric: {e}");
        }
        if calc.size() > self.packet_budget {
            self.flush();
            calc.reset();
            // The new batch starts from the header's size, and the current
            // metric goes into it, so both are re-measured after the reset.
            let header = MetricBatch {
                common_tags: Some(self.common_tags.clone()),
                metrics: Some(Vec::new()),
            };
            if let Err(e) = header
                .write_to_out_protocol(probe)
                .and_then(|()| metric.write_to_out_protocol(probe))
            {
                error!("Encountered error sizing M3 metric batch: {e}");
            }
        }
        self.emission.lock().batch_metrics.push(metric);
    }

    fn flush(&self) {
        let mut emission = self.emission.lock();
        if emission.batch_metrics.is_empty() {
            return;
        }
        let batch = MetricBatch {
            common_tags: Some(self.common_tags.clone()),
            metrics: Some(mem::take(&mut emission.batch_metrics)),
        };
        if let Err(e) = emission.client.emit_metric_batch(batch) {
            error!("Encountered error emitting M3 metric batch: {e}");
        }
    }
}

fn run_emitter(inner: Arc<Inner>) {
    let calc = CalcTransport::default();
    let mut probe = TCompactOutputProtocol::new(calc.clone());

    let mut queue = inner.queue.lock();
    loop {
        while let Some(metric) = queue.items.pop_front() {
            // Release the queue so producers keep enqueueing while this
            // metric is packed (and possibly flushed over the transport).
            MutexGuard::unlocked(&mut queue, || inner.process(metric, &calc, &mut probe));
        }
        if queue.shutdown {
            drop(queue);
            inner.flush();
            return;
        }
        inner.queue_cv.wait(&mut queue);
    }
}

impl StatsReporter for Reporter {
    fn capabilities(&self) -> Capabilities {
        Capabilities::new(true, true)
    }

    fn flush(&self) {
        self.inner.flush();
    }

    fn report_counter(&self, name: &str, tags: &TagMap, value: i64) {
        let value = MetricValue {
            count: Some(CountValue { i64_value: Some(value) }),
            ..Default::default()
        };
        self.inner.report_metric(name, convert_tags(tags), value);
    }

    fn report_gauge(&self, name: &str, tags: &TagMap, value: f64) {
        let value = MetricValue {
            gauge: Some(GaugeValue { i64_value: None, d_value: Some(value.into()) }),
            ..Default::default()
        };
        self.inner.report_metric(name, convert_tags(tags), value);
    }

    fn report_timer(&self, name: &str, tags: &TagMap, value: Duration) {
        let value = MetricValue {
            timer: Some(TimerValue { i64_value: Some(value.as_nanos() as i64), d_value: None }),
            ..Default::default()
        };
        self.inner.report_metric(name, convert_tags(tags), value);
    }

    fn report_histogram_value_samples(
        &self,
        name: &str,
        tags: &TagMap,
        bucket_id: u64,
        _num_buckets: u64,
        lower_bound: f64,
        upper_bound: f64,
        samples: u64,
    ) {
        let mut metric_tags = convert_tags(tags);
        metric_tags.insert(MetricTag {
            tag_name: HISTOGRAM_BUCKET_NAME.to_owned(),
            tag_value: Some(format!(
                "{}-{}",
                value_bucket_string(lower_bound),
                value_bucket_string(upper_bound)
            )),
        });
        metric_tags.insert(MetricTag {
            tag_name: HISTOGRAM_BUCKET_ID_NAME.to_owned(),
            tag_value: Some(bucket_id_string(bucket_id)),
        });

        let value = MetricValue {
            count: Some(CountValue { i64_value: Some(samples as i64) }),
            ..Default::default()
        };
        self.inner.report_metric(name, metric_tags, value);
    }

    fn report_histogram_duration_samples(
        &self,
        name: &str,
        tags: &TagMap,
        bucket_id: u64,
        _num_buckets: u64,
        lower_bound_ns: i64,
        upper_bound_ns: i64,
        samples: u64,
    ) {
        let mut metric_tags = convert_tags(tags);
        metric_tags.insert(MetricTag {
            tag_name: HISTOGRAM_BUCKET_NAME.to_owned(),
            tag_value: Some(format!(
                "{}-{}",
                duration_bucket_string(lower_bound_ns),
                duration_bucket_string(upper_bound_ns)
            )),
        });
        metric_tags.insert(MetricTag {
            tag_name: HISTOGRAM_BUCKET_ID_NAME.to_owned(),
            tag_value: Some(bucket_id_string(bucket_id)),
        });

        let value = MetricValue {
            count: Some(CountValue { i64_value: Some(samples as i64) }),
            ..Default::default()
        };
        self.inner.report_metric(name, metric_tags, value);
    }
}

fn convert_tags(tags: &TagMap) -> BTreeSet<MetricTag> {
    tags.iter()
        .map(|(name, value)| MetricTag {
            tag_name: name.clone(),
            tag_value: Some(value.clone()),
        })
        .collect()
}

fn timestamp_ns() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as i64
}

/// Renders a value-bucket bound with six digit precision; the double
/// min/max sentinels render as the infinities.
fn value_bucket_string(bound: f64) -> String {
    if bound == f64::MAX {
        return "infinity".to_owned();
    }
    if bound == f64::MIN {
        return "-infinity".to_owned();
    }
    format!("{bound:.6}")
}

/// Renders a duration-bucket bound the way Go's `time.Duration` prints:
/// the largest unit whose leading digit is non-zero, e.g. `100µs` instead
/// of `0.1ms`.
fn duration_bucket_string(bound_ns: i64) -> String {
    if bound_ns == 0 {
        return "0".to_owned();
    }
    if bound_ns == i64::MAX {
        return "infinity".to_owned();
    }
    if bound_ns == i64::MIN {
        return "-infinity".to_owned();
    }

    let mut out = String::new();
    if bound_ns < 0 {
        out.push('-');
    }
    let nanos = bound_ns.unsigned_abs();

    if nanos < NANOS_PER_SEC {
        if nanos >= NANOS_PER_MILLI {
            out.push_str(&format_fraction(nanos, 6));
            out.push_str("ms");
        } else if nanos >= NANOS_PER_MICRO {
            out.push_str(&format_fraction(nanos, 3));
            out.push_str("µs");
        } else {
            out.push_str(&nanos.to_string());
            out.push_str("ns");
        }
    } else {
        let hours = nanos / NANOS_PER_HOUR;
        let minutes = (nanos % NANOS_PER_HOUR) / NANOS_PER_MINUTE;
        let rem = nanos % NANOS_PER_MINUTE;
        if hours > 0 {
            out.push_str(&hours.to_string());
            out.push('h');
        }
        if minutes > 0 {
            out.push_str(&minutes.to_string());
            out.push('m');
        }
        out.push_str(&format_fraction(rem, 9));
        out.push('s');
    }
    out
}

/// Formats `value / 10^precision` with trailing zeros (and a trailing
/// decimal point) trimmed.
fn format_fraction(value: u64, precision: u32) -> String {
    let divisor = 10u64.pow(precision) as f64;
    let mut s = format!("{:.6}", value as f64 / divisor);
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    s
}

/// Renders a bucket ID as decimal, zero-padded to at least four digits.
fn bucket_id_string(bucket_id: u64) -> String {
    let width = bucket_id.to_string().len().max(4);
    format!("{bucket_id:0width$}")
}
