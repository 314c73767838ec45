//! Data carriers for the M3 Thrift wire schema.
//!
//! The structs here mirror the M3 collector IDL (`MetricTag`, the value
//! unions, `Metric`, `MetricBatch`, and the one-way `emitMetricBatch`
//! service call) in the shape the Thrift code generator emits: plain
//! structs with `Option` for non-required fields, `BTreeSet` for `set<>`,
//! and [`thrift::OrderedFloat`] for `double` so the containers stay
//! orderable. Serialization goes through whatever [`TOutputProtocol`] the
//! caller supplies; the reporter uses the compact protocol.

use std::collections::BTreeSet;

use thrift::{
    protocol::{
        field_id, verify_required_field_exists, TFieldIdentifier, TInputProtocol,
        TListIdentifier, TMessageIdentifier, TMessageType, TOutputProtocol, TSerializable,
        TSetIdentifier, TStructIdentifier, TType,
    },
    OrderedFloat, ProtocolError, ProtocolErrorKind,
};

/// A single `name=value` tag on a metric.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MetricTag {
    /// The tag name.
    pub tag_name: String,
    /// The tag value.
    pub tag_value: Option<String>,
}

impl TSerializable for MetricTag {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<MetricTag> {
        i_prot.read_struct_begin()?;
        let mut f_1: Option<String> = None;
        let mut f_2: Option<String> = None;
        loop {
            let field_ident = i_prot.read_field_begin()?;
            if field_ident.field_type == TType::Stop {
                break;
            }
            let field_id = field_id(&field_ident)?;
            match field_id {
                1 => {
                    let val = i_prot.read_string()?;
                    f_1 = Some(val);
                }
                2 => {
                    let val = i_prot.read_string()?;
                    f_2 = Some(val);
                }
                _ => {
                    i_prot.skip(field_ident.field_type)?;
                }
            }
            i_prot.read_field_end()?;
        }
        i_prot.read_struct_end()?;
        verify_required_field_exists("MetricTag.tag_name", &f_1)?;
        Ok(MetricTag { tag_name: f_1.expect("required field was checked above"), tag_value: f_2 })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        let struct_ident = TStructIdentifier::new("MetricTag");
        o_prot.write_struct_begin(&struct_ident)?;
        o_prot.write_field_begin(&TFieldIdentifier::new("tagName", TType::String, 1))?;
        o_prot.write_string(&self.tag_name)?;
        o_prot.write_field_end()?;
        if let Some(ref fld_var) = self.tag_value {
            o_prot.write_field_begin(&TFieldIdentifier::new("tagValue", TType::String, 2))?;
            o_prot.write_string(fld_var)?;
            o_prot.write_field_end()?;
        }
        o_prot.write_field_stop()?;
        o_prot.write_struct_end()
    }
}

/// The payload of a counter metric.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CountValue {
    /// The counter delta.
    pub i64_value: Option<i64>,
}

impl TSerializable for CountValue {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<CountValue> {
        i_prot.read_struct_begin()?;
        let mut f_1: Option<i64> = None;
        loop {
            let field_ident = i_prot.read_field_begin()?;
            if field_ident.field_type == TType::Stop {
                break;
            }
            let field_id = field_id(&field_ident)?;
            match field_id {
                1 => {
                    let val = i_prot.read_i64()?;
                    f_1 = Some(val);
                }
                _ => {
                    i_prot.skip(field_ident.field_type)?;
                }
            }
            i_prot.read_field_end()?;
        }
        i_prot.read_struct_end()?;
        Ok(CountValue { i64_value: f_1 })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        let struct_ident = TStructIdentifier::new("CountValue");
        o_prot.write_struct_begin(&struct_ident)?;
        if let Some(fld_var) = self.i64_value {
            o_prot.write_field_begin(&TFieldIdentifier::new("i64Value", TType::I64, 1))?;
            o_prot.write_i64(fld_var)?;
            o_prot.write_field_end()?;
        }
        o_prot.write_field_stop()?;
        o_prot.write_struct_end()
    }
}

/// The payload of a gauge metric.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GaugeValue {
    /// An integral gauge reading.
    pub i64_value: Option<i64>,
    /// A floating point gauge reading.
    pub d_value: Option<OrderedFloat<f64>>,
}

impl TSerializable for GaugeValue {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<GaugeValue> {
        i_prot.read_struct_begin()?;
        let mut f_1: Option<i64> = None;
        let mut f_2: Option<OrderedFloat<f64>> = None;
        loop {
            let field_ident = i_prot.read_field_begin()?;
            if field_ident.field_type == TType::Stop {
                break;
            }
            let field_id = field_id(&field_ident)?;
            match field_id {
                1 => {
                    let val = i_prot.read_i64()?;
                    f_1 = Some(val);
                }
                2 => {
                    let val = OrderedFloat::from(i_prot.read_double()?);
                    f_2 = Some(val);
                }
                _ => {
                    i_prot.skip(field_ident.field_type)?;
                }
            }
            i_prot.read_field_end()?;
        }
        i_prot.read_struct_end()?;
        Ok(GaugeValue { i64_value: f_1, d_value: f_2 })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        let struct_ident = TStructIdentifier::new("GaugeValue");
        o_prot.write_struct_begin(&struct_ident)?;
        if let Some(fld_var) = self.i64_value {
            o_prot.write_field_begin(&TFieldIdentifier::new("i64Value", TType::I64, 1))?;
            o_prot.write_i64(fld_var)?;
            o_prot.write_field_end()?;
        }
        if let Some(fld_var) = self.d_value {
            o_prot.write_field_begin(&TFieldIdentifier::new("dValue", TType::Double, 2))?;
            o_prot.write_double(fld_var.into())?;
            o_prot.write_field_end()?;
        }
        o_prot.write_field_stop()?;
        o_prot.write_struct_end()
    }
}

/// The payload of a timer metric.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TimerValue {
    /// A duration in nanoseconds.
    pub i64_value: Option<i64>,
    /// A duration as a floating point value.
    pub d_value: Option<OrderedFloat<f64>>,
}

impl TSerializable for TimerValue {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<TimerValue> {
        i_prot.read_struct_begin()?;
        let mut f_1: Option<i64> = None;
        let mut f_2: Option<OrderedFloat<f64>> = None;
        loop {
            let field_ident = i_prot.read_field_begin()?;
            if field_ident.field_type == TType::Stop {
                break;
            }
            let field_id = field_id(&field_ident)?;
            match field_id {
                1 => {
                    let val = i_prot.read_i64()?;
                    f_1 = Some(val);
                }
                2 => {
                    let val = OrderedFloat::from(i_prot.read_double()?);
                    f_2 = Some(val);
                }
                _ => {
                    i_prot.skip(field_ident.field_type)?;
                }
            }
            i_prot.read_field_end()?;
        }
        i_prot.read_struct_end()?;
        Ok(TimerValue { i64_value: f_1, d_value: f_2 })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        let struct_ident = TStructIdentifier::new("TimerValue");
        o_prot.write_struct_begin(&struct_ident)?;
        if let Some(fld_var) = self.i64_value {
            o_prot.write_field_begin(&TFieldIdentifier::new("i64Value", TType::I64, 1))?;
            o_prot.write_i64(fld_var)?;
            o_prot.write_field_end()?;
        }
        if let Some(fld_var) = self.d_value {
            o_prot.write_field_begin(&TFieldIdentifier::new("dValue", TType::Double, 2))?;
            o_prot.write_double(fld_var.into())?;
            o_prot.write_field_end()?;
        }
        o_prot.write_field_stop()?;
        o_prot.write_struct_end()
    }
}

/// A union-like holder carrying exactly one of the metric payloads.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MetricValue {
    /// Set when the metric is a counter.
    pub count: Option<CountValue>,
    /// Set when the metric is a gauge.
    pub gauge: Option<GaugeValue>,
    /// Set when the metric is a timer.
    pub timer: Option<TimerValue>,
}

impl TSerializable for MetricValue {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<MetricValue> {
        i_prot.read_struct_begin()?;
        let mut f_1: Option<CountValue> = None;
        let mut f_2: Option<GaugeValue> = None;
        let mut f_3: Option<TimerValue> = None;
        loop {
            let field_ident = i_prot.read_field_begin()?;
            if field_ident.field_type == TType::Stop {
                break;
            }
            let field_id = field_id(&field_ident)?;
            match field_id {
                1 => {
                    let val = CountValue::read_from_in_protocol(i_prot)?;
                    f_1 = Some(val);
                }
                2 => {
                    let val = GaugeValue::read_from_in_protocol(i_prot)?;
                    f_2 = Some(val);
                }
                3 => {
                    let val = TimerValue::read_from_in_protocol(i_prot)?;
                    f_3 = Some(val);
                }
                _ => {
                    i_prot.skip(field_ident.field_type)?;
                }
            }
            i_prot.read_field_end()?;
        }
        i_prot.read_struct_end()?;
        Ok(MetricValue { count: f_1, gauge: f_2, timer: f_3 })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        let struct_ident = TStructIdentifier::new("MetricValue");
        o_prot.write_struct_begin(&struct_ident)?;
        if let Some(ref fld_var) = self.count {
            o_prot.write_field_begin(&TFieldIdentifier::new("count", TType::Struct, 1))?;
            fld_var.write_to_out_protocol(o_prot)?;
            o_prot.write_field_end()?;
        }
        if let Some(ref fld_var) = self.gauge {
            o_prot.write_field_begin(&TFieldIdentifier::new("gauge", TType::Struct, 2))?;
            fld_var.write_to_out_protocol(o_prot)?;
            o_prot.write_field_end()?;
        }
        if let Some(ref fld_var) = self.timer {
            o_prot.write_field_begin(&TFieldIdentifier::new("timer", TType::Struct, 3))?;
            fld_var.write_to_out_protocol(o_prot)?;
            o_prot.write_field_end()?;
        }
        o_prot.write_field_stop()?;
        o_prot.write_struct_end()
    }
}

/// One named, tagged, timestamped metric value.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Metric {
    /// The fully qualified metric name.
    pub name: String,
    /// The tags attached to this metric, ordered by name.
    pub tags: Option<BTreeSet<MetricTag>>,
    /// The value payload.
    pub metric_value: Option<MetricValue>,
    /// Wall-clock capture time, in nanoseconds since the epoch.
    pub timestamp: Option<i64>,
}

impl TSerializable for Metric {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<Metric> {
        i_prot.read_struct_begin()?;
        let mut f_1: Option<String> = None;
        let mut f_2: Option<BTreeSet<MetricTag>> = None;
        let mut f_3: Option<MetricValue> = None;
        let mut f_4: Option<i64> = None;
        loop {
            let field_ident = i_prot.read_field_begin()?;
            if field_ident.field_type == TType::Stop {
                break;
            }
            let field_id = field_id(&field_ident)?;
            match field_id {
                1 => {
                    let val = i_prot.read_string()?;
                    f_1 = Some(val);
                }
                2 => {
                    let set_ident = i_prot.read_set_begin()?;
                    let mut val: BTreeSet<MetricTag> = BTreeSet::new();
                    for _ in 0..set_ident.size {
                        let set_elem = MetricTag::read_from_in_protocol(i_prot)?;
                        val.insert(set_elem);
                    }
                    i_prot.read_set_end()?;
                    f_2 = Some(val);
                }
                3 => {
                    let val = MetricValue::read_from_in_protocol(i_prot)?;
                    f_3 = Some(val);
                }
                4 => {
                    let val = i_prot.read_i64()?;
                    f_4 = Some(val);
                }
                _ => {
                    i_prot.skip(field_ident.field_type)?;
                }
            }
            i_prot.read_field_end()?;
        }
        i_prot.read_struct_end()?;
        verify_required_field_exists("Metric.name", &f_1)?;
        Ok(Metric {
            name: f_1.expect("required field was checked above"),
            tags: f_2,
            metric_value: f_3,
            timestamp: f_4,
        })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        let struct_ident = TStructIdentifier::new("Metric");
        o_prot.write_struct_begin(&struct_ident)?;
        o_prot.write_field_begin(&TFieldIdentifier::new("name", TType::String, 1))?;
        o_prot.write_string(&self.name)?;
        o_prot.write_field_end()?;
        if let Some(ref fld_var) = self.tags {
            o_prot.write_field_begin(&TFieldIdentifier::new("tags", TType::Set, 2))?;
            o_prot.write_set_begin(&TSetIdentifier::new(TType::Struct, fld_var.len() as i32))?;
            for e in fld_var {
                e.write_to_out_protocol(o_prot)?;
            }
            o_prot.write_set_end()?;
            o_prot.write_field_end()?;
        }
        if let Some(ref fld_var) = self.metric_value {
            o_prot.write_field_begin(&TFieldIdentifier::new("metricValue", TType::Struct, 3))?;
            fld_var.write_to_out_protocol(o_prot)?;
            o_prot.write_field_end()?;
        }
        if let Some(fld_var) = self.timestamp {
            o_prot.write_field_begin(&TFieldIdentifier::new("timestamp", TType::I64, 4))?;
            o_prot.write_i64(fld_var)?;
            o_prot.write_field_end()?;
        }
        o_prot.write_field_stop()?;
        o_prot.write_struct_end()
    }
}

/// A group of metrics sharing common tags, shipped as one datagram.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MetricBatch {
    /// Tags attached to every metric in the batch.
    pub common_tags: Option<BTreeSet<MetricTag>>,
    /// The metrics, in enqueue order.
    pub metrics: Option<Vec<Metric>>,
}

impl TSerializable for MetricBatch {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<MetricBatch> {
        i_prot.read_struct_begin()?;
        let mut f_1: Option<BTreeSet<MetricTag>> = None;
        let mut f_2: Option<Vec<Metric>> = None;
        loop {
            let field_ident = i_prot.read_field_begin()?;
            if field_ident.field_type == TType::Stop {
                break;
            }
            let field_id = field_id(&field_ident)?;
            match field_id {
                1 => {
                    let set_ident = i_prot.read_set_begin()?;
                    let mut val: BTreeSet<MetricTag> = BTreeSet::new();
                    for _ in 0..set_ident.size {
                        let set_elem = MetricTag::read_from_in_protocol(i_prot)?;
                        val.insert(set_elem);
                    }
                    i_prot.read_set_end()?;
                    f_1 = Some(val);
                }
                2 => {
                    let list_ident = i_prot.read_list_begin()?;
                    let mut val: Vec<Metric> = Vec::with_capacity(list_ident.size as usize);
                    for _ in 0..list_ident.size {
                        let list_elem = Metric::read_from_in_protocol(i_prot)?;
                        val.push(list_elem);
                    }
                    i_prot.read_list_end()?;
                    f_2 = Some(val);
                }
                _ => {
                    i_prot.skip(field_ident.field_type)?;
                }
            }
            i_prot.read_field_end()?;
        }
        i_prot.read_struct_end()?;
        Ok(MetricBatch { common_tags: f_1, metrics: f_2 })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        let struct_ident = TStructIdentifier::new("MetricBatch");
        o_prot.write_struct_begin(&struct_ident)?;
        if let Some(ref fld_var) = self.common_tags {
            o_prot.write_field_begin(&TFieldIdentifier::new("commonTags", TType::Set, 1))?;
            o_prot.write_set_begin(&TSetIdentifier::new(TType::Struct, fld_var.len() as i32))?;
            for e in fld_var {
                e.write_to_out_protocol(o_prot)?;
            }
            o_prot.write_set_end()?;
            o_prot.write_field_end()?;
        }
        if let Some(ref fld_var) = self.metrics {
            o_prot.write_field_begin(&TFieldIdentifier::new("metrics", TType::List, 2))?;
            o_prot.write_list_begin(&TListIdentifier::new(TType::Struct, fld_var.len() as i32))?;
            for e in fld_var {
                e.write_to_out_protocol(o_prot)?;
            }
            o_prot.write_list_end()?;
            o_prot.write_field_end()?;
        }
        o_prot.write_field_stop()?;
        o_prot.write_struct_end()
    }
}

const EMIT_METRIC_BATCH: &str = "emitMetricBatch";

struct M3EmitMetricBatchArgs {
    batch: MetricBatch,
}

impl M3EmitMetricBatchArgs {
    fn read_from_in_protocol(i_prot: &mut dyn TInputProtocol) -> thrift::Result<Self> {
        i_prot.read_struct_begin()?;
        let mut f_1: Option<MetricBatch> = None;
        loop {
            let field_ident = i_prot.read_field_begin()?;
            if field_ident.field_type == TType::Stop {
                break;
            }
            let field_id = field_id(&field_ident)?;
            match field_id {
                1 => {
                    let val = MetricBatch::read_from_in_protocol(i_prot)?;
                    f_1 = Some(val);
                }
                _ => {
                    i_prot.skip(field_ident.field_type)?;
                }
            }
            i_prot.read_field_end()?;
        }
        i_prot.read_struct_end()?;
        verify_required_field_exists("M3EmitMetricBatchArgs.batch", &f_1)?;
        Ok(M3EmitMetricBatchArgs { batch: f_1.expect("required field was checked above") })
    }

    fn write_to_out_protocol(&self, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
        let struct_ident = TStructIdentifier::new("M3_emitMetricBatch_args");
        o_prot.write_struct_begin(&struct_ident)?;
        o_prot.write_field_begin(&TFieldIdentifier::new("batch", TType::Struct, 1))?;
        self.batch.write_to_out_protocol(o_prot)?;
        o_prot.write_field_end()?;
        o_prot.write_field_stop()?;
        o_prot.write_struct_end()
    }
}

/// A one-way client for the M3 `emitMetricBatch` service call.
///
/// Each call frames the batch as a one-way service message and flushes the
/// underlying transport, which sends exactly one datagram.
pub struct M3Client<OP: TOutputProtocol> {
    o_prot: OP,
    sequence_number: i32,
}

impl<OP: TOutputProtocol> M3Client<OP> {
    /// Creates a client writing through the given output protocol.
    pub fn new(o_prot: OP) -> Self {
        Self { o_prot, sequence_number: 0 }
    }

    /// Emits one metric batch.
    pub fn emit_metric_batch(&mut self, batch: MetricBatch) -> thrift::Result<()> {
        self.sequence_number += 1;
        let message_ident =
            TMessageIdentifier::new(EMIT_METRIC_BATCH, TMessageType::OneWay, self.sequence_number);
        self.o_prot.write_message_begin(&message_ident)?;
        let call_args = M3EmitMetricBatchArgs { batch };
        call_args.write_to_out_protocol(&mut self.o_prot)?;
        self.o_prot.write_message_end()?;
        self.o_prot.flush()
    }
}

/// Reads one `emitMetricBatch` service message and returns its batch.
///
/// This is the receiving half of [`M3Client`], used by collectors.
pub fn read_emit_metric_batch(i_prot: &mut dyn TInputProtocol) -> thrift::Result<MetricBatch> {
    let message_ident = i_prot.read_message_begin()?;
    if message_ident.name != EMIT_METRIC_BATCH {
        return Err(thrift::Error::Protocol(ProtocolError::new(
            ProtocolErrorKind::InvalidData,
            format!("unexpected service call {}", message_ident.name),
        )));
    }
    let args = M3EmitMetricBatchArgs::read_from_in_protocol(i_prot)?;
    i_prot.read_message_end()?;
    Ok(args.batch)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use thrift::protocol::{TCompactInputProtocol, TCompactOutputProtocol};

    use super::*;

    fn sample_metric() -> Metric {
        Metric {
            name: "foo".to_owned(),
            tags: Some(BTreeSet::from([
                MetricTag { tag_name: "a".to_owned(), tag_value: Some("1".to_owned()) },
                MetricTag { tag_name: "b".to_owned(), tag_value: Some("2".to_owned()) },
            ])),
            metric_value: Some(MetricValue {
                count: Some(CountValue { i64_value: Some(7) }),
                gauge: None,
                timer: None,
            }),
            timestamp: Some(1_700_000_000_000_000_000),
        }
    }

    #[test]
    fn test_metric_round_trip() {
        let metric = sample_metric();

        let mut buf: Vec<u8> = Vec::new();
        {
            let mut o_prot = TCompactOutputProtocol::new(&mut buf);
            metric.write_to_out_protocol(&mut o_prot).unwrap();
        }

        let mut i_prot = TCompactInputProtocol::new(Cursor::new(buf));
        let decoded = Metric::read_from_in_protocol(&mut i_prot).unwrap();
        assert_eq!(decoded, metric);
    }

    #[test]
    fn test_gauge_value_round_trip() {
        let metric = Metric {
            name: "g".to_owned(),
            tags: None,
            metric_value: Some(MetricValue {
                count: None,
                gauge: Some(GaugeValue { i64_value: None, d_value: Some(OrderedFloat::from(2.5)) }),
                timer: None,
            }),
            timestamp: None,
        };

        let mut buf: Vec<u8> = Vec::new();
        {
            let mut o_prot = TCompactOutputProtocol::new(&mut buf);
            metric.write_to_out_protocol(&mut o_prot).unwrap();
        }

        let mut i_prot = TCompactInputProtocol::new(Cursor::new(buf));
        let decoded = Metric::read_from_in_protocol(&mut i_prot).unwrap();
        assert_eq!(decoded.metric_value.unwrap().gauge.unwrap().d_value.unwrap(), OrderedFloat::from(2.5));
    }

    #[test]
    fn test_emit_metric_batch_round_trip() {
        let batch = MetricBatch {
            common_tags: Some(BTreeSet::from([MetricTag {
                tag_name: "env".to_owned(),
                tag_value: Some("test".to_owned()),
            }])),
            metrics: Some(vec![sample_metric(), sample_metric()]),
        };

        let mut buf: Vec<u8> = Vec::new();
        {
            let o_prot = TCompactOutputProtocol::new(&mut buf);
            let mut client = M3Client::new(o_prot);
            client.emit_metric_batch(batch.clone()).unwrap();
        }

        let mut i_prot = TCompactInputProtocol::new(Cursor::new(buf));
        let decoded = read_emit_metric_batch(&mut i_prot).unwrap();
        assert_eq!(decoded, batch);
    }
}
