// SPDX-License-Identifier: Apache-2.0

//! Rendering of collected metric sets into pdata metrics.

use crate::descriptor::{Instrument, MetricValue, MetricsField};
use crate::metrics::{MetricSet, MetricSetHandler};
use phoenix_pdata::{Metric, MetricData, NumberDataPoint, NumberValue, Temporality};

/// Drains `set` into pdata metrics named `<set name>.<field name>`.
///
/// Counters render as delta sums (they drain on collection), gauges as
/// gauges. Zero-valued counters are skipped to keep batches small.
pub fn render_metric_set<M: MetricSetHandler>(
    set: &mut MetricSet<M>,
    time_unix_nano: u64,
) -> Vec<Metric> {
    let descriptor_name = set.descriptor().name;
    set.collect()
        .into_iter()
        .filter_map(|(field, value)| render_field(descriptor_name, field, value, time_unix_nano))
        .collect()
}

fn render_field(
    set_name: &str,
    field: &MetricsField,
    value: MetricValue,
    time_unix_nano: u64,
) -> Option<Metric> {
    let name = format!("{set_name}.{}", field.name);
    let point = NumberDataPoint {
        attributes: Vec::new(),
        time_unix_nano,
        value: match value {
            MetricValue::UInt(v) => NumberValue::Int(v as i64),
            MetricValue::Double(v) => NumberValue::Double(v),
        },
    };
    let data = match field.instrument {
        Instrument::Counter => {
            if matches!(value, MetricValue::UInt(0)) {
                return None;
            }
            MetricData::Sum {
                data_points: vec![point],
                is_monotonic: true,
                temporality: Temporality::Delta,
            }
        }
        Instrument::Gauge => MetricData::Gauge {
            data_points: vec![point],
        },
    };
    Some(Metric {
        name,
        description: field.brief.to_owned(),
        unit: field.unit.to_owned(),
        data,
    })
}
