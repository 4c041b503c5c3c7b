// SPDX-License-Identifier: Apache-2.0

//! Builders for synthetic batches used across the workspace's tests.

use crate::attrs::KeyValue;
use crate::batch::{MetricBatch, ResourceMetrics};
use crate::metric::{Metric, MetricData, NumberDataPoint, Temporality};

/// One process-shaped resource with a cumulative CPU counter.
#[must_use]
pub fn process_resource(name: &str, pid: i64, cpu_seconds: f64, ts: u64) -> ResourceMetrics {
    ResourceMetrics::new(
        vec![
            KeyValue::new("process.name", name),
            KeyValue::new("process.executable.name", name),
            KeyValue::new("process.pid", pid),
        ],
        vec![Metric {
            name: "process.cpu.time".to_owned(),
            description: String::new(),
            unit: "s".to_owned(),
            data: MetricData::Sum {
                data_points: vec![NumberDataPoint::double(ts, cpu_seconds)],
                is_monotonic: true,
                temporality: Temporality::Cumulative,
            },
        }],
    )
}

/// A resource named by `process.name` carrying one named counter sample.
#[must_use]
pub fn counter_resource(name: &str, counter: &str, value: f64, ts: u64) -> ResourceMetrics {
    ResourceMetrics::new(
        vec![KeyValue::new("process.name", name)],
        vec![Metric::cumulative_sum(
            counter,
            vec![NumberDataPoint::double(ts, value)],
        )],
    )
}

/// A batch of `n` counter resources named `proc-1..proc-n` with values `1..n`.
#[must_use]
pub fn counter_batch(counter: &str, n: usize, ts: u64) -> MetricBatch {
    let resources = (1..=n)
        .map(|i| counter_resource(&format!("proc-{i}"), counter, i as f64, ts))
        .collect();
    MetricBatch::new(resources)
}

/// A single-resource batch carrying one gauge sample, used as a KPI feed.
#[must_use]
pub fn kpi_batch(metric: &str, value: f64, ts: u64) -> MetricBatch {
    MetricBatch::new(vec![ResourceMetrics::new(
        vec![],
        vec![Metric::gauge(metric, vec![NumberDataPoint::double(ts, value)])],
    )])
}
