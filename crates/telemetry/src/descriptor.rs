// SPDX-License-Identifier: Apache-2.0

//! Static descriptions of metric sets.

/// The instrument kind of one field in a metric set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instrument {
    /// Monotonic counter, drained on collection (delta temporality).
    Counter,
    /// Last-value gauge.
    Gauge,
}

/// One collected value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Unsigned integer sample.
    UInt(u64),
    /// Float sample.
    Double(f64),
}

impl MetricValue {
    /// Float view of the sample.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::UInt(v) => *v as f64,
            MetricValue::Double(v) => *v,
        }
    }
}

/// Static description of one metric-set field.
#[derive(Debug, Clone, Copy)]
pub struct MetricsField {
    /// Field name, appended to the set name to form the metric name.
    pub name: &'static str,
    /// UCUM-ish unit annotation, e.g. `{patch}` or `%`.
    pub unit: &'static str,
    /// Short description taken from the field's doc comment.
    pub brief: &'static str,
    /// The instrument kind.
    pub instrument: Instrument,
}

/// Static description of a metric set.
#[derive(Debug, Clone, Copy)]
pub struct MetricsDescriptor {
    /// Metric-set name, used as the metric name prefix.
    pub name: &'static str,
    /// The fields, in declaration order.
    pub fields: &'static [MetricsField],
}
