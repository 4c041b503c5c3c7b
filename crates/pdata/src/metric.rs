// SPDX-License-Identifier: Apache-2.0

//! Metric, data-point and aggregation shapes.

use crate::attrs::KeyValue;
use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Aggregation temporality of a sum or histogram stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temporality {
    /// Each point covers the interval since the previous point.
    Delta,
    /// Each point covers the interval since stream start.
    Cumulative,
}

/// The numeric payload of a gauge or sum data point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberValue {
    /// 64-bit float sample.
    Double(f64),
    /// 64-bit integer sample.
    Int(i64),
}

impl NumberValue {
    /// Float view of the sample regardless of variant.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            NumberValue::Double(v) => *v,
            NumberValue::Int(v) => *v as f64,
        }
    }
}

/// A single gauge or sum sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberDataPoint {
    /// Data-point attributes.
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
    /// Sample timestamp, nanoseconds since the Unix epoch.
    pub time_unix_nano: u64,
    /// The sample value.
    pub value: NumberValue,
}

impl NumberDataPoint {
    /// Creates a float sample without attributes.
    #[must_use]
    pub fn double(time_unix_nano: u64, value: f64) -> Self {
        Self {
            attributes: Vec::new(),
            time_unix_nano,
            value: NumberValue::Double(value),
        }
    }

    /// Creates an integer sample without attributes.
    #[must_use]
    pub fn int(time_unix_nano: u64, value: i64) -> Self {
        Self {
            attributes: Vec::new(),
            time_unix_nano,
            value: NumberValue::Int(value),
        }
    }
}

/// A single histogram sample: explicit bounds plus per-bucket counts.
///
/// `bucket_counts` always has `explicit_bounds.len() + 1` entries; the last
/// bucket is the overflow bucket `(last_bound, +inf)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramDataPoint {
    /// Data-point attributes.
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
    /// Sample timestamp, nanoseconds since the Unix epoch.
    pub time_unix_nano: u64,
    /// Total number of recorded values.
    pub count: u64,
    /// Sum of recorded values.
    pub sum: f64,
    /// Per-bucket counts, one more entry than `explicit_bounds`.
    pub bucket_counts: Vec<u64>,
    /// Strictly increasing upper bucket bounds.
    pub explicit_bounds: Vec<f64>,
}

impl HistogramDataPoint {
    /// Creates an empty histogram point over the given bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NonMonotonicBounds`] when bounds are not strictly
    /// increasing.
    pub fn empty(time_unix_nano: u64, explicit_bounds: Vec<f64>) -> Result<Self, Error> {
        validate_bounds(&explicit_bounds)?;
        let buckets = explicit_bounds.len() + 1;
        Ok(Self {
            attributes: Vec::new(),
            time_unix_nano,
            count: 0,
            sum: 0.0,
            bucket_counts: vec![0; buckets],
            explicit_bounds,
        })
    }

    /// Records one value into the matching bucket.
    pub fn record(&mut self, value: f64) {
        let idx = self
            .explicit_bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.explicit_bounds.len());
        self.bucket_counts[idx] += 1;
        self.count += 1;
        self.sum += value;
    }

    /// Checks the bound/bucket invariants of this point.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] describing the first violated invariant.
    pub fn validate(&self) -> Result<(), Error> {
        validate_bounds(&self.explicit_bounds)?;
        if self.bucket_counts.len() != self.explicit_bounds.len() + 1 {
            return Err(Error::BucketCountMismatch {
                bounds: self.explicit_bounds.len(),
                buckets: self.bucket_counts.len(),
            });
        }
        Ok(())
    }
}

fn validate_bounds(bounds: &[f64]) -> Result<(), Error> {
    for (index, pair) in bounds.windows(2).enumerate() {
        if pair[1] <= pair[0] {
            return Err(Error::NonMonotonicBounds { index: index + 1 });
        }
    }
    Ok(())
}

/// Kind-specific metric payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricData {
    /// Instantaneous measurements.
    Gauge {
        /// The samples.
        data_points: Vec<NumberDataPoint>,
    },
    /// Summed measurements.
    Sum {
        /// The samples.
        data_points: Vec<NumberDataPoint>,
        /// Whether the sum only ever increases.
        is_monotonic: bool,
        /// Aggregation temporality of the stream.
        temporality: Temporality,
    },
    /// Bucketed distributions with explicit bounds.
    Histogram {
        /// The samples.
        data_points: Vec<HistogramDataPoint>,
        /// Aggregation temporality of the stream.
        temporality: Temporality,
    },
}

/// A named metric and its samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name.
    pub name: String,
    /// Human-readable description. May be empty.
    #[serde(default)]
    pub description: String,
    /// UCUM unit, e.g. `s`, `By`, `%`. May be empty.
    #[serde(default)]
    pub unit: String,
    /// Kind-specific payload.
    pub data: MetricData,
}

impl Metric {
    /// Creates a gauge metric.
    pub fn gauge(name: impl Into<String>, data_points: Vec<NumberDataPoint>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            data: MetricData::Gauge { data_points },
        }
    }

    /// Creates a monotonic cumulative sum metric.
    pub fn cumulative_sum(name: impl Into<String>, data_points: Vec<NumberDataPoint>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            data: MetricData::Sum {
                data_points,
                is_monotonic: true,
                temporality: Temporality::Cumulative,
            },
        }
    }

    /// Gauge and sum sample points of this metric, in order.
    #[must_use]
    pub fn number_points(&self) -> &[NumberDataPoint] {
        match &self.data {
            MetricData::Gauge { data_points } | MetricData::Sum { data_points, .. } => data_points,
            MetricData::Histogram { .. } => &[],
        }
    }

    /// The sample with the greatest timestamp, when any numeric sample exists.
    #[must_use]
    pub fn latest_number_point(&self) -> Option<&NumberDataPoint> {
        self.number_points()
            .iter()
            .max_by_key(|dp| dp.time_unix_nano)
    }

    /// Number of data points of any kind carried by this metric.
    #[must_use]
    pub fn points_len(&self) -> usize {
        match &self.data {
            MetricData::Gauge { data_points } | MetricData::Sum { data_points, .. } => {
                data_points.len()
            }
            MetricData::Histogram { data_points, .. } => data_points.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_records_into_expected_bucket() {
        let mut dp = HistogramDataPoint::empty(0, vec![10.0, 50.0, 100.0]).unwrap();
        dp.record(5.0);
        dp.record(50.0);
        dp.record(99.0);
        dp.record(1000.0);
        assert_eq!(dp.bucket_counts, vec![1, 1, 1, 1]);
        assert_eq!(dp.count, 4);
        assert!((dp.sum - 1154.0).abs() < f64::EPSILON);
    }

    #[test]
    fn histogram_rejects_unsorted_bounds() {
        assert!(HistogramDataPoint::empty(0, vec![10.0, 10.0]).is_err());
        assert!(HistogramDataPoint::empty(0, vec![10.0, 5.0]).is_err());
    }

    #[test]
    fn latest_point_wins_by_timestamp() {
        let metric = Metric::gauge(
            "m",
            vec![
                NumberDataPoint::double(30, 3.0),
                NumberDataPoint::double(10, 1.0),
                NumberDataPoint::double(20, 2.0),
            ],
        );
        let latest = metric.latest_number_point().unwrap();
        assert_eq!(latest.time_unix_nano, 30);
        assert!((latest.value.as_f64() - 3.0).abs() < f64::EPSILON);
    }
}
