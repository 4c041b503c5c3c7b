// SPDX-License-Identifier: Apache-2.0

//! Batch-level containers and resource identity helpers.

use crate::attrs::{self, KeyValue};
use crate::metric::Metric;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The identity bundle describing the thing a metric is about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource attributes.
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

/// Metrics produced by one instrumentation scope of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeMetrics {
    /// Name of the producing scope. May be empty.
    #[serde(default)]
    pub scope_name: String,
    /// The metrics, in producer order.
    pub metrics: Vec<Metric>,
}

/// All metrics of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    /// The resource identity.
    pub resource: Resource,
    /// Per-scope metric groups.
    pub scope_metrics: Vec<ScopeMetrics>,
}

impl ResourceMetrics {
    /// Creates a resource group from attributes and a flat metric list.
    #[must_use]
    pub fn new(attributes: Vec<KeyValue>, metrics: Vec<Metric>) -> Self {
        Self {
            resource: Resource { attributes },
            scope_metrics: vec![ScopeMetrics {
                scope_name: String::new(),
                metrics,
            }],
        }
    }

    /// Looks up a resource attribute value as a string.
    #[must_use]
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        attrs::get_str(&self.resource.attributes, key)
    }

    /// Inserts or replaces a resource attribute.
    pub fn set_attr(&mut self, key: &str, value: impl Into<crate::AnyValue>) {
        attrs::upsert(&mut self.resource.attributes, key, value);
    }

    /// True when the resource carries `key = true`.
    #[must_use]
    pub fn has_flag(&self, key: &str) -> bool {
        attrs::get(&self.resource.attributes, key)
            .and_then(crate::AnyValue::as_bool)
            .unwrap_or(false)
    }

    /// Iterates all metrics across scopes.
    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.scope_metrics.iter().flat_map(|sm| sm.metrics.iter())
    }

    /// Iterates all metrics across scopes, mutably.
    pub fn metrics_mut(&mut self) -> impl Iterator<Item = &mut Metric> {
        self.scope_metrics
            .iter_mut()
            .flat_map(|sm| sm.metrics.iter_mut())
    }

    /// Finds a metric by name.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics().find(|m| m.name == name)
    }

    /// The latest sample of `metric_name`, keyed by `resource_field`.
    ///
    /// Later timestamps win when the metric carries several points. Returns
    /// `None` when the resource lacks the field or the metric.
    #[must_use]
    pub fn counter_sample(&self, resource_field: &str, metric_name: &str) -> Option<CounterSample> {
        let key = ResourceKey::from_resource(self, resource_field)?;
        let metric = self.metric(metric_name)?;
        let dp = metric.latest_number_point()?;
        Some(CounterSample {
            key,
            value: dp.value.as_f64(),
            time_unix_nano: dp.time_unix_nano,
        })
    }
}

/// Resource attribute flagging the pipeline's own telemetry resource.
pub const SELF_RESOURCE_ATTR: &str = "phoenix.self";

/// The pipeline's unit of work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    /// Per-resource metric groups.
    pub resource_metrics: Vec<ResourceMetrics>,
}

impl MetricBatch {
    /// Creates a batch from resource groups.
    #[must_use]
    pub fn new(resource_metrics: Vec<ResourceMetrics>) -> Self {
        Self { resource_metrics }
    }

    /// True when the batch carries no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resource_metrics.is_empty()
    }

    /// Total number of data points of any kind in the batch.
    #[must_use]
    pub fn points_len(&self) -> usize {
        self.resource_metrics
            .iter()
            .flat_map(ResourceMetrics::metrics)
            .map(Metric::points_len)
            .sum()
    }

    /// Latest sample of the named metric anywhere in the batch.
    ///
    /// Scans every resource; the greatest `time_unix_nano` wins.
    #[must_use]
    pub fn latest_value(&self, metric_name: &str) -> Option<(f64, u64)> {
        self.resource_metrics
            .iter()
            .filter_map(|rm| rm.metric(metric_name))
            .filter_map(Metric::latest_number_point)
            .max_by_key(|dp| dp.time_unix_nano)
            .map(|dp| (dp.value.as_f64(), dp.time_unix_nano))
    }

    /// Appends a metric under a dedicated self-telemetry resource.
    pub fn push_self_metric(&mut self, metric: Metric) {
        let target = self
            .resource_metrics
            .iter_mut()
            .position(|rm| rm.has_flag(SELF_RESOURCE_ATTR));
        match target {
            Some(idx) => match self.resource_metrics[idx].scope_metrics.first_mut() {
                Some(scope) => scope.metrics.push(metric),
                None => self.resource_metrics[idx].scope_metrics.push(ScopeMetrics {
                    scope_name: String::new(),
                    metrics: vec![metric],
                }),
            },
            None => {
                let mut rm = ResourceMetrics::new(vec![], vec![metric]);
                rm.set_attr(SELF_RESOURCE_ATTR, true);
                self.resource_metrics.push(rm);
            }
        }
    }
}

/// Identity tuple used by the streaming algorithms.
///
/// Derived from one configured resource attribute; resources with equal
/// values of that attribute collapse to a single key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey(pub String);

impl ResourceKey {
    /// Derives the key for a resource from the configured resource field.
    #[must_use]
    pub fn from_resource(rm: &ResourceMetrics, resource_field: &str) -> Option<Self> {
        rm.attr_str(resource_field).map(|v| Self(v.to_owned()))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// One observed counter value for a resource key.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterSample {
    /// The resource identity.
    pub key: ResourceKey,
    /// The counter value.
    pub value: f64,
    /// Sample timestamp, nanoseconds since the Unix epoch.
    pub time_unix_nano: u64,
}
