// SPDX-License-Identifier: Apache-2.0

//! Metric-set plumbing shared by all annotated structs.

use crate::descriptor::{MetricValue, MetricsDescriptor};
use std::ops::{Deref, DerefMut};

/// Implemented (via `#[metric_set]`) by every metric-set struct.
pub trait MetricSetHandler {
    /// The static descriptor of this set.
    fn descriptor(&self) -> &'static MetricsDescriptor;

    /// Current values, in descriptor field order.
    fn snapshot_values(&self) -> Vec<MetricValue>;

    /// Resets drainable instruments after collection.
    fn clear_values(&mut self);
}

/// A registered metric set.
///
/// Thin wrapper so call sites read like the instrument API
/// (`metrics.batches_dropped.inc()`) while collection goes through the
/// handler trait.
#[derive(Debug, Default, Clone)]
pub struct MetricSet<M> {
    inner: M,
}

impl<M: MetricSetHandler + Default> MetricSet<M> {
    /// Creates a zeroed metric set.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: M::default() }
    }
}

impl<M: MetricSetHandler> MetricSet<M> {
    /// Drains the current values, pairing them with descriptor fields.
    pub fn collect(&mut self) -> Vec<(&'static crate::descriptor::MetricsField, MetricValue)> {
        let values = self.inner.snapshot_values();
        self.inner.clear_values();
        self.inner.descriptor().fields.iter().zip(values).collect()
    }

    /// The set's static descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &'static MetricsDescriptor {
        self.inner.descriptor()
    }
}

impl<M> Deref for MetricSet<M> {
    type Target = M;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<M> DerefMut for MetricSet<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
