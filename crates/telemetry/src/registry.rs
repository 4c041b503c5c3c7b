// SPDX-License-Identifier: Apache-2.0

//! Process-wide registry of metric collectors.

use parking_lot::Mutex;
use phoenix_pdata::Metric;
use std::sync::Arc;

/// A collector drains one component's metric sets into pdata metrics.
///
/// Collectors run on the emitter's thread and must not block the data path;
/// implementations take their component's lock only briefly to snapshot.
pub type Collector = Box<dyn Fn(u64) -> Vec<Metric> + Send + Sync>;

/// Cloneable handle to the registry of metric collectors.
#[derive(Clone, Default)]
pub struct MetricsRegistryHandle {
    collectors: Arc<Mutex<Vec<Collector>>>,
}

impl MetricsRegistryHandle {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collector.
    pub fn register(&self, collector: Collector) {
        self.collectors.lock().push(collector);
    }

    /// Number of registered collectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collectors.lock().len()
    }

    /// True when no collectors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collectors.lock().is_empty()
    }

    /// Runs every collector, stamping samples with `time_unix_nano`.
    #[must_use]
    pub fn collect(&self, time_unix_nano: u64) -> Vec<Metric> {
        let collectors = self.collectors.lock();
        collectors
            .iter()
            .flat_map(|collector| collector(time_unix_nano))
            .collect()
    }
}
