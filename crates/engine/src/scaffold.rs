// SPDX-License-Identifier: Apache-2.0

//! Reusable processor scaffold.
//!
//! [`ProcessorCommon`] owns the pieces every processor shares: the stable
//! name, the reader/writer lock around the processor's whole mutable state
//! (parameters, runtime state and self-metrics together, so one writer lock
//! covers a patch application atomically), and the self-metric drain used by
//! the pipeline's emitter.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use phoenix_pdata::Metric;
use phoenix_telemetry::metrics::{MetricSet, MetricSetHandler};
use phoenix_telemetry::render::render_metric_set;
use std::sync::Arc;

/// Shared scaffold embedded by every processor.
///
/// `S` is the processor's full mutable state. Readers (`consume`) take the
/// read lock; the only writers are patch application and state mutation
/// inside a batch, which take the write lock.
#[derive(Debug)]
pub struct ProcessorCommon<S> {
    name: String,
    state: RwLock<S>,
}

impl<S> ProcessorCommon<S> {
    /// Creates a scaffold around the initial state.
    pub fn new(name: impl Into<String>, state: S) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(state),
        }
    }

    /// The processor's stable identifier.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes the read lock.
    pub fn read(&self) -> RwLockReadGuard<'_, S> {
        self.state.read()
    }

    /// Takes the write lock.
    pub fn write(&self) -> RwLockWriteGuard<'_, S> {
        self.state.write()
    }
}

/// Drains a processor-owned metric set into renderable metrics.
///
/// Collectors registered with the telemetry registry call this from the
/// emitter thread; the write lock is held only for the snapshot.
pub fn drain_metrics<S, M, F>(
    common: &Arc<ProcessorCommon<S>>,
    select: F,
    time_unix_nano: u64,
) -> Vec<Metric>
where
    M: MetricSetHandler,
    F: Fn(&mut S) -> &mut MetricSet<M>,
{
    let mut state = common.write();
    render_metric_set(select(&mut state), time_unix_nano)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_expose_state() {
        let common = ProcessorCommon::new("test", 1u32);
        assert_eq!(*common.read(), 1);
        *common.write() += 1;
        assert_eq!(*common.read(), 2);
        assert_eq!(common.name(), "test");
    }
}
