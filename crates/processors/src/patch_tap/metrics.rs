// SPDX-License-Identifier: Apache-2.0

//! Metrics for the patch tap.

use phoenix_telemetry::instrument::Counter;
use phoenix_telemetry_macros::metric_set;

/// Metrics collected by the patch tap.
#[metric_set(name = "phoenix.patch_tap")]
#[derive(Debug, Default, Clone)]
pub struct PatchTapMetrics {
    /// Patches decoded and forwarded to governance.
    #[metric(unit = "{patch}")]
    pub patches_forwarded: Counter<u64>,

    /// Data points that failed to decode as patches.
    #[metric(unit = "{point}")]
    pub decode_failures: Counter<u64>,
}
