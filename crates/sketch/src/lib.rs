// SPDX-License-Identifier: Apache-2.0

//! Streaming sketches used by the adaptive processors.
//!
//! Two bounded-memory summaries back the pipeline's shape-changing stages:
//!
//! 1. [`SpaceSaving`]: deterministic heavy hitters over weighted keys, used
//!    by the adaptive top-k processor. Any reported count overestimates the
//!    true count by at most `total_weight / k`.
//! 2. [`HyperLogLog`]: probabilistic distinct counting, used by the
//!    timeseries estimator once exact tracking outgrows its budget.
//!
//! Neither structure locks internally; owners serialize access (the pipeline
//! mutates sketches under the owning processor's writer lock).

pub mod error;
pub mod hll;
pub mod space_saving;

pub use error::Error;
pub use hll::HyperLogLog;
pub use space_saving::{SpaceSaving, TopEntry};
