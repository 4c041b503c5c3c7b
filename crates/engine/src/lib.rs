// SPDX-License-Identifier: Apache-2.0

//! The Phoenix pipeline engine.
//!
//! Processors implement [`processor::MetricsProcessor`]: a lifecycle, an
//! in-place batch transformation, and the updateable-configuration surface
//! that governance drives ([`processor::MetricsProcessor::apply_patch`] /
//! [`processor::MetricsProcessor::config_status`]). The [`pipeline::Pipeline`]
//! pulls batches through the processors in order; patches applied between
//! batches take effect on the next batch because every processor guards its
//! parameters with its own reader/writer lock.

pub mod error;
pub mod pipeline;
pub mod processor;
pub mod scaffold;
pub mod time;

pub use error::{EngineError, ProcessorErrorKind};
pub use pipeline::{FaultListener, Pipeline, PipelineBuilder};
pub use processor::{BatchContext, ConfigStatus, MetricsProcessor, PatchError, PatchOutcome};
pub use scaffold::ProcessorCommon;
