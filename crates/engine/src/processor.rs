// SPDX-License-Identifier: Apache-2.0

//! The processor contract.
//!
//! A processor is a pipeline node that transforms, filters or otherwise
//! reshapes metric batches in place. Beyond the data path, every processor
//! exposes an updateable-configuration surface: governance applies
//! [`phoenix_control::ConfigPatch`]es through [`MetricsProcessor::apply_patch`]
//! and reads back the live parameters through
//! [`MetricsProcessor::config_status`].
//!
//! # Concurrency
//!
//! `consume` runs on the pipeline's worker; `apply_patch` runs on the
//! governance scheduler. Implementations guard their parameters with a
//! reader/writer lock so that a patch applied concurrently with a batch
//! never affects that batch's output.

use crate::error::EngineError;
use phoenix_control::{ConfigPatch, PatchValue};
use phoenix_pdata::MetricBatch;
use std::collections::BTreeMap;
use std::time::SystemTime;
use thiserror::Error;

/// Per-batch context handed to every processor.
#[derive(Debug, Clone)]
pub struct BatchContext {
    /// When the pipeline accepted the batch.
    pub received_at: SystemTime,
    /// Batch timestamp used for emitted samples, nanoseconds since epoch.
    pub time_unix_nano: u64,
}

impl BatchContext {
    /// Context stamped with the current wall clock.
    #[must_use]
    pub fn now() -> Self {
        Self {
            received_at: SystemTime::now(),
            time_unix_nano: crate::time::now_unix_nano(),
        }
    }
}

/// Live parameters of an updateable processor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigStatus {
    /// Parameter path to current value.
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Whether the processor participates in the pipeline.
    pub enabled: bool,
}

/// Result of a successful patch application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The parameter now holds the patched value.
    Applied,
    /// The parameter already held the patched value; nothing changed.
    Duplicate,
}

/// Rejection categories returned by [`MetricsProcessor::apply_patch`].
///
/// Governance maps these onto its `rejected-type` outcome class.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchError {
    /// The parameter path is not part of this processor's surface.
    #[error("unknown parameter `{path}`")]
    UnknownParameter {
        /// The rejected path.
        path: String,
    },

    /// The value's type does not match the parameter.
    #[error("parameter `{path}` expects {expected}, got {got}")]
    TypeMismatch {
        /// The parameter path.
        path: String,
        /// Expected type name.
        expected: &'static str,
        /// Received value type name.
        got: &'static str,
    },

    /// The value is outside the parameter's accepted range.
    #[error("parameter `{path}` value {value} outside [{min}, {max}]")]
    OutOfRange {
        /// The parameter path.
        path: String,
        /// The rejected value.
        value: PatchValue,
        /// Accepted lower bound.
        min: f64,
        /// Accepted upper bound.
        max: f64,
    },
}

/// A pipeline processor.
pub trait MetricsProcessor: Send + Sync {
    /// Stable identifier used as the patch target id and in logs.
    fn name(&self) -> &str;

    /// Prepares the processor for traffic.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the processor cannot start; the host
    /// reports the data path as unavailable.
    fn start(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Releases resources. Called once, after the last batch.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when cleanup fails.
    fn shutdown(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Transforms `batch` in place.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`]; the pipeline recovers locally unless the
    /// error kind is [`crate::ProcessorErrorKind::Structural`].
    fn consume(&self, batch: &mut MetricBatch, ctx: &BatchContext) -> Result<(), EngineError>;

    /// Applies one parameter change under the processor's writer lock.
    ///
    /// # Errors
    ///
    /// Returns a [`PatchError`] categorizing the rejection; the previous
    /// parameter value is preserved.
    fn apply_patch(&self, patch: &ConfigPatch) -> Result<PatchOutcome, PatchError>;

    /// Reports the live parameter set.
    fn config_status(&self) -> ConfigStatus;
}

/// Helpers shared by `apply_patch` implementations.
pub mod patch_args {
    use super::PatchError;
    use phoenix_control::{ConfigPatch, PatchValue};

    /// Extracts a boolean patch value.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::TypeMismatch`] for non-boolean values.
    pub fn expect_bool(patch: &ConfigPatch) -> Result<bool, PatchError> {
        patch
            .new_value
            .as_bool()
            .ok_or_else(|| PatchError::TypeMismatch {
                path: patch.parameter_path.clone(),
                expected: "bool",
                got: patch.new_value.type_name(),
            })
    }

    /// Extracts an integer patch value within `[min, max]`.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::TypeMismatch`] for non-integer values and
    /// [`PatchError::OutOfRange`] for integers outside the bounds.
    pub fn expect_int_in(patch: &ConfigPatch, min: i64, max: i64) -> Result<i64, PatchError> {
        let value = patch
            .new_value
            .as_int()
            .ok_or_else(|| PatchError::TypeMismatch {
                path: patch.parameter_path.clone(),
                expected: "int",
                got: patch.new_value.type_name(),
            })?;
        if !(min..=max).contains(&value) {
            return Err(PatchError::OutOfRange {
                path: patch.parameter_path.clone(),
                value: PatchValue::Int(value),
                min: min as f64,
                max: max as f64,
            });
        }
        Ok(value)
    }

    /// The uniform rejection for unknown parameter paths.
    #[must_use]
    pub fn unknown(patch: &ConfigPatch) -> PatchError {
        PatchError::UnknownParameter {
            path: patch.parameter_path.clone(),
        }
    }
}
