// SPDX-License-Identifier: Apache-2.0

//! Errors for the pipeline engine.

use std::fmt;
use thiserror::Error;

/// High-level classification for processor failures.
///
/// The pipeline recovers locally from everything except
/// [`ProcessorErrorKind::Structural`], which drops the batch, and reports
/// structural faults to governance as internal-consistency violations.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProcessorErrorKind {
    /// Malformed input: a resource or point the processor cannot interpret.
    InputValidation,
    /// Invalid or incomplete configuration detected at runtime.
    Configuration,
    /// The batch was left in a state that must not propagate downstream.
    Structural,
    /// Errors raised while shutting down.
    Shutdown,
    /// Catch-all for failures that do not fit other categories.
    Other,
}

impl fmt::Display for ProcessorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessorErrorKind::InputValidation => "input-validation",
            ProcessorErrorKind::Configuration => "configuration",
            ProcessorErrorKind::Structural => "structural",
            ProcessorErrorKind::Shutdown => "shutdown",
            ProcessorErrorKind::Other => "other",
        };
        write!(f, "{label}")
    }
}

/// All errors that can occur in the pipeline engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A processor failed while consuming or starting.
    #[error("processor `{processor}` failed ({kind}): {error}")]
    ProcessorError {
        /// The processor that encountered the error.
        processor: String,
        /// High-level classification of the failure.
        kind: ProcessorErrorKind,
        /// Failure detail.
        error: String,
    },

    /// The inbound or outbound batch channel closed.
    #[error("pipeline channel closed: {context}")]
    ChannelClosed {
        /// Which channel closed.
        context: String,
    },

    /// The operation was cancelled. Expected during shutdown.
    #[error("cancelled: {context}")]
    Cancelled {
        /// What was cancelled.
        context: String,
    },
}

impl EngineError {
    /// Shorthand for a processor error.
    pub fn processor(
        processor: impl Into<String>,
        kind: ProcessorErrorKind,
        error: impl Into<String>,
    ) -> Self {
        EngineError::ProcessorError {
            processor: processor.into(),
            kind,
            error: error.into(),
        }
    }

    /// The processor error kind, when this is a processor error.
    #[must_use]
    pub fn kind(&self) -> Option<ProcessorErrorKind> {
        match self {
            EngineError::ProcessorError { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
