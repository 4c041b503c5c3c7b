// SPDX-License-Identifier: Apache-2.0

//! Errors for the policy crate.

use miette::Diagnostic;

/// Errors that can occur while loading or validating a policy document.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// An error that occurred while reading the policy file.
    #[error("policy file read error at {path}: {details}")]
    #[diagnostic(code(phoenix::policy::file_read_error))]
    FileReadError {
        /// The path that could not be read.
        path: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// An error that occurred while deserializing the policy document.
    #[error("policy deserialization error: {details}")]
    #[diagnostic(code(phoenix::policy::deserialization_error))]
    DeserializationError {
        /// A description of the error that occurred.
        details: String,
    },

    /// One or more schema constraints were violated.
    ///
    /// Every violation carries its field path; the document is rejected
    /// whole.
    #[error("invalid policy: {}", errors.join("; "))]
    #[diagnostic(code(phoenix::policy::invalid_policy))]
    InvalidPolicy {
        /// Field-path-qualified violation messages.
        errors: Vec<String>,
    },
}
