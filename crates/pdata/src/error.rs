// SPDX-License-Identifier: Apache-2.0

//! Errors for the metric data model.

use thiserror::Error;

/// Errors raised while constructing or validating metric data.
#[derive(Error, Debug)]
pub enum Error {
    /// Histogram explicit bounds must be strictly increasing.
    #[error("histogram bounds are not strictly increasing at index {index}")]
    NonMonotonicBounds {
        /// Index of the first offending bound.
        index: usize,
    },

    /// Histogram bucket counts must have exactly one more entry than bounds.
    #[error("histogram has {bounds} bounds but {buckets} bucket counts")]
    BucketCountMismatch {
        /// Number of explicit bounds.
        bounds: usize,
        /// Number of bucket counters.
        buckets: usize,
    },
}
