// SPDX-License-Identifier: Apache-2.0

//! Errors for the sketch crate.

use thiserror::Error;

/// Errors raised by sketch construction and merging.
#[derive(Error, Debug)]
pub enum Error {
    /// HyperLogLog precision must be within `[4, 16]`.
    #[error("hyperloglog precision {precision} outside supported range [4, 16]")]
    PrecisionOutOfRange {
        /// The rejected precision.
        precision: u8,
    },

    /// Merging requires both sketches to use the same precision.
    #[error("cannot merge hyperloglog sketches with precisions {left} and {right}")]
    PrecisionMismatch {
        /// Precision of the receiving sketch.
        left: u8,
        /// Precision of the other sketch.
        right: u8,
    },

    /// Space-Saving requires at least one counter slot.
    #[error("space-saving k must be at least 1")]
    ZeroCapacity,
}
