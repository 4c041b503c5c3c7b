// SPDX-License-Identifier: Apache-2.0

//! Errors for the control crate.

use thiserror::Error;

/// Errors raised by PID controller configuration.
///
/// A rejected reconfiguration leaves the controller's previous state intact.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Output limits must satisfy `min < max`.
    #[error("invalid output limits: min {min} must be below max {max}")]
    InvalidOutputLimits {
        /// Requested lower bound.
        min: f64,
        /// Requested upper bound.
        max: f64,
    },

    /// The integral limit must be non-negative.
    #[error("invalid integral limit {limit}: must be >= 0")]
    InvalidIntegralLimit {
        /// Requested limit.
        limit: f64,
    },

    /// Gains must be finite numbers.
    #[error("invalid gains (kp={kp}, ki={ki}, kd={kd}): all gains must be finite")]
    InvalidGains {
        /// Proportional gain.
        kp: f64,
        /// Integral gain.
        ki: f64,
        /// Derivative gain.
        kd: f64,
    },

    /// The anti-windup gain must be non-negative.
    #[error("invalid anti-windup gain {gain}: must be >= 0")]
    InvalidAntiWindupGain {
        /// Requested gain.
        gain: f64,
    },
}

/// Errors raised while decoding a `ctrl_proposed_patch` metric.
///
/// Decoding failures are logged and counted by the tap, never fatal.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A required data-point attribute is absent.
    #[error("patch metric missing required attribute `{attribute}`")]
    MissingAttribute {
        /// The absent attribute key.
        attribute: &'static str,
    },

    /// The `patch.value_type` attribute names an unsupported variant.
    ///
    /// Treated as a type rejection by the consumer.
    #[error("unknown patch value type `{value_type}`")]
    UnknownValueType {
        /// The unrecognized variant name.
        value_type: String,
    },

    /// The encoded value does not parse as the declared type.
    #[error("patch value `{value}` does not parse as {expected}")]
    MalformedValue {
        /// The raw encoded value.
        value: String,
        /// The declared type name.
        expected: &'static str,
    },

    /// The severity attribute names something other than normal/urgent.
    #[error("unknown patch severity `{severity}`")]
    UnknownSeverity {
        /// The unrecognized severity.
        severity: String,
    },
}
