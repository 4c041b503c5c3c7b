// SPDX-License-Identifier: Apache-2.0

//! The configuration-patch model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Patch severity. Urgent patches bypass rate limiting and safe mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Subject to rate limiting, cooldowns and safe-mode rejection.
    Normal,
    /// Bypasses rate limiting and safe-mode rejection.
    Urgent,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Normal => write!(f, "normal"),
            Severity::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Severity::Normal),
            "urgent" => Ok(Severity::Urgent),
            _ => Err(()),
        }
    }
}

/// A typed parameter value carried by a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchValue {
    /// Boolean parameter.
    Bool(bool),
    /// Integer parameter.
    Int(i64),
    /// Float parameter.
    Double(f64),
    /// String parameter.
    Str(String),
}

impl PatchValue {
    /// The wire name of this variant (`patch.value_type` attribute).
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            PatchValue::Bool(_) => "bool",
            PatchValue::Int(_) => "int",
            PatchValue::Double(_) => "double",
            PatchValue::Str(_) => "str",
        }
    }

    /// Boolean content, when this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PatchValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer content, when this is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PatchValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float view for numeric variants.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PatchValue::Double(v) => Some(*v),
            PatchValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String content, when this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PatchValue::Str(v) => Some(v),
            _ => None,
        }
    }

    /// JSON view of the value, used in config-status reports.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PatchValue::Bool(v) => serde_json::Value::from(*v),
            PatchValue::Int(v) => serde_json::Value::from(*v),
            PatchValue::Double(v) => serde_json::Value::from(*v),
            PatchValue::Str(v) => serde_json::Value::from(v.clone()),
        }
    }
}

impl fmt::Display for PatchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchValue::Bool(v) => write!(f, "{v}"),
            PatchValue::Int(v) => write!(f, "{v}"),
            PatchValue::Double(v) => write!(f, "{v}"),
            PatchValue::Str(v) => write!(f, "{v}"),
        }
    }
}

/// A single typed parameter change targeted at one processor.
///
/// Immutable once emitted; consumed at most once by governance. A patch
/// expires when `now - time_unix_nano > ttl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    /// Unique patch identifier.
    pub patch_id: String,
    /// Registered id of the processor this patch targets.
    pub target_processor_id: String,
    /// Flat parameter path within the target processor.
    pub parameter_path: String,
    /// The replacement value.
    pub new_value: PatchValue,
    /// Human-readable rationale.
    pub reason: String,
    /// Severity class.
    pub severity: Severity,
    /// Name of the producing component.
    pub source: String,
    /// Emission timestamp, nanoseconds since the Unix epoch.
    pub time_unix_nano: u64,
    /// Time-to-live measured from the emission timestamp.
    pub ttl: Duration,
}

impl ConfigPatch {
    /// Creates a patch with a fresh id.
    pub fn new(
        target_processor_id: impl Into<String>,
        parameter_path: impl Into<String>,
        new_value: PatchValue,
        severity: Severity,
        source: impl Into<String>,
        time_unix_nano: u64,
        ttl: Duration,
    ) -> Self {
        Self {
            patch_id: uuid::Uuid::new_v4().to_string(),
            target_processor_id: target_processor_id.into(),
            parameter_path: parameter_path.into(),
            new_value,
            reason: String::new(),
            severity,
            source: source.into(),
            time_unix_nano,
            ttl,
        }
    }

    /// Sets the rationale.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// True when the patch has outlived its TTL at `now_unix_nano`.
    #[must_use]
    pub fn expired_at(&self, now_unix_nano: u64) -> bool {
        let age = now_unix_nano.saturating_sub(self.time_unix_nano);
        age > self.ttl.as_nanos().min(u128::from(u64::MAX)) as u64
    }
}
