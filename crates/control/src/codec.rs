// SPDX-License-Identifier: Apache-2.0

//! Encoding of [`ConfigPatch`]es as synthetic metrics.
//!
//! The decider emits into the same graph that carries telemetry, so patches
//! travel as `ctrl_proposed_patch` gauge metrics whose data-point attributes
//! carry the patch fields. The governance tap decodes them back; the
//! round trip preserves target, path, typed value, severity, TTL and
//! timestamp. Unrecognized attributes are ignored so the format can grow.

use crate::error::CodecError;
use crate::patch::{ConfigPatch, PatchValue, Severity};
use phoenix_pdata::attrs::{KeyValue, get_str};
use phoenix_pdata::{Metric, MetricData, NumberDataPoint};
use std::time::Duration;

/// Name of the synthetic patch metric.
pub const PATCH_METRIC_NAME: &str = "ctrl_proposed_patch";

const ATTR_ID: &str = "patch.id";
const ATTR_TARGET: &str = "patch.target";
const ATTR_PATH: &str = "patch.path";
const ATTR_VALUE_TYPE: &str = "patch.value_type";
const ATTR_VALUE: &str = "patch.value";
const ATTR_REASON: &str = "patch.reason";
const ATTR_SEVERITY: &str = "patch.severity";
const ATTR_SOURCE: &str = "patch.source";
const ATTR_TTL_SECONDS: &str = "patch.ttl_seconds";

/// Encodes one patch as a `ctrl_proposed_patch` gauge metric.
#[must_use]
pub fn encode_patch(patch: &ConfigPatch) -> Metric {
    let attributes = vec![
        KeyValue::new(ATTR_ID, patch.patch_id.as_str()),
        KeyValue::new(ATTR_TARGET, patch.target_processor_id.as_str()),
        KeyValue::new(ATTR_PATH, patch.parameter_path.as_str()),
        KeyValue::new(ATTR_VALUE_TYPE, patch.new_value.type_name()),
        KeyValue::new(ATTR_VALUE, patch.new_value.to_string()),
        KeyValue::new(ATTR_REASON, patch.reason.as_str()),
        KeyValue::new(ATTR_SEVERITY, patch.severity.to_string()),
        KeyValue::new(ATTR_SOURCE, patch.source.as_str()),
        KeyValue::new(ATTR_TTL_SECONDS, patch.ttl.as_secs() as i64),
    ];
    Metric::gauge(
        PATCH_METRIC_NAME,
        vec![NumberDataPoint {
            attributes,
            time_unix_nano: patch.time_unix_nano,
            value: phoenix_pdata::NumberValue::Double(1.0),
        }],
    )
}

/// Decodes one patch from the attributes of a patch-metric data point.
///
/// # Errors
///
/// Returns a [`CodecError`] when a required attribute is missing, the value
/// type is unknown, or the encoded value does not parse as its declared type.
pub fn decode_patch_point(point: &NumberDataPoint) -> Result<ConfigPatch, CodecError> {
    fn required<'a>(
        attributes: &'a [KeyValue],
        key: &'static str,
    ) -> Result<&'a str, CodecError> {
        get_str(attributes, key).ok_or(CodecError::MissingAttribute { attribute: key })
    }

    let attrs = &point.attributes;
    let value_type = required(attrs, ATTR_VALUE_TYPE)?;
    let raw_value = required(attrs, ATTR_VALUE)?;
    let new_value = match value_type {
        "bool" => PatchValue::Bool(raw_value.parse().map_err(|_| CodecError::MalformedValue {
            value: raw_value.to_owned(),
            expected: "bool",
        })?),
        "int" => PatchValue::Int(raw_value.parse().map_err(|_| CodecError::MalformedValue {
            value: raw_value.to_owned(),
            expected: "int",
        })?),
        "double" => {
            PatchValue::Double(raw_value.parse().map_err(|_| CodecError::MalformedValue {
                value: raw_value.to_owned(),
                expected: "double",
            })?)
        }
        "str" => PatchValue::Str(raw_value.to_owned()),
        other => {
            return Err(CodecError::UnknownValueType {
                value_type: other.to_owned(),
            });
        }
    };

    let severity_raw = required(attrs, ATTR_SEVERITY)?;
    let severity: Severity = severity_raw.parse().map_err(|()| CodecError::UnknownSeverity {
        severity: severity_raw.to_owned(),
    })?;

    let ttl_value = phoenix_pdata::attrs::get(attrs, ATTR_TTL_SECONDS).ok_or(
        CodecError::MissingAttribute {
            attribute: ATTR_TTL_SECONDS,
        },
    )?;
    let ttl_seconds = ttl_value
        .as_int()
        .filter(|secs| *secs >= 0)
        .map(|secs| secs as u64)
        .ok_or_else(|| CodecError::MalformedValue {
            value: ttl_value.to_string(),
            expected: "int",
        })?;

    Ok(ConfigPatch {
        patch_id: required(attrs, ATTR_ID)?.to_owned(),
        target_processor_id: required(attrs, ATTR_TARGET)?.to_owned(),
        parameter_path: required(attrs, ATTR_PATH)?.to_owned(),
        new_value,
        reason: get_str(attrs, ATTR_REASON).unwrap_or_default().to_owned(),
        severity,
        source: get_str(attrs, ATTR_SOURCE).unwrap_or_default().to_owned(),
        time_unix_nano: point.time_unix_nano,
        ttl: Duration::from_secs(ttl_seconds),
    })
}

/// Decodes every point of a patch metric, partitioning successes and errors.
#[must_use]
pub fn decode_patches(metric: &Metric) -> (Vec<ConfigPatch>, Vec<CodecError>) {
    let mut patches = Vec::new();
    let mut errors = Vec::new();
    if metric.name != PATCH_METRIC_NAME {
        return (patches, errors);
    }
    if let MetricData::Gauge { data_points } = &metric.data {
        for point in data_points {
            match decode_patch_point(point) {
                Ok(patch) => patches.push(patch),
                Err(err) => errors.push(err),
            }
        }
    }
    (patches, errors)
}
