// SPDX-License-Identifier: Apache-2.0

//! Typed attribute values and key/value lists.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnyValue {
    /// A UTF-8 string value.
    Str(String),
    /// A 64-bit signed integer value.
    Int(i64),
    /// A 64-bit float value.
    Double(f64),
    /// A boolean value.
    Bool(bool),
}

impl AnyValue {
    /// Returns the string content when this value is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content when this value is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AnyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a float view of this value for numeric variants.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AnyValue::Double(v) => Some(*v),
            AnyValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the boolean content when this value is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AnyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnyValue::Str(s) => write!(f, "{s}"),
            AnyValue::Int(v) => write!(f, "{v}"),
            AnyValue::Double(v) => write!(f, "{v}"),
            AnyValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for AnyValue {
    fn from(value: &str) -> Self {
        AnyValue::Str(value.to_owned())
    }
}

impl From<String> for AnyValue {
    fn from(value: String) -> Self {
        AnyValue::Str(value)
    }
}

impl From<i64> for AnyValue {
    fn from(value: i64) -> Self {
        AnyValue::Int(value)
    }
}

impl From<f64> for AnyValue {
    fn from(value: f64) -> Self {
        AnyValue::Double(value)
    }
}

impl From<bool> for AnyValue {
    fn from(value: bool) -> Self {
        AnyValue::Bool(value)
    }
}

/// A single attribute: a unique key mapped to a typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    /// The attribute key. Unique within its owning attribute list.
    pub key: String,
    /// The attribute value.
    pub value: AnyValue,
}

impl KeyValue {
    /// Creates a new key/value pair.
    pub fn new(key: impl Into<String>, value: impl Into<AnyValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Looks up the value of `key` in an attribute list.
#[must_use]
pub fn get<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a AnyValue> {
    attributes.iter().find(|kv| kv.key == key).map(|kv| &kv.value)
}

/// Looks up a string attribute by key.
#[must_use]
pub fn get_str<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a str> {
    get(attributes, key).and_then(AnyValue::as_str)
}

/// Inserts or replaces an attribute, keeping keys unique.
pub fn upsert(attributes: &mut Vec<KeyValue>, key: &str, value: impl Into<AnyValue>) {
    let value = value.into();
    match attributes.iter_mut().find(|kv| kv.key == key) {
        Some(existing) => existing.value = value,
        None => attributes.push(KeyValue {
            key: key.to_owned(),
            value,
        }),
    }
}

/// Removes an attribute by key, returning its value when present.
pub fn remove(attributes: &mut Vec<KeyValue>, key: &str) -> Option<AnyValue> {
    let idx = attributes.iter().position(|kv| kv.key == key)?;
    Some(attributes.remove(idx).value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_existing_key() {
        let mut attrs = vec![KeyValue::new("a", 1i64)];
        upsert(&mut attrs, "a", 2i64);
        upsert(&mut attrs, "b", "x");
        assert_eq!(attrs.len(), 2);
        assert_eq!(get(&attrs, "a"), Some(&AnyValue::Int(2)));
        assert_eq!(get_str(&attrs, "b"), Some("x"));
    }

    #[test]
    fn numeric_views() {
        assert_eq!(AnyValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(AnyValue::Double(0.5).as_f64(), Some(0.5));
        assert_eq!(AnyValue::Str("3".into()).as_f64(), None);
    }

    #[test]
    fn remove_returns_value() {
        let mut attrs = vec![KeyValue::new("a", true)];
        assert_eq!(remove(&mut attrs, "a"), Some(AnyValue::Bool(true)));
        assert!(remove(&mut attrs, "a").is_none());
        assert!(attrs.is_empty());
    }
}
