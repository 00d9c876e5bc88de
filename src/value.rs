//! Value types for raw device registers and canonical channel values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A raw register value as read from the device.
///
/// The controller reports a mix of flags, counters, temperatures and free-form
/// status strings; the type is carried explicitly so normalization rules can
/// be checked at compile time instead of duck-typed.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::Bool(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Int(v)
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Float(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

/// A raw register snapshot: device-native parameter names paired with their
/// values, in device iteration order. Produced fresh on every poll cycle and
/// never persisted.
pub type RawRegisterSnapshot = Vec<(String, RawValue)>;

/// A canonical channel value after normalization.
///
/// Serializes untagged, so the values topic carries plain JSON
/// null/number/string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Number(f64),
    Text(String),
}

/// The normalized value map keyed by canonical channel keys.
pub type CanonicalValueMap = BTreeMap<String, Value>;
