//! Normalization of raw register snapshots into canonical value maps.

use crate::value::{CanonicalValueMap, RawRegisterSnapshot, RawValue, Value};

/// Canonical key of the operating-mode register.
pub const OPERATING_MODE_KEY: &str = "betriebsart";

/// Numeric values at or below this mark mean "sensor not installed/invalid"
/// on this device family and are suppressed to null.
pub const SENTINEL_CUTOFF: f64 = -50.0;

/// Derive the canonical key for a device-native parameter name: strip every
/// character that is not an ASCII letter, then lowercase.
pub fn canonical_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Map an operating-mode code to its canonical label. Codes outside the
/// closed enumeration yield `None` so unknown modes are never passed
/// downstream as numeric codes.
pub fn operating_mode_label(code: i64) -> Option<&'static str> {
    match code {
        0 => Some("Off"),
        1 => Some("Auto"),
        2 => Some("Cooling"),
        3 => Some("Summer"),
        4 => Some("ContinuousRun"),
        5 => Some("Setback"),
        6 => Some("Vacation"),
        7 => Some("Party"),
        _ => None,
    }
}

/// Normalize a raw register snapshot into the canonical value map.
///
/// Pure and total: nothing here can fail. Entries are processed in snapshot
/// order, so a key collision deterministically keeps the later entry. A name
/// with no ASCII letters would derive an empty key and is dropped.
pub fn normalize(snapshot: &RawRegisterSnapshot) -> CanonicalValueMap {
    let mut values = CanonicalValueMap::new();

    for (name, raw) in snapshot {
        let key = canonical_key(name);
        if key.is_empty() {
            continue;
        }

        let value = if key == OPERATING_MODE_KEY {
            decode_operating_mode(raw)
        } else {
            coerce(raw)
        };

        values.insert(key, value);
    }

    values
}

fn decode_operating_mode(raw: &RawValue) -> Value {
    let code = match raw {
        RawValue::Int(i) => Some(*i),
        RawValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
        RawValue::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    match code.and_then(operating_mode_label) {
        Some(label) => Value::Text(label.to_string()),
        None => Value::Null,
    }
}

/// Coerce a non-mode value: booleans become "ON"/"OFF", anything numeric is
/// checked against the sentinel cutoff, the rest passes through as text.
fn coerce(raw: &RawValue) -> Value {
    let number = match raw {
        RawValue::Bool(b) => {
            return Value::Text(if *b { "ON" } else { "OFF" }.to_string());
        }
        RawValue::Int(i) => Some(*i as f64),
        RawValue::Float(f) => Some(*f),
        RawValue::Text(s) => match s.trim().parse::<f64>() {
            Ok(n) => Some(n),
            Err(_) => return Value::Text(s.clone()),
        },
    };

    match number {
        Some(n) if n <= SENTINEL_CUTOFF => Value::Null,
        Some(n) => Value::Number(n),
        None => Value::Null,
    }
}
