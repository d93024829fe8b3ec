// src/graph/canonical.rs

//! Canonical serialization and content addressing.
//!
//! Canonical descriptions are `serde_json::Value` trees. They are written
//! with object keys sorted and no whitespace (`,` and `:` separators), so two
//! logically equal descriptions always produce the same bytes.

use serde::Serialize;
use serde_json::Value;

use crate::digest::hash_bytes;
use crate::errors::{ReprodError, Result};
use crate::types::HashAlgorithm;

/// Serialize `value` to its canonical byte form.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(128);
    write_canonical(value, &mut out)?;
    Ok(out)
}

/// Serialize `value` to its canonical string form.
pub fn canonical_string(value: &Value) -> Result<String> {
    let bytes = canonical_bytes(value)?;
    String::from_utf8(bytes).map_err(|e| ReprodError::InvalidCanonicalForm(e.to_string()))
}

/// Content address of a canonical description: `"<algorithm>_<hexdigest>"`.
pub fn canonical_id(value: &Value, algorithm: HashAlgorithm) -> Result<String> {
    let bytes = canonical_bytes(value)?;
    Ok(format!("{algorithm}_{}", hash_bytes(algorithm, &bytes)))
}

/// Convert any serializable value into a canonical description.
///
/// Maps with non-string keys and non-finite floats are rejected.
pub fn to_canonical_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ReprodError::InvalidCanonicalForm(e.to_string()))
}

/// Convert a TOML value (e.g. transform params from a pipeline file).
///
/// Datetimes become their RFC 3339 string; NaN and infinities are rejected.
pub fn from_toml(value: &toml::Value) -> Result<Value> {
    Ok(match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::from(*i),
        toml::Value::Float(f) => {
            let n = serde_json::Number::from_f64(*f).ok_or_else(|| {
                ReprodError::InvalidCanonicalForm(format!("non-finite number {f}"))
            })?;
            Value::Number(n)
        }
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => {
            Value::Array(items.iter().map(from_toml).collect::<Result<Vec<_>>>()?)
        }
        toml::Value::Table(table) => {
            let mut map = serde_json::Map::new();
            for (key, item) in table {
                map.insert(key.clone(), from_toml(item)?);
            }
            Value::Object(map)
        }
    })
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => {
            serde_json::to_writer(&mut *out, value)?;
        }
        Value::Number(n) => {
            if n.as_f64().is_some_and(|f| !f.is_finite()) {
                return Err(ReprodError::InvalidCanonicalForm(format!(
                    "non-finite number {n}"
                )));
            }
            serde_json::to_writer(&mut *out, n)?;
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(&map[key], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}
