//! Canonical JSON encoding.
//!
//! Rules:
//! - object keys sorted by byte value, no duplicate keys
//! - no whitespace anywhere
//! - arrays keep their order
//! - integers render as integers
//! - floats below [`QUANTIZE_LIMIT`] in magnitude are rounded to
//!   [`FLOAT_DECIMALS`] decimal digits; every float then renders in its
//!   shortest round-trip form, so `2.0` and `2` encode identically
//! - re-encoding a parsed canonical document yields the same bytes
//! - `-0` (including negatives that round to zero) renders as `0`
//! - NaN and ±Infinity are rejected
//!
//! `serde_json::Value` cannot hold a non-finite number, so typed values carry
//! their floats through [`canonical_f64`] at construction time.

use serde::Serialize;
use serde_json::{Number, Value};

use crate::error::CanonError;

/// Maximum number of decimal digits kept for floating-point values.
pub const FLOAT_DECIMALS: usize = 12;

/// Floats at or above this magnitude have an ulp wider than half of the last
/// kept decimal, so rounding them would not be stable across a parse. They
/// keep their exact value.
pub const QUANTIZE_LIMIT: f64 = 4096.0;

/// Encode a JSON value into its unique canonical byte sequence.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, CanonError> {
    let mut out = Vec::with_capacity(128);
    write_value(value, &mut out)?;
    Ok(out)
}

/// Serialize any value through serde and canonicalize the result.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CanonError> {
    let v = serde_json::to_value(value)?;
    canonical_bytes(&v)
}

/// Reject non-finite floats and normalize signed zero.
pub fn canonical_f64(x: f64) -> Result<f64, CanonError> {
    if !x.is_finite() {
        return Err(CanonError::NonFinite(x));
    }
    Ok(if x == 0.0 { 0.0 } else { x })
}

/// The value `x` takes after a canonical encode/decode round trip.
///
/// Agents that feed declared numbers into their own computations should
/// quantize them first, since the kernel only ever sees the canonical form.
pub fn quantize(x: f64) -> Result<f64, CanonError> {
    format_f64(x)?
        .parse()
        .map_err(|e: std::num::ParseFloatError| CanonError::Serialization(e.to_string()))
}

/// Re-read `value` from its canonical bytes.
pub fn canonicalize(value: &Value) -> Result<Value, CanonError> {
    Ok(serde_json::from_slice(&canonical_bytes(value)?)?)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), CanonError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(format_number(n)?.as_bytes()),
        Value::String(s) => write_string(s, out)?,
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out)?;
                out.push(b':');
                write_value(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) -> Result<(), CanonError> {
    let escaped = serde_json::to_string(s)?;
    out.extend_from_slice(escaped.as_bytes());
    Ok(())
}

fn format_number(n: &Number) -> Result<String, CanonError> {
    if let Some(i) = n.as_i64() {
        return Ok(i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Ok(u.to_string());
    }
    let x = n.as_f64().ok_or_else(|| {
        CanonError::Serialization(format!("number {n} is not representable as f64"))
    })?;
    format_f64(x)
}

fn format_f64(x: f64) -> Result<String, CanonError> {
    let x = canonical_f64(x)?;
    let rounded = if x.abs() < QUANTIZE_LIMIT {
        format!("{:.*}", FLOAT_DECIMALS, x)
            .parse::<f64>()
            .map_err(|e: std::num::ParseFloatError| CanonError::Serialization(e.to_string()))?
    } else {
        x
    };
    // `{}` on f64 never uses exponent notation and prints the shortest
    // digits that parse back to the same value.
    Ok(format!("{}", canonical_f64(rounded)?))
}
