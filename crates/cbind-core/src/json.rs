//! JSON wire codec for variants.
//!
//! Requests arrive and responses leave as JSON text. Most variants map 1:1
//! onto JSON; the two exceptions are 64-bit integers, which travel as
//! `["long", lo, hi]` (hi carries the sign-extended upper half), and array
//! buffers, which travel as `["ArrayBuffer", base64]`.
//!
//! Decoding is shape-preserving: a `["long", ...]` array decodes as a plain
//! array, and readers that want an int64 recognize the form lazily via
//! [`Variant::as_int64`]. Encoding uses `serde_json`'s default map, so
//! object keys serialize in sorted order.

use crate::error::{BridgeError, BridgeResult};
use crate::variant::{VarArray, VarBuffer, VarDict, Variant};
use data_encoding::BASE64;
use serde_json::{json, Map, Number, Value};

/// Encode a variant as a JSON value.
pub fn to_json(variant: &Variant) -> Value {
    match variant {
        Variant::Undefined | Variant::Null => Value::Null,
        Variant::Bool(b) => Value::Bool(*b),
        Variant::Int32(i) => Value::Number((*i).into()),
        Variant::Double(d) => Number::from_f64(*d).map_or(Value::Null, Value::Number),
        Variant::Int64(i) => {
            let lo = *i as i32;
            let hi = (*i >> 32) as i32;
            json!(["long", lo, hi])
        }
        Variant::String(s) => Value::String(s.to_string()),
        Variant::Array(arr) => {
            Value::Array(arr.to_vec().iter().map(to_json).collect())
        }
        Variant::Dictionary(dict) => {
            let mut map = Map::new();
            for (key, value) in dict.entries() {
                map.insert(key, to_json(&value));
            }
            Value::Object(map)
        }
        Variant::ArrayBuffer(buf) => {
            let encoded = buf.with_bytes(|bytes| BASE64.encode(bytes));
            json!(["ArrayBuffer", encoded])
        }
    }
}

/// Encode a variant as compact JSON text.
pub fn to_json_string(variant: &Variant) -> String {
    to_json(variant).to_string()
}

/// Decode a JSON value into a variant.
///
/// Integral numbers in int32 range decode as `Int32`; every other number
/// decodes as `Double`, matching the host's number semantics.
pub fn from_json(value: &Value) -> Variant {
    match value {
        Value::Null => Variant::Null,
        Value::Bool(b) => Variant::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) if i32::try_from(i).is_ok() => Variant::Int32(i as i32),
            _ => Variant::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Variant::from_utf8(s),
        Value::Array(items) => {
            // ["ArrayBuffer", base64] round-trips back into a buffer.
            if let [Value::String(tag), Value::String(data)] = items.as_slice() {
                if tag == "ArrayBuffer" {
                    if let Ok(bytes) = BASE64.decode(data.as_bytes()) {
                        return Variant::ArrayBuffer(VarBuffer::from_bytes(&bytes));
                    }
                }
            }
            Variant::Array(items.iter().map(from_json).collect::<VarArray>())
        }
        Value::Object(map) => {
            let dict = VarDict::new();
            for (key, value) in map {
                dict.set(key, from_json(value));
            }
            Variant::Dictionary(dict)
        }
    }
}

/// Decode JSON text into a variant.
pub fn from_json_str(text: &str) -> BridgeResult<Variant> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| BridgeError::ProtocolError(err.to_string()))?;
    Ok(from_json(&value))
}
