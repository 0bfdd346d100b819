// SPDX-License-Identifier: Apache-2.0

//! Conversions between envelope json trees and `serde_json`, and the
//! `{"json": ..., "meta": [...]}` wire form.

use serde::{Deserialize, Serialize};
use serde_json::Number;

use super::{Envelope, MetaEntry};
use crate::error::CodecError;
use crate::value::Value;

// Integers up to 2^53 are exact in an f64 and go out as json integers.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    json: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    meta: Vec<MetaEntry>,
}

/// Convert a json-only tree to `serde_json`. Rich variants must already have
/// been flattened by [`serialize`](super::serialize), and blobs pulled out.
pub fn to_json(value: Value) -> Result<serde_json::Value, CodecError> {
    Ok(match value {
        Value::Null | Value::Undefined => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(b),
        Value::Number(n) => number_to_json(n),
        Value::String(s) => serde_json::Value::String(s),
        Value::Array(items) => serde_json::Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(obj) => serde_json::Value::Object(
            obj.into_iter()
                .map(|(k, v)| Ok((k, to_json(v)?)))
                .collect::<Result<_, CodecError>>()?,
        ),
        other => return Err(CodecError::Unrepresentable(other.type_name())),
    })
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return serde_json::Value::Number(Number::from(n as i64));
    }
    // json has no spelling for infinities
    Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Convert parsed json into a value tree. Never fails.
pub fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::array(items.into_iter().map(from_json)),
        serde_json::Value::Object(map) => {
            Value::object(map.into_iter().map(|(k, v)| (k, from_json(v))))
        }
    }
}

impl Envelope {
    pub fn to_json_vec(self) -> Result<Vec<u8>, CodecError> {
        let wire = WireEnvelope {
            json: to_json(self.json)?,
            meta: self.meta,
        };
        serde_json::to_vec(&wire).map_err(|e| CodecError::Json(e.to_string()))
    }

    pub fn to_json_string(self) -> Result<String, CodecError> {
        let wire = WireEnvelope {
            json: to_json(self.json)?,
            meta: self.meta,
        };
        serde_json::to_string(&wire).map_err(|e| CodecError::Json(e.to_string()))
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        let wire: WireEnvelope =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Json(e.to_string()))?;
        Ok(Envelope {
            json: from_json(wire.json),
            meta: wire.meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{deserialize, serialize};
    use crate::value::Timestamp;

    #[test]
    fn numbers() {
        assert_eq!(to_json(Value::from(3)).unwrap().to_string(), "3");
        assert_eq!(to_json(Value::from(-0.5)).unwrap().to_string(), "-0.5");
        assert_eq!(to_json(Value::from(f64::INFINITY)).unwrap(), serde_json::Value::Null);
        assert_eq!(from_json(serde_json::json!(3)), Value::from(3));
    }

    #[test]
    fn rich_values_are_rejected() {
        assert_eq!(
            to_json(Value::bigint(1)),
            Err(CodecError::Unrepresentable("bigint"))
        );
    }

    #[test]
    fn wire_form() {
        let v = Value::object([
            ("n", Value::from(1)),
            ("at", Value::from(Timestamp::from_millis(0))),
        ]);
        let s = serialize(v).to_json_string().unwrap();
        assert_eq!(
            s,
            r#"{"json":{"n":1,"at":"1970-01-01T00:00:00.000Z"},"meta":[["date",["at"]]]}"#
        );
    }

    #[test]
    fn meta_omitted_when_empty() {
        let s = serialize(Value::from("x")).to_json_string().unwrap();
        assert_eq!(s, r#"{"json":"x"}"#);
        let env = Envelope::from_json_slice(s.as_bytes()).unwrap();
        assert_eq!(deserialize(env).unwrap(), Value::from("x"));
    }

    #[test]
    fn object_key_order_survives() {
        let s = r#"{"json":{"z":1,"a":2}}"#;
        let env = Envelope::from_json_slice(s.as_bytes()).unwrap();
        assert_eq!(env.to_json_string().unwrap(), s);
    }

    #[test]
    fn malformed_json() {
        assert!(matches!(
            Envelope::from_json_slice(b"{\"json\":"),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            Envelope::from_json_slice(br#"{"meta":[]}"#),
            Err(CodecError::Json(_))
        ));
    }
}
