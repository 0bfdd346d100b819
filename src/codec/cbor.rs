// SPDX-License-Identifier: Apache-2.0

//! CBOR interop.
//!
//! CBOR can say natively most of what json needs meta for, so values map
//! straight onto `ciborium` values using the registered tags:
//!
//! | value     | cbor                                   |
//! |-----------|----------------------------------------|
//! | number    | float, even when integral              |
//! | bigint    | integer, or tag 2/3 bignum when wider  |
//! | date      | tag 0 text, or tag 1 NaN when invalid  |
//! | url       | tag 32 text                            |
//! | regexp    | tag 35 text (`/source/flags`)          |
//! | set       | tag 258 array                          |
//! | map       | map                                    |
//! | blob      | bytes (content type is not kept)       |
//!
//! `Undefined` has no ciborium spelling and goes out as null, and a map whose
//! keys are all strings comes back as an object.

use std::convert::TryFrom;

use ciborium::value::{Integer, Value as Cbor};

use crate::error::CodecError;
use crate::value::{Blob, RegExp, Timestamp, Value, DEFAULT_BLOB_TYPE, INVALID_DATE};

pub const TAG_DATE_TEXT: u64 = 0;
pub const TAG_DATE_EPOCH: u64 = 1;
pub const TAG_POS_BIGNUM: u64 = 2;
pub const TAG_NEG_BIGNUM: u64 = 3;
pub const TAG_URI: u64 = 32;
pub const TAG_REGEXP: u64 = 35;
pub const TAG_SET: u64 = 258;

fn bignum_bytes(n: u128) -> Vec<u8> {
    let bytes = n.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

fn bignum_from_bytes(bytes: &[u8]) -> Option<u128> {
    if bytes.len() > 16 {
        return None;
    }
    Some(bytes.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)))
}

fn bigint_to_cbor(n: i128) -> Cbor {
    if let Ok(i) = Integer::try_from(n) {
        return Cbor::Integer(i);
    }
    // ciborium covers -2^64..2^64; wider values need a bignum
    if n >= 0 {
        Cbor::Tag(TAG_POS_BIGNUM, Box::new(Cbor::Bytes(bignum_bytes(n as u128))))
    } else {
        // tag 3 stores -1 - n
        let m = (-1 - n) as u128;
        Cbor::Tag(TAG_NEG_BIGNUM, Box::new(Cbor::Bytes(bignum_bytes(m))))
    }
}

impl From<Value> for Cbor {
    fn from(value: Value) -> Self {
        match value {
            Value::Undefined | Value::Null => Cbor::Null,
            Value::Bool(b) => Cbor::Bool(b),
            Value::Number(n) => Cbor::Float(n),
            Value::String(s) => Cbor::Text(s),
            Value::BigInt(n) => bigint_to_cbor(n),
            Value::Date(ts) => match ts.to_iso_string() {
                Some(iso) => Cbor::Tag(TAG_DATE_TEXT, Box::new(Cbor::Text(iso))),
                None => Cbor::Tag(TAG_DATE_EPOCH, Box::new(Cbor::Float(f64::NAN))),
            },
            Value::RegExp(re) => Cbor::Tag(TAG_REGEXP, Box::new(Cbor::Text(re.to_string()))),
            Value::Url(url) => Cbor::Tag(TAG_URI, Box::new(Cbor::Text(url))),
            Value::Array(items) => Cbor::Array(items.into_iter().map(Cbor::from).collect()),
            Value::Object(obj) => Cbor::Map(
                obj.into_iter()
                    .map(|(k, v)| (Cbor::Text(k), Cbor::from(v)))
                    .collect(),
            ),
            Value::Set(items) => Cbor::Tag(
                TAG_SET,
                Box::new(Cbor::Array(items.into_iter().map(Cbor::from).collect())),
            ),
            Value::Map(pairs) => Cbor::Map(
                pairs
                    .into_iter()
                    .map(|(k, v)| (Cbor::from(k), Cbor::from(v)))
                    .collect(),
            ),
            Value::Blob(blob) => Cbor::Bytes(blob.bytes.to_vec()),
        }
    }
}

fn invalid(what: &str) -> CodecError {
    CodecError::Cbor(format!("invalid {}", what))
}

impl TryFrom<Cbor> for Value {
    type Error = CodecError;

    fn try_from(cbor: Cbor) -> Result<Self, Self::Error> {
        Ok(match cbor {
            Cbor::Null => Value::Null,
            Cbor::Bool(b) => Value::Bool(b),
            Cbor::Float(f) => Value::Number(f),
            Cbor::Text(s) => Value::String(s),
            Cbor::Bytes(b) => Value::Blob(Blob::new(DEFAULT_BLOB_TYPE, b)),
            // numbers always go out as floats, so an integer is a bigint
            Cbor::Integer(i) => Value::BigInt(i128::from(i)),
            Cbor::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Cbor::Map(pairs) => {
                if pairs.iter().all(|(k, _)| k.is_text()) {
                    let mut obj = crate::value::Object::new();
                    for (k, v) in pairs {
                        if let Cbor::Text(k) = k {
                            obj.insert(k, Value::try_from(v)?);
                        }
                    }
                    Value::Object(obj)
                } else {
                    Value::Map(
                        pairs
                            .into_iter()
                            .map(|(k, v)| Ok((Value::try_from(k)?, Value::try_from(v)?)))
                            .collect::<Result<_, CodecError>>()?,
                    )
                }
            }
            Cbor::Tag(tag, inner) => from_tagged(tag, *inner)?,
            _ => return Err(invalid("cbor item")),
        })
    }
}

fn from_tagged(tag: u64, inner: Cbor) -> Result<Value, CodecError> {
    Ok(match (tag, inner) {
        (TAG_DATE_TEXT, Cbor::Text(s)) if s == INVALID_DATE => Value::Date(Timestamp::invalid()),
        (TAG_DATE_TEXT, Cbor::Text(s)) => Value::Date(Timestamp::parse(&s)),
        (TAG_DATE_EPOCH, Cbor::Float(secs)) if secs.is_finite() => {
            Value::Date(Timestamp::from_millis((secs * 1000.0).floor() as i64))
        }
        (TAG_DATE_EPOCH, Cbor::Float(_)) => Value::Date(Timestamp::invalid()),
        (TAG_DATE_EPOCH, Cbor::Integer(secs)) => {
            let millis = i128::from(secs).saturating_mul(1000);
            match i64::try_from(millis) {
                Ok(millis) => Value::Date(Timestamp::from_millis(millis)),
                Err(_) => Value::Date(Timestamp::invalid()),
            }
        }
        (TAG_POS_BIGNUM, Cbor::Bytes(b)) => {
            let n = bignum_from_bytes(&b).ok_or_else(|| invalid("bignum"))?;
            Value::BigInt(i128::try_from(n).map_err(|_| invalid("bignum"))?)
        }
        (TAG_NEG_BIGNUM, Cbor::Bytes(b)) => {
            let m = bignum_from_bytes(&b).ok_or_else(|| invalid("bignum"))?;
            let m = i128::try_from(m).map_err(|_| invalid("bignum"))?;
            Value::BigInt(-1 - m)
        }
        (TAG_URI, Cbor::Text(s)) => Value::Url(s),
        (TAG_REGEXP, Cbor::Text(s)) => {
            Value::RegExp(RegExp::parse(&s).unwrap_or_else(|| RegExp::new(s, "")))
        }
        (TAG_SET, Cbor::Array(items)) => Value::Set(
            items
                .into_iter()
                .map(Value::try_from)
                .collect::<Result<_, _>>()?,
        ),
        (tag, inner) => {
            log::debug!("ignoring unknown cbor tag {}", tag);
            Value::try_from(inner)?
        }
    })
}

pub fn to_cbor_vec(value: Value) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(&Cbor::from(value), &mut out)
        .map_err(|e| CodecError::Cbor(e.to_string()))?;
    Ok(out)
}

pub fn from_cbor_slice(bytes: &[u8]) -> Result<Value, CodecError> {
    let cbor: Cbor =
        ciborium::de::from_reader(bytes).map_err(|e| CodecError::Cbor(e.to_string()))?;
    Value::try_from(cbor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) -> Value {
        from_cbor_slice(&to_cbor_vec(v).unwrap()).unwrap()
    }

    #[test]
    fn rich_values() {
        let v = Value::object([
            ("small", Value::bigint(1 << 60)),
            ("wide", Value::bigint(1i128 << 100)),
            ("neg_wide", Value::bigint(-(1i128 << 100))),
            ("at", Value::from(Timestamp::from_millis(1_700_000_000_123))),
            ("bad_at", Value::from(Timestamp::invalid())),
            ("re", Value::from(RegExp::new("a+", "g"))),
            ("url", Value::url("https://example.com")),
            ("tags", Value::set([Value::from("a"), Value::from("b")])),
            ("pairs", Value::map([(Value::from(1), Value::from("one"))])),
            ("nan", Value::from(f64::NAN)),
        ]);
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn small_bigints_stay_bigints() {
        for n in [0, 5, -5, 1 << 53, i128::from(u64::MAX)] {
            assert_eq!(roundtrip(Value::bigint(n)), Value::bigint(n));
        }
        assert_eq!(roundtrip(Value::from(5)), Value::from(5));
        assert!(matches!(roundtrip(Value::from(5)), Value::Number(_)));
        assert!(matches!(roundtrip(Value::bigint(5)), Value::BigInt(5)));
    }

    #[test]
    fn bytes_become_blobs() {
        let v = Value::from(Blob::new(DEFAULT_BLOB_TYPE, &b"\x00\x01"[..]));
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn bignum_tags() {
        let wide = Cbor::from(Value::bigint(u64::MAX as i128 + 1));
        assert!(matches!(wide, Cbor::Tag(TAG_POS_BIGNUM, _)));
        let neg = Cbor::from(Value::bigint(-(u64::MAX as i128) - 2));
        assert!(matches!(neg, Cbor::Tag(TAG_NEG_BIGNUM, _)));
        assert_eq!(Value::try_from(neg).unwrap(), Value::bigint(-(u64::MAX as i128) - 2));
    }

    #[test]
    fn epoch_dates() {
        let v = Value::try_from(Cbor::Tag(TAG_DATE_EPOCH, Box::new(Cbor::Float(1.5)))).unwrap();
        assert_eq!(v, Value::from(Timestamp::from_millis(1500)));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(from_cbor_slice(&[0xff, 0x00]).is_err());
    }
}
