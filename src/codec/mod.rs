// SPDX-License-Identifier: Apache-2.0

//! Structural JSON codec.
//!
//! [`serialize`] splits a [`Value`] into a plain-JSON mirror plus an ordered
//! list of [`MetaEntry`] annotations; [`deserialize`] replays the annotations
//! against the mirror to rebuild the original value.
//!
//! The envelope looks like this on the wire:
//!
//! ```json
//! {"json": {"id": "123", "at": "2024-01-01T00:00:00.000Z", "tags": ["a"]},
//!  "meta": [["bigint", ["id"]], ["date", ["at"]], ["set", ["tags"]]]}
//! ```
//!
//! Entries are replayed in list order. Set and map entries always come after
//! the entries for their members, so members are restored before the
//! container is rebuilt around them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::value::{RegExp, Timestamp, Value, INVALID_DATE};

pub mod json;
pub mod multipart;
pub mod pack;

#[cfg(feature = "cbor")]
pub mod cbor;

pub use pack::{pack, unpack, Body};

// ----- Envelope types -------------------------------------------------------

/// Which non-JSON type a [`MetaEntry`] restores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaKind {
    BigInt,
    Date,
    NaN,
    Undefined,
    Set,
    Map,
    RegExp,
    Url,
}

impl fmt::Display for MetaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetaKind::BigInt => "bigint",
            MetaKind::Date => "date",
            MetaKind::NaN => "nan",
            MetaKind::Undefined => "undefined",
            MetaKind::Set => "set",
            MetaKind::Map => "map",
            MetaKind::RegExp => "regexp",
            MetaKind::Url => "url",
        })
    }
}

/// One step into a json tree: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

pub type Path = Vec<PathSegment>;

/// Render a path for error messages, e.g. `$.items[2].id`.
pub fn display_path(path: &[PathSegment]) -> String {
    let mut out = String::from("$");
    for seg in path {
        match seg {
            PathSegment::Index(i) => out.push_str(&format!("[{}]", i)),
            PathSegment::Key(k) => {
                out.push('.');
                out.push_str(k);
            }
        }
    }
    out
}

/// `[kind, path]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(MetaKind, Path)", into = "(MetaKind, Path)")]
pub struct MetaEntry {
    pub kind: MetaKind,
    pub path: Path,
}

impl From<(MetaKind, Path)> for MetaEntry {
    fn from((kind, path): (MetaKind, Path)) -> Self {
        Self { kind, path }
    }
}

impl From<MetaEntry> for (MetaKind, Path) {
    fn from(entry: MetaEntry) -> Self {
        (entry.kind, entry.path)
    }
}

/// A json-only mirror of a value plus the annotations needed to restore it.
///
/// `json` only ever holds `Null`, `Bool`, `Number`, `String`, `Array`,
/// `Object`, and `Blob` leaves (the latter are for [`pack`] to pull out).
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub json: Value,
    pub meta: Vec<MetaEntry>,
}

// ----- Serialization --------------------------------------------------------

/// Collects meta entries during the walk. Leaf entries are recorded as they
/// are met; container entries are recorded by `finish_container` once every
/// member has been walked.
struct MetaBuilder {
    entries: Vec<MetaEntry>,
}

impl MetaBuilder {
    fn leaf(&mut self, kind: MetaKind, path: &[PathSegment]) {
        self.entries.push(MetaEntry {
            kind,
            path: path.to_vec(),
        });
    }

    fn finish_container(&mut self, kind: MetaKind, path: &[PathSegment]) {
        self.entries.push(MetaEntry {
            kind,
            path: path.to_vec(),
        });
    }

    fn walk(&mut self, value: Value, path: &mut Path) -> Value {
        match value {
            Value::BigInt(n) => {
                self.leaf(MetaKind::BigInt, path);
                Value::String(n.to_string())
            }
            Value::Date(ts) => {
                self.leaf(MetaKind::Date, path);
                Value::String(ts.to_iso_string().unwrap_or_else(|| INVALID_DATE.to_string()))
            }
            Value::Number(n) if n.is_nan() => {
                self.leaf(MetaKind::NaN, path);
                Value::String("NaN".to_string())
            }
            Value::RegExp(re) => {
                self.leaf(MetaKind::RegExp, path);
                Value::String(re.to_string())
            }
            Value::Url(url) => {
                self.leaf(MetaKind::Url, path);
                Value::String(url)
            }
            Value::Undefined => {
                self.leaf(MetaKind::Undefined, path);
                Value::Null
            }
            Value::Object(obj) => Value::Object(
                obj.into_iter()
                    .map(|(key, field)| {
                        path.push(PathSegment::Key(key.clone()));
                        let field = self.walk(field, path);
                        path.pop();
                        (key, field)
                    })
                    .collect(),
            ),
            Value::Array(items) => self.walk_items(items.into_vec(), path),
            Value::Set(members) => {
                let json = self.walk_items(members, path);
                self.finish_container(MetaKind::Set, path);
                json
            }
            Value::Map(pairs) => {
                let pairs = pairs
                    .into_iter()
                    .map(|(k, v)| Value::array([k, v]))
                    .collect();
                let json = self.walk_items(pairs, path);
                self.finish_container(MetaKind::Map, path);
                json
            }
            other => other,
        }
    }

    fn walk_items(&mut self, items: Vec<Value>, path: &mut Path) -> Value {
        Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    path.push(PathSegment::Index(i));
                    let item = self.walk(item, path);
                    path.pop();
                    item
                })
                .collect(),
        )
    }
}

/// Split `value` into a json mirror and its restoration meta.
pub fn serialize(value: Value) -> Envelope {
    let mut builder = MetaBuilder {
        entries: Vec::new(),
    };
    let json = builder.walk(value, &mut Vec::new());
    Envelope {
        json,
        meta: builder.entries,
    }
}

// ----- Deserialization ------------------------------------------------------

/// Follow `path` from `root`, returning the value it points at.
pub(crate) fn slot_mut<'a>(
    root: &'a mut Value,
    path: &[PathSegment],
) -> Result<&'a mut Value, CodecError> {
    let mut cur = root;
    for seg in path {
        let next = match (cur, seg) {
            (Value::Object(obj), PathSegment::Key(k)) => obj.get_mut(k),
            (Value::Array(items), PathSegment::Index(i)) => items.get_mut(*i),
            // numeric-looking keys arrive as indices
            (Value::Object(obj), PathSegment::Index(i)) => obj.get_mut(&i.to_string()),
            _ => None,
        };
        cur = next.ok_or_else(|| CodecError::InvalidPath {
            path: display_path(path),
        })?;
    }
    Ok(cur)
}

fn restore(kind: MetaKind, value: Value, path: &[PathSegment]) -> Result<Value, CodecError> {
    let invalid = || CodecError::InvalidMeta {
        kind,
        path: display_path(path),
    };
    Ok(match (kind, value) {
        (MetaKind::BigInt, Value::String(s)) => Value::BigInt(s.parse().map_err(|_| invalid())?),
        (MetaKind::Date, Value::String(s)) if s == INVALID_DATE => {
            Value::Date(Timestamp::invalid())
        }
        (MetaKind::Date, Value::String(s)) => Value::Date(Timestamp::parse(&s)),
        (MetaKind::NaN, _) => Value::Number(f64::NAN),
        (MetaKind::Undefined, _) => Value::Undefined,
        (MetaKind::RegExp, Value::String(s)) => Value::RegExp(RegExp::parse(&s).ok_or_else(invalid)?),
        (MetaKind::Url, Value::String(s)) => Value::Url(s),
        (MetaKind::Set, Value::Array(items)) => Value::Set(items.into_vec()),
        (MetaKind::Map, Value::Array(items)) => Value::Map(
            items
                .into_iter()
                .map(|pair| match pair {
                    Value::Array(kv) if kv.len() == 2 => {
                        let mut kv = kv.into_iter();
                        match (kv.next(), kv.next()) {
                            (Some(k), Some(v)) => Ok((k, v)),
                            _ => Err(invalid()),
                        }
                    }
                    _ => Err(invalid()),
                })
                .collect::<Result<_, _>>()?,
        ),
        _ => return Err(invalid()),
    })
}

/// Rebuild the original value from an envelope.
pub fn deserialize(envelope: Envelope) -> Result<Value, CodecError> {
    let Envelope { mut json, meta } = envelope;
    for entry in meta {
        let slot = slot_mut(&mut json, &entry.path)?;
        let value = std::mem::take(slot);
        *slot = restore(entry.kind, value, &entry.path)?;
    }
    Ok(json)
}
