// SPDX-License-Identifier: Apache-2.0

//! The dynamic value tree that flows through the codec.
//!
//! [`Value`] covers everything plain JSON does, plus the richer scalars an RPC
//! payload tends to carry: big integers, timestamps, NaN, regular expressions,
//! URLs, sets, maps, binary blobs and the "no value" sentinel
//! ([`Value::Undefined`]).
//!
//! Equality is deep and structural: NaN equals NaN, object keys compare
//! regardless of order, and side-channel [`EventMeta`](crate::meta::EventMeta)
//! never takes part.

use std::fmt;
use std::ops::{Deref, DerefMut};

use bytes::Bytes;
use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::meta::MetaSlot;

// ----- Value ----------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    BigInt(i128),
    Date(Timestamp),
    RegExp(RegExp),
    Url(String),
    Array(Array),
    Object(Object),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Blob(Blob),
}

impl Value {
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(items.into_iter().collect())
    }

    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(entries.into_iter().collect())
    }

    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Set(items.into_iter().collect())
    }

    pub fn map(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Value::Map(pairs.into_iter().collect())
    }

    pub fn url(url: impl Into<String>) -> Self {
        Value::Url(url.into())
    }

    pub fn bigint(n: i128) -> Self {
        Value::BigInt(n)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::BigInt(_) => "bigint",
            Value::Date(_) => "date",
            Value::RegExp(_) => "regexp",
            Value::Url(_) => "url",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Blob(_) => "blob",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Undefined, Undefined) | (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Number(a), Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (String(a), String(b)) => a == b,
            (BigInt(a), BigInt(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (RegExp(a), RegExp(b)) => a == b,
            (Url(a), Url(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            (Set(a), Set(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Blob(a), Blob(b)) => a == b,
            _ => false,
        }
    }
}

// ----- Composites -----------------------------------------------------------

/// An ordered sequence. Derefs to `Vec<Value>`.
#[derive(Debug, Clone, Default)]
pub struct Array {
    items: Vec<Value>,
    pub(crate) meta: MetaSlot,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.items
    }
}

impl Deref for Array {
    type Target = Vec<Value>;
    fn deref(&self) -> &Vec<Value> {
        &self.items
    }
}

impl DerefMut for Array {
    fn deref_mut(&mut self) -> &mut Vec<Value> {
        &mut self.items
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Self { items, meta: None }
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl IntoIterator for Array {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;
    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// A string-keyed record that remembers insertion order.
#[derive(Debug, Clone, Default)]
pub struct Object {
    entries: Vec<(String, Value)>,
    pub(crate) meta: MetaSlot,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace `key`. A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).map_or(false, |ov| ov == v))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut obj = Object::new();
        for (k, v) in iter {
            obj.insert(k, v);
        }
        obj
    }
}

impl IntoIterator for Object {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

// ----- Scalars --------------------------------------------------------------

/// Millisecond-precision instant, or the invalid timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    millis: Option<i64>,
}

/// Literal json stand-in for an invalid timestamp.
pub const INVALID_DATE: &str = "Invalid Date";

// Largest distance from the epoch a timestamp may have: 100,000,000 days.
const MAX_TIMESTAMP_MILLIS: i64 = 8_640_000_000_000_000;

impl Timestamp {
    pub fn from_millis(millis: i64) -> Self {
        if millis.unsigned_abs() > MAX_TIMESTAMP_MILLIS as u64 {
            return Self::invalid();
        }
        Self {
            millis: Some(millis),
        }
    }

    pub fn invalid() -> Self {
        Self { millis: None }
    }

    pub fn millis(&self) -> Option<i64> {
        self.millis
    }

    pub fn is_valid(&self) -> bool {
        self.millis.is_some()
    }

    /// `YYYY-MM-DDTHH:MM:SS.mmmZ`, or `None` when the timestamp is invalid.
    /// Years outside `0..=9999` are written with a sign and six digits
    /// (`+275760-09-13T00:00:00.000Z`, `-000001-01-01T00:00:00.000Z`).
    pub fn to_iso_string(&self) -> Option<String> {
        let millis = self.millis?;
        let dt = OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()?;
        let year = dt.year();
        let year = if (0..=9999).contains(&year) {
            format!("{:04}", year)
        } else {
            let sign = if year < 0 { '-' } else { '+' };
            format!("{}{:06}", sign, year.unsigned_abs())
        };
        Some(format!(
            "{}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
            year,
            u8::from(dt.month()),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            dt.millisecond()
        ))
    }

    /// Parse the extended-year form written by
    /// [`to_iso_string`](Self::to_iso_string), or any RFC 3339 string.
    /// Anything else yields the invalid timestamp.
    pub fn parse(s: &str) -> Self {
        if let Some(ts) = parse_extended_year(s) {
            return ts;
        }
        match OffsetDateTime::parse(s, &Rfc3339) {
            Ok(dt) => Self::from(dt),
            Err(_) => Self::invalid(),
        }
    }
}

/// `±YYYYYY-MM-DDTHH:MM:SS.mmmZ`
fn parse_extended_year(s: &str) -> Option<Timestamp> {
    if !s.is_ascii() || s.len() != 27 {
        return None;
    }
    let negative = match s.as_bytes()[0] {
        b'+' => false,
        b'-' => true,
        _ => return None,
    };
    let b = s.as_bytes();
    let separators = [(7, b'-'), (10, b'-'), (13, b'T'), (16, b':'), (19, b':'), (22, b'.'), (26, b'Z')];
    if separators.iter().any(|&(i, c)| b[i] != c) {
        return None;
    }
    let num = |from: usize, to: usize| -> Option<u32> {
        let digits = &s[from..to];
        if digits.bytes().all(|c| c.is_ascii_digit()) {
            digits.parse().ok()
        } else {
            None
        }
    };
    let year = num(1, 7)? as i32;
    // negative zero is not a year
    if negative && year == 0 {
        return None;
    }
    let year = if negative { -year } else { year };
    let month = Month::try_from(u8::try_from(num(8, 10)?).ok()?).ok()?;
    let date = Date::from_calendar_date(year, month, u8::try_from(num(11, 13)?).ok()?).ok()?;
    let time = Time::from_hms_milli(
        u8::try_from(num(14, 16)?).ok()?,
        u8::try_from(num(17, 19)?).ok()?,
        u8::try_from(num(20, 22)?).ok()?,
        u16::try_from(num(23, 26)?).ok()?,
    )
    .ok()?;
    Some(Timestamp::from(PrimitiveDateTime::new(date, time).assume_utc()))
}

impl From<OffsetDateTime> for Timestamp {
    fn from(dt: OffsetDateTime) -> Self {
        let nanos = dt.to_offset(UtcOffset::UTC).unix_timestamp_nanos();
        match i64::try_from(nanos.div_euclid(1_000_000)) {
            Ok(millis) => Self::from_millis(millis),
            Err(_) => Self::invalid(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_iso_string() {
            Some(s) => f.write_str(&s),
            None => f.write_str(INVALID_DATE),
        }
    }
}

/// A regular expression carried as its source and flags. It is never
/// compiled here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegExp {
    pub source: String,
    pub flags: String,
}

impl RegExp {
    pub fn new(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: flags.into(),
        }
    }

    /// Parse the `/source/flags` form. Flags must be ascii lowercase letters.
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix('/')?;
        let end = rest.rfind('/')?;
        let (source, flags) = (&rest[..end], &rest[end + 1..]);
        if !flags.bytes().all(|b| b.is_ascii_lowercase()) {
            return None;
        }
        Some(Self::new(source, flags))
    }
}

impl fmt::Display for RegExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags)
    }
}

/// Opaque binary payload with its declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub content_type: String,
    pub bytes: Bytes,
}

pub const DEFAULT_BLOB_TYPE: &str = "application/octet-stream";

impl Blob {
    pub fn new(content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

// ----- Conversions ----------------------------------------------------------

macro_rules! implfrom {
    ($($fromtype:ty => $enum:ident::$variant:ident),+ $(,)?) => {
        $(
            impl From<$fromtype> for $enum {
                #[inline]
                fn from(value: $fromtype) -> Self {
                    Self::$variant(value.into())
                }
            }
        )+
    };
}

implfrom! {
    bool => Value::Bool,

    f64 => Value::Number,
    f32 => Value::Number,
    i32 => Value::Number,
    u32 => Value::Number,
    i16 => Value::Number,
    u16 => Value::Number,
    i8 => Value::Number,
    u8 => Value::Number,

    String => Value::String,
    &str => Value::String,

    Vec<Value> => Value::Array,
    Array => Value::Array,
    Object => Value::Object,

    Timestamp => Value::Date,
    OffsetDateTime => Value::Date,
    RegExp => Value::RegExp,
    Blob => Value::Blob,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Undefined, Into::into)
    }
}
