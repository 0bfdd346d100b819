// SPDX-License-Identifier: Apache-2.0

//! Out-of-band event metadata.
//!
//! An [`EventMeta`] rides along with a value (stream position, retry hint,
//! comments) without becoming part of it: a value with meta attached still
//! compares equal to the same value without, and the codec never sees it.

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::value::Value;

/// Metadata carried next to an event value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
}

impl EventMeta {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.retry.is_none() && self.comments.is_empty()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_retry(mut self, retry: u64) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comments.push(comment.into());
        self
    }
}

/// Hidden storage for an [`EventMeta`]. Boxed so an empty slot stays one word.
pub type MetaSlot = Option<Box<EventMeta>>;

/// Types that may hold an [`EventMeta`] out of band.
///
/// Only some shapes can carry meta: `Value::Array` and `Value::Object` can,
/// scalars cannot.
pub trait EventMetaSlot {
    fn meta_slot(&self) -> Option<&MetaSlot>;
    fn meta_slot_mut(&mut self) -> Option<&mut MetaSlot>;
}

impl EventMetaSlot for Value {
    fn meta_slot(&self) -> Option<&MetaSlot> {
        match self {
            Value::Array(a) => Some(&a.meta),
            Value::Object(o) => Some(&o.meta),
            _ => None,
        }
    }

    fn meta_slot_mut(&mut self) -> Option<&mut MetaSlot> {
        match self {
            Value::Array(a) => Some(&mut a.meta),
            Value::Object(o) => Some(&mut o.meta),
            _ => None,
        }
    }
}

impl EventMetaSlot for StreamError {
    fn meta_slot(&self) -> Option<&MetaSlot> {
        match self {
            StreamError::Source { meta, .. } | StreamError::Remote { meta, .. } => Some(meta),
            _ => None,
        }
    }

    fn meta_slot_mut(&mut self) -> Option<&mut MetaSlot> {
        match self {
            StreamError::Source { meta, .. } | StreamError::Remote { meta, .. } => Some(meta),
            _ => None,
        }
    }
}

/// Attach `meta` to `value`.
///
/// An empty `meta` hands `value` back untouched, as does a value that cannot
/// carry meta. Otherwise any previously attached meta is replaced.
pub fn with_event_meta<T: EventMetaSlot>(mut value: T, meta: EventMeta) -> T {
    if meta.is_empty() {
        return value;
    }
    match value.meta_slot_mut() {
        Some(slot) => *slot = Some(Box::new(meta)),
        None => log::trace!("dropping event meta for value that cannot carry it"),
    }
    value
}

/// Read the meta attached to `value`, if any.
pub fn get_event_meta<T: EventMetaSlot>(value: &T) -> Option<&EventMeta> {
    value.meta_slot()?.as_deref()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::object([("a", Value::from(1)), ("b", Value::array([Value::from("x")]))])
    }

    #[test]
    fn empty_meta_is_noop() {
        let v = with_event_meta(sample(), EventMeta::default());
        assert!(get_event_meta(&v).is_none());
        assert!(v.meta_slot().expect("object has slot").is_none());
    }

    #[test]
    fn empty_meta_keeps_existing_meta() {
        let meta = EventMeta::default().with_id("1");
        let v = with_event_meta(sample(), meta.clone());
        let v = with_event_meta(v, EventMeta::default());
        assert_eq!(get_event_meta(&v), Some(&meta));
    }

    #[test]
    fn attach_and_read() {
        let meta = EventMeta::default()
            .with_id("evt-1")
            .with_retry(5000)
            .with_comment("hello");
        let v = with_event_meta(sample(), meta.clone());
        assert_eq!(get_event_meta(&v), Some(&meta));
        // invisible to equality
        assert_eq!(v, sample());
    }

    #[test]
    fn array_carries_meta() {
        let meta = EventMeta::default().with_retry(10);
        let v = with_event_meta(Value::array([Value::from(1)]), meta.clone());
        assert_eq!(get_event_meta(&v), Some(&meta));
    }

    #[test]
    fn scalars_cannot_carry_meta() {
        let v = with_event_meta(Value::from(42), EventMeta::default().with_id("1"));
        assert_eq!(v, Value::from(42));
        assert!(get_event_meta(&v).is_none());
        assert!(get_event_meta(&Value::Null).is_none());
    }

    #[test]
    fn errors_carry_meta() {
        let err = with_event_meta(
            StreamError::failed("reset"),
            EventMeta::default().with_id("7"),
        );
        assert_eq!(get_event_meta(&err).and_then(|m| m.id.as_deref()), Some("7"));
    }
}
