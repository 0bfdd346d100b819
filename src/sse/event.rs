// SPDX-License-Identifier: Apache-2.0

//! Values over the event protocol.
//!
//! A stream of values travels as `message` events, ends with one `done`
//! event carrying the completion value, or with one `error` event carrying an
//! application error. Every event's `data` is the value's json envelope, and
//! the value's side-channel meta becomes the event's `id`, `retry`, and
//! comments.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};

use super::{decode_event_stream, encode, EventMessage};
use crate::codec::{deserialize, serialize, Envelope};
use crate::error::StreamError;
use crate::meta::{get_event_meta, with_event_meta, EventMeta};
use crate::stream::{EventSource, Pull};
use crate::value::Value;

const EVENT_MESSAGE: &str = "message";
const EVENT_ERROR: &str = "error";
const EVENT_DONE: &str = "done";

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Message(Value),
    Error(Value),
    Done(Value),
}

/// Build the event message for `event`. Blobs are not supported in events.
pub fn encode_event(event: ServerEvent) -> Result<EventMessage, StreamError> {
    let (name, value) = match event {
        ServerEvent::Message(v) => (EVENT_MESSAGE, v),
        ServerEvent::Error(v) => (EVENT_ERROR, v),
        ServerEvent::Done(v) => (EVENT_DONE, v),
    };
    let meta = get_event_meta(&value).cloned().unwrap_or_default();
    let data = serialize(value).to_json_string()?;
    Ok(EventMessage {
        event: Some(name.to_string()),
        id: meta.id,
        data: Some(data),
        retry: meta.retry,
        comments: meta.comments,
    })
}

fn decode_parts(message: EventMessage) -> Result<Option<(ServerEvent, EventMeta)>, StreamError> {
    let wrap: fn(Value) -> ServerEvent = match message.event.as_deref() {
        Some(EVENT_MESSAGE) => ServerEvent::Message,
        Some(EVENT_ERROR) => ServerEvent::Error,
        Some(EVENT_DONE) => ServerEvent::Done,
        other => {
            log::trace!("skipping event {:?}", other);
            return Ok(None);
        }
    };
    let value = match &message.data {
        Some(data) => deserialize(Envelope::from_json_slice(data.as_bytes())?)?,
        None => Value::Undefined,
    };
    let meta = EventMeta {
        id: message.id,
        retry: message.retry,
        comments: message.comments,
    };
    Ok(Some((wrap(value), meta)))
}

/// Recover the logical event from a message, with the message's meta
/// attached to the value. Messages that are not value events (keep-alive
/// comments, unknown names) yield `None`.
pub fn decode_event(message: EventMessage) -> Result<Option<ServerEvent>, StreamError> {
    Ok(decode_parts(message)?.map(|(event, meta)| match event {
        ServerEvent::Message(v) => ServerEvent::Message(with_event_meta(v, meta)),
        ServerEvent::Error(v) => ServerEvent::Error(with_event_meta(v, meta)),
        ServerEvent::Done(v) => ServerEvent::Done(with_event_meta(v, meta)),
    }))
}

/// Client side: an [`EventSource`] reading values from a byte stream.
///
/// An `error` event fails the pull with [`StreamError::Remote`], carrying the
/// event's meta. A stream that ends without `done` completes with no value.
pub struct EventStreamSource {
    messages: BoxStream<'static, Result<EventMessage, StreamError>>,
    done: bool,
}

impl EventStreamSource {
    pub fn new<S, B, E>(chunks: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        Self {
            messages: decode_event_stream(chunks).boxed(),
            done: false,
        }
    }
}

#[async_trait]
impl EventSource for EventStreamSource {
    type Item = Value;

    async fn next(&mut self) -> Result<Pull<Value>, StreamError> {
        if self.done {
            return Ok(Pull::Done(None));
        }
        while let Some(message) = self.messages.next().await {
            let parts = message.and_then(decode_parts);
            let (event, meta) = match parts {
                Ok(Some(parts)) => parts,
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            };
            return match event {
                ServerEvent::Message(v) => Ok(Pull::Item(with_event_meta(v, meta))),
                ServerEvent::Done(v) => {
                    self.done = true;
                    Ok(Pull::Done(Some(with_event_meta(v, meta))))
                }
                ServerEvent::Error(v) => {
                    self.done = true;
                    Err(with_event_meta(StreamError::remote(v), meta))
                }
            };
        }
        self.done = true;
        Ok(Pull::Done(None))
    }

    async fn close(&mut self) {
        self.done = true;
        // drops the underlying connection
        self.messages = stream::empty().boxed();
    }
}

fn frame(event: ServerEvent) -> Result<Bytes, StreamError> {
    let message = encode_event(event)?;
    Ok(Bytes::from(encode(&message)?))
}

/// Server side: frame every pull from `source` as event bytes.
///
/// Items become `message` events; completion becomes a final `done` event;
/// a [`StreamError::Remote`] becomes a final `error` event. Any other error
/// ends the byte stream with that error. The source is closed when the
/// stream ends.
pub fn encode_event_stream<S>(source: S) -> impl Stream<Item = Result<Bytes, StreamError>>
where
    S: EventSource<Item = Value>,
{
    stream::unfold(Some(source), |state| async move {
        let mut source = state?;
        let (event, last) = match source.next().await {
            Ok(Pull::Item(v)) => (ServerEvent::Message(v), false),
            Ok(Pull::Done(v)) => (ServerEvent::Done(v.unwrap_or_default()), true),
            Err(StreamError::Remote { value, meta }) => {
                let meta = meta.map(|m| *m).unwrap_or_default();
                (ServerEvent::Error(with_event_meta(value, meta)), true)
            }
            Err(e) => {
                source.close().await;
                return Some((Err(e), None));
            }
        };
        match frame(event) {
            Ok(bytes) if !last => Some((Ok(bytes), Some(source))),
            result => {
                source.close().await;
                Some((result, None))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::IterSource;
    use crate::value::{Blob, Timestamp};

    fn meta() -> EventMeta {
        EventMeta::default().with_id("42").with_retry(1000).with_comment("hi")
    }

    #[test]
    fn message_event_wire_form() {
        let value = with_event_meta(Value::object([("n", Value::bigint(1))]), meta());
        let message = encode_event(ServerEvent::Message(value)).unwrap();
        assert_eq!(
            encode(&message).unwrap(),
            ": hi\nevent: message\nretry: 1000\nid: 42\ndata: {\"json\":{\"n\":\"1\"},\"meta\":[[\"bigint\",[\"n\"]]]}\n\n"
        );
    }

    #[test]
    fn event_roundtrip_keeps_meta() {
        let value = with_event_meta(
            Value::array([Value::from(Timestamp::from_millis(9)), Value::from(f64::NAN)]),
            meta(),
        );
        let message = encode_event(ServerEvent::Done(value.clone())).unwrap();
        let decoded = decode_event(message).unwrap().unwrap();
        match decoded {
            ServerEvent::Done(v) => {
                assert_eq!(v, value);
                assert_eq!(get_event_meta(&v), Some(&meta()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn keepalive_and_unknown_events_are_skipped() {
        let keepalive = EventMessage {
            comments: vec!["".into()],
            ..Default::default()
        };
        assert_eq!(decode_event(keepalive).unwrap(), None);
        let other = EventMessage {
            event: Some("ping".into()),
            ..Default::default()
        };
        assert_eq!(decode_event(other).unwrap(), None);
    }

    #[test]
    fn blobs_are_rejected() {
        let value = Value::from(Blob::new("a/b", &b"x"[..]));
        assert!(matches!(
            encode_event(ServerEvent::Message(value)),
            Err(StreamError::Codec(_))
        ));
    }

    #[test]
    fn bad_data_is_a_codec_error() {
        let message = EventMessage {
            event: Some("message".into()),
            data: Some("{not json".into()),
            ..Default::default()
        };
        let err = decode_event(message).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn server_to_client() {
        let items = vec![
            with_event_meta(Value::object([("i", Value::from(1))]), EventMeta::default().with_id("1")),
            Value::from("two"),
        ];
        let server = IterSource::items(items.clone(), Some(Value::from(3)));
        let bytes: Vec<Result<Bytes, StreamError>> = encode_event_stream(server).collect().await;
        assert_eq!(bytes.len(), 3);

        let mut client = EventStreamSource::new(stream::iter(bytes));
        let first = client.next().await.unwrap();
        assert_eq!(first, Pull::Item(items[0].clone()));
        assert_eq!(
            first.value().and_then(get_event_meta).and_then(|m| m.id.as_deref()),
            Some("1")
        );
        assert_eq!(client.next().await.unwrap(), Pull::Item(Value::from("two")));
        assert_eq!(client.next().await.unwrap(), Pull::Done(Some(Value::from(3))));
        assert_eq!(client.next().await.unwrap(), Pull::Done(None));
    }

    #[tokio::test]
    async fn remote_error_event() {
        let err = with_event_meta(
            StreamError::remote(Value::from("nope")),
            EventMeta::default().with_id("7"),
        );
        let server = IterSource::new([Ok(Pull::Item(Value::from(1))), Err(err)]);
        let bytes: Vec<_> = encode_event_stream(server).collect().await;
        assert_eq!(bytes.len(), 2);

        let mut client = EventStreamSource::new(stream::iter(bytes));
        assert_eq!(client.next().await.unwrap(), Pull::Item(Value::from(1)));
        let err = client.next().await.unwrap_err();
        match &err {
            StreamError::Remote { value, .. } => assert_eq!(value, &Value::from("nope")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(get_event_meta(&err).and_then(|m| m.id.as_deref()), Some("7"));
    }

    #[tokio::test]
    async fn stream_end_without_done() {
        let chunks: Vec<Result<&'static [u8], std::io::Error>> = vec![Ok(
            &b"event: message\ndata: {\"json\":5}\n\n"[..],
        )];
        let mut client = EventStreamSource::new(stream::iter(chunks));
        assert_eq!(client.next().await.unwrap(), Pull::Item(Value::from(5)));
        assert_eq!(client.next().await.unwrap(), Pull::Done(None));
    }

    #[tokio::test]
    async fn close_stops_reading() {
        let chunks: Vec<Result<&'static [u8], std::io::Error>> = vec![
            Ok(&b"event: message\ndata: {\"json\":1}\n\n"[..]),
            Ok(&b"event: message\ndata: {\"json\":2}\n\n"[..]),
        ];
        let mut client = EventStreamSource::new(stream::iter(chunks));
        assert_eq!(client.next().await.unwrap(), Pull::Item(Value::from(1)));
        client.close().await;
        assert_eq!(client.next().await.unwrap(), Pull::Done(None));
    }
}
