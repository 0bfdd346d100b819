// SPDX-License-Identifier: Apache-2.0

//! Line-framed push events.
//!
//! One message is a block of `key: value` lines closed by a blank line:
//!
//! ```text
//! : keep this connection warm
//! event: message
//! retry: 3000
//! id: 42
//! data: {"json":"first line
//! data: second line"}
//!
//! ```
//!
//! Comments come first, then `event`, `retry`, `id`, and one `data:` line per
//! line of data. This is the grammar any standard text-event consumer reads.

use crate::error::FramingError;

pub mod decoder;
pub mod event;

pub use decoder::{decode_event_stream, EventDecoder};
pub use event::{decode_event, encode_event, encode_event_stream, EventStreamSource, ServerEvent};

/// A single event block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMessage {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: Option<String>,
    pub retry: Option<u64>,
    pub comments: Vec<String>,
}

fn check_line(field: &'static str, value: &str) -> Result<(), FramingError> {
    if value.contains('\n') {
        return Err(FramingError::NewlineInField { field });
    }
    Ok(())
}

/// Encode `message` as one block. Nothing is produced if any field is
/// invalid.
pub fn encode(message: &EventMessage) -> Result<String, FramingError> {
    for comment in &message.comments {
        check_line("comment", comment)?;
    }
    if let Some(event) = &message.event {
        check_line("event", event)?;
    }
    if let Some(id) = &message.id {
        check_line("id", id)?;
    }

    let mut out = String::new();
    for comment in &message.comments {
        out.push_str(": ");
        out.push_str(comment);
        out.push('\n');
    }
    if let Some(event) = &message.event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    if let Some(retry) = message.retry {
        out.push_str(&format!("retry: {}\n", retry));
    }
    if let Some(id) = &message.id {
        out.push_str("id: ");
        out.push_str(id);
        out.push('\n');
    }
    if let Some(data) = message.data.as_deref().filter(|d| !d.is_empty()) {
        for line in data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out.push('\n');
    Ok(out)
}

/// Accept only canonical non-negative decimal integers: no sign, no leading
/// zeros, no fraction.
fn parse_retry(value: &str) -> Option<u64> {
    let n: u64 = value.parse().ok()?;
    if n.to_string() == value {
        Some(n)
    } else {
        None
    }
}

/// Decode one block. Never fails: unknown keys and bad `retry` values are
/// skipped. For `event`, `id` and `retry` the last occurrence wins; `data`
/// lines accumulate.
pub fn decode(text: &str) -> EventMessage {
    let mut message = EventMessage::default();
    let mut data: Option<String> = None;

    for line in text.trim_end_matches(['\n', '\r']).split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let (key, value) = match line.find(':') {
            Some(i) => {
                let value = &line[i + 1..];
                (&line[..i], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };
        match key {
            "" if line.starts_with(':') => message.comments.push(value.to_string()),
            "data" => {
                let buf = data.get_or_insert_with(String::new);
                buf.push_str(value);
                buf.push('\n');
            }
            "event" => message.event = Some(value.to_string()),
            "id" => message.id = Some(value.to_string()),
            "retry" => match parse_retry(value) {
                Some(retry) => message.retry = Some(retry),
                None => log::trace!("ignoring invalid retry value {:?}", value),
            },
            _ => {}
        }
    }

    message.data = data.map(|mut d| {
        d.pop();
        d
    });
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> EventMessage {
        EventMessage {
            event: Some("message".into()),
            id: Some("123".into()),
            data: Some("hello\nworld".into()),
            retry: Some(3000),
            comments: vec!["c1".into(), "c2".into()],
        }
    }

    #[test]
    fn encode_field_order() {
        assert_eq!(
            encode(&full()).unwrap(),
            ": c1\n: c2\nevent: message\nretry: 3000\nid: 123\ndata: hello\ndata: world\n\n"
        );
    }

    #[test]
    fn encode_empty() {
        assert_eq!(encode(&EventMessage::default()).unwrap(), "\n");
        let m = EventMessage {
            data: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(encode(&m).unwrap(), "\n");
    }

    #[test]
    fn encode_rejects_newlines() {
        for m in [
            EventMessage { event: Some("a\nb".into()), ..Default::default() },
            EventMessage { id: Some("a\n".into()), ..Default::default() },
            EventMessage { comments: vec!["ok".into(), "\n".into()], ..Default::default() },
        ] {
            assert!(matches!(encode(&m), Err(FramingError::NewlineInField { .. })));
        }
    }

    #[test]
    fn decode_inverts_encode() {
        let m = full();
        assert_eq!(decode(&encode(&m).unwrap()), m);

        let m = EventMessage {
            data: Some("\n\ntrailing blank lines\n\n".into()),
            ..Default::default()
        };
        assert_eq!(decode(&encode(&m).unwrap()), m);
    }

    #[test]
    fn decode_last_wins_for_scalar_keys() {
        let m = decode("event: a\nid: 1\nretry: 5\nevent: b\nid: 2\nretry: 6\n\n");
        assert_eq!(m.event.as_deref(), Some("b"));
        assert_eq!(m.id.as_deref(), Some("2"));
        assert_eq!(m.retry, Some(6));
    }

    #[test]
    fn decode_data_accumulates() {
        let m = decode("data: a\ndata: a\ndata:b\n\n");
        assert_eq!(m.data.as_deref(), Some("a\na\nb"));
    }

    #[test]
    fn decode_comments_and_unknown_keys() {
        let m = decode(": one\n:two\nfoo: bar\nnocolon\n\n");
        assert_eq!(m.comments, ["one", "two"]);
        assert_eq!(m, EventMessage { comments: m.comments.clone(), ..Default::default() });
    }

    #[test]
    fn decode_invalid_retry_ignored() {
        for bad in ["1.5", "-1", "Infinity", "12abc", "01", "", " 5"] {
            let m = decode(&format!("retry: {}\n\n", bad));
            assert_eq!(m.retry, None, "retry {:?}", bad);
        }
        assert_eq!(decode("retry: 0\n\n").retry, Some(0));
    }

    #[test]
    fn decode_crlf() {
        let m = decode("event: x\r\ndata: y\r\n\r\n");
        assert_eq!(m.event.as_deref(), Some("x"));
        assert_eq!(m.data.as_deref(), Some("y"));
    }

    #[test]
    fn value_keeps_extra_spaces() {
        let m = decode("data:  two spaces\n\n");
        assert_eq!(m.data.as_deref(), Some(" two spaces"));
    }
}
