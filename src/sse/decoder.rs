// SPDX-License-Identifier: Apache-2.0

//! Incremental decoding of an event stream whose chunks may split messages,
//! lines, or utf-8 sequences anywhere.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};

use super::{decode, EventMessage};
use crate::error::{FramingError, StreamError};

const BLOCK_END: &str = "\n\n";

/// Splits a text stream into blocks. Lines may end in `\n` or `\r\n`.
#[derive(Debug, Default)]
pub struct EventDecoder {
    incomplete: String,
    // tail of a utf-8 sequence split across chunks
    pending: Vec<u8>,
    // chunk ended in `\r`; it may be the first half of `\r\n`
    held_cr: bool,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_text(&mut self, mut chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        if std::mem::take(&mut self.held_cr) && !chunk.starts_with('\n') {
            self.incomplete.push('\r');
        }
        if let Some(rest) = chunk.strip_suffix('\r') {
            self.held_cr = true;
            chunk = rest;
        }
        self.incomplete.push_str(&chunk.replace("\r\n", "\n"));
    }

    /// Buffer `chunk` and return every message it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<EventMessage> {
        self.push_text(chunk);
        let last = match self.incomplete.rfind(BLOCK_END) {
            Some(i) => i,
            None => return Vec::new(),
        };
        let rest = self.incomplete.split_off(last + BLOCK_END.len());
        let complete = std::mem::replace(&mut self.incomplete, rest);
        complete[..last]
            .split(BLOCK_END)
            .filter(|block| !block.is_empty())
            .map(decode)
            .collect()
    }

    /// Like [`feed`](Self::feed), for raw bytes.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Result<Vec<EventMessage>, FramingError> {
        self.pending.extend_from_slice(chunk);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => return Err(FramingError::InvalidUtf8),
        };
        let tail = self.pending.split_off(valid);
        let head = std::mem::replace(&mut self.pending, tail);
        let text = String::from_utf8(head).map_err(|_| FramingError::InvalidUtf8)?;
        Ok(self.feed(&text))
    }

    /// Finish the stream. Fails if a message was left half written.
    pub fn end(&mut self) -> Result<(), FramingError> {
        let leftover = self.incomplete.trim_start_matches('\n');
        let pending = leftover.len() + self.pending.len() + usize::from(self.held_cr);
        self.incomplete.clear();
        self.pending.clear();
        self.held_cr = false;
        if pending > 0 {
            return Err(FramingError::Incomplete { pending });
        }
        Ok(())
    }
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    decoder: EventDecoder,
    ready: VecDeque<EventMessage>,
    done: bool,
}

/// Decode a stream of byte chunks into event messages.
///
/// A chunk error ends the stream with a retryable [`StreamError::Source`];
/// malformed or truncated input ends it with a framing error.
pub fn decode_event_stream<S, B, E>(chunks: S) -> impl Stream<Item = Result<EventMessage, StreamError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let state = DecodeState {
        inner: Box::pin(chunks),
        decoder: EventDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(message) = st.ready.pop_front() {
                return Some((Ok(message), st));
            }
            if st.done {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => match st.decoder.feed_bytes(chunk.as_ref()) {
                    Ok(messages) => st.ready.extend(messages),
                    Err(e) => {
                        st.done = true;
                        return Some((Err(e.into()), st));
                    }
                },
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(StreamError::failed(e)), st));
                }
                None => {
                    st.done = true;
                    if let Err(e) = st.decoder.end() {
                        log::debug!("event stream truncated: {}", e);
                        return Some((Err(e.into()), st));
                    }
                }
            }
        }
    })
}
