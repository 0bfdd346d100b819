// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use thiserror::Error;

use crate::codec::MetaKind;
use crate::meta::MetaSlot;
use crate::value::Value;

/// Broad failure categories, for callers that need to tell "gave up after N
/// attempts" apart from "the payload is broken".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    DecodeFailed,
    FramingIncomplete,
    InvalidEvent,
    RetryExceeded,
    Source,
    Remote,
}

/// Errors from the structural codec and the binary multiplexer.
///
/// Decoding is all-or-nothing: an error means no value was produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("malformed json: {0}")]
    Json(String),

    #[error("missing multipart part `{0}`")]
    MissingPart(String),

    #[error("malformed multipart body: {0}")]
    Multipart(String),

    #[error("path {path} does not exist in payload")]
    InvalidPath { path: String },

    #[error("invalid {kind} payload at {path}")]
    InvalidMeta { kind: MetaKind, path: String },

    #[error("value cannot be represented as json: {0}")]
    Unrepresentable(&'static str),

    #[cfg(feature = "cbor")]
    #[error("cbor error: {0}")]
    Cbor(String),
}

/// Errors from the event message framer and the streaming decoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("event {field} must not contain a newline")]
    NewlineInField { field: &'static str },

    #[error("event stream is not valid utf-8")]
    InvalidUtf8,

    #[error("event stream ended before the last message was complete ({pending} bytes pending)")]
    Incomplete { pending: usize },
}

/// Errors surfaced while pulling from an event source.
///
/// `Source` and `Remote` are the retryable kinds: a resilient source hands
/// them to its reconnect procedure. Everything else is structural and ends
/// the stream.
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    #[error("event source failed: {error}")]
    Source {
        #[source]
        error: Arc<dyn std::error::Error + Send + Sync>,
        meta: MetaSlot,
    },

    #[error("remote sent error event: {value:?}")]
    Remote { value: Value, meta: MetaSlot },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("exceeded maximum retry attempts ({attempts}) for event source, possible infinite loop")]
    RetryExceeded {
        attempts: u32,
        #[source]
        cause: Box<StreamError>,
    },
}

/// Errors from a blocking [`Transport`](crate::transport::Transport) or
/// [`BufTransport`](crate::transport::BufTransport).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[cfg(feature = "cbor")]
    #[error("encode error: {0}")]
    Encode(String),

    #[cfg(feature = "cbor")]
    #[error("decode error{}: {msg}",
        .pos.map(|p| format!(" at pos {}", p)).unwrap_or_default()
    )]
    Decode { msg: String, pos: Option<usize> },
}

#[cfg(feature = "cbor")]
impl<E> From<ciborium::ser::Error<E>> for TransportError
where
    TransportError: From<E>,
{
    fn from(err: ciborium::ser::Error<E>) -> Self {
        use ciborium::ser::Error::*;
        match err {
            Io(e) => e.into(),
            Value(s) => TransportError::Encode(s),
        }
    }
}

#[cfg(feature = "cbor")]
impl<E> From<ciborium::de::Error<E>> for TransportError
where
    TransportError: From<E>,
{
    fn from(err: ciborium::de::Error<E>) -> Self {
        use ciborium::de::Error::*;
        match err {
            Io(e) => TransportError::from(e),
            Semantic(pos, msg) => TransportError::Decode { msg, pos },
            Syntax(pos) => TransportError::Decode {
                msg: "syntax error".into(),
                pos: Some(pos),
            },
            RecursionLimitExceeded => TransportError::Decode {
                msg: "recursion limit exceeded".into(),
                pos: None,
            },
        }
    }
}

impl StreamError {
    /// Wrap an arbitrary transport or handler error as a retryable failure.
    pub fn failed(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Source {
            error: Arc::from(error.into()),
            meta: None,
        }
    }

    /// An application-level error value sent by the peer.
    pub fn remote(value: Value) -> Self {
        Self::Remote { value, meta: None }
    }

    /// Returns `true` for errors a reconnect may recover from.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source { .. } | Self::Remote { .. })
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Source { .. } => ErrorCategory::Source,
            Self::Remote { .. } => ErrorCategory::Remote,
            Self::Codec(_) => ErrorCategory::DecodeFailed,
            Self::Framing(FramingError::Incomplete { .. }) => ErrorCategory::FramingIncomplete,
            Self::Framing(_) => ErrorCategory::InvalidEvent,
            Self::RetryExceeded { .. } => ErrorCategory::RetryExceeded,
        }
    }
}
