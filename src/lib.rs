// SPDX-License-Identifier: Apache-2.0

//! rpc-wire is the wire layer of a request/response RPC system. It moves
//! rich values (big integers, dates, sets, maps, URLs, regular expressions,
//! binary blobs, `undefined`) across channels that only speak json, text
//! lines, or multipart form data, and gets back values that compare equal
//! to what was sent.
//!
//! The pieces:
//!
//! - [`value`]: the dynamic [`Value`] tree.
//! - [`meta`]: per-event metadata (`id`, `retry`, comments) that rides along
//!   with a value without being part of it.
//! - [`codec`]: the structural json codec (`{"json": .., "meta": [..]}`) and
//!   the multipart multiplexer that moves blobs as separate parts.
//! - [`sse`]: line-framed push events, with an incremental decoder for byte
//!   streams split at arbitrary points.
//! - [`stream`]: pull-based event sources, including [`ResilientSource`],
//!   which reconnects from the last seen event id (at most 99 times in a
//!   row).
//! - [`transport`]: blocking transports for event messages.
//!
//! ```
//! use rpc_wire::codec::{deserialize, serialize};
//! use rpc_wire::Value;
//!
//! let value = Value::object([("n", Value::bigint(1 << 70)), ("s", Value::set([Value::from(1)]))]);
//! let envelope = serialize(value.clone());
//! let wire = envelope.to_json_string().unwrap();
//! let back = deserialize(rpc_wire::codec::Envelope::from_json_slice(wire.as_bytes()).unwrap()).unwrap();
//! assert_eq!(back, value);
//! ```

pub mod codec;
pub mod error;
pub mod meta;
pub mod sse;
pub mod stream;
pub mod transport;
pub mod value;

pub use error::{CodecError, ErrorCategory, FramingError, StreamError, TransportError};
pub use meta::{get_event_meta, with_event_meta, EventMeta};
pub use stream::{EventSource, Pull, ResilientConfig, ResilientSource};
pub use value::Value;
