// SPDX-License-Identifier: Apache-2.0

//! Blocking transports for event messages.
//!
//! [`Transport`] frames events over any `Read + Write` channel (a socket, a
//! pipe); [`BufTransport`] frames them into an in-memory buffer.

use std::collections::VecDeque;

pub use bytes::{Buf, BufMut};
pub use std::io::{Read, Write};

use crate::sse::{EventDecoder, EventMessage};

const READ_CHUNK: usize = 4096;

pub struct Transport<C: Read + Write> {
    pub channel: C,
    decoder: EventDecoder,
    ready: VecDeque<EventMessage>,
}

impl<C> Transport<C>
where
    C: Read + Write,
{
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            decoder: EventDecoder::new(),
            ready: VecDeque::new(),
        }
    }
}

pub struct BufTransport<B: Buf + BufMut> {
    pub buffer: B,
    decoder: EventDecoder,
    ready: VecDeque<EventMessage>,
}

impl<B> BufTransport<B>
where
    B: Buf + BufMut,
{
    pub fn new(buffer: B) -> Self {
        Self {
            buffer,
            decoder: EventDecoder::new(),
            ready: VecDeque::new(),
        }
    }
}

pub mod events {
    use super::{Buf, BufMut, BufTransport, Read, Transport, Write, READ_CHUNK};
    use crate::error::TransportError;
    use crate::sse::{self, EventMessage};
    use std::error::Error;
    use std::io::ErrorKind;

    pub trait EventTransport {
        type Error: Error;
        fn send_event(&mut self, message: &EventMessage) -> Result<(), Self::Error>;
        /// Returns `None` once no further message can be read.
        fn read_event(&mut self) -> Result<Option<EventMessage>, Self::Error>;
    }

    impl<C: Read + Write> EventTransport for Transport<C> {
        type Error = TransportError;

        fn send_event(&mut self, message: &EventMessage) -> Result<(), Self::Error> {
            self.channel.write_all(sse::encode(message)?.as_bytes())?;
            Ok(self.channel.flush()?)
        }

        /// Blocks until a message is complete. At end of input, fails if a
        /// message was left half written.
        fn read_event(&mut self) -> Result<Option<EventMessage>, Self::Error> {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                if let Some(message) = self.ready.pop_front() {
                    return Ok(Some(message));
                }
                let n = match self.channel.read(&mut buf) {
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                };
                if n == 0 {
                    self.decoder.end()?;
                    return Ok(None);
                }
                self.ready.extend(self.decoder.feed_bytes(&buf[..n])?);
            }
        }
    }

    impl<B: Buf + BufMut> EventTransport for BufTransport<B> {
        type Error = TransportError;

        fn send_event(&mut self, message: &EventMessage) -> Result<(), Self::Error> {
            self.buffer.put_slice(sse::encode(message)?.as_bytes());
            Ok(())
        }

        /// Drains the buffer. A trailing partial message stays buffered
        /// until a later call completes it.
        fn read_event(&mut self) -> Result<Option<EventMessage>, Self::Error> {
            if self.ready.is_empty() && self.buffer.has_remaining() {
                let chunk = self.buffer.copy_to_bytes(self.buffer.remaining());
                self.ready.extend(self.decoder.feed_bytes(&chunk)?);
            }
            Ok(self.ready.pop_front())
        }
    }
}

#[cfg(feature = "cbor")]
pub mod cbor {
    use super::{Buf, BufMut, BufTransport, Read, Transport, Write};
    use crate::error::TransportError;
    use crate::value::Value;
    use ciborium::value::Value as Cbor;
    use std::convert::TryFrom;
    use std::error::Error;

    pub trait CborTransport {
        type Error: Error;
        fn send_cbor(&mut self, value: Value) -> Result<(), Self::Error>;
        fn read_cbor(&mut self) -> Result<Value, Self::Error>;
    }

    impl<C: Read + Write> CborTransport for Transport<C> {
        type Error = TransportError;
        fn send_cbor(&mut self, value: Value) -> Result<(), Self::Error> {
            Ok(ciborium::ser::into_writer(&Cbor::from(value), &mut self.channel)?)
        }
        fn read_cbor(&mut self) -> Result<Value, Self::Error> {
            let cbor: Cbor = ciborium::de::from_reader(&mut self.channel)?;
            Ok(Value::try_from(cbor)?)
        }
    }

    impl<B: Buf + BufMut> CborTransport for BufTransport<B> {
        type Error = TransportError;
        fn send_cbor(&mut self, value: Value) -> Result<(), Self::Error> {
            Ok(ciborium::ser::into_writer(
                &Cbor::from(value),
                (&mut self.buffer).writer(),
            )?)
        }
        fn read_cbor(&mut self) -> Result<Value, Self::Error> {
            let cbor: Cbor = ciborium::de::from_reader((&mut self.buffer).reader())?;
            Ok(Value::try_from(cbor)?)
        }
    }
}
