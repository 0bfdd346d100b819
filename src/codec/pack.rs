// SPDX-License-Identifier: Apache-2.0

//! Binary multiplexer.
//!
//! A payload without blobs travels as a single json envelope. A payload with
//! blobs becomes `multipart/form-data`:
//!
//! - `data`: the json envelope, with every blob replaced by `null`
//! - `maps`: a json list of paths; entry *i* says where blob *i* goes
//! - `0`, `1`, ...: one part per blob, holding its raw bytes and content type

use bytes::Bytes;

use super::multipart::{FormData, Part, MULTIPART_FORM_DATA};
use super::{deserialize, serialize, slot_mut, Envelope, Path, PathSegment};
use crate::error::CodecError;
use crate::value::{Blob, Value, DEFAULT_BLOB_TYPE};

pub const APPLICATION_JSON: &str = "application/json";

const DATA_PART: &str = "data";
const MAPS_PART: &str = "maps";
const BLOB_FILENAME: &str = "blob";

/// A packed payload, ready for a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Bytes),
    Multipart(FormData),
}

impl Body {
    pub fn is_multipart(&self) -> bool {
        matches!(self, Body::Multipart(_))
    }

    /// Content type and bytes as they go on the wire.
    pub fn into_wire(self) -> (String, Bytes) {
        match self {
            Body::Json(bytes) => (APPLICATION_JSON.to_string(), bytes),
            Body::Multipart(form) => form.encode(),
        }
    }

    /// Inverse of [`Body::into_wire`].
    pub fn from_wire(content_type: &str, bytes: Bytes) -> Result<Self, CodecError> {
        let mime = content_type.split(';').next().unwrap_or_default().trim();
        if mime.eq_ignore_ascii_case(MULTIPART_FORM_DATA) {
            Ok(Body::Multipart(FormData::parse(content_type, &bytes)?))
        } else {
            Ok(Body::Json(bytes))
        }
    }
}

/// Depth-first blob extraction. Each blob is swapped for `null` and its path
/// recorded in discovery order.
fn take_blobs(value: &mut Value, path: &mut Path, found: &mut Vec<(Path, Blob)>) {
    match value {
        Value::Blob(_) => {
            if let Value::Blob(blob) = std::mem::replace(value, Value::Null) {
                found.push((path.clone(), blob));
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                path.push(PathSegment::Index(i));
                take_blobs(item, path, found);
                path.pop();
            }
        }
        Value::Object(obj) => {
            let keys: Vec<String> = obj.keys().map(str::to_string).collect();
            for key in keys {
                if let Some(field) = obj.get_mut(&key) {
                    path.push(PathSegment::Key(key));
                    take_blobs(field, path, found);
                    path.pop();
                }
            }
        }
        _ => {}
    }
}

/// Serialize `value` and pick a wire shape for it.
pub fn pack(value: Value) -> Result<Body, CodecError> {
    let mut envelope = serialize(value);
    let mut blobs = Vec::new();
    take_blobs(&mut envelope.json, &mut Vec::new(), &mut blobs);

    if blobs.is_empty() {
        return Ok(Body::Json(Bytes::from(envelope.to_json_vec()?)));
    }

    log::trace!("packing {} blob(s) as multipart", blobs.len());
    let mut form = FormData::new();
    form.push(Part::text(DATA_PART, envelope.to_json_string()?));
    let maps: Vec<&Path> = blobs.iter().map(|(path, _)| path).collect();
    let maps = serde_json::to_string(&maps).map_err(|e| CodecError::Json(e.to_string()))?;
    form.push(Part::text(MAPS_PART, maps));
    for (i, (_, blob)) in blobs.into_iter().enumerate() {
        form.push(Part::file(i.to_string(), BLOB_FILENAME, blob.content_type, blob.bytes));
    }
    Ok(Body::Multipart(form))
}

/// Rebuild a value from a packed body. Either the whole value comes back or
/// an error does.
pub fn unpack(body: Body) -> Result<Value, CodecError> {
    match body {
        Body::Json(bytes) => deserialize(Envelope::from_json_slice(&bytes)?),
        Body::Multipart(form) => {
            let data = form
                .get(DATA_PART)
                .ok_or_else(|| CodecError::MissingPart(DATA_PART.into()))?;
            let mut envelope = Envelope::from_json_slice(&data.data)?;

            let maps = form
                .get(MAPS_PART)
                .ok_or_else(|| CodecError::MissingPart(MAPS_PART.into()))?;
            let maps: Vec<Path> =
                serde_json::from_slice(&maps.data).map_err(|e| CodecError::Json(e.to_string()))?;

            for (i, path) in maps.iter().enumerate() {
                let name = i.to_string();
                let part = form
                    .get(&name)
                    .ok_or_else(|| CodecError::MissingPart(name.clone()))?;
                let content_type = part
                    .content_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BLOB_TYPE.to_string());
                *slot_mut(&mut envelope.json, path)? =
                    Value::Blob(Blob::new(content_type, part.data.clone()));
            }
            deserialize(envelope)
        }
    }
}
