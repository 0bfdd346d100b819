// SPDX-License-Identifier: Apache-2.0

//! A small in-memory `multipart/form-data` container (RFC 7578).
//!
//! Only what the binary multiplexer needs: named parts with an optional
//! content type and filename, encoded with a boundary that does not occur in
//! any part, and parsed back from a complete body.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;

pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl Part {
    pub fn text(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            data: Bytes::from(data.into()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Bytes,
    ) -> Self {
        Self {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type.into()),
            data,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    parts: Vec<Part>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, part: Part) {
        self.parts.push(part);
    }

    /// First part called `name`.
    pub fn get(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.name == name)
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Encode the form, returning its content type (with boundary) and body.
    pub fn encode(&self) -> (String, Bytes) {
        let boundary = self.pick_boundary();
        let mut out = BytesMut::new();
        for part in &self.parts {
            out.put_slice(b"--");
            out.put_slice(boundary.as_bytes());
            out.put_slice(b"\r\n");
            let mut disposition = format!(
                "Content-Disposition: form-data; name=\"{}\"",
                escape_quoted(&part.name)
            );
            if let Some(filename) = &part.filename {
                disposition.push_str(&format!("; filename=\"{}\"", escape_quoted(filename)));
            }
            out.put_slice(disposition.as_bytes());
            out.put_slice(b"\r\n");
            if let Some(ct) = &part.content_type {
                out.put_slice(format!("Content-Type: {}\r\n", ct).as_bytes());
            }
            out.put_slice(b"\r\n");
            out.put_slice(&part.data);
            out.put_slice(b"\r\n");
        }
        out.put_slice(b"--");
        out.put_slice(boundary.as_bytes());
        out.put_slice(b"--\r\n");
        (
            format!("{}; boundary={}", MULTIPART_FORM_DATA, boundary),
            out.freeze(),
        )
    }

    fn pick_boundary(&self) -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        loop {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let boundary = format!("----RpcWireBoundary{:016x}", n.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let clash = self
                .parts
                .iter()
                .any(|p| find(&p.data, boundary.as_bytes()).is_some());
            if !clash {
                return boundary;
            }
        }
    }

    /// Parse a complete body. `content_type` must carry a `boundary` parameter.
    pub fn parse(content_type: &str, body: &[u8]) -> Result<Self, CodecError> {
        let boundary = boundary_param(content_type)
            .ok_or_else(|| CodecError::Multipart("missing boundary parameter".into()))?;
        let delimiter = format!("--{}", boundary);
        let delimiter = delimiter.as_bytes();

        let mut rest = match find(body, delimiter) {
            Some(start) => &body[start + delimiter.len()..],
            None => return Err(CodecError::Multipart("no opening boundary".into())),
        };
        let mut form = FormData::new();
        loop {
            if rest.starts_with(b"--") {
                return Ok(form);
            }
            rest = rest
                .strip_prefix(b"\r\n")
                .ok_or_else(|| CodecError::Multipart("expected CRLF after boundary".into()))?;
            let end = find(rest, delimiter)
                .ok_or_else(|| CodecError::Multipart("unterminated part".into()))?;
            // the CRLF before a delimiter belongs to the delimiter
            let raw = rest[..end]
                .strip_suffix(b"\r\n")
                .ok_or_else(|| CodecError::Multipart("expected CRLF before boundary".into()))?;
            form.push(parse_part(raw)?);
            rest = &rest[end + delimiter.len()..];
        }
    }
}

fn parse_part(raw: &[u8]) -> Result<Part, CodecError> {
    let split = find(raw, b"\r\n\r\n")
        .ok_or_else(|| CodecError::Multipart("part has no header terminator".into()))?;
    let head = std::str::from_utf8(&raw[..split])
        .map_err(|_| CodecError::Multipart("part headers are not utf-8".into()))?;
    let data = Bytes::copy_from_slice(&raw[split + 4..]);

    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in head.split("\r\n") {
        let (key, value) = match line.split_once(':') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => continue,
        };
        if key.eq_ignore_ascii_case("content-disposition") {
            name = header_param(value, "name");
            filename = header_param(value, "filename");
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        }
    }
    let name = name.ok_or_else(|| CodecError::Multipart("part has no name".into()))?;
    Ok(Part {
        name,
        filename,
        content_type,
        data,
    })
}

fn boundary_param(content_type: &str) -> Option<String> {
    let (mime, _) = content_type.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case(MULTIPART_FORM_DATA) {
        return None;
    }
    header_param(content_type, "boundary")
}

/// Split a header value at every `;` that is not inside a quoted string.
fn split_params(header: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let (mut start, mut quoted, mut escaped) = (0, false, false);
    for (i, c) in header.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&header[start..]);
    params
}

fn unquote(quoted: &str) -> String {
    let mut out = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

/// Value of `name=...` in a `;`-separated header value, unquoting if needed.
fn header_param(header: &str, name: &str) -> Option<String> {
    split_params(header).into_iter().skip(1).find_map(|param| {
        let (k, v) = param.split_once('=')?;
        if !k.trim().eq_ignore_ascii_case(name) {
            return None;
        }
        let v = v.trim();
        Some(match v.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
            Some(quoted) => unquote(quoted),
            None => v.to_string(),
        })
    })
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FormData {
        let mut form = FormData::new();
        form.push(Part::text("data", r#"{"json":null}"#));
        form.push(Part::file(
            "0",
            "blob",
            "image/png",
            Bytes::from_static(b"\x89PNG\r\n\r\n--binary\r\n"),
        ));
        form
    }

    #[test]
    fn encode_then_parse() {
        let form = sample();
        let (content_type, body) = form.encode();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        let parsed = FormData::parse(&content_type, &body).unwrap();
        assert_eq!(parsed, form);
    }

    #[test]
    fn encoded_layout() {
        let mut form = FormData::new();
        form.push(Part::text("maps", "[]"));
        let (content_type, body) = form.encode();
        let boundary = boundary_param(&content_type).unwrap();
        let expected = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"maps\"\r\n\r\n[]\r\n--{b}--\r\n",
            b = boundary
        );
        assert_eq!(&body[..], expected.as_bytes());
    }

    #[test]
    fn boundary_avoids_content() {
        let mut form = FormData::new();
        // candidate boundaries are predictable, so embed some of them
        let mut data = String::new();
        for n in 0..4u64 {
            data.push_str(&format!("----RpcWireBoundary{:016x}", n.wrapping_mul(0x9E37_79B9_7F4A_7C15)));
        }
        form.push(Part::text("x", data));
        let (content_type, body) = form.encode();
        assert_eq!(FormData::parse(&content_type, &body).unwrap(), form);
    }

    #[test]
    fn parse_foreign_body() {
        let body = b"preamble\r\n--XyZ\r\ncontent-disposition: form-data; name=\"a\"\r\n\r\nhello\r\n--XyZ\r\nContent-Disposition: form-data; name=\"b\"; filename=\"f.txt\"\r\nContent-Type: text/plain\r\n\r\nworld\r\n--XyZ--";
        let form = FormData::parse("multipart/form-data; boundary=\"XyZ\"", body).unwrap();
        assert_eq!(form.len(), 2);
        assert_eq!(&form.get("a").unwrap().data[..], b"hello");
        let b = form.get("b").unwrap();
        assert_eq!(b.filename.as_deref(), Some("f.txt"));
        assert_eq!(b.content_type.as_deref(), Some("text/plain"));
        assert_eq!(&b.data[..], b"world");
    }

    #[test]
    fn semicolons_inside_quotes() {
        let body = b"--XyZ\r\nContent-Disposition: form-data; name=\"x;y\"; filename=\"a;b\\\"c.txt\"\r\n\r\nhi\r\n--XyZ--";
        assert_eq!(
            boundary_param("multipart/form-data; boundary=\"Xy;Z\"; charset=utf-8").as_deref(),
            Some("Xy;Z")
        );
        let form = FormData::parse("multipart/form-data; boundary=XyZ", body).unwrap();
        let part = form.get("x;y").unwrap();
        assert_eq!(part.filename.as_deref(), Some("a;b\"c.txt"));
        assert_eq!(&part.data[..], b"hi");

        let mut out = FormData::new();
        out.push(Part::file("k;\"v\\", "f;g.bin", "a/b", Bytes::from_static(b"z")));
        let (content_type, bytes) = out.encode();
        assert_eq!(FormData::parse(&content_type, &bytes).unwrap(), out);
    }

    #[test]
    fn parse_errors() {
        assert!(FormData::parse("multipart/form-data", b"").is_err());
        assert!(FormData::parse("text/plain; boundary=x", b"--x--").is_err());
        assert!(FormData::parse("multipart/form-data; boundary=x", b"--x\r\nno end").is_err());
        assert!(FormData::parse(
            "multipart/form-data; boundary=x",
            b"--x\r\nContent-Type: a/b\r\n\r\nbody\r\n--x--"
        )
        .is_err());
    }
}
