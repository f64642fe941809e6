//! Payload codec for ledger event data.
//!
//! Event payloads arrive in one of four shapes:
//! - plain JSON bytes
//! - `zlib:` followed by base64 of a zlib stream
//! - a raw zlib stream with no marker
//! - JSON whose `compressedData` field carries the marked form
//!
//! [`decode`] tries these in that order and falls back to returning the
//! input verbatim, so it never fails on well-formed uncompressed JSON.

use crate::errors::CodecError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::Value;
use std::io::{Read, Write};

/// Prefix identifying a base64 zlib payload.
pub const COMPRESSION_MARKER: &str = "zlib:";

/// Field that carries a nested compressed payload.
pub const NESTED_FIELD: &str = "compressedData";

/// Decode a raw payload into plain text, unwrapping at most one nested layer.
pub fn decode(raw: &[u8]) -> String {
    if let Some(text) = inflate_marked_bytes(raw) {
        return text;
    }

    if let Some(text) = inflate(raw) {
        return text;
    }

    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(raw) {
        if let Some(text) = map
            .get(NESTED_FIELD)
            .and_then(Value::as_str)
            .and_then(inflate_marked)
        {
            return text;
        }
    }

    String::from_utf8_lossy(raw).into_owned()
}

/// Decode only the transport wrapping (marker or raw zlib), leaving any
/// nested `compressedData` field in place.
///
/// Used for the outer event envelope, where sibling fields such as the
/// event type must survive decoding.
pub fn decode_envelope(raw: &[u8]) -> String {
    inflate_marked_bytes(raw)
        .or_else(|| inflate(raw))
        .unwrap_or_else(|| String::from_utf8_lossy(raw).into_owned())
}

/// Decode and parse as JSON.
///
/// # Errors
///
/// Returns `CodecError::MalformedPayload` if the decoded text is not JSON.
pub fn decode_json(raw: &[u8]) -> Result<Value, CodecError> {
    let text = decode(raw);
    serde_json::from_str(&text).map_err(|e| CodecError::MalformedPayload(e.to_string()))
}

/// Produce the marked form: `zlib:` + base64(zlib(text)).
///
/// # Errors
///
/// Returns `CodecError::MalformedPayload` if the deflate stream cannot be written.
pub fn encode(text: &str) -> Result<String, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| CodecError::MalformedPayload(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| CodecError::MalformedPayload(e.to_string()))?;
    Ok(format!("{COMPRESSION_MARKER}{}", STANDARD.encode(compressed)))
}

fn inflate_marked_bytes(raw: &[u8]) -> Option<String> {
    std::str::from_utf8(raw).ok().and_then(inflate_marked)
}

fn inflate_marked(text: &str) -> Option<String> {
    let body = text.strip_prefix(COMPRESSION_MARKER)?;
    let compressed = STANDARD.decode(body.trim()).ok()?;
    inflate(&compressed)
}

fn inflate(compressed: &[u8]) -> Option<String> {
    let mut inflated = String::new();
    ZlibDecoder::new(compressed)
        .read_to_string(&mut inflated)
        .ok()?;
    Some(inflated)
}
