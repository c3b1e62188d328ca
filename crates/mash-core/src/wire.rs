// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 Alfred Jean LLC

//! CBOR wire envelope and length-prefixed framing (§4.3 "Framing", §6 "Wire envelope").
//!
//! Frames are `BE(u32 length) || cbor(Envelope)`. Decoding rejects CBOR maps
//! with duplicate keys (invariant 8) by first decoding into a generic
//! `ciborium::Value` tree and walking it for repeated map keys *before*
//! deserializing into the typed `Envelope`, since serde's derived
//! `Deserialize` for structs silently lets a later duplicate key win.

use std::collections::BTreeMap;

use ciborium::value::Value as CborValue;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{SessionError, StatusCode};
use crate::model::Value;

/// Request operations (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Read,
    Write,
    Subscribe,
    Unsubscribe,
    Invoke,
}

/// One CBOR-encoded message, tagged by `MessageType` (§4.3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Request {
        message_id: u32,
        operation: Operation,
        endpoint_id: u8,
        feature_id: u8,
        payload: Value,
    },
    Response {
        message_id: u32,
        status: StatusCode,
        payload: Value,
    },
    Notification {
        subscription_id: u32,
        endpoint_id: u8,
        feature_id: u8,
        changes: BTreeMap<u16, Value>,
    },
}

impl Envelope {
    pub fn message_id(&self) -> Option<u32> {
        match self {
            Self::Request { message_id, .. } | Self::Response { message_id, .. } => {
                Some(*message_id)
            }
            Self::Notification { .. } => None,
        }
    }
}

/// Maximum accepted frame body size, guarding against a hostile/corrupt
/// length prefix forcing an unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;

/// Encode an envelope as a length-prefixed CBOR frame.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, SessionError> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(envelope, &mut body)
        .map_err(|e| SessionError::InvalidCbor(e.to_string()))?;
    let len = u32::try_from(body.len())
        .map_err(|_| SessionError::InvalidCbor("frame too large to encode".into()))?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a length-prefixed CBOR frame body into an `Envelope`, rejecting
/// duplicate map keys anywhere in the structure.
pub fn decode_frame(body: &[u8]) -> Result<Envelope, SessionError> {
    let value: CborValue = ciborium::de::from_reader(body)
        .map_err(|e| SessionError::InvalidCbor(e.to_string()))?;

    if has_duplicate_keys(&value) {
        return Err(SessionError::InvalidCbor("duplicate map key".into()));
    }

    // Re-encode the already-validated value and decode into the typed
    // envelope; this avoids depending on a specific ciborium Value-to-struct
    // conversion API while still only trusting the dup-checked tree.
    let mut canonical = Vec::new();
    ciborium::ser::into_writer(&value, &mut canonical)
        .map_err(|e| SessionError::InvalidCbor(e.to_string()))?;
    ciborium::de::from_reader(canonical.as_slice())
        .map_err(|e| SessionError::InvalidCbor(e.to_string()))
}

/// Best-effort extraction of a request's `message_id` from a frame body that
/// failed `decode_frame` (e.g. the duplicate-key case). Used only to answer
/// the request with an `InvalidParameter` response instead of dropping it
/// silently; does not re-validate the envelope.
pub fn peek_request_message_id(body: &[u8]) -> Option<u32> {
    let value: CborValue = ciborium::de::from_reader(body).ok()?;
    let CborValue::Map(entries) = value else { return None };
    let is_request = entries.iter().any(|(k, v)| {
        matches!(k.as_text(), Some("type")) && matches!(v.as_text(), Some("request"))
    });
    if !is_request {
        return None;
    }
    entries
        .iter()
        .find(|(k, _)| matches!(k.as_text(), Some("message_id")))
        .and_then(|(_, v)| v.as_integer())
        .and_then(|i| u32::try_from(i).ok())
}

fn has_duplicate_keys(value: &CborValue) -> bool {
    match value {
        CborValue::Map(entries) => {
            let mut seen: Vec<&CborValue> = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                if seen.iter().any(|existing| cbor_eq(existing, k)) {
                    return true;
                }
                seen.push(k);
                if has_duplicate_keys(v) {
                    return true;
                }
            }
            false
        }
        CborValue::Array(items) => items.iter().any(has_duplicate_keys),
        _ => false,
    }
}

/// `ciborium::Value` doesn't implement `PartialEq` for all variants
/// uniformly in a way we want to rely on for key comparison across integer
/// width/signedness, so compare canonical-encoded bytes instead.
fn cbor_eq(a: &CborValue, b: &CborValue) -> bool {
    fn encode(v: &CborValue) -> Vec<u8> {
        let mut out = Vec::new();
        let _ = ciborium::ser::into_writer(v, &mut out);
        out
    }
    encode(a) == encode(b)
}

/// Read one length-prefixed frame from an async reader.
pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, SessionError> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(SessionError::InvalidCbor(format!("frame length {len} exceeds max")));
    }
    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    Ok(body)
}

/// Write one length-prefixed frame to an async writer.
pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    body: &[u8],
) -> Result<(), SessionError> {
    let len = u32::try_from(body.len())
        .map_err(|_| SessionError::InvalidCbor("frame too large to send".into()))?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    writer.write_all(body).await.map_err(|e| SessionError::Transport(e.to_string()))?;
    writer.flush().await.map_err(|e| SessionError::Transport(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
