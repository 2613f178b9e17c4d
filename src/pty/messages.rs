// src/pty/messages.rs

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};

/// Messages sent by the browser terminal.
///
/// Encoded as a JSON object tagged by its `type` field:
/// `{"type":"input","data":"ls\n"}` or `{"type":"resize","cols":120,"rows":40}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
  Input { data: String },
  // Signed so that negative values reach validation instead of failing to decode.
  Resize { cols: i64, rows: i64 },
}

/// Messages sent to the browser terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
  Output { data: String },
}

/// Outcome of decoding one inbound frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
  Message(ClientMessage),
  /// Well-formed JSON with a `type` this bridge does not handle.
  Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
  #[serde(rename = "type")]
  kind: String,
}

/// Decodes an inbound frame.
///
/// # Errors
///
/// Returns `BridgeError::Decode` when the payload is not UTF-8 JSON, has no string
/// `type` field, or a known `type` is missing its fields. An unrecognised `type`
/// is not an error; it is reported as [`Decoded::Unknown`].
pub fn decode_client_message(payload: &[u8]) -> Result<Decoded> {
  let value: serde_json::Value = serde_json::from_slice(payload)?;
  let envelope = Envelope::deserialize(&value)
    .map_err(|e| BridgeError::Decode(format!("missing message type: {}", e)))?;

  match envelope.kind.as_str() {
    "input" | "resize" => Ok(Decoded::Message(ClientMessage::deserialize(value)?)),
    _ => Ok(Decoded::Unknown(envelope.kind)),
  }
}

/// Serialises one chunk of PTY output as an `output` message.
pub fn encode_output(data: String) -> Result<String> {
  Ok(serde_json::to_string(&ServerMessage::Output { data })?)
}

/// Decodes a PTY chunk as UTF-8, replacing invalid sequences with U+FFFD.
///
/// A multi-byte character split across two reads is replaced on both sides of
/// the split; output is never held back waiting for the rest of it.
pub fn lossy_utf8(chunk: &[u8]) -> String {
  String::from_utf8_lossy(chunk).into_owned()
}
