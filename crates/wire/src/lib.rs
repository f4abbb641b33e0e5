//! Wire frames and versioned envelopes for the client protocol (§3.3, §4.1, §6.1).
//!
//! Grounded on the teacher's `vbare::OwnedVersionedData` call-site pattern in
//! `engine/packages/engine/tests/common/test_runner/protocol.rs`
//! (`Type::wrap_latest(msg).serialize(version)` / `Type::deserialize(buf, version)`,
//! failing loudly on an unrecognized version) and on `rivet-runner-protocol`'s dual
//! `serde` + `serde_bare` derive on every wire struct. The exact `vbare` trait surface
//! wasn't retrievable (no source in the pack, only this call site), so the envelope
//! below is hand-rolled to the same contract — `varint(version) ∥ payload` — rather
//! than guessing at an `impl OwnedVersionedData` that might not match the real trait.

use std::fmt;

use error::{InvalidEncoding, OutgoingMessageTooLong};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u16 = 1;

/// Negotiated wire encoding (§6.1): `json` for text-friendly clients (curl, browsers
/// without the subprotocol), `bare` for compact binary framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
	Json,
	Bare,
}

impl Encoding {
	pub fn content_type(self) -> &'static str {
		match self {
			Encoding::Json => "application/json",
			Encoding::Bare => "application/octet-stream",
		}
	}

	/// WebSocket subprotocol token, e.g. `rivetkit.enc.json`.
	pub fn subprotocol_token(self) -> &'static str {
		match self {
			Encoding::Json => "rivetkit.enc.json",
			Encoding::Bare => "rivetkit.enc.bare",
		}
	}

	pub fn from_subprotocol(token: &str) -> Option<Encoding> {
		match token {
			"rivetkit.enc.json" => Some(Encoding::Json),
			"rivetkit.enc.bare" => Some(Encoding::Bare),
			_ => None,
		}
	}

	/// `x-rivetkit-encoding` header value, or bare subprotocol token suffix.
	pub fn from_name(name: &str) -> Result<Encoding, InvalidEncoding> {
		match name {
			"json" => Ok(Encoding::Json),
			"bare" => Ok(Encoding::Bare),
			other => Err(InvalidEncoding {
				encoding: other.to_string(),
			}),
		}
	}
}

impl Default for Encoding {
	/// Absent subprotocol/header → `json`, so curl stays usable (§4.6 step 1).
	fn default() -> Self {
		Encoding::Json
	}
}

impl fmt::Display for Encoding {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Encoding::Json => write!(f, "json"),
			Encoding::Bare => write!(f, "bare"),
		}
	}
}

// ---- Server → client frames ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServerFrame {
	Init {
		actor_id: String,
		connection_id: String,
	},
	Error {
		group: String,
		code: String,
		message: String,
		#[serde(skip_serializing_if = "Option::is_none")]
		metadata: Option<Value>,
		#[serde(skip_serializing_if = "Option::is_none")]
		action_id: Option<u64>,
	},
	ActionResponse {
		id: u64,
		output: Value,
	},
	Event {
		name: String,
		args: Value,
	},
}

impl From<error::ErrorFrame> for ServerFrame {
	fn from(f: error::ErrorFrame) -> Self {
		ServerFrame::Error {
			group: f.group,
			code: f.code,
			message: f.message,
			metadata: f.metadata,
			action_id: f.action_id,
		}
	}
}

// ---- Client → server frames ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientFrame {
	ActionRequest { id: u64, name: String, args: Value },
	SubscriptionRequest { event_name: String, subscribe: bool },
}

// ---- HTTP-only bodies (§3.3, §6.2) ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpActionRequest {
	pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpActionResponse {
	pub output: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpQueueSendRequest {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	pub body: Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub wait: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpQueueSendResponse {
	pub status: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub response: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpResolveRequest;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpResolveResponse {
	pub actor_id: String,
}

// ---- Versioned envelope ----

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
	#[error("unrecognized wire version {0}")]
	UnknownVersion(u16),
	#[error("truncated frame: missing version prefix")]
	Truncated,
	#[error("json decode failed: {0}")]
	Json(#[from] serde_json::Error),
	#[error("bare decode failed: {0}")]
	Bare(#[from] serde_bare::Error),
	#[error(transparent)]
	TooLong(#[from] OutgoingMessageTooLong),
}

fn write_varint_u16(out: &mut Vec<u8>, mut value: u16) {
	loop {
		let byte = (value & 0x7f) as u8;
		value >>= 7;
		if value == 0 {
			out.push(byte);
			break;
		} else {
			out.push(byte | 0x80);
		}
	}
}

fn read_varint_u16(buf: &[u8]) -> Result<(u16, &[u8]), FrameError> {
	let mut value: u16 = 0;
	let mut shift = 0;
	for (i, &byte) in buf.iter().enumerate() {
		value |= ((byte & 0x7f) as u16) << shift;
		if byte & 0x80 == 0 {
			return Ok((value, &buf[i + 1..]));
		}
		shift += 7;
	}
	Err(FrameError::Truncated)
}

/// Encodes a frame as `varint(version) ∥ payload(encoding)`, enforcing the outgoing
/// size limit from §4.1.
pub fn encode_versioned<T: Serialize>(
	value: &T,
	encoding: Encoding,
	max_outgoing_message_size: usize,
) -> Result<Vec<u8>, FrameError> {
	let payload = match encoding {
		Encoding::Json => serde_json::to_vec(value)?,
		Encoding::Bare => serde_bare::to_vec(value)?,
	};

	let mut out = Vec::with_capacity(payload.len() + 3);
	write_varint_u16(&mut out, PROTOCOL_VERSION);
	out.extend_from_slice(&payload);

	if out.len() > max_outgoing_message_size {
		return Err(FrameError::TooLong(OutgoingMessageTooLong {
			size: out.len(),
			max: max_outgoing_message_size,
		}));
	}

	Ok(out)
}

/// Decodes a versioned frame; unknown versions fail loudly per §6.3.
pub fn decode_versioned<T: for<'de> Deserialize<'de>>(
	buf: &[u8],
	encoding: Encoding,
) -> Result<T, FrameError> {
	let (version, payload) = read_varint_u16(buf)?;
	if version != PROTOCOL_VERSION {
		return Err(FrameError::UnknownVersion(version));
	}

	match encoding {
		Encoding::Json => Ok(serde_json::from_slice(payload)?),
		Encoding::Bare => Ok(serde_bare::from_slice(payload)?),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn roundtrip(frame: ServerFrame, encoding: Encoding) {
		let bytes = encode_versioned(&frame, encoding, 1 << 20).unwrap();
		let decoded: ServerFrame = decode_versioned(&bytes, encoding).unwrap();
		assert_eq!(frame, decoded);
	}

	#[test]
	fn json_roundtrip_covers_every_server_variant() {
		roundtrip(
			ServerFrame::Init {
				actor_id: "a1".into(),
				connection_id: "c1".into(),
			},
			Encoding::Json,
		);
		roundtrip(
			ServerFrame::Error {
				group: "user".into(),
				code: "action_not_found".into(),
				message: "no action".into(),
				metadata: None,
				action_id: Some(3),
			},
			Encoding::Json,
		);
		roundtrip(
			ServerFrame::ActionResponse {
				id: 1,
				output: serde_json::json!({"ok": true}),
			},
			Encoding::Json,
		);
		roundtrip(
			ServerFrame::Event {
				name: "tick".into(),
				args: serde_json::json!([1, 2, 3]),
			},
			Encoding::Json,
		);
	}

	#[test]
	fn bare_roundtrip_matches_json_semantics() {
		let frame = ServerFrame::ActionResponse {
			id: 42,
			output: serde_json::json!({"count": 7}),
		};
		roundtrip(frame, Encoding::Bare);
	}

	#[test]
	fn unknown_version_fails_loudly() {
		let mut buf = Vec::new();
		write_varint_u16(&mut buf, 99);
		buf.extend_from_slice(b"{}");
		let err = decode_versioned::<ServerFrame>(&buf, Encoding::Json).unwrap_err();
		assert!(matches!(err, FrameError::UnknownVersion(99)));
	}

	#[test]
	fn outgoing_frame_over_limit_is_rejected() {
		let frame = ServerFrame::Event {
			name: "big".into(),
			args: serde_json::json!("x".repeat(1000)),
		};
		let err = encode_versioned(&frame, Encoding::Json, 10).unwrap_err();
		assert!(matches!(err, FrameError::TooLong(_)));
	}

	#[test]
	fn encoding_negotiation_defaults_to_json() {
		assert_eq!(Encoding::default(), Encoding::Json);
		assert_eq!(Encoding::from_subprotocol("rivetkit.enc.bare"), Some(Encoding::Bare));
		assert_eq!(Encoding::from_subprotocol("nonsense"), None);
	}
}
