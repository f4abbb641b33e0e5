//! Span record variants persisted into trace chunks (§3.5, §4.11).
//!
//! Names and attribute payloads are interned per-chunk (see [`crate::chunk`]) rather
//! than carried inline, since a busy span tree repeats the same handful of span/event
//! names many times within one bucket.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type TraceId = Uuid;
pub type SpanId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpanStart {
	pub trace_id: TraceId,
	pub span_id: SpanId,
	pub parent_span_id: Option<SpanId>,
	pub name_idx: u32,
	pub start_unix_ns: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanUpdate {
	pub span_id: SpanId,
	pub at_unix_ns: i64,
	pub attributes: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanEvent {
	pub span_id: SpanId,
	pub at_unix_ns: i64,
	pub name_idx: u32,
	pub attributes: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpanEnd {
	pub span_id: SpanId,
	pub end_unix_ns: i64,
	pub status: Option<String>,
}

/// A periodic full-state checkpoint so a span that outlives many chunks can be
/// reconstructed without replaying every record back to its `SpanStart` (§4.11).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanSnapshot {
	pub span_id: SpanId,
	pub trace_id: TraceId,
	pub parent_span_id: Option<SpanId>,
	pub name_idx: u32,
	pub at_unix_ns: i64,
	pub start_unix_ns: i64,
	pub attributes: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum SpanRecord {
	SpanStart(SpanStart),
	SpanUpdate(SpanUpdate),
	SpanEvent(SpanEvent),
	SpanEnd(SpanEnd),
	SpanSnapshot(SpanSnapshot),
}

impl SpanRecord {
	pub fn span_id(&self) -> SpanId {
		match self {
			SpanRecord::SpanStart(r) => r.span_id,
			SpanRecord::SpanUpdate(r) => r.span_id,
			SpanRecord::SpanEvent(r) => r.span_id,
			SpanRecord::SpanEnd(r) => r.span_id,
			SpanRecord::SpanSnapshot(r) => r.span_id,
		}
	}

	pub fn at_unix_ns(&self) -> i64 {
		match self {
			SpanRecord::SpanStart(r) => r.start_unix_ns,
			SpanRecord::SpanUpdate(r) => r.at_unix_ns,
			SpanRecord::SpanEvent(r) => r.at_unix_ns,
			SpanRecord::SpanEnd(r) => r.end_unix_ns,
			SpanRecord::SpanSnapshot(r) => r.at_unix_ns,
		}
	}

	/// Whether this variant carries enough state on its own to reconstruct a span
	/// (the invariant in §3.5 that `activeSpans` entries point at one of these).
	pub fn is_full_state(&self) -> bool {
		matches!(self, SpanRecord::SpanStart(_) | SpanRecord::SpanSnapshot(_))
	}
}

/// OTLP-shaped reconstruction of one span, produced by [`crate::sink::TraceSink::read_range`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconstructedSpan {
	pub trace_id: Option<TraceId>,
	pub span_id: SpanId,
	pub parent_span_id: Option<SpanId>,
	pub name: Option<String>,
	pub start_unix_ns: Option<i64>,
	pub end_unix_ns: Option<i64>,
	pub attributes: Value,
	pub events: Vec<SpanEventView>,
	pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanEventView {
	pub at_unix_ns: i64,
	pub name: String,
	pub attributes: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReadRangeResult {
	pub spans: Vec<ReconstructedSpan>,
	/// Set when the user's `limit` or `maxReadLimit` truncated the result (§4.11).
	pub clamped: bool,
}
