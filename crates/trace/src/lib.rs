//! Trace/span sink (§3.5, §4.11): chunked, append-only span storage with depth-first
//! eviction and OTLP-shaped range reads, independent of the client-facing wire
//! protocol the rest of the workspace speaks.

pub mod chunk;
pub mod model;
pub mod sink;

pub use chunk::{ActiveSpanRef, Chunk, ChunkStore};
pub use model::{
	ReadRangeResult, ReconstructedSpan, SpanEnd, SpanEvent, SpanEventView, SpanId, SpanRecord,
	SpanSnapshot, SpanStart, SpanUpdate, TraceId,
};
pub use sink::{TraceError, TraceResult, TraceSink, TraceSinkConfig};
