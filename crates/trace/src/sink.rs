//! Trace/span sink (§3.5, §4.11): span lifecycle tracking, depth-first eviction on
//! `maxActiveSpans` overflow, and `readRange` reconstruction. Grounded on
//! `workflow::store::WorkflowStore`'s JSON-over-`KvDriver` persistence shape, with the
//! active-span bookkeeping modeled after `actor::instance`'s single-writer-mailbox
//! style of owning all mutable state behind one `Mutex` rather than scattering locks.

use std::collections::HashMap;
use std::sync::Arc;

use kv::KvDriver;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::chunk::{ActiveSpanRef, Chunk, ChunkStore};
use crate::model::{
	ReadRangeResult, ReconstructedSpan, SpanEnd, SpanEvent, SpanEventView, SpanId, SpanRecord,
	SpanSnapshot, SpanStart, SpanUpdate, TraceId,
};

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
	#[error(transparent)]
	Kv(#[from] kv::KvError),
	#[error("span record of {size} bytes exceeds max_chunk_bytes of {max}")]
	RecordTooLarge { size: usize, max: usize },
}

pub type TraceResult<T> = Result<T, TraceError>;

#[derive(Debug, Clone, Copy)]
pub struct TraceSinkConfig {
	pub max_active_spans: usize,
	pub max_read_limit: usize,
	pub max_chunk_bytes: usize,
	pub bucket_width_secs: u64,
}

impl Default for TraceSinkConfig {
	fn default() -> Self {
		Self {
			max_active_spans: 1_000,
			max_read_limit: 10_000,
			max_chunk_bytes: 512 * 1024,
			bucket_width_secs: 60,
		}
	}
}

/// In-memory bookkeeping for a span that hasn't ended yet. Tracks where its most
/// recent full-state record lives so a snapshot or hydration can cite it without a
/// KV read, and `depth` drives eviction order on overflow.
#[derive(Debug, Clone)]
struct ActiveSpan {
	trace_id: TraceId,
	parent_span_id: Option<SpanId>,
	depth: u32,
	started_at_unix_ns: i64,
	latest_full_state_bucket: u64,
	latest_full_state_chunk: u64,
}

struct State {
	current_bucket_start_sec: u64,
	current_chunk_id: u64,
	current_chunk: Chunk,
	active: HashMap<SpanId, ActiveSpan>,
}

/// Chunked, append-only span sink. Cheap to clone (wraps an `Arc`); the single
/// internal `Mutex` serializes chunk mutation the same way an actor's mailbox
/// serializes state-touching commands (§5 P1), since trace writes from many
/// concurrently-running actors all land on the same sink.
#[derive(Clone)]
pub struct TraceSink {
	inner: Arc<Inner>,
}

struct Inner {
	store: ChunkStore,
	config: TraceSinkConfig,
	state: Mutex<State>,
}

impl TraceSink {
	pub fn new(kv: Arc<dyn KvDriver>, config: TraceSinkConfig, now_unix_ns: i64) -> Self {
		let bucket = bucket_start_sec(now_unix_ns, config.bucket_width_secs);
		let state = State {
			current_bucket_start_sec: bucket,
			current_chunk_id: 0,
			current_chunk: Chunk::new(now_unix_ns),
			active: HashMap::new(),
		};
		Self {
			inner: Arc::new(Inner { store: ChunkStore::new(kv), config, state: Mutex::new(state) }),
		}
	}

	pub async fn start_span(
		&self,
		trace_id: TraceId,
		parent_span_id: Option<SpanId>,
		name: &str,
		now_unix_ns: i64,
	) -> TraceResult<SpanId> {
		let span_id = Uuid::new_v4();
		let mut state = self.inner.state.lock().await;

		let depth = match parent_span_id {
			Some(parent) => state.active.get(&parent).map(|p| p.depth + 1).unwrap_or(0),
			None => 0,
		};

		self.evict_if_full(&mut state);

		self.roll_bucket_if_needed(&mut state, now_unix_ns).await?;
		let (bucket, chunk_id) = (state.current_bucket_start_sec, state.current_chunk_id);
		let name_idx = state.current_chunk.intern(name);
		let record = SpanRecord::SpanStart(SpanStart {
			trace_id,
			span_id,
			parent_span_id,
			name_idx,
			start_unix_ns: now_unix_ns,
		});
		self.append_record(&mut state, record).await?;

		state.active.insert(
			span_id,
			ActiveSpan {
				trace_id,
				parent_span_id,
				depth,
				started_at_unix_ns: now_unix_ns,
				latest_full_state_bucket: bucket,
				latest_full_state_chunk: chunk_id,
			},
		);
		Ok(span_id)
	}

	pub async fn update_span(&self, span_id: SpanId, attributes: Value, now_unix_ns: i64) -> TraceResult<()> {
		let mut state = self.inner.state.lock().await;
		if !state.active.contains_key(&span_id) {
			tracing::debug!(%span_id, "update for unknown or evicted span, dropping");
			return Ok(());
		}
		self.roll_bucket_if_needed(&mut state, now_unix_ns).await?;
		let record = SpanRecord::SpanUpdate(SpanUpdate { span_id, at_unix_ns: now_unix_ns, attributes });
		self.append_record(&mut state, record).await
	}

	pub async fn add_event(
		&self,
		span_id: SpanId,
		name: &str,
		attributes: Value,
		now_unix_ns: i64,
	) -> TraceResult<()> {
		let mut state = self.inner.state.lock().await;
		if !state.active.contains_key(&span_id) {
			tracing::debug!(%span_id, "event for unknown or evicted span, dropping");
			return Ok(());
		}
		self.roll_bucket_if_needed(&mut state, now_unix_ns).await?;
		let name_idx = state.current_chunk.intern(name);
		let record = SpanRecord::SpanEvent(SpanEvent { span_id, at_unix_ns: now_unix_ns, name_idx, attributes });
		self.append_record(&mut state, record).await
	}

	pub async fn end_span(&self, span_id: SpanId, status: Option<String>, now_unix_ns: i64) -> TraceResult<()> {
		let mut state = self.inner.state.lock().await;
		if state.active.remove(&span_id).is_none() {
			tracing::debug!(%span_id, "end for unknown or evicted span, dropping");
			return Ok(());
		}
		self.roll_bucket_if_needed(&mut state, now_unix_ns).await?;
		let record = SpanRecord::SpanEnd(SpanEnd { span_id, end_unix_ns: now_unix_ns, status });
		self.append_record(&mut state, record).await
	}

	/// Emits a `SpanSnapshot` for every still-active span, bounding replay cost for
	/// spans that outlive many chunks (§4.11). Callers (`hostd`) invoke this on a
	/// fixed interval, independent of any individual span's lifecycle.
	pub async fn snapshot_all(&self, now_unix_ns: i64) -> TraceResult<()> {
		let mut state = self.inner.state.lock().await;
		self.roll_bucket_if_needed(&mut state, now_unix_ns).await?;
		let span_ids: Vec<SpanId> = state.active.keys().copied().collect();
		for span_id in span_ids {
			let active = state.active.get(&span_id).cloned().expect("span_id came from the map's own keys");
			let name_idx = state.current_chunk.intern("");
			let record = SpanRecord::SpanSnapshot(SpanSnapshot {
				span_id,
				trace_id: active.trace_id,
				parent_span_id: active.parent_span_id,
				name_idx,
				at_unix_ns: now_unix_ns,
				start_unix_ns: active.started_at_unix_ns,
				attributes: Value::Null,
			});
			self.append_record(&mut state, record).await?;
			let (bucket, chunk_id) = (state.current_bucket_start_sec, state.current_chunk_id);
			if let Some(entry) = state.active.get_mut(&span_id) {
				entry.latest_full_state_bucket = bucket;
				entry.latest_full_state_chunk = chunk_id;
			}
		}
		Ok(())
	}

	/// Reconstructs spans whose lifetime overlaps `[start_ms, end_ms)`, replaying
	/// every on-disk chunk plus the live in-memory chunk (§4.11).
	pub async fn read_range(&self, start_ms: i64, end_ms: i64, limit: usize) -> TraceResult<ReadRangeResult> {
		let start_ns = start_ms * 1_000_000;
		let end_ns = end_ms * 1_000_000;
		let effective_limit = limit.min(self.inner.config.max_read_limit);
		let clamped_by_user_limit = limit > effective_limit;

		let mut persisted = self.inner.store.load_all_ordered().await?;
		let state = self.inner.state.lock().await;
		persisted.push((state.current_bucket_start_sec, state.current_chunk_id, state.current_chunk.clone()));
		drop(state);

		let mut spans: HashMap<SpanId, ReconstructedSpan> = HashMap::new();
		for (_, _, chunk) in &persisted {
			for record in &chunk.records {
				apply_record(&mut spans, chunk, record);
			}
		}

		let mut out: Vec<ReconstructedSpan> = spans
			.into_values()
			.filter(|span| span_overlaps(span, start_ns, end_ns))
			.collect();
		out.sort_by_key(|span| span.start_unix_ns.unwrap_or(i64::MIN));

		let clamped = clamped_by_user_limit || out.len() > effective_limit;
		out.truncate(effective_limit);

		Ok(ReadRangeResult { spans: out, clamped })
	}

	/// Depth-first eviction: drops the deepest active span (ties broken by most
	/// recent start) when the active set is already at capacity, so the new span
	/// being started has room (§4.11). Evicted spans simply stop receiving further
	/// updates; records already written remain on disk.
	fn evict_if_full(&self, state: &mut State) {
		if state.active.len() < self.inner.config.max_active_spans {
			return;
		}
		let victim = state
			.active
			.iter()
			.max_by_key(|(_, span)| (span.depth, span.started_at_unix_ns))
			.map(|(id, _)| *id);
		if let Some(victim) = victim {
			state.active.remove(&victim);
			tracing::debug!(span_id = %victim, "evicted active span: max_active_spans exceeded");
		}
	}

	async fn roll_bucket_if_needed(&self, state: &mut State, now_unix_ns: i64) -> TraceResult<()> {
		let bucket = bucket_start_sec(now_unix_ns, self.inner.config.bucket_width_secs);
		if bucket == state.current_bucket_start_sec {
			return Ok(());
		}
		self.flush_current_chunk(state).await?;
		state.current_bucket_start_sec = bucket;
		state.current_chunk_id = 0;
		state.current_chunk = Chunk::new(now_unix_ns);
		Ok(())
	}

	async fn append_record(&self, state: &mut State, record: SpanRecord) -> TraceResult<()> {
		let mut candidate = state.current_chunk.clone();
		candidate.records.push(record.clone());
		let size = candidate.encoded_len();
		if size > self.inner.config.max_chunk_bytes {
			// Either the new record alone is oversized, or it would push this chunk
			// over the limit; try rotating to a fresh chunk for the latter case.
			let mut empty = Chunk::new(candidate.base_unix_ns);
			let record_only_len = {
				empty.records.push(record.clone());
				empty.encoded_len()
			};
			if record_only_len > self.inner.config.max_chunk_bytes {
				return Err(TraceError::RecordTooLarge { size: record_only_len, max: self.inner.config.max_chunk_bytes });
			}
			self.flush_current_chunk(state).await?;
			state.current_chunk_id += 1;
			state.current_chunk = Chunk::new(record.at_unix_ns());
			state.current_chunk.records.push(record);
		} else {
			state.current_chunk = candidate;
		}
		self.persist_active_spans(state);
		self.inner
			.store
			.save(state.current_bucket_start_sec, state.current_chunk_id, &state.current_chunk)
			.await?;
		Ok(())
	}

	/// Refreshes the current chunk's `active_spans` list from the in-memory active
	/// set, so a reader consulting this chunk later can hydrate spans that began
	/// before it (§3.5's cross-chunk reconstruction invariant).
	fn persist_active_spans(&self, state: &mut State) {
		state.current_chunk.active_spans = state
			.active
			.iter()
			.map(|(span_id, span)| ActiveSpanRef {
				span_id: *span_id,
				latest_full_state_bucket: span.latest_full_state_bucket,
				latest_full_state_chunk: span.latest_full_state_chunk,
			})
			.collect();
	}

	async fn flush_current_chunk(&self, state: &mut State) -> TraceResult<()> {
		self.persist_active_spans(state);
		self.inner
			.store
			.save(state.current_bucket_start_sec, state.current_chunk_id, &state.current_chunk)
			.await?;
		Ok(())
	}
}

fn bucket_start_sec(unix_ns: i64, bucket_width_secs: u64) -> u64 {
	let unix_sec = (unix_ns / 1_000_000_000).max(0) as u64;
	unix_sec - (unix_sec % bucket_width_secs.max(1))
}

fn span_overlaps(span: &ReconstructedSpan, start_ns: i64, end_ns: i64) -> bool {
	let start = span.start_unix_ns.unwrap_or(i64::MIN);
	let end = span.end_unix_ns.unwrap_or(i64::MAX);
	start < end_ns && end >= start_ns
}

fn apply_record(spans: &mut HashMap<SpanId, ReconstructedSpan>, chunk: &Chunk, record: &SpanRecord) {
	let span_id = record.span_id();
	match record {
		SpanRecord::SpanStart(r) => {
			let entry = spans.entry(span_id).or_insert_with(|| blank_span(span_id));
			entry.trace_id = Some(r.trace_id);
			entry.parent_span_id = r.parent_span_id;
			entry.name = chunk.resolve(r.name_idx).map(str::to_string);
			entry.start_unix_ns = Some(r.start_unix_ns);
		}
		SpanRecord::SpanSnapshot(r) => {
			let entry = spans.entry(span_id).or_insert_with(|| blank_span(span_id));
			entry.trace_id = Some(r.trace_id);
			entry.parent_span_id = r.parent_span_id;
			if let Some(name) = chunk.resolve(r.name_idx).filter(|n| !n.is_empty()) {
				entry.name = Some(name.to_string());
			}
			entry.start_unix_ns = entry.start_unix_ns.or(Some(r.start_unix_ns));
			if !r.attributes.is_null() {
				entry.attributes = r.attributes.clone();
			}
		}
		SpanRecord::SpanUpdate(r) => {
			let entry = spans.entry(span_id).or_insert_with(|| blank_span(span_id));
			entry.attributes = r.attributes.clone();
		}
		SpanRecord::SpanEvent(r) => {
			let entry = spans.entry(span_id).or_insert_with(|| blank_span(span_id));
			let name = chunk.resolve(r.name_idx).unwrap_or("").to_string();
			entry.events.push(SpanEventView { at_unix_ns: r.at_unix_ns, name, attributes: r.attributes.clone() });
		}
		SpanRecord::SpanEnd(r) => {
			let entry = spans.entry(span_id).or_insert_with(|| blank_span(span_id));
			entry.end_unix_ns = Some(r.end_unix_ns);
			entry.status = r.status.clone();
		}
	}
}

fn blank_span(span_id: SpanId) -> ReconstructedSpan {
	ReconstructedSpan {
		trace_id: None,
		span_id,
		parent_span_id: None,
		name: None,
		start_unix_ns: None,
		end_unix_ns: None,
		attributes: Value::Null,
		events: Vec::new(),
		status: None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sink(config: TraceSinkConfig) -> TraceSink {
		let kv: Arc<dyn KvDriver> = Arc::new(kv::MemoryKvDriver::default());
		TraceSink::new(kv, config, 0)
	}

	#[tokio::test]
	async fn start_and_end_span_reconstructs_in_read_range() {
		let sink = sink(TraceSinkConfig::default());
		let trace_id = Uuid::new_v4();
		let span_id = sink.start_span(trace_id, None, "handle-request", 1_000_000_000).await.unwrap();
		sink.add_event(span_id, "cache-miss", serde_json::json!({"key": "x"}), 1_500_000_000).await.unwrap();
		sink.end_span(span_id, Some("ok".to_string()), 2_000_000_000).await.unwrap();

		let result = sink.read_range(0, 10_000, 100).await.unwrap();
		assert!(!result.clamped);
		assert_eq!(result.spans.len(), 1);
		let span = &result.spans[0];
		assert_eq!(span.span_id, span_id);
		assert_eq!(span.name.as_deref(), Some("handle-request"));
		assert_eq!(span.status.as_deref(), Some("ok"));
		assert_eq!(span.events.len(), 1);
		assert_eq!(span.events[0].name, "cache-miss");
	}

	#[tokio::test]
	async fn read_range_excludes_spans_outside_window() {
		let sink = sink(TraceSinkConfig::default());
		let trace_id = Uuid::new_v4();
		let span_id = sink.start_span(trace_id, None, "late-span", 100_000_000_000).await.unwrap();
		sink.end_span(span_id, None, 101_000_000_000).await.unwrap();

		let result = sink.read_range(0, 1_000, 100).await.unwrap();
		assert!(result.spans.is_empty());
	}

	#[tokio::test]
	async fn read_range_clamps_to_max_read_limit() {
		let mut config = TraceSinkConfig::default();
		config.max_read_limit = 2;
		let sink = sink(config);
		let trace_id = Uuid::new_v4();
		for i in 0..5 {
			sink.start_span(trace_id, None, "s", 1_000_000_000 + i).await.unwrap();
		}

		let result = sink.read_range(0, 10_000, 100).await.unwrap();
		assert!(result.clamped);
		assert_eq!(result.spans.len(), 2);
	}

	#[tokio::test]
	async fn overflow_evicts_deepest_active_span_first() {
		let mut config = TraceSinkConfig::default();
		config.max_active_spans = 2;
		let sink = sink(config);
		let trace_id = Uuid::new_v4();

		let root = sink.start_span(trace_id, None, "root", 1_000_000_000).await.unwrap();
		let child = sink.start_span(trace_id, Some(root), "child", 1_000_000_001).await.unwrap();
		// Active set is now at capacity (root, child); starting a third span evicts
		// the deepest one (child) to make room.
		let _sibling = sink.start_span(trace_id, None, "sibling", 1_000_000_002).await.unwrap();

		let state = sink.inner.state.lock().await;
		assert!(!state.active.contains_key(&child));
		assert!(state.active.contains_key(&root));
	}

	#[tokio::test]
	async fn oversized_record_is_rejected() {
		let mut config = TraceSinkConfig::default();
		config.max_chunk_bytes = 64;
		let sink = sink(config);
		let trace_id = Uuid::new_v4();
		let span_id = sink.start_span(trace_id, None, "s", 1_000_000_000).await.unwrap();

		let huge = Value::String("x".repeat(1_000));
		let err = sink.update_span(span_id, huge, 1_000_000_001).await.unwrap_err();
		assert!(matches!(err, TraceError::RecordTooLarge { .. }));
	}

	#[tokio::test]
	async fn bucket_rollover_starts_a_fresh_chunk() {
		let config = TraceSinkConfig { bucket_width_secs: 60, ..TraceSinkConfig::default() };
		let sink = sink(config);
		let trace_id = Uuid::new_v4();
		sink.start_span(trace_id, None, "first-bucket", 0).await.unwrap();

		{
			let state = sink.inner.state.lock().await;
			assert_eq!(state.current_bucket_start_sec, 0);
		}

		sink.snapshot_all(90 * 1_000_000_000).await.unwrap();

		let state = sink.inner.state.lock().await;
		assert_eq!(state.current_bucket_start_sec, 60);
	}
}
