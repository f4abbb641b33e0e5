//! Chunk persistence layer binding the trace data model to a `KvDriver` namespace via
//! the `(Trace, bucketStartSec, chunkId)` key layout (§3.5, §4.3). Grounded on
//! `workflow::store::WorkflowStore`'s JSON-over-`KvDriver` persistence idiom.

use std::sync::Arc;

use kv::{key, Entry, KvDriver};
use serde::{Deserialize, Serialize};

use crate::model::{SpanId, SpanRecord};

/// Points at the chunk holding the most recent full-state record (`SpanStart` or
/// `SpanSnapshot`) for a span still active as of this chunk's close (§3.5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveSpanRef {
	pub span_id: SpanId,
	pub latest_full_state_bucket: u64,
	pub latest_full_state_chunk: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Chunk {
	pub base_unix_ns: i64,
	pub strings: Vec<String>,
	pub records: Vec<SpanRecord>,
	pub active_spans: Vec<ActiveSpanRef>,
}

impl Chunk {
	pub fn new(base_unix_ns: i64) -> Self {
		Self { base_unix_ns, ..Default::default() }
	}

	/// Interns `s`, returning its stable index into `strings`. Chunks hold at most a
	/// few hundred records, so a linear scan beats building a hash index per chunk.
	pub fn intern(&mut self, s: &str) -> u32 {
		if let Some(idx) = self.strings.iter().position(|existing| existing == s) {
			return idx as u32;
		}
		self.strings.push(s.to_string());
		(self.strings.len() - 1) as u32
	}

	pub fn resolve(&self, idx: u32) -> Option<&str> {
		self.strings.get(idx as usize).map(String::as_str)
	}

	pub fn encoded_len(&self) -> usize {
		serde_json::to_vec(self).map(|b| b.len()).unwrap_or(usize::MAX)
	}
}

/// Raw `KvDriver` access to trace chunks, one level below [`crate::sink::TraceSink`].
pub struct ChunkStore {
	kv: Arc<dyn KvDriver>,
}

impl ChunkStore {
	pub fn new(kv: Arc<dyn KvDriver>) -> Self {
		Self { kv }
	}

	pub async fn load(&self, bucket_start_sec: u64, chunk_id: u64) -> Result<Option<Chunk>, kv::KvError> {
		let key = key::trace_chunk_key(bucket_start_sec, chunk_id);
		let Some(bytes) = self.kv.get(key.as_bytes()).await? else {
			return Ok(None);
		};
		match serde_json::from_slice(&bytes) {
			Ok(chunk) => Ok(Some(chunk)),
			Err(err) => {
				tracing::warn!(bucket_start_sec, chunk_id, %err, "corrupted trace chunk, skipping");
				Ok(None)
			}
		}
	}

	pub async fn save(&self, bucket_start_sec: u64, chunk_id: u64, chunk: &Chunk) -> Result<(), kv::KvError> {
		let key = key::trace_chunk_key(bucket_start_sec, chunk_id);
		let bytes = serde_json::to_vec(chunk).expect("chunk always serializes");
		self.kv.set(key.as_bytes(), &bytes).await
	}

	/// All chunks, oldest bucket first, in on-disk key order. Corrupted entries are
	/// skipped rather than failing the whole scan (§4.11).
	pub async fn load_all_ordered(&self) -> Result<Vec<(u64, u64, Chunk)>, kv::KvError> {
		let entries: Vec<Entry> = self.kv.list(key::trace_chunk_prefix().as_bytes()).await?;
		let mut out = Vec::with_capacity(entries.len());
		for entry in entries {
			let Ok((bucket, chunk_id)) = key::decode_trace_chunk_key(&entry.key) else {
				tracing::warn!("trace chunk key failed to decode, skipping");
				continue;
			};
			match serde_json::from_slice::<Chunk>(&entry.value) {
				Ok(chunk) => out.push((bucket, chunk_id, chunk)),
				Err(err) => {
					tracing::warn!(bucket, chunk_id, %err, "corrupted trace chunk, skipping");
				}
			}
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn intern_reuses_existing_entries() {
		let mut chunk = Chunk::new(0);
		let a = chunk.intern("http.request");
		let b = chunk.intern("db.query");
		let a_again = chunk.intern("http.request");
		assert_eq!(a, a_again);
		assert_ne!(a, b);
		assert_eq!(chunk.resolve(a), Some("http.request"));
	}

	#[tokio::test]
	async fn save_and_load_roundtrips() {
		let kv: Arc<dyn KvDriver> = Arc::new(kv::MemoryKvDriver::default());
		let store = ChunkStore::new(kv);
		let mut chunk = Chunk::new(1_000);
		chunk.intern("root");
		store.save(100, 0, &chunk).await.unwrap();

		let loaded = store.load(100, 0).await.unwrap().unwrap();
		assert_eq!(loaded.base_unix_ns, 1_000);
		assert_eq!(loaded.strings, vec!["root".to_string()]);
	}

	#[tokio::test]
	async fn load_all_ordered_skips_corrupted_entries() {
		let kv: Arc<dyn KvDriver> = Arc::new(kv::MemoryKvDriver::default());
		let store = ChunkStore::new(kv.clone());
		store.save(100, 0, &Chunk::new(0)).await.unwrap();
		store.save(101, 0, &Chunk::new(0)).await.unwrap();
		// Corrupt the second chunk directly at the KV layer.
		kv.set(key::trace_chunk_key(101, 0).as_bytes(), b"not json").await.unwrap();

		let all = store.load_all_ordered().await.unwrap();
		assert_eq!(all.len(), 1);
		assert_eq!(all[0].0, 100);
	}
}
