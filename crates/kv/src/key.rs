//! Tuple-packed key layout (§4.3).
//!
//! Grounded on `engine/packages/actor-kv/src/key.rs`'s `KeyWrapper`/`ListKeyWrapper`
//! pattern: keys are packed as FoundationDB-style tuples so that byte order matches
//! semantic order. `foundationdb-tuple` is the pure codec layer the teacher's
//! `universaldb` wraps around a storage backend; depended on directly here since the
//! storage backend itself is out of scope (§1) and this crate only needs the codec.

use foundationdb_tuple::{TuplePack, TupleUnpack};

/// Top-level key prefixes from §4.3.
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
	Names = 1,
	History = 2,
	Messages = 3,
	WorkflowMeta = 4,
	EntryMetadata = 5,
	/// §3.5's `DATA` prefix for trace/span chunks.
	Trace = 6,
}

/// Sub-keys under the workflow-meta prefix (§4.3).
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowMetaField {
	State = 1,
	Output = 2,
	Error = 3,
	Version = 4,
	Input = 5,
}

/// One segment of a workflow history `Path` (§3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
	NameIndex(u32),
	LoopIterationMarker { loop_name_index: u32, iteration: u32 },
	/// One branch of a `join`/`race`, addressed by the primitive's own name index and
	/// the interned branch name, so sibling branches never collide on a sub-path.
	BranchMarker { join_name_index: u32, branch_name_index: u32 },
}

impl PathSegment {
	/// `(tag, a, b)`: tag 0 = `NameIndex(a)`, tag 1 = `LoopIterationMarker(a, b)`, tag 2 =
	/// `BranchMarker(a, b)`. Tags and fields are packed as non-negative integers, which
	/// `foundationdb-tuple` encodes order-preservingly, so tuple order of the whole
	/// `Path` matches §3.4's "entries totally ordered by Path in tuple order" invariant
	/// directly.
	fn as_tuple(&self) -> (i64, i64, i64) {
		match *self {
			PathSegment::NameIndex(i) => (0, i as i64, 0),
			PathSegment::LoopIterationMarker { loop_name_index, iteration } => {
				(1, loop_name_index as i64, iteration as i64)
			}
			PathSegment::BranchMarker { join_name_index, branch_name_index } => {
				(2, join_name_index as i64, branch_name_index as i64)
			}
		}
	}

	fn from_tuple((tag, a, b): (i64, i64, i64)) -> Self {
		match tag {
			0 => PathSegment::NameIndex(a as u32),
			1 => PathSegment::LoopIterationMarker {
				loop_name_index: a as u32,
				iteration: b as u32,
			},
			_ => PathSegment::BranchMarker {
				join_name_index: a as u32,
				branch_name_index: b as u32,
			},
		}
	}
}

/// An ordered sequence of `PathSegment`s addressing one workflow history entry.
pub type Path = Vec<PathSegment>;

fn path_as_tuples(path: &Path) -> Vec<(i64, i64, i64)> {
	path.iter().map(PathSegment::as_tuple).collect()
}

fn path_from_tuples(tuples: Vec<(i64, i64, i64)>) -> Path {
	tuples.into_iter().map(PathSegment::from_tuple).collect()
}

/// A fully-packed key, ready to hand to a `KvDriver`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedKey(pub Vec<u8>);

impl PackedKey {
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn into_bytes(self) -> Vec<u8> {
		self.0
	}
}

/// Name registry entry: append-only, indexed by position (§3.4).
pub fn name_key(index: u64) -> PackedKey {
	PackedKey(foundationdb_tuple::pack(&(Prefix::Names as i64, index as i64)))
}

pub fn names_prefix() -> PackedKey {
	PackedKey(foundationdb_tuple::pack(&(Prefix::Names as i64,)))
}

/// Recovers the index packed into a `name_key`, for replaying the registry on load.
pub fn decode_name_index(bytes: &[u8]) -> Result<u64, foundationdb_tuple::PackError> {
	let (_, index): (i64, i64) = foundationdb_tuple::unpack(bytes)?;
	Ok(index as u64)
}

/// History entry key for a workflow `Path`.
pub fn history_key(path: &Path) -> PackedKey {
	PackedKey(foundationdb_tuple::pack(&(
		Prefix::History as i64,
		path_as_tuples(path),
	)))
}

/// Prefix covering every history key (for full-namespace scans during replay load).
pub fn history_prefix() -> PackedKey {
	PackedKey(foundationdb_tuple::pack(&(Prefix::History as i64,)))
}

/// Entry-metadata key, mirroring the history key's path.
pub fn entry_metadata_key(path: &Path) -> PackedKey {
	PackedKey(foundationdb_tuple::pack(&(
		Prefix::EntryMetadata as i64,
		path_as_tuples(path),
	)))
}

pub fn entry_metadata_prefix() -> PackedKey {
	PackedKey(foundationdb_tuple::pack(&(Prefix::EntryMetadata as i64,)))
}

/// Message key: `(Messages, queueNameIndex, seq)`. `seq` is a monotonically increasing
/// counter maintained by the caller, so byte order == insertion order (§3.4 FIFO
/// invariant) without depending on wall-clock time.
pub fn message_key(queue_name_index: u64, seq: u64) -> PackedKey {
	PackedKey(foundationdb_tuple::pack(&(
		Prefix::Messages as i64,
		queue_name_index as i64,
		seq as i64,
	)))
}

/// Recovers the `seq` packed into a `message_key`, for FIFO-ordered deletion.
pub fn decode_message_seq(bytes: &[u8]) -> Result<u64, foundationdb_tuple::PackError> {
	let (_, _, seq): (i64, i64, i64) = foundationdb_tuple::unpack(bytes)?;
	Ok(seq as u64)
}

pub fn message_prefix(queue_name_index: u64) -> PackedKey {
	PackedKey(foundationdb_tuple::pack(&(
		Prefix::Messages as i64,
		queue_name_index as i64,
	)))
}

/// Trace chunk key: `(Trace, bucketStartSec, chunkId)` (§3.5). Byte order sorts chunks
/// by bucket first, so a range scan over a time window is a single prefix-bounded scan.
pub fn trace_chunk_key(bucket_start_sec: u64, chunk_id: u64) -> PackedKey {
	PackedKey(foundationdb_tuple::pack(&(
		Prefix::Trace as i64,
		bucket_start_sec as i64,
		chunk_id as i64,
	)))
}

pub fn trace_chunk_prefix() -> PackedKey {
	PackedKey(foundationdb_tuple::pack(&(Prefix::Trace as i64,)))
}

/// Recovers `(bucketStartSec, chunkId)` from a trace chunk key.
pub fn decode_trace_chunk_key(bytes: &[u8]) -> Result<(u64, u64), foundationdb_tuple::PackError> {
	let (_, bucket, chunk): (i64, i64, i64) = foundationdb_tuple::unpack(bytes)?;
	Ok((bucket as u64, chunk as u64))
}

pub fn workflow_meta_key(field: WorkflowMetaField) -> PackedKey {
	PackedKey(foundationdb_tuple::pack(&(
		Prefix::WorkflowMeta as i64,
		field as i64,
	)))
}

/// Decodes a history or entry-metadata key back to its `Path`, for debugging/tests.
pub fn decode_path(prefix: Prefix, bytes: &[u8]) -> Result<Path, foundationdb_tuple::PackError> {
	let (got_prefix, tuples): (i64, Vec<(i64, i64, i64)>) = foundationdb_tuple::unpack(bytes)?;
	debug_assert_eq!(got_prefix, prefix as i64);
	Ok(path_from_tuples(tuples))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn name_keys_sort_by_index() {
		let a = name_key(1);
		let b = name_key(2);
		let c = name_key(10);
		assert!(a.as_bytes() < b.as_bytes());
		assert!(b.as_bytes() < c.as_bytes());
	}

	#[test]
	fn path_order_matches_segment_order() {
		let p1 = vec![PathSegment::NameIndex(1)];
		let p2 = vec![PathSegment::NameIndex(2)];
		let p3 = vec![PathSegment::NameIndex(1), PathSegment::NameIndex(0)];

		assert!(history_key(&p1).as_bytes() < history_key(&p2).as_bytes());
		// A path that extends another sorts after the shorter prefix path, matching
		// the expectation that a loop's first iteration (p1-extended) follows its
		// parent scope's own entry (p1) but before the next sibling (p2).
		assert!(history_key(&p1).as_bytes() < history_key(&p3).as_bytes());
		assert!(history_key(&p3).as_bytes() < history_key(&p2).as_bytes());
	}

	#[test]
	fn loop_iterations_sort_by_iteration_number() {
		let iter0 = vec![PathSegment::LoopIterationMarker { loop_name_index: 0, iteration: 0 }];
		let iter1 = vec![PathSegment::LoopIterationMarker { loop_name_index: 0, iteration: 1 }];
		assert!(history_key(&iter0).as_bytes() < history_key(&iter1).as_bytes());
	}

	#[test]
	fn path_roundtrips_through_history_key() {
		let path = vec![
			PathSegment::NameIndex(3),
			PathSegment::LoopIterationMarker { loop_name_index: 1, iteration: 4 },
		];
		let key = history_key(&path);
		let decoded = decode_path(Prefix::History, key.as_bytes()).unwrap();
		assert_eq!(decoded, path);
	}

	#[test]
	fn message_keys_are_fifo_by_seq() {
		let a = message_key(0, 1);
		let b = message_key(0, 2);
		assert!(a.as_bytes() < b.as_bytes());
	}

	#[test]
	fn trace_chunk_keys_sort_by_bucket_then_chunk() {
		let a = trace_chunk_key(100, 0);
		let b = trace_chunk_key(100, 1);
		let c = trace_chunk_key(101, 0);
		assert!(a.as_bytes() < b.as_bytes());
		assert!(b.as_bytes() < c.as_bytes());
		assert_eq!(decode_trace_chunk_key(a.as_bytes()).unwrap(), (100, 0));
	}
}
