//! `KvDriver` trait (§4.2): the storage seam the actor and workflow engines are built
//! against. Grounded on the contract `engine/packages/actor-kv` exposes to `gasoline`/
//! `pegboard`, generalized from FDB-specific transactions to a plain async trait since
//! the FDB client itself is out of scope here (§1).

use async_trait::async_trait;

use crate::key::PackedKey;

#[derive(Debug, Clone, thiserror::Error)]
pub enum KvError {
	#[error("kv backend unavailable: {0}")]
	Unavailable(String),
}

/// A key/value pair as returned by `list`/`list_range`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
	pub key: Vec<u8>,
	pub value: Vec<u8>,
}

/// A single write in a `batch` call.
#[derive(Debug, Clone)]
pub struct Write {
	pub key: Vec<u8>,
	pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ListRangeOptions {
	pub reverse: bool,
	pub limit: Option<usize>,
}

/// Required operations on byte keys within one actor's (or workflow instance's)
/// logically isolated namespace (§4.2). Implementations MUST return `list`/
/// `list_range` results in lexicographic key order — the core relies on this for
/// FIFO message ordering and replay determinism.
#[async_trait]
pub trait KvDriver: Send + Sync {
	async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;
	async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;
	async fn delete(&self, key: &[u8]) -> Result<(), KvError>;
	async fn delete_prefix(&self, prefix: &[u8]) -> Result<(), KvError>;

	/// All entries whose key starts with `prefix`, in lexicographic order.
	async fn list(&self, prefix: &[u8]) -> Result<Vec<Entry>, KvError>;

	/// Entries with `start <= key < end`, in lexicographic order (reversed if
	/// `options.reverse`), truncated to `options.limit`.
	async fn list_range(
		&self,
		start: &[u8],
		end: &[u8],
		options: ListRangeOptions,
	) -> Result<Vec<Entry>, KvError>;

	/// Applies every write atomically within this namespace, where the backend
	/// supports it.
	async fn batch(&self, writes: Vec<Write>) -> Result<(), KvError>;

	/// Schedules a wake-up for `id` at `wake_at_ms` (unix millis), replacing any
	/// previous alarm under the same id.
	async fn set_alarm(&self, id: &str, wake_at_ms: i64) -> Result<(), KvError>;
	async fn clear_alarm(&self, id: &str) -> Result<(), KvError>;

	/// Threshold (§4.10.4) between sleeps satisfied in-memory and sleeps that set a
	/// persistent alarm.
	fn worker_poll_interval_ms(&self) -> u64;
}

pub(crate) fn key_range_from_prefix(prefix: &PackedKey) -> (Vec<u8>, Vec<u8>) {
	let start = prefix.as_bytes().to_vec();
	let mut end = start.clone();
	// Standard "prefix + 0xff..." trick isn't safe against arbitrary byte values; the
	// tuple encoding never emits a key consisting entirely of 0xff, so incrementing
	// the last byte with carry gives an exclusive upper bound covering the prefix.
	increment_bytes(&mut end);
	(start, end)
}

fn increment_bytes(bytes: &mut Vec<u8>) {
	for byte in bytes.iter_mut().rev() {
		if *byte == 0xff {
			*byte = 0;
		} else {
			*byte += 1;
			return;
		}
	}
	bytes.push(0);
}
