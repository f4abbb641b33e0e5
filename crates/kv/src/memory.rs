//! In-memory `KvDriver` reference implementation, used by every other crate's tests.
//! Grounded on the teacher's `actor-kv` test harness (`tests/kv_operations.rs`,
//! `tests/list_edge_cases.rs`), which exercises the same operation set against a real
//! backend; this gives the crates above a dependency-free stand-in with identical
//! ordering semantics.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::driver::{key_range_from_prefix, Entry, KvDriver, KvError, ListRangeOptions, Write};
use crate::key::PackedKey;

#[derive(Default)]
struct Inner {
	data: BTreeMap<Vec<u8>, Vec<u8>>,
	alarms: BTreeMap<String, i64>,
}

pub struct MemoryKvDriver {
	inner: Mutex<Inner>,
	worker_poll_interval_ms: u64,
}

impl MemoryKvDriver {
	pub fn new(worker_poll_interval_ms: u64) -> Self {
		Self {
			inner: Mutex::new(Inner::default()),
			worker_poll_interval_ms,
		}
	}

	/// Alarms currently armed, sorted by wake time; used by workflow/actor tests that
	/// want to assert an alarm was scheduled without a real clock.
	pub fn alarms(&self) -> Vec<(String, i64)> {
		let inner = self.inner.lock().unwrap();
		inner.alarms.iter().map(|(k, v)| (k.clone(), *v)).collect()
	}
}

impl Default for MemoryKvDriver {
	fn default() -> Self {
		Self::new(1_500)
	}
}

#[async_trait]
impl KvDriver for MemoryKvDriver {
	async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
		Ok(self.inner.lock().unwrap().data.get(key).cloned())
	}

	async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
		self.inner.lock().unwrap().data.insert(key.to_vec(), value.to_vec());
		Ok(())
	}

	async fn delete(&self, key: &[u8]) -> Result<(), KvError> {
		self.inner.lock().unwrap().data.remove(key);
		Ok(())
	}

	async fn delete_prefix(&self, prefix: &[u8]) -> Result<(), KvError> {
		let mut inner = self.inner.lock().unwrap();
		let packed = PackedKey(prefix.to_vec());
		let (start, end) = key_range_from_prefix(&packed);
		let to_remove: Vec<Vec<u8>> = inner
			.data
			.range(start..end)
			.map(|(k, _)| k.clone())
			.collect();
		for key in to_remove {
			inner.data.remove(&key);
		}
		Ok(())
	}

	async fn list(&self, prefix: &[u8]) -> Result<Vec<Entry>, KvError> {
		let inner = self.inner.lock().unwrap();
		let packed = PackedKey(prefix.to_vec());
		let (start, end) = key_range_from_prefix(&packed);
		Ok(inner
			.data
			.range(start..end)
			.map(|(k, v)| Entry { key: k.clone(), value: v.clone() })
			.collect())
	}

	async fn list_range(
		&self,
		start: &[u8],
		end: &[u8],
		options: ListRangeOptions,
	) -> Result<Vec<Entry>, KvError> {
		let inner = self.inner.lock().unwrap();
		let mut entries: Vec<Entry> = inner
			.data
			.range(start.to_vec()..end.to_vec())
			.map(|(k, v)| Entry { key: k.clone(), value: v.clone() })
			.collect();
		if options.reverse {
			entries.reverse();
		}
		if let Some(limit) = options.limit {
			entries.truncate(limit);
		}
		Ok(entries)
	}

	async fn batch(&self, writes: Vec<Write>) -> Result<(), KvError> {
		let mut inner = self.inner.lock().unwrap();
		for write in writes {
			inner.data.insert(write.key, write.value);
		}
		Ok(())
	}

	async fn set_alarm(&self, id: &str, wake_at_ms: i64) -> Result<(), KvError> {
		self.inner.lock().unwrap().alarms.insert(id.to_string(), wake_at_ms);
		Ok(())
	}

	async fn clear_alarm(&self, id: &str) -> Result<(), KvError> {
		self.inner.lock().unwrap().alarms.remove(id);
		Ok(())
	}

	fn worker_poll_interval_ms(&self) -> u64 {
		self.worker_poll_interval_ms
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::key::name_key;

	#[tokio::test]
	async fn list_returns_lexicographic_order() {
		let driver = MemoryKvDriver::default();
		driver.set(name_key(3).as_bytes(), b"c").await.unwrap();
		driver.set(name_key(1).as_bytes(), b"a").await.unwrap();
		driver.set(name_key(2).as_bytes(), b"b").await.unwrap();

		let entries = driver.list(&foundationdb_tuple::pack(&(1i64,))).await.unwrap();
		let values: Vec<&[u8]> = entries.iter().map(|e| e.value.as_slice()).collect();
		assert_eq!(values, vec![b"a" as &[u8], b"b", b"c"]);
	}

	#[tokio::test]
	async fn delete_prefix_only_removes_matching_keys() {
		let driver = MemoryKvDriver::default();
		driver.set(&foundationdb_tuple::pack(&(1i64, 1i64)), b"keep-1").await.unwrap();
		driver.set(&foundationdb_tuple::pack(&(2i64, 1i64)), b"keep-2").await.unwrap();

		driver.delete_prefix(&foundationdb_tuple::pack(&(1i64,))).await.unwrap();

		assert!(driver.get(&foundationdb_tuple::pack(&(1i64, 1i64))).await.unwrap().is_none());
		assert!(driver.get(&foundationdb_tuple::pack(&(2i64, 1i64))).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn alarms_round_trip() {
		let driver = MemoryKvDriver::default();
		driver.set_alarm("wf-1", 1_000).await.unwrap();
		assert_eq!(driver.alarms(), vec![("wf-1".to_string(), 1_000)]);
		driver.clear_alarm("wf-1").await.unwrap();
		assert!(driver.alarms().is_empty());
	}
}
