//! Actor state store (§4.4): a single in-memory mirror, dirty tracking, bounded-retry
//! flush. Grounded on `gasoline`'s `update_workflow_state` write path for the
//! bounded-retry-then-surface-an-error shape, and on `runtime_error::ActorStopping`'s
//! documented retry cadence (3 attempts, 25ms apart) for the backoff constants, since
//! spec §4.4 asks for "bounded backoff" without naming a specific policy.

use std::sync::Arc;
use std::time::Duration;

use kv::KvDriver;
use serde_json::Value;

use crate::error::{ActorError, ActorResult};

const STATE_KEY: &[u8] = b"\x01state";
const MAX_FLUSH_ATTEMPTS: u32 = 3;
const RETRY_SPACING_MS: u64 = 25;

struct Inner {
	state: Value,
	dirty: bool,
}

/// Owns the actor's persisted state blob. Reads/writes to `state` must happen under the
/// single-writer invariant the mailbox (`ActorInstance`) already provides; this store adds
/// no locking of its own beyond what's needed to make `snapshot_for_replication` safe to
/// call from a different task than the mailbox (e.g. a replication sidecar).
pub struct ActorStateStore {
	kv: Arc<dyn KvDriver>,
	inner: tokio::sync::Mutex<Inner>,
}

impl ActorStateStore {
	/// Reads the persisted blob if any, otherwise calls `initial` to produce the value
	/// `createState(input)` would have produced on first load (§4.7).
	pub async fn load(kv: Arc<dyn KvDriver>, initial: impl FnOnce() -> Value) -> ActorResult<Self> {
		let state = match kv.get(STATE_KEY).await? {
			Some(bytes) => serde_json::from_slice(&bytes)?,
			None => initial(),
		};
		Ok(Self { kv, inner: tokio::sync::Mutex::new(Inner { state, dirty: false }) })
	}

	/// Applies `f` to the in-memory state and marks it dirty for the next `flush`.
	pub async fn mutate<F, T>(&self, f: F) -> T
	where
		F: FnOnce(&mut Value) -> T,
	{
		let mut inner = self.inner.lock().await;
		let out = f(&mut inner.state);
		inner.dirty = true;
		out
	}

	pub async fn get(&self) -> Value {
		self.inner.lock().await.state.clone()
	}

	/// Clones the current state to a value safe to hand to an external observer (§4.4);
	/// a plain clone is sufficient since `Value` is already a fully owned tree.
	pub async fn snapshot_for_replication(&self) -> Value {
		self.inner.lock().await.state.clone()
	}

	/// Writes the current blob if dirty, retrying transient KV errors up to
	/// `MAX_FLUSH_ATTEMPTS` times before surfacing `StorageUnavailable` (§4.4, §7).
	pub async fn flush(&self) -> ActorResult<()> {
		let mut inner = self.inner.lock().await;
		if !inner.dirty {
			return Ok(());
		}

		let bytes = serde_json::to_vec(&inner.state)?;
		let mut attempt = 0;
		loop {
			match self.kv.set(STATE_KEY, &bytes).await {
				Ok(()) => {
					inner.dirty = false;
					return Ok(());
				}
				Err(err) => {
					attempt += 1;
					if attempt >= MAX_FLUSH_ATTEMPTS {
						return Err(ActorError::StorageUnavailable(runtime_error::StorageUnavailable {
							reason: err.to_string(),
						}));
					}
					tokio::time::sleep(Duration::from_millis(RETRY_SPACING_MS)).await;
				}
			}
		}
	}

	pub fn is_dirty_hint(&self) -> bool {
		self.inner.try_lock().map(|i| i.dirty).unwrap_or(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use kv::MemoryKvDriver;
	use serde_json::json;

	#[tokio::test]
	async fn load_falls_back_to_initial_state_when_nothing_persisted() {
		let driver = Arc::new(MemoryKvDriver::default());
		let store = ActorStateStore::load(driver, || json!({"count": 0})).await.unwrap();
		assert_eq!(store.get().await, json!({"count": 0}));
	}

	#[tokio::test]
	async fn flush_persists_mutations_and_clears_dirty_flag() {
		let driver = Arc::new(MemoryKvDriver::default());
		let store = ActorStateStore::load(driver.clone(), || json!({"count": 0})).await.unwrap();

		store.mutate(|s| s["count"] = json!(1)).await;
		assert!(store.is_dirty_hint());
		store.flush().await.unwrap();
		assert!(!store.is_dirty_hint());

		let reloaded = ActorStateStore::load(driver, || json!({"count": 0})).await.unwrap();
		assert_eq!(reloaded.get().await, json!({"count": 1}));
	}
}
