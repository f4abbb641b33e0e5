//! Hibernation controller (§4.8): idle detection, a capped LRU list of hibernatable
//! connection records, and the wake path that rebuilds the connection set on reload.
//! Grounded on `pegboard-gateway/src/shared_state.rs`'s GC-sweep-over-idle-entries shape,
//! adapted from a per-connection in-flight-request map to a single per-actor persisted
//! list (hibernatable conns, unlike in-flight requests, must survive a process restart).

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use kv::KvDriver;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ActorResult;

const HIBERNATABLE_CONNS_KEY: &[u8] = b"\x01hibernatable_conns";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HibernatableConn {
	pub request_id: String,
	pub conn_id: Uuid,
	pub last_seen_ms: i64,
}

/// Policy state for one actor. `conns` is kept oldest-first so eviction is a pop from
/// the front; `idle_since_ms` is `0` while the actor is not idle (an actor can never
/// legitimately go idle at t=0 in practice, so this sentinel is unambiguous).
pub struct HibernationController {
	kv: Arc<dyn KvDriver>,
	conns: tokio::sync::Mutex<Vec<HibernatableConn>>,
	max_conns: usize,
	idle_since_ms: AtomicI64,
}

impl HibernationController {
	pub async fn load(kv: Arc<dyn KvDriver>, max_conns: usize) -> ActorResult<Self> {
		let conns = match kv.get(HIBERNATABLE_CONNS_KEY).await? {
			Some(bytes) => serde_json::from_slice(&bytes)?,
			None => Vec::new(),
		};
		Ok(Self {
			kv,
			conns: tokio::sync::Mutex::new(conns),
			max_conns,
			idle_since_ms: AtomicI64::new(0),
		})
	}

	/// Called whenever the actor transitions between having and not having any of the
	/// conditions §4.8 lists as disqualifying idle (in-flight actions, live
	/// non-hibernatable connections, a near-future alarm, an active workflow step).
	pub fn set_busy(&self) {
		self.idle_since_ms.store(0, Ordering::SeqCst);
	}

	pub fn mark_idle_if_not_already(&self, now_ms: i64) {
		self.idle_since_ms.compare_exchange(0, now_ms, Ordering::SeqCst, Ordering::SeqCst).ok();
	}

	/// True once the actor has been continuously idle for `hibernation_idle_ms`.
	pub fn should_hibernate(&self, now_ms: i64, hibernation_idle_ms: i64) -> bool {
		let since = self.idle_since_ms.load(Ordering::SeqCst);
		since != 0 && now_ms - since >= hibernation_idle_ms
	}

	/// Looks up `request_id` among persisted hibernatable conns. `Some(conn_id)` means
	/// this is a reattach (no second `onConnect` should fire, §4.5/§8 P7); `None` means
	/// the caller should mint a new conn and call `record_new`.
	pub async fn lookup_reattach(&self, request_id: &str) -> Option<Uuid> {
		let mut conns = self.conns.lock().await;
		if let Some(c) = conns.iter_mut().find(|c| c.request_id == request_id) {
			return Some(c.conn_id);
		}
		None
	}

	/// Records a brand new hibernatable connection, evicting the least-recently-seen
	/// entry if the actor is already at `max_conns` (§4.8's LRU cap).
	pub async fn record_new(&self, request_id: String, conn_id: Uuid, now_ms: i64) -> ActorResult<()> {
		let mut conns = self.conns.lock().await;
		if conns.len() >= self.max_conns {
			conns.remove(0);
		}
		conns.push(HibernatableConn { request_id, conn_id, last_seen_ms: now_ms });
		self.persist(&conns).await
	}

	pub async fn touch(&self, conn_id: Uuid, now_ms: i64) -> ActorResult<()> {
		let mut conns = self.conns.lock().await;
		if let Some(c) = conns.iter_mut().find(|c| c.conn_id == conn_id) {
			c.last_seen_ms = now_ms;
			// Re-sort to keep the LRU-eviction invariant (oldest-first) intact.
			conns.sort_by_key(|c| c.last_seen_ms);
		}
		self.persist(&conns).await
	}

	pub async fn remove(&self, conn_id: Uuid) -> ActorResult<()> {
		let mut conns = self.conns.lock().await;
		conns.retain(|c| c.conn_id != conn_id);
		self.persist(&conns).await
	}

	pub async fn list(&self) -> Vec<HibernatableConn> {
		self.conns.lock().await.clone()
	}

	async fn persist(&self, conns: &[HibernatableConn]) -> ActorResult<()> {
		let bytes = serde_json::to_vec(conns)?;
		self.kv.set(HIBERNATABLE_CONNS_KEY, &bytes).await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use kv::MemoryKvDriver;

	#[tokio::test]
	async fn reattach_recognizes_a_previously_recorded_request_id() {
		let driver = Arc::new(MemoryKvDriver::default());
		let ctrl = HibernationController::load(driver, 10).await.unwrap();
		let conn_id = Uuid::new_v4();
		ctrl.record_new("req-1".to_string(), conn_id, 1_000).await.unwrap();

		assert_eq!(ctrl.lookup_reattach("req-1").await, Some(conn_id));
		assert_eq!(ctrl.lookup_reattach("req-2").await, None);
	}

	#[tokio::test]
	async fn cap_overflow_evicts_the_oldest_entry() {
		let driver = Arc::new(MemoryKvDriver::default());
		let ctrl = HibernationController::load(driver, 2).await.unwrap();
		ctrl.record_new("req-1".to_string(), Uuid::new_v4(), 1_000).await.unwrap();
		ctrl.record_new("req-2".to_string(), Uuid::new_v4(), 1_001).await.unwrap();
		ctrl.record_new("req-3".to_string(), Uuid::new_v4(), 1_002).await.unwrap();

		assert_eq!(ctrl.lookup_reattach("req-1").await, None, "oldest entry must be evicted over the cap");
		assert!(ctrl.lookup_reattach("req-2").await.is_some());
		assert!(ctrl.lookup_reattach("req-3").await.is_some());
	}

	#[tokio::test]
	async fn idle_only_counts_once_continuously_past_the_threshold() {
		let driver = Arc::new(MemoryKvDriver::default());
		let ctrl = HibernationController::load(driver, 10).await.unwrap();
		ctrl.mark_idle_if_not_already(1_000);
		assert!(!ctrl.should_hibernate(1_500, 1_000));
		assert!(ctrl.should_hibernate(2_000, 1_000));

		ctrl.set_busy();
		assert!(!ctrl.should_hibernate(2_000, 1_000));
	}
}
