//! Per-process actor registry (§3.1, §4.2): spawns and memoizes one mailbox per
//! actor id, each backed by its own isolated `KvDriver` instance.
//!
//! Grounded on `actor::instance::spawn`'s contract that `ActorHandle` is not generic
//! over the actor definition it was spawned from, so a single map can hold every live
//! actor's handle regardless of kind. `MemoryKvDriver` is the only concrete `KvDriver`
//! in scope here (the real storage backend is out of scope per §1), so every actor
//! gets its own instance rather than sharing one KV namespace — per §3.1's "each
//! actor is provided a logically isolated namespace."

use std::collections::HashMap;
use std::sync::Arc;

use actor::{ActorDefinition, ActorHandle, ActorResult, EventSink};
use kv::MemoryKvDriver;
use serde_json::Value;
use tokio::sync::RwLock;

pub struct ActorRegistry<D: ActorDefinition> {
	def: Arc<D>,
	events: Arc<dyn EventSink>,
	max_hibernatable_conns: usize,
	mailbox_capacity: usize,
	worker_poll_interval_ms: u64,
	actors: RwLock<HashMap<String, (ActorHandle, Arc<MemoryKvDriver>)>>,
}

impl<D: ActorDefinition> ActorRegistry<D> {
	pub fn new(
		def: Arc<D>,
		events: Arc<dyn EventSink>,
		max_hibernatable_conns: usize,
		mailbox_capacity: usize,
		worker_poll_interval_ms: u64,
	) -> Self {
		Self {
			def,
			events,
			max_hibernatable_conns,
			mailbox_capacity,
			worker_poll_interval_ms,
			actors: RwLock::new(HashMap::new()),
		}
	}

	/// Returns the running handle for `actor_id`, spawning a fresh instance (with a
	/// fresh isolated KV namespace) on first use.
	pub async fn get_or_spawn(&self, actor_id: &str) -> ActorResult<ActorHandle> {
		if let Some((handle, _)) = self.actors.read().await.get(actor_id) {
			return Ok(handle.clone());
		}

		let mut actors = self.actors.write().await;
		if let Some((handle, _)) = actors.get(actor_id) {
			return Ok(handle.clone());
		}

		let kv: Arc<MemoryKvDriver> = Arc::new(MemoryKvDriver::new(self.worker_poll_interval_ms));
		let handle = actor::spawn(
			actor_id.to_string(),
			self.def.clone(),
			kv.clone(),
			self.events.clone(),
			Value::Null,
			self.max_hibernatable_conns,
			self.mailbox_capacity,
			None,
		)
		.await?;

		actors.insert(actor_id.to_string(), (handle.clone(), kv));
		Ok(handle)
	}

	pub async fn get(&self, actor_id: &str) -> Option<ActorHandle> {
		self.actors.read().await.get(actor_id).map(|(h, _)| h.clone())
	}

	/// Actor id + KV driver for every currently-spawned actor, polled by the
	/// alarm-wake loop.
	pub async fn snapshot_kv_drivers(&self) -> Vec<(String, Arc<MemoryKvDriver>)> {
		self.actors.read().await.iter().map(|(id, (_, kv))| (id.clone(), kv.clone())).collect()
	}

	/// Every currently-spawned actor's handle, used to drain in-flight work on shutdown.
	pub async fn snapshot_handles(&self) -> Vec<ActorHandle> {
		self.actors.read().await.values().map(|(h, _)| h.clone()).collect()
	}
}

#[cfg(test)]
mod tests {
	use actor::NullEventSink;
	use serde_json::json;

	use super::*;

	struct Echo;

	#[async_trait::async_trait]
	impl ActorDefinition for Echo {
		fn create_state(&self, _input: Value) -> Value {
			json!({})
		}

		async fn action(&self, _ctx: &mut actor::ActorCtx<'_>, _name: &str, args: Value) -> ActorResult<Value> {
			Ok(args)
		}
	}

	fn registry() -> ActorRegistry<Echo> {
		ActorRegistry::new(Arc::new(Echo), Arc::new(NullEventSink), 10, 16, 1_500)
	}

	#[tokio::test]
	async fn get_or_spawn_memoizes_the_same_handle_for_repeat_calls() {
		let registry = registry();
		let first = registry.get_or_spawn("actor-1").await.unwrap();
		let second = registry.get_or_spawn("actor-1").await.unwrap();
		assert_eq!(first.actor_id, second.actor_id);

		let drivers = registry.snapshot_kv_drivers().await;
		assert_eq!(drivers.len(), 1);
	}

	#[tokio::test]
	async fn distinct_actor_ids_get_distinct_kv_namespaces() {
		let registry = registry();
		registry.get_or_spawn("actor-a").await.unwrap();
		registry.get_or_spawn("actor-b").await.unwrap();

		let drivers = registry.snapshot_kv_drivers().await;
		assert_eq!(drivers.len(), 2);
		assert!(!Arc::ptr_eq(&drivers[0].1, &drivers[1].1));
	}

	#[tokio::test]
	async fn get_returns_none_for_unspawned_actor() {
		let registry = registry();
		assert!(registry.get("never-spawned").await.is_none());
	}
}
