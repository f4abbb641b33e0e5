//! In-actor message queue (§4.9): durable named queues, at-least-once consume, and the
//! "completable" handshake that lets an `HttpQueueSendRequest{wait:true}` block until a
//! consumer calls `complete()`. Reuses the same tuple-packed message key family and
//! name-intern registry the workflow engine uses for its own internal queue (§3.4/§4.3),
//! since both are "durable FIFO messages under an interned name" over an isolated KV
//! namespace — here the actor's own, there the workflow's.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use kv::{key, KvDriver, NameRegistry};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex, Notify};
use uuid::Uuid;

use crate::error::ActorResult;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueueMessage {
	pub id: Uuid,
	pub name: String,
	pub body: Value,
	pub completable: bool,
	pub sent_at: i64,
}

pub struct NextOptions {
	pub names: Vec<String>,
	pub completable: Option<bool>,
	pub limit: usize,
	pub timeout_ms: Option<i64>,
}

struct Registry {
	names: NameRegistry,
}

/// Durable queue plus the in-memory completion-waiter table; the waiter table is
/// process-local by design (§9's "promise-with-resolvers" note) — a crash loses pending
/// waiters, but the underlying message remains in KV and is redelivered on the next
/// `next()`.
pub struct Queue {
	kv: Arc<dyn KvDriver>,
	registry: Mutex<Registry>,
	waiters: scc::HashMap<Uuid, oneshot::Sender<Value>>,
	notify: Notify,
}

impl Queue {
	pub async fn load(kv: Arc<dyn KvDriver>) -> ActorResult<Self> {
		let names = kv::registry::load(kv.as_ref()).await?;
		Ok(Self {
			kv,
			registry: Mutex::new(Registry { names }),
			waiters: scc::HashMap::new(),
			notify: Notify::new(),
		})
	}

	async fn intern(&self, name: &str) -> ActorResult<u32> {
		let mut reg = self.registry.lock().await;
		let (idx, new) = reg.names.intern(name);
		if let Some((idx, name)) = new {
			kv::registry::persist_new(self.kv.as_ref(), idx, &name).await?;
		}
		Ok(idx)
	}

	/// Appends durably and returns the message id. Callers (the `ActorInstance`) are
	/// responsible for rejecting sends to queue names the actor never declared with
	/// `UnknownQueue` — this type has no concept of a declared-name allowlist.
	pub async fn send(&self, name: &str, body: Value, completable: bool, now_ms: i64) -> ActorResult<Uuid> {
		let queue_idx = self.intern(name).await? as u64;
		let existing = load_messages(self.kv.as_ref(), queue_idx).await?;
		let seq = existing.iter().map(|(seq, _)| *seq + 1).max().unwrap_or(0);
		let message = QueueMessage { id: Uuid::new_v4(), name: name.to_string(), body, completable, sent_at: now_ms };
		let bytes = serde_json::to_vec(&message)?;
		self.kv.set(key::message_key(queue_idx, seq).as_bytes(), &bytes).await?;
		self.notify.notify_waiters();
		Ok(message.id)
	}

	/// Registers a oneshot to be resolved when `complete(message_id, ..)` is called, for
	/// bridging an `HttpQueueSendRequest{wait:true}` to the eventual `queue.next` consumer.
	pub fn register_waiter(&self, message_id: Uuid) -> oneshot::Receiver<Value> {
		let (tx, rx) = oneshot::channel();
		let _ = self.waiters.insert(message_id, tx);
		rx
	}

	/// Resolves a previously registered waiter. Returns `false` if nobody was waiting
	/// (the send wasn't `wait:true`, or the waiter already timed out and was dropped).
	pub async fn complete(&self, message_id: Uuid, response: Value) -> bool {
		if let Some((_, tx)) = self.waiters.remove_async(&message_id).await {
			tx.send(response).is_ok()
		} else {
			false
		}
	}

	/// Returns up to `limit` messages matching any of `opts.names`, blocking (via a
	/// notify-then-repoll loop, never a busy loop) until at least one is available or
	/// `timeout_ms` elapses. Consumed messages are deleted; a delete failure is logged
	/// and the message is left in place, giving the documented at-least-once semantics
	/// under partial-delete failure (§4.9, §8 P6).
	pub async fn next(&self, opts: NextOptions) -> ActorResult<Vec<QueueMessage>> {
		let wanted: HashSet<&str> = opts.names.iter().map(String::as_str).collect();
		let deadline = opts.timeout_ms.map(|ms| tokio::time::Instant::now() + Duration::from_millis(ms.max(0) as u64));

		loop {
			let mut matched = Vec::new();
			for name in &opts.names {
				if matched.len() >= opts.limit {
					break;
				}
				let queue_idx = self.intern(name).await?;
				let messages = load_messages(self.kv.as_ref(), queue_idx as u64).await?;
				for (seq, message) in messages {
					if matched.len() >= opts.limit {
						break;
					}
					if !wanted.contains(message.name.as_str()) {
						continue;
					}
					if let Some(want_completable) = opts.completable {
						if message.completable != want_completable {
							continue;
						}
					}
					if let Err(err) = self.kv.delete(key::message_key(queue_idx as u64, seq).as_bytes()).await {
						tracing::warn!(%err, message_id = %message.id, "failed to delete consumed queue message, it will be redelivered");
					}
					matched.push(message);
				}
			}

			if !matched.is_empty() {
				return Ok(matched);
			}

			match deadline {
				None => {
					// No timeout specified: wait indefinitely for the next send.
					self.notify.notified().await;
				}
				Some(deadline) => {
					let now = tokio::time::Instant::now();
					if now >= deadline {
						return Ok(Vec::new());
					}
					let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
					if tokio::time::Instant::now() >= deadline {
						return Ok(Vec::new());
					}
				}
			}
		}
	}

	/// Non-consuming view, for `peekMessages` (§4.10.5 extends this to workflows; here
	/// it's the actor-level equivalent named in §4.9).
	pub async fn peek(&self, names: &[String], limit: usize) -> ActorResult<Vec<QueueMessage>> {
		let mut out = Vec::new();
		for name in names {
			if out.len() >= limit {
				break;
			}
			let queue_idx = self.intern(name).await?;
			let messages = load_messages(self.kv.as_ref(), queue_idx as u64).await?;
			for (_, message) in messages {
				if out.len() >= limit {
					break;
				}
				out.push(message);
			}
		}
		Ok(out)
	}
}

async fn load_messages(kv: &dyn KvDriver, queue_name_index: u64) -> Result<Vec<(u64, QueueMessage)>, kv::KvError> {
	let entries = kv.list(key::message_prefix(queue_name_index).as_bytes()).await?;
	entries
		.into_iter()
		.map(|e| {
			let seq = key::decode_message_seq(&e.key).map_err(|err| kv::KvError::Unavailable(err.to_string()))?;
			let message: QueueMessage =
				serde_json::from_slice(&e.value).map_err(|err| kv::KvError::Unavailable(err.to_string()))?;
			Ok((seq, message))
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use kv::MemoryKvDriver;
	use serde_json::json;

	#[tokio::test]
	async fn send_then_next_is_fifo_and_consumes() {
		let queue = Queue::load(Arc::new(MemoryKvDriver::default())).await.unwrap();
		queue.send("work", json!({"job": 1}), false, 1_000).await.unwrap();
		queue.send("work", json!({"job": 2}), false, 1_001).await.unwrap();

		let got = queue
			.next(NextOptions { names: vec!["work".to_string()], completable: None, limit: 1, timeout_ms: Some(0) })
			.await
			.unwrap();
		assert_eq!(got.len(), 1);
		assert_eq!(got[0].body, json!({"job": 1}));

		// Consumed message must not be redelivered.
		let remaining = queue.peek(&["work".to_string()], 10).await.unwrap();
		assert_eq!(remaining.len(), 1);
		assert_eq!(remaining[0].body, json!({"job": 2}));
	}

	#[tokio::test]
	async fn next_times_out_to_empty_when_nothing_arrives() {
		let queue = Queue::load(Arc::new(MemoryKvDriver::default())).await.unwrap();
		let got = queue
			.next(NextOptions { names: vec!["work".to_string()], completable: None, limit: 1, timeout_ms: Some(20) })
			.await
			.unwrap();
		assert!(got.is_empty());
	}

	#[tokio::test]
	async fn completable_send_wait_resolves_on_complete() {
		let queue = Arc::new(Queue::load(Arc::new(MemoryKvDriver::default())).await.unwrap());
		let id = queue.send("work", json!({"job": 1}), true, 1_000).await.unwrap();
		let rx = queue.register_waiter(id);

		let queue2 = queue.clone();
		tokio::spawn(async move {
			let msgs = queue2
				.next(NextOptions { names: vec!["work".to_string()], completable: Some(true), limit: 1, timeout_ms: Some(500) })
				.await
				.unwrap();
			queue2.complete(msgs[0].id, json!({"ok": true})).await;
		});

		let response = rx.await.unwrap();
		assert_eq!(response, json!({"ok": true}));
	}
}
