//! Connection manager (§4.5): the set of live connections for every actor this process
//! hosts, plus the broadcast fan-out and the connect/disconnect contract that sits
//! between an actor's hooks and the transport underneath.
//!
//! Grounded on `engine/packages/pegboard-gateway/src/shared_state.rs`'s `Arc<Inner>` +
//! cheap-clone handle shape. `SharedState` there keys its in-flight table by `scc::HashMap`
//! for the tunnel-request fan-out; this manager uses `tokio::sync::RwLock<HashMap<..>>`
//! instead, since `broadcast` needs to iterate every connection for an actor under one
//! lock rather than touch a single key, which is what the `queue`/`hibernation` modules'
//! existing `tokio::sync::Mutex`/`Notify` usage already leans toward in this codebase.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::connection::{Connection, ReadyState, Transport, TransportKind};
use crate::error::{GatewayError, GatewayResult};
use crate::metrics::GatewayMetrics;

struct Inner {
	connections: RwLock<HashMap<Uuid, Connection>>,
	by_actor: RwLock<HashMap<String, HashSet<Uuid>>>,
	max_outgoing_message_size: usize,
	metrics: GatewayMetrics,
}

/// Cheap-to-clone handle to the process-wide connection registry (§2: actor →
/// connection-manager data flow). Implements `actor::EventSink` so it can be handed to
/// every `ActorCtx` as the broadcast target.
#[derive(Clone)]
pub struct ConnectionManager(Arc<Inner>);

impl ConnectionManager {
	pub fn new(max_outgoing_message_size: usize) -> Self {
		Self(Arc::new(Inner {
			connections: RwLock::new(HashMap::new()),
			by_actor: RwLock::new(HashMap::new()),
			max_outgoing_message_size,
			metrics: GatewayMetrics::new(),
		}))
	}

	pub fn metrics(&self) -> &GatewayMetrics {
		&self.0.metrics
	}

	/// Authenticates and registers a new connection (§4.5's `prepareAndConnectConn`).
	/// `actor.connect` itself decides reattachment (§8 P7): if `request_id` matches a
	/// still-hibernatable prior connection, the same `conn_id` comes back with
	/// `reattached: true` and `onConnect` is NOT fired a second time — this manager just
	/// swaps in the fresh transport under that id.
	pub async fn prepare_and_connect_conn(
		&self,
		actor: &actor::ActorHandle,
		kind: TransportKind,
		request_id: String,
		params: Value,
		encoding: wire::Encoding,
		hibernatable: bool,
		transport: Box<dyn Transport>,
	) -> GatewayResult<(Uuid, bool)> {
		let outcome = actor.connect(request_id.clone(), params.clone()).await?;

		let mut conn = Connection::new(
			outcome.conn_id,
			actor.actor_id.clone(),
			kind,
			request_id,
			hibernatable,
			params,
			encoding,
			transport,
		);
		conn.mark_open();

		self.0.connections.write().await.insert(outcome.conn_id, conn);
		self.0
			.by_actor
			.write()
			.await
			.entry(actor.actor_id.clone())
			.or_default()
			.insert(outcome.conn_id);

		let init = wire::ServerFrame::Init { actor_id: actor.actor_id.clone(), connection_id: outcome.conn_id.to_string() };
		self.send_to(outcome.conn_id, &init).await?;

		GatewayMetrics::incr(&self.0.metrics.connections_opened);
		Ok((outcome.conn_id, outcome.reattached))
	}

	pub async fn subscribe(&self, conn_id: Uuid, event_name: String) -> GatewayResult<()> {
		let mut conns = self.0.connections.write().await;
		let conn = conns.get_mut(&conn_id).ok_or(GatewayError::ConnectionNotFound(conn_id))?;
		conn.subscribe(event_name);
		Ok(())
	}

	pub async fn unsubscribe(&self, conn_id: Uuid, event_name: &str) -> GatewayResult<()> {
		let mut conns = self.0.connections.write().await;
		let conn = conns.get_mut(&conn_id).ok_or(GatewayError::ConnectionNotFound(conn_id))?;
		conn.unsubscribe(event_name);
		Ok(())
	}

	/// Sends one frame to a specific connection, encoded per its negotiated encoding.
	pub async fn send_to<T: serde::Serialize>(&self, conn_id: Uuid, frame: &T) -> GatewayResult<()> {
		let conns = self.0.connections.read().await;
		let conn = conns.get(&conn_id).ok_or(GatewayError::ConnectionNotFound(conn_id))?;
		let bytes = wire::encode_versioned(frame, conn.encoding, self.0.max_outgoing_message_size)?;
		conn.send(bytes).await?;
		GatewayMetrics::incr(&self.0.metrics.frames_sent);
		Ok(())
	}

	/// Runs the actual broadcast (§8 P1's "observers see the events in commit order"):
	/// every connection currently subscribed to `event_name` gets the `Event` frame, in
	/// the iteration order of this actor's connection set. Connections that fail to send
	/// (closed transport, etc.) are logged and skipped rather than failing the whole
	/// broadcast — a single slow client must never block the others.
	pub async fn broadcast_now(&self, actor_id: &str, event_name: &str, args: Value) {
		let targets: Vec<Uuid> = {
			let by_actor = self.0.by_actor.read().await;
			match by_actor.get(actor_id) {
				Some(ids) => ids.iter().copied().collect(),
				None => return,
			}
		};

		let frame = wire::ServerFrame::Event { name: event_name.to_string(), args };
		for conn_id in targets {
			let should_send = {
				let conns = self.0.connections.read().await;
				conns.get(&conn_id).map(|c| c.ready_state == ReadyState::Open && c.is_subscribed(event_name)).unwrap_or(false)
			};
			if !should_send {
				continue;
			}
			if let Err(err) = self.send_to(conn_id, &frame).await {
				GatewayMetrics::incr(&self.0.metrics.broadcasts_dropped);
				tracing::warn!(%err, %conn_id, actor_id, event_name, "dropping broadcast to unreachable connection");
			}
		}
	}

	/// Closes a connection's transport and runs the actor's `onDisconnect` hook (§4.5).
	pub async fn disconnect(&self, actor: &actor::ActorHandle, conn_id: Uuid, code: u16, reason: &str) -> GatewayResult<()> {
		{
			let mut conns = self.0.connections.write().await;
			if let Some(conn) = conns.get_mut(&conn_id) {
				conn.close(code, reason).await?;
			}
			conns.remove(&conn_id);
		}
		if let Some(ids) = self.0.by_actor.write().await.get_mut(&actor.actor_id) {
			ids.remove(&conn_id);
		}
		actor.disconnect(conn_id).await?;
		GatewayMetrics::incr(&self.0.metrics.connections_closed);
		Ok(())
	}

	pub async fn connection_count(&self, actor_id: &str) -> usize {
		self.0.by_actor.read().await.get(actor_id).map(HashSet::len).unwrap_or(0)
	}
}

impl actor::EventSink for ConnectionManager {
	fn broadcast(&self, actor_id: &str, event_name: &str, args: Value) {
		let this = self.clone();
		let actor_id = actor_id.to_string();
		let event_name = event_name.to_string();
		tokio::spawn(async move {
			this.broadcast_now(&actor_id, &event_name, args).await;
		});
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc as StdArc;

	use actor::EventSink;
	use serde_json::json;

	use super::*;
	use crate::connection::test_support::RecordingTransport;

	struct Echo;

	#[async_trait::async_trait]
	impl actor::ActorDefinition for Echo {
		fn create_state(&self, _input: Value) -> Value {
			Value::Null
		}

		async fn action(&self, _ctx: &mut actor::ActorCtx<'_>, _name: &str, _args: Value) -> actor::ActorResult<Value> {
			Ok(Value::Null)
		}
	}

	async fn spawn_echo(actor_id: &str, events: StdArc<dyn actor::EventSink>) -> actor::ActorHandle {
		let kv: StdArc<dyn kv::KvDriver> = StdArc::new(kv::MemoryKvDriver::default());
		actor::spawn(actor_id.to_string(), StdArc::new(Echo), kv, events, Value::Null, 10, 16, None).await.unwrap()
	}

	#[tokio::test]
	async fn prepare_and_connect_sends_init_frame() {
		let manager = ConnectionManager::new(1 << 20);
		let handle = spawn_echo("actor-a", StdArc::new(manager.clone())).await;
		let transport = StdArc::new(RecordingTransport::default());

		let (conn_id, reattached) = manager
			.prepare_and_connect_conn(
				&handle,
				TransportKind::WebSocket,
				"req-1".to_string(),
				json!({}),
				wire::Encoding::Json,
				true,
				Box::new(DelegatingTransport(transport.clone())),
			)
			.await
			.unwrap();
		assert!(!reattached);

		let sent = transport.sent.lock().await;
		assert_eq!(sent.len(), 1);
		let frame: wire::ServerFrame = wire::decode_versioned(&sent[0], wire::Encoding::Json).unwrap();
		match frame {
			wire::ServerFrame::Init { connection_id, .. } => assert_eq!(connection_id, conn_id.to_string()),
			other => panic!("expected Init frame, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn broadcast_reaches_only_subscribed_connections() {
		let manager = ConnectionManager::new(1 << 20);
		let handle = spawn_echo("actor-b", StdArc::new(manager.clone())).await;

		let t1 = StdArc::new(RecordingTransport::default());
		let (conn1, _) = manager
			.prepare_and_connect_conn(
				&handle,
				TransportKind::WebSocket,
				"req-1".to_string(),
				json!({}),
				wire::Encoding::Json,
				false,
				Box::new(DelegatingTransport(t1.clone())),
			)
			.await
			.unwrap();
		manager.subscribe(conn1, "changed".to_string()).await.unwrap();

		let t2 = StdArc::new(RecordingTransport::default());
		manager
			.prepare_and_connect_conn(
				&handle,
				TransportKind::WebSocket,
				"req-2".to_string(),
				json!({}),
				wire::Encoding::Json,
				false,
				Box::new(DelegatingTransport(t2.clone())),
			)
			.await
			.unwrap();

		manager.broadcast("actor-b", "changed", json!(42));
		// `broadcast` is fire-and-forget (EventSink isn't async); give the spawned task a
		// beat to run before asserting.
		tokio::task::yield_now().await;
		tokio::time::sleep(std::time::Duration::from_millis(20)).await;

		assert_eq!(t1.sent.lock().await.len(), 2); // Init + Event
		assert_eq!(t2.sent.lock().await.len(), 1); // Init only, never subscribed

		let snapshot = manager.metrics().snapshot();
		assert_eq!(snapshot.connections_opened, 2);
		assert_eq!(snapshot.frames_sent, 3);
	}

	/// `Transport` isn't `Clone`, so tests share one `RecordingTransport` behind an `Arc`
	/// via this thin delegating wrapper.
	struct DelegatingTransport(StdArc<RecordingTransport>);

	#[async_trait::async_trait]
	impl Transport for DelegatingTransport {
		async fn send(&self, frame_bytes: Vec<u8>) -> GatewayResult<()> {
			self.0.send(frame_bytes).await
		}

		async fn close(&self, code: u16, reason: &str) -> GatewayResult<()> {
			self.0.close(code, reason).await
		}
	}
}
