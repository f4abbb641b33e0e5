//! Protocol dispatcher (§4.6): encoding negotiation, frame decode with size
//! enforcement, and routing to actions / subscriptions / HTTP single-shot endpoints.
//!
//! Grounded on the same call-site contract `wire`'s envelope follows
//! (`engine/packages/engine/tests/common/test_runner/protocol.rs`) plus §4.6's numbered
//! steps directly — there's no single teacher file that is "the dispatcher", since the
//! teacher's protocol plumbing lives split across `guard`/`guard-core`/`pegboard-gateway`;
//! this module composes `wire::{Encoding,decode_versioned,encode_versioned}` with
//! `actor::ActorHandle`/`ConnectionManager` the way those pieces' own doc comments
//! describe they're meant to be used together.

use serde_json::Value;
use uuid::Uuid;

use crate::connection::ReadyState;
use crate::error::{GatewayError, GatewayResult};
use crate::manager::ConnectionManager;

pub struct DispatcherConfig {
	pub max_incoming_message_size: usize,
	pub max_outgoing_message_size: usize,
	pub action_timeout_ms: u64,
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self { max_incoming_message_size: 4 << 20, max_outgoing_message_size: 4 << 20, action_timeout_ms: 30_000 }
	}
}

pub struct ProtocolDispatcher {
	config: DispatcherConfig,
}

impl ProtocolDispatcher {
	pub fn new(config: DispatcherConfig) -> Self {
		Self { config }
	}

	/// §4.6 steps 1–2: negotiates encoding (subprotocol token wins over the
	/// `x-rivetkit-encoding` header, both default to `json`) and decodes the frame,
	/// enforcing `maxIncomingMessageSize` *before* attempting to parse the payload so an
	/// oversized frame never reaches the decoder (§8 P10's "no state mutation occurs").
	pub fn decode_incoming(&self, bytes: &[u8], encoding: wire::Encoding) -> GatewayResult<wire::ClientFrame> {
		if bytes.len() > self.config.max_incoming_message_size {
			return Err(runtime_error::IncomingMessageTooLong { size: bytes.len(), max: self.config.max_incoming_message_size }.into());
		}
		Ok(wire::decode_versioned(bytes, encoding)?)
	}

	/// §4.6 step 3: routes one `ActionRequest`, returning the frame to send back
	/// (`ActionResponse` on success, `Error{..., actionId}` on failure — callers encode
	/// and send it themselves via `ConnectionManager::send_to`, since size limits on the
	/// *outgoing* side are enforced there too).
	pub async fn dispatch_action(
		&self,
		actor: &actor::ActorHandle,
		conn_id: Uuid,
		id: u64,
		name: String,
		args: Value,
		expose_internal: bool,
	) -> wire::ServerFrame {
		let allowed = actor
			.can_invoke(conn_id, actor::OwnedInvokeKind::Action(name.clone()))
			.await
			.unwrap_or(false);
		if !allowed {
			let err: GatewayError = runtime_error::Forbidden { reason: format!("action `{name}` not permitted") }.into();
			return err.to_frame(Some(id), expose_internal);
		}

		match actor.execute(name, args, self.config.action_timeout_ms).await {
			Ok(output) => wire::ServerFrame::ActionResponse { id, output },
			Err(err) => GatewayError::from(err).to_frame(Some(id), expose_internal),
		}
	}

	/// §4.6 step 4: updates the connection's subscription set, gated by `canInvoke`.
	pub async fn dispatch_subscription(
		&self,
		manager: &ConnectionManager,
		actor: &actor::ActorHandle,
		conn_id: Uuid,
		event_name: String,
		subscribe: bool,
	) -> GatewayResult<()> {
		let kind = actor::OwnedInvokeKind::Subscribe(event_name.clone());
		let allowed = actor.can_invoke(conn_id, kind).await?;
		if !allowed {
			return Err(runtime_error::Forbidden { reason: format!("subscription to `{event_name}` not permitted") }.into());
		}
		if subscribe {
			manager.subscribe(conn_id, event_name).await
		} else {
			manager.unsubscribe(conn_id, &event_name).await
		}
	}

	/// §4.6 step 5 / §6.2 `POST /action/{name}`: single-shot HTTP action call. The
	/// caller is expected to have already created and torn down the throwaway
	/// connection around this (no persistent subscription state needed for an HTTP call).
	pub async fn dispatch_http_action(
		&self,
		actor: &actor::ActorHandle,
		name: String,
		request: wire::HttpActionRequest,
	) -> GatewayResult<wire::HttpActionResponse> {
		let output = actor.execute(name, request.args, self.config.action_timeout_ms).await?;
		Ok(wire::HttpActionResponse { output })
	}

	/// §4.6 step 6 / §4.9 / §8 S4: HTTP queue-send. Blocks on the returned waiter (if
	/// `wait: true`) up to `timeout`, outside the actor's mailbox — only the enqueue
	/// itself goes through `ActorHandle::queue_send`.
	pub async fn dispatch_http_queue_send(
		&self,
		actor: &actor::ActorHandle,
		name_from_path: Option<String>,
		request: wire::HttpQueueSendRequest,
	) -> GatewayResult<wire::HttpQueueSendResponse> {
		let name = request.name.or(name_from_path).ok_or_else(|| {
			GatewayError::from(runtime_error::InvalidRequest { reason: "queue-send requires a queue name".to_string() })
		})?;
		let wait = request.wait.unwrap_or(false);
		let ticket = actor.queue_send(name, request.body, wait).await?;

		let Some(waiter) = ticket.waiter else {
			return Ok(wire::HttpQueueSendResponse { status: "completed".to_string(), response: None });
		};

		let timeout_ms = request.timeout.unwrap_or(30_000);
		match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), waiter).await {
			Ok(Ok(response)) => Ok(wire::HttpQueueSendResponse { status: "completed".to_string(), response: Some(response) }),
			Ok(Err(_)) | Err(_) => Ok(wire::HttpQueueSendResponse { status: "timedOut".to_string(), response: None }),
		}
	}

	/// Enforces §4.5's bounded per-connection send queue (§4.6's "Backpressure" note):
	/// call before queuing an outgoing frame for `conn_id`; `pending` is the caller's own
	/// count of frames not yet flushed to the transport.
	pub fn check_backpressure(&self, conn_id: Uuid, pending: usize, capacity: usize) -> GatewayResult<()> {
		if pending >= capacity {
			return Err(runtime_error::BackpressureOverflow { connection_id: conn_id.to_string() }.into());
		}
		Ok(())
	}
}

/// True once a connection has finished its WebSocket/HTTP handshake and may receive
/// dispatched frames (helper for callers deciding whether to drop a frame that arrived
/// mid-teardown).
pub fn is_routable(ready_state: ReadyState) -> bool {
	matches!(ready_state, ReadyState::Open)
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use serde_json::json;

	use super::*;
	use crate::connection::{test_support::RecordingTransport, TransportKind};

	struct Echo;

	#[async_trait::async_trait]
	impl actor::ActorDefinition for Echo {
		fn create_state(&self, _input: Value) -> Value {
			json!({})
		}

		async fn action(&self, _ctx: &mut actor::ActorCtx<'_>, name: &str, args: Value) -> actor::ActorResult<Value> {
			match name {
				"echo" => Ok(args),
				other => Err(runtime_error::ActionNotFound { name: other.to_string() }.into()),
			}
		}
	}

	async fn spawn_echo(manager: &ConnectionManager) -> actor::ActorHandle {
		let kv: Arc<dyn kv::KvDriver> = Arc::new(kv::MemoryKvDriver::default());
		actor::spawn("actor-x".to_string(), Arc::new(Echo), kv, Arc::new(manager.clone()), Value::Null, 10, 16, None)
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn oversized_incoming_frame_is_rejected_without_decoding() {
		let dispatcher = ProtocolDispatcher::new(DispatcherConfig { max_incoming_message_size: 4, ..Default::default() });
		let err = dispatcher.decode_incoming(b"way too long for four bytes", wire::Encoding::Json).unwrap_err();
		assert!(matches!(err, GatewayError::IncomingMessageTooLong(_)));
	}

	#[tokio::test]
	async fn action_request_routes_to_action_response() {
		let manager = ConnectionManager::new(1 << 20);
		let actor = spawn_echo(&manager).await;
		let (conn_id, _) = manager
			.prepare_and_connect_conn(
				&actor,
				TransportKind::WebSocket,
				"req-1".to_string(),
				json!({}),
				wire::Encoding::Json,
				false,
				Box::new(RecordingTransport::default()),
			)
			.await
			.unwrap();

		let dispatcher = ProtocolDispatcher::new(DispatcherConfig::default());
		let frame = dispatcher.dispatch_action(&actor, conn_id, 7, "echo".to_string(), json!({"a": 1}), false).await;
		match frame {
			wire::ServerFrame::ActionResponse { id, output } => {
				assert_eq!(id, 7);
				assert_eq!(output, json!({"a": 1}));
			}
			other => panic!("expected ActionResponse, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn unknown_action_yields_error_frame_with_action_id() {
		let manager = ConnectionManager::new(1 << 20);
		let actor = spawn_echo(&manager).await;
		let (conn_id, _) = manager
			.prepare_and_connect_conn(
				&actor,
				TransportKind::WebSocket,
				"req-1".to_string(),
				json!({}),
				wire::Encoding::Json,
				false,
				Box::new(RecordingTransport::default()),
			)
			.await
			.unwrap();

		let dispatcher = ProtocolDispatcher::new(DispatcherConfig::default());
		let frame = dispatcher.dispatch_action(&actor, conn_id, 3, "nope".to_string(), json!({}), true).await;
		match frame {
			wire::ServerFrame::Error { action_id, code, .. } => {
				assert_eq!(action_id, Some(3));
				assert_eq!(code, "action_not_found");
			}
			other => panic!("expected Error frame, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn queue_send_without_wait_completes_immediately() {
		let manager = ConnectionManager::new(1 << 20);
		let actor = spawn_echo(&manager).await;
		let dispatcher = ProtocolDispatcher::new(DispatcherConfig::default());

		let response = dispatcher
			.dispatch_http_queue_send(
				&actor,
				Some("work".to_string()),
				wire::HttpQueueSendRequest { name: None, body: json!({"job": 1}), wait: None, timeout: None },
			)
			.await
			.unwrap();
		assert_eq!(response.status, "completed");
		assert_eq!(response.response, None);
	}

	#[tokio::test]
	async fn queue_send_with_wait_times_out_when_nobody_consumes() {
		let manager = ConnectionManager::new(1 << 20);
		let actor = spawn_echo(&manager).await;
		let dispatcher = ProtocolDispatcher::new(DispatcherConfig::default());

		let response = dispatcher
			.dispatch_http_queue_send(
				&actor,
				None,
				wire::HttpQueueSendRequest { name: Some("work".to_string()), body: json!({"job": 1}), wait: Some(true), timeout: Some(20) },
			)
			.await
			.unwrap();
		assert_eq!(response.status, "timedOut");
	}
}
