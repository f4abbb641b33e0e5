//! Connection state machine and transport seam (§3.2, §4.5).
//!
//! Grounded on `engine/packages/guard-core/src/websocket_handle.rs`'s split send/recv
//! handle shape, generalized into a `Transport` trait so the gateway crate doesn't pull
//! in `hyper-tungstenite` directly — wiring a concrete websocket/HTTP transport is
//! `hostd`'s job (§1 scopes the actual HTTP/WS server out of this crate).

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::GatewayResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
	Http,
	WebSocket,
	RawHttp,
	RawWebSocket,
}

/// `connecting ─open→ open ─(disconnect|close)→ closing ─close ack→ closed`, with an
/// extra `suspended` state for hibernatable connections parked across actor hibernation
/// (§4.5's state machine diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
	Connecting,
	Open,
	Closing,
	Closed,
	Suspended,
}

/// Sends frames to one connected client. Implemented per-transport by `hostd`
/// (websocket frame send, or a buffered single-shot HTTP response).
#[async_trait]
pub trait Transport: Send + Sync {
	async fn send(&self, frame_bytes: Vec<u8>) -> GatewayResult<()>;
	async fn close(&self, code: u16, reason: &str) -> GatewayResult<()>;
}

pub struct Connection {
	pub id: Uuid,
	pub actor_id: String,
	pub kind: TransportKind,
	pub request_id: String,
	pub hibernatable: bool,
	pub params: Value,
	pub encoding: wire::Encoding,
	pub ready_state: ReadyState,
	pub subscriptions: HashSet<String>,
	transport: Box<dyn Transport>,
}

impl Connection {
	pub fn new(
		id: Uuid,
		actor_id: String,
		kind: TransportKind,
		request_id: String,
		hibernatable: bool,
		params: Value,
		encoding: wire::Encoding,
		transport: Box<dyn Transport>,
	) -> Self {
		Self {
			id,
			actor_id,
			kind,
			request_id,
			hibernatable,
			params,
			encoding,
			ready_state: ReadyState::Connecting,
			subscriptions: HashSet::new(),
			transport,
		}
	}

	pub fn mark_open(&mut self) {
		self.ready_state = ReadyState::Open;
	}

	pub fn is_subscribed(&self, event_name: &str) -> bool {
		self.subscriptions.contains(event_name)
	}

	pub fn subscribe(&mut self, event_name: String) {
		self.subscriptions.insert(event_name);
	}

	pub fn unsubscribe(&mut self, event_name: &str) {
		self.subscriptions.remove(event_name);
	}

	pub async fn send(&self, frame_bytes: Vec<u8>) -> GatewayResult<()> {
		self.transport.send(frame_bytes).await
	}

	/// Closes the transport and blocks until the close handshake is observed (§9's
	/// "promise-with-resolvers bridging an event-driven close" design note — here that's
	/// just awaiting `Transport::close`, since the trait's contract already requires it
	/// not to return before the close is observed).
	pub async fn close(&mut self, code: u16, reason: &str) -> GatewayResult<()> {
		self.ready_state = ReadyState::Closing;
		self.transport.close(code, reason).await?;
		self.ready_state = ReadyState::Closed;
		Ok(())
	}

	pub fn suspend(&mut self) {
		self.ready_state = ReadyState::Suspended;
	}
}

#[cfg(test)]
pub(crate) mod test_support {
	use super::*;
	use tokio::sync::Mutex;

	#[derive(Default)]
	pub struct RecordingTransport {
		pub sent: Mutex<Vec<Vec<u8>>>,
		pub closed: Mutex<Option<(u16, String)>>,
	}

	#[async_trait]
	impl Transport for RecordingTransport {
		async fn send(&self, frame_bytes: Vec<u8>) -> GatewayResult<()> {
			self.sent.lock().await.push(frame_bytes);
			Ok(())
		}

		async fn close(&self, code: u16, reason: &str) -> GatewayResult<()> {
			*self.closed.lock().await = Some((code, reason.to_string()));
			Ok(())
		}
	}
}

#[cfg(test)]
mod tests {
	use super::test_support::RecordingTransport;
	use super::*;

	#[tokio::test]
	async fn subscription_set_tracks_subscribe_and_unsubscribe() {
		let mut conn = Connection::new(
			Uuid::new_v4(),
			"actor-1".to_string(),
			TransportKind::WebSocket,
			"req-1".to_string(),
			true,
			Value::Null,
			wire::Encoding::Json,
			Box::new(RecordingTransport::default()),
		);
		assert!(!conn.is_subscribed("changed"));
		conn.subscribe("changed".to_string());
		assert!(conn.is_subscribed("changed"));
		conn.unsubscribe("changed");
		assert!(!conn.is_subscribed("changed"));
	}

	#[tokio::test]
	async fn close_transitions_through_closing_to_closed() {
		let mut conn = Connection::new(
			Uuid::new_v4(),
			"actor-1".to_string(),
			TransportKind::WebSocket,
			"req-1".to_string(),
			false,
			Value::Null,
			wire::Encoding::Json,
			Box::new(RecordingTransport::default()),
		);
		conn.mark_open();
		assert_eq!(conn.ready_state, ReadyState::Open);
		conn.close(1000, "bye").await.unwrap();
		assert_eq!(conn.ready_state, ReadyState::Closed);
	}
}
