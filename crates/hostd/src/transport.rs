//! Concrete `gateway::Transport` wiring over a real WebSocket (§4.5: "wiring a
//! concrete websocket/HTTP transport is hostd's job"). Grounded on
//! `guard-core::websocket_handle::WebSocketHandle`'s split sender/receiver shape;
//! unlike that handle, only the sender half is wrapped here, since the receiver is
//! driven directly by this connection's own read loop rather than shared.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use gateway::{GatewayError, GatewayResult, Transport};
use hyper::upgrade::Upgraded;
use hyper_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use hyper_tungstenite::tungstenite::protocol::CloseFrame;
use hyper_tungstenite::tungstenite::Message as WsMessage;
use hyper_tungstenite::HyperWebsocket;
use hyper_util::rt::TokioIo;
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;

pub type WsSender = futures_util::stream::SplitSink<WebSocketStream<TokioIo<Upgraded>>, WsMessage>;
pub type WsReceiver = futures_util::stream::SplitStream<WebSocketStream<TokioIo<Upgraded>>>;

/// Sender half handed to `gateway::ConnectionManager` as a boxed `Transport`.
pub struct WebSocketTransport {
	tx: Arc<Mutex<WsSender>>,
}

impl WebSocketTransport {
	pub fn new(tx: Arc<Mutex<WsSender>>) -> Self {
		Self { tx }
	}
}

#[async_trait]
impl Transport for WebSocketTransport {
	async fn send(&self, frame_bytes: Vec<u8>) -> GatewayResult<()> {
		self.tx.lock().await.send(WsMessage::Binary(frame_bytes.into())).await.map_err(|err| GatewayError::Io(err.to_string()))
	}

	async fn close(&self, code: u16, reason: &str) -> GatewayResult<()> {
		let frame = CloseFrame { code: CloseCode::from(code), reason: reason.to_string().into() };
		self.tx.lock().await.send(WsMessage::Close(Some(frame))).await.map_err(|err| GatewayError::Io(err.to_string()))
	}
}

/// Awaits the upgrade handshake and splits the resulting stream into the sender half
/// (wrapped as a `Transport` above) and the receiver half (read by the caller's own
/// connection loop).
pub async fn split(websocket: HyperWebsocket) -> GatewayResult<(Arc<Mutex<WsSender>>, WsReceiver)> {
	let stream = websocket.await.map_err(|err| GatewayError::Io(err.to_string()))?;
	let (tx, rx) = stream.split();
	Ok((Arc::new(Mutex::new(tx)), rx))
}
