//! HTTP/WebSocket router for the actor gateway (§6.1, §6.2). Grounded on
//! `guard-core/src/proxy_service.rs`'s `is_upgrade_request`/`upgrade` call site for the
//! WebSocket branch, and on `pegboard-gateway`'s "decode body, dispatch, encode
//! response" shape for the single-shot HTTP branches — neither teacher file is a
//! `service_fn` router itself, so the `hyper::service::service_fn` wiring below follows
//! the standard hyper 1.x idiom directly (the same `TokioIo<Upgraded>` the teacher's
//! websocket handle already depends on, just driven to completion here).

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use gateway::connection::TransportKind;
use gateway::error::GatewayError;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::app::AppState;
use crate::transport::{self, WebSocketTransport};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, Infallible>;

fn full<T: Into<Bytes>>(body: T) -> BoxBody {
	Full::new(body.into()).map_err(|never| match never {}).boxed()
}

fn empty_status(status: StatusCode) -> Response<BoxBody> {
	Response::builder().status(status).body(full(Vec::new())).expect("static response is well-formed")
}

fn encoded_response(status: StatusCode, encoding: wire::Encoding, value: &impl Serialize) -> Response<BoxBody> {
	let bytes = match encoding {
		wire::Encoding::Json => serde_json::to_vec(value).expect("response value is always serializable"),
		wire::Encoding::Bare => serde_bare::to_vec(value).expect("response value is always serializable"),
	};
	Response::builder()
		.status(status)
		.header(http::header::CONTENT_TYPE, encoding.content_type())
		.body(full(bytes))
		.expect("static response is well-formed")
}

/// Maps a dispatch-time failure onto an HTTP status, grouped the way §7's taxonomy
/// groups them (user → 4xx, transport → 4xx/413, lifecycle → 404/409, workflow → 409,
/// internal/IO → 500).
fn status_for_error(err: &GatewayError) -> StatusCode {
	match err {
		GatewayError::ActionNotFound(_) => StatusCode::NOT_FOUND,
		GatewayError::InvalidEncoding(_) => StatusCode::BAD_REQUEST,
		GatewayError::InvalidParams(_) => StatusCode::BAD_REQUEST,
		GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
		GatewayError::InvalidQueryJson(_) => StatusCode::BAD_REQUEST,
		GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
		GatewayError::IncomingMessageTooLong(_) => StatusCode::PAYLOAD_TOO_LARGE,
		GatewayError::OutgoingMessageTooLong(_) => StatusCode::INTERNAL_SERVER_ERROR,
		GatewayError::BackpressureOverflow(_) => StatusCode::TOO_MANY_REQUESTS,
		GatewayError::ActorNotFound(_) => StatusCode::NOT_FOUND,
		GatewayError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
		GatewayError::Frame(_) => StatusCode::BAD_REQUEST,
		GatewayError::Actor(_) => StatusCode::CONFLICT,
		GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
	}
}

fn error_response(status: StatusCode, encoding: wire::Encoding, err: &GatewayError, expose_internal: bool) -> Response<BoxBody> {
	let frame = err.to_frame(None, expose_internal);
	encoded_response(status, encoding, &frame)
}

fn header_str<'a>(req: &'a Request<Incoming>, name: &str) -> Option<&'a str> {
	req.headers().get(name).and_then(|v| v.to_str().ok())
}

/// §4.6 step 1: subprotocol wins over the `x-rivetkit-encoding` header; both default to
/// `json`.
fn encoding_from_headers(req: &Request<Incoming>) -> wire::Encoding {
	if let Some(protocols) = header_str(req, "sec-websocket-protocol") {
		for token in protocols.split(',').map(str::trim) {
			if let Some(encoding) = wire::Encoding::from_subprotocol(token) {
				return encoding;
			}
		}
	}
	header_str(req, "x-rivetkit-encoding").and_then(|name| wire::Encoding::from_name(name).ok()).unwrap_or_default()
}

/// `x-rivetkit-conn-params`: url-encoded JSON, matching the WebSocket subprotocol's
/// `rivetkit.params.{url-encoded-json}` spelling (§6.1).
fn conn_params_from_headers(req: &Request<Incoming>) -> Result<Value, GatewayError> {
	let Some(raw) = header_str(req, "x-rivetkit-conn-params") else {
		return Ok(Value::Null);
	};
	let decoded = urlencoding::decode(raw).map_err(|err| runtime_error::InvalidParams { reason: err.to_string() })?;
	serde_json::from_str(&decoded).map_err(|err| runtime_error::InvalidParams { reason: err.to_string() }.into())
}

async fn decode_body<T: DeserializeOwned>(req: Request<Incoming>, encoding: wire::Encoding, max_len: usize) -> Result<T, GatewayError> {
	let body = req
		.into_body()
		.collect()
		.await
		.map_err(|err| GatewayError::Io(err.to_string()))?
		.to_bytes();
	if body.len() > max_len {
		return Err(runtime_error::IncomingMessageTooLong { size: body.len(), max: max_len }.into());
	}
	match encoding {
		wire::Encoding::Json => serde_json::from_slice(&body).map_err(|err| runtime_error::InvalidRequest { reason: err.to_string() }.into()),
		wire::Encoding::Bare => serde_bare::from_slice(&body).map_err(|err| runtime_error::InvalidRequest { reason: err.to_string() }.into()),
	}
}

/// Entry point handed to `hyper::service::service_fn` (§6.1/§6.2): parses the
/// `/gateway/<actor-id>[@token]/<rest>` path and routes to the raw passthrough, the
/// WebSocket upgrade, or one of the single-shot API handlers.
pub async fn handle(state: Arc<AppState>, req: Request<Incoming>) -> Result<Response<BoxBody>, Infallible> {
	let Some(info) = gateway::path::parse_actor_path(req.uri().path()) else {
		return Ok(empty_status(StatusCode::NOT_FOUND));
	};

	let route_path = info.remaining_path.split('?').next().unwrap_or("");

	if route_path.starts_with("/raw/") || route_path == "/raw" {
		return Ok(handle_raw());
	}

	if route_path == "/websocket" || route_path.starts_with("/websocket/") {
		return Ok(handle_websocket_upgrade(state, req, info).await);
	}

	Ok(handle_api(state, req, info, route_path).await)
}

/// §6.2's `ANY /raw/…`: the core only supplies protocol-level framing, so raw
/// passthrough is an application-level extension point (`handleRawRequest`) this core
/// doesn't implement (§1's scope line, "out-of-core application surfaces").
fn handle_raw() -> Response<BoxBody> {
	empty_status(StatusCode::NOT_IMPLEMENTED)
}

/// Splits `/action/increment` into `("action", Some("increment"))`, `/queue-send` into
/// `("queue-send", None)`, etc. — a standalone helper so the segmenting logic is testable
/// without a real `Request<Incoming>`.
fn route_segments(route_path: &str) -> (Option<&str>, Option<String>) {
	let mut segments = route_path.splitn(3, '/').filter(|s| !s.is_empty());
	(segments.next(), segments.next().map(str::to_string))
}

async fn handle_api(state: Arc<AppState>, req: Request<Incoming>, info: gateway::path::ActorPathInfo, route_path: &str) -> Response<BoxBody> {
	let encoding = encoding_from_headers(&req);
	let expose_internal = state.expose_internal();

	let (route, name_segment) = route_segments(route_path);

	let actor = match state.registry.get_or_spawn(&info.actor_id).await {
		Ok(actor) => actor,
		Err(err) => {
			let err: GatewayError = err.into();
			return error_response(status_for_error(&err), encoding, &err, expose_internal);
		}
	};

	match route {
		Some("action") => respond_action(&state, &actor, req, encoding, name_segment, expose_internal).await,
		Some("queue-send") => respond_queue_send(&state, &actor, req, encoding, name_segment, expose_internal).await,
		Some("resolve") => encoded_response(StatusCode::OK, encoding, &wire::HttpResolveResponse { actor_id: info.actor_id }),
		_ => empty_status(StatusCode::NOT_FOUND),
	}
}

async fn respond_action(
	state: &AppState,
	actor: &actor::ActorHandle,
	req: Request<Incoming>,
	encoding: wire::Encoding,
	name: Option<String>,
	expose_internal: bool,
) -> Response<BoxBody> {
	let Some(name) = name else {
		let err: GatewayError = runtime_error::InvalidRequest { reason: "action endpoint requires a name segment".to_string() }.into();
		return error_response(status_for_error(&err), encoding, &err, expose_internal);
	};

	let request: wire::HttpActionRequest = match decode_body(req, encoding, state.config.runtime.max_incoming_message_size).await {
		Ok(request) => request,
		Err(err) => return error_response(status_for_error(&err), encoding, &err, expose_internal),
	};

	match state.dispatcher.dispatch_http_action(actor, name, request).await {
		Ok(response) => encoded_response(StatusCode::OK, encoding, &response),
		Err(err) => error_response(status_for_error(&err), encoding, &err, expose_internal),
	}
}

async fn respond_queue_send(
	state: &AppState,
	actor: &actor::ActorHandle,
	req: Request<Incoming>,
	encoding: wire::Encoding,
	name_from_path: Option<String>,
	expose_internal: bool,
) -> Response<BoxBody> {
	let request: wire::HttpQueueSendRequest = match decode_body(req, encoding, state.config.runtime.max_incoming_message_size).await {
		Ok(request) => request,
		Err(err) => return error_response(status_for_error(&err), encoding, &err, expose_internal),
	};

	match state.dispatcher.dispatch_http_queue_send(actor, name_from_path, request).await {
		Ok(response) => encoded_response(StatusCode::OK, encoding, &response),
		Err(err) => error_response(status_for_error(&err), encoding, &err, expose_internal),
	}
}

/// §4.5/§6.2's `GET /websocket[/…]`: authenticates/connects via the same
/// `prepareAndConnectConn` path an HTTP action would if it needed a connection, then
/// drives the full-duplex frame loop until the client disconnects.
async fn handle_websocket_upgrade(state: Arc<AppState>, req: Request<Incoming>, info: gateway::path::ActorPathInfo) -> Response<BoxBody> {
	if !hyper_tungstenite::is_upgrade_request(&req) {
		return empty_status(StatusCode::BAD_REQUEST);
	}

	let encoding = encoding_from_headers(&req);
	let expose_internal = state.expose_internal();
	let params = match conn_params_from_headers(&req) {
		Ok(params) => params,
		Err(err) => return error_response(status_for_error(&err), encoding, &err, expose_internal),
	};
	let request_id = header_str(&req, "x-rivetkit-request-id").map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

	let (response, websocket) = match hyper_tungstenite::upgrade(req, None) {
		Ok(pair) => pair,
		Err(err) => return error_response(StatusCode::BAD_REQUEST, encoding, &GatewayError::Io(err.to_string()), expose_internal),
	};

	tokio::spawn(async move {
		if let Err(err) = drive_websocket(state, info, encoding, request_id, params, websocket).await {
			tracing::warn!(%err, "websocket connection ended with an error");
		}
	});

	let (parts, _body) = response.into_parts();
	Response::from_parts(parts, full(Vec::new()))
}

async fn drive_websocket(
	state: Arc<AppState>,
	info: gateway::path::ActorPathInfo,
	encoding: wire::Encoding,
	request_id: String,
	params: Value,
	websocket: hyper_tungstenite::HyperWebsocket,
) -> gateway::error::GatewayResult<()> {
	let (tx, mut rx) = transport::split(websocket).await?;
	let actor = state.registry.get_or_spawn(&info.actor_id).await?;
	let (conn_id, _reattached) = state
		.manager
		.prepare_and_connect_conn(
			&actor,
			TransportKind::WebSocket,
			request_id,
			params,
			encoding,
			true,
			Box::new(WebSocketTransport::new(tx)),
		)
		.await?;

	while let Some(message) = rx.next().await {
		let message = match message {
			Ok(message) => message,
			Err(err) => {
				tracing::debug!(%err, %conn_id, "websocket read failed, closing connection");
				break;
			}
		};

		let bytes = match message {
			hyper_tungstenite::tungstenite::Message::Binary(bytes) => bytes.to_vec(),
			hyper_tungstenite::tungstenite::Message::Text(text) => text.as_bytes().to_vec(),
			hyper_tungstenite::tungstenite::Message::Close(_) => break,
			hyper_tungstenite::tungstenite::Message::Ping(_) | hyper_tungstenite::tungstenite::Message::Pong(_) => continue,
			hyper_tungstenite::tungstenite::Message::Frame(_) => continue,
		};

		let expose_internal = state.expose_internal();
		let frame = match state.dispatcher.decode_incoming(&bytes, encoding) {
			Ok(frame) => frame,
			Err(err) => {
				let reply = err.to_frame(None, expose_internal);
				if state.manager.send_to(conn_id, &reply).await.is_err() {
					break;
				}
				continue;
			}
		};

		match frame {
			wire::ClientFrame::ActionRequest { id, name, args } => {
				let reply = state.dispatcher.dispatch_action(&actor, conn_id, id, name, args, expose_internal).await;
				if state.manager.send_to(conn_id, &reply).await.is_err() {
					break;
				}
			}
			wire::ClientFrame::SubscriptionRequest { event_name, subscribe } => {
				if let Err(err) = state.dispatcher.dispatch_subscription(&state.manager, &actor, conn_id, event_name, subscribe).await {
					let reply = err.to_frame(None, expose_internal);
					if state.manager.send_to(conn_id, &reply).await.is_err() {
						break;
					}
				}
			}
		}
	}

	state.manager.disconnect(&actor, conn_id, 1000, "connection closed").await
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn route_segments_splits_name_out_of_action_path() {
		assert_eq!(route_segments("/action/increment"), (Some("action"), Some("increment".to_string())));
		assert_eq!(route_segments("/queue-send"), (Some("queue-send"), None));
		assert_eq!(route_segments("/queue-send/work"), (Some("queue-send"), Some("work".to_string())));
		assert_eq!(route_segments("/resolve"), (Some("resolve"), None));
	}

	#[test]
	fn status_for_error_groups_user_errors_as_4xx() {
		let err: GatewayError = runtime_error::ActionNotFound { name: "nope".to_string() }.into();
		assert_eq!(status_for_error(&err), StatusCode::NOT_FOUND);

		let err: GatewayError = runtime_error::Forbidden { reason: "no".to_string() }.into();
		assert_eq!(status_for_error(&err), StatusCode::FORBIDDEN);
	}

	#[test]
	fn status_for_error_maps_internal_and_io_to_500() {
		let err = GatewayError::Io("broken pipe".to_string());
		assert_eq!(status_for_error(&err), StatusCode::INTERNAL_SERVER_ERROR);
	}

	#[test]
	fn error_response_hides_internal_message_unless_exposed() {
		let err = GatewayError::Io("db reset".to_string());
		let response = error_response(StatusCode::INTERNAL_SERVER_ERROR, wire::Encoding::Json, &err, false);
		assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
	}

	#[tokio::test]
	async fn demo_actor_action_round_trips_through_the_dispatcher() {
		let state = AppState::new(config_rt::Config::for_test());
		let actor = state.registry.get_or_spawn("actor-http-test").await.unwrap();
		let response = state
			.dispatcher
			.dispatch_http_action(&actor, "increment".to_string(), wire::HttpActionRequest { args: serde_json::json!({"by": 3}) })
			.await
			.unwrap();
		assert_eq!(response.output, serde_json::json!({"count": 3}));
	}

	#[tokio::test]
	async fn unknown_action_surfaces_action_not_found() {
		let state = AppState::new(config_rt::Config::for_test());
		let actor = state.registry.get_or_spawn("actor-http-test-2").await.unwrap();
		let err = state
			.dispatcher
			.dispatch_http_action(&actor, "nope".to_string(), wire::HttpActionRequest { args: Value::Null })
			.await
			.unwrap_err();
		assert_eq!(status_for_error(&err), StatusCode::NOT_FOUND);
	}
}
