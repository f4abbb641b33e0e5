//! Errors raised by the gateway (path parsing, dispatch, connection management),
//! layered over the shared runtime taxonomy (§7). Local `mod error` is why `error`
//! is depended on under the rename `runtime-error` (see `workflow`'s DESIGN.md note).

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
	#[error(transparent)]
	ActionNotFound(#[from] runtime_error::ActionNotFound),
	#[error(transparent)]
	InvalidEncoding(#[from] runtime_error::InvalidEncoding),
	#[error(transparent)]
	InvalidParams(#[from] runtime_error::InvalidParams),
	#[error(transparent)]
	InvalidRequest(#[from] runtime_error::InvalidRequest),
	#[error(transparent)]
	InvalidQueryJson(#[from] runtime_error::InvalidQueryJson),
	#[error(transparent)]
	Forbidden(#[from] runtime_error::Forbidden),
	#[error(transparent)]
	IncomingMessageTooLong(#[from] runtime_error::IncomingMessageTooLong),
	#[error(transparent)]
	OutgoingMessageTooLong(#[from] runtime_error::OutgoingMessageTooLong),
	#[error(transparent)]
	BackpressureOverflow(#[from] runtime_error::BackpressureOverflow),
	#[error(transparent)]
	ActorNotFound(#[from] runtime_error::ActorNotFound),
	#[error("connection not found: {0}")]
	ConnectionNotFound(Uuid),
	#[error(transparent)]
	Frame(#[from] wire::FrameError),
	#[error(transparent)]
	Actor(#[from] actor::ActorError),
	/// Transport-level I/O failure from a concrete `Transport` impl (hostd's
	/// websocket/HTTP wiring), distinct from a protocol-level error.
	#[error("transport io error: {0}")]
	Io(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
	/// Converts to the wire `Error` frame shape (§7's propagation policy), given the
	/// `actionId` this error is in response to (if any).
	pub fn to_frame(&self, action_id: Option<u64>, expose_internal: bool) -> wire::ServerFrame {
		let frame = match self {
			GatewayError::ActionNotFound(e) => runtime_error::to_frame(e, expose_internal, action_id),
			GatewayError::InvalidEncoding(e) => runtime_error::to_frame(e, expose_internal, action_id),
			GatewayError::InvalidParams(e) => runtime_error::to_frame(e, expose_internal, action_id),
			GatewayError::InvalidRequest(e) => runtime_error::to_frame(e, expose_internal, action_id),
			GatewayError::InvalidQueryJson(e) => runtime_error::to_frame(e, expose_internal, action_id),
			GatewayError::Forbidden(e) => runtime_error::to_frame(e, expose_internal, action_id),
			GatewayError::IncomingMessageTooLong(e) => runtime_error::to_frame(e, expose_internal, action_id),
			GatewayError::OutgoingMessageTooLong(e) => runtime_error::to_frame(e, expose_internal, action_id),
			GatewayError::BackpressureOverflow(e) => runtime_error::to_frame(e, expose_internal, action_id),
			GatewayError::ActorNotFound(e) => runtime_error::to_frame(e, expose_internal, action_id),
			GatewayError::Actor(actor_err) => actor_error_to_frame(actor_err, expose_internal, action_id),
			other => runtime_error::to_frame(&runtime_error::InternalError(other.to_string()), expose_internal, action_id),
		};
		frame.into()
	}
}

/// Unwraps an `actor::ActorError` into the same frame its inner taxonomy struct would
/// produce directly, rather than flattening every actor-side failure into a generic
/// internal error — a dispatched action that fails with `ActionNotFound` must still
/// surface as `action_not_found`, not `internal_error`.
fn actor_error_to_frame(err: &actor::ActorError, expose_internal: bool, action_id: Option<u64>) -> runtime_error::ErrorFrame {
	match err {
		actor::ActorError::ActionNotFound(e) => runtime_error::to_frame(e, expose_internal, action_id),
		actor::ActorError::UnknownQueue(e) => runtime_error::to_frame(e, expose_internal, action_id),
		actor::ActorError::StorageUnavailable(e) => runtime_error::to_frame(e, expose_internal, action_id),
		actor::ActorError::StateAccessOutsideStep(e) => runtime_error::to_frame(e, expose_internal, action_id),
		actor::ActorError::ActorStopping(e) => runtime_error::to_frame(e, expose_internal, action_id),
		other => runtime_error::to_frame(&runtime_error::InternalError(other.to_string()), expose_internal, action_id),
	}
}
