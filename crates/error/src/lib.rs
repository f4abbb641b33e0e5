//! Stable error taxonomy for the actor runtime core.
//!
//! Modeled on the teacher's `rivet-error` usage pattern observed in
//! `rivet-guard-core::errors`: one small struct per error case, a stable
//! `(group, code)` pair, and a human message. The actual `rivet-error` derive
//! macro was not available to ground against (its source was not retrieved),
//! so the same shape is produced by hand: a `RuntimeError` trait plus
//! `thiserror::Error` for `Display`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Implemented by every error case in the taxonomy (§7 of the spec).
pub trait RuntimeError: std::error::Error {
	/// Stable error group, e.g. `"user"`, `"transport"`, `"lifecycle"`, `"workflow"`, `"internal"`.
	fn group(&self) -> &'static str;
	/// Stable error code, unique within its group.
	fn code(&self) -> &'static str;
	/// Structured metadata attached to the error, if any.
	fn metadata(&self) -> Option<Value> {
		None
	}
	/// Whether this error's message is safe to expose to clients unconditionally.
	/// Internal errors are not; everything else is.
	fn always_exposed(&self) -> bool {
		true
	}
}

/// The wire-shaped rendering of a `RuntimeError`, matching the `Error{group, code,
/// message, metadata?, actionId?}` frame variant from spec §3.3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorFrame {
	pub group: String,
	pub code: String,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub action_id: Option<u64>,
}

/// Renders any `RuntimeError` into an `ErrorFrame`, applying the expose-errors policy
/// from §6.4/§7: internal messages are replaced with `"internal"` unless
/// `expose_internal` is set (driven by `RIVET_EXPOSE_ERRORS` / `NODE_ENV=development`).
pub fn to_frame<E: RuntimeError>(err: &E, expose_internal: bool, action_id: Option<u64>) -> ErrorFrame {
	let message = if err.always_exposed() || expose_internal {
		err.to_string()
	} else {
		"internal".to_string()
	};

	ErrorFrame {
		group: err.group().to_string(),
		code: err.code().to_string(),
		message,
		metadata: err.metadata(),
		action_id,
	}
}

macro_rules! taxonomy_error {
	(
		$(#[$meta:meta])*
		$group:literal, $code:literal, $name:ident $( { $($field:ident : $ty:ty),* $(,)? } )? , $msg:expr
	) => {
		$(#[$meta])*
		#[derive(Debug, thiserror::Error)]
		#[error($msg)]
		pub struct $name $( { $(pub $field: $ty),* } )?;

		impl RuntimeError for $name {
			fn group(&self) -> &'static str { $group }
			fn code(&self) -> &'static str { $code }
		}
	};
}

// ---- User errors ----

taxonomy_error!("user", "action_not_found", ActionNotFound { name: String }, "no action named `{name}`");
taxonomy_error!("user", "unknown_queue", UnknownQueue { name: String }, "no queue named `{name}`");
taxonomy_error!("user", "invalid_encoding", InvalidEncoding { encoding: String }, "unsupported wire encoding `{encoding}`");
taxonomy_error!("user", "invalid_params", InvalidParams { reason: String }, "invalid connection params: {reason}");
taxonomy_error!("user", "invalid_request", InvalidRequest { reason: String }, "invalid request: {reason}");
taxonomy_error!("user", "invalid_query_json", InvalidQueryJson { reason: String }, "invalid actor query JSON: {reason}");
taxonomy_error!("user", "forbidden", Forbidden { reason: String }, "forbidden: {reason}");

// ---- Transport errors ----

taxonomy_error!(
	"transport", "incoming_message_too_long",
	IncomingMessageTooLong { size: usize, max: usize },
	"incoming message of {size} bytes exceeds the maximum of {max} bytes"
);
taxonomy_error!(
	"transport", "outgoing_message_too_long",
	OutgoingMessageTooLong { size: usize, max: usize },
	"outgoing message of {size} bytes exceeds the maximum of {max} bytes"
);
taxonomy_error!(
	"transport", "backpressure_overflow",
	BackpressureOverflow { connection_id: String },
	"send queue overflowed for connection `{connection_id}`"
);

// ---- Lifecycle errors ----

taxonomy_error!("lifecycle", "actor_not_found", ActorNotFound { actor_id: String }, "no actor with id `{actor_id}`");
taxonomy_error!("lifecycle", "storage_unavailable", StorageUnavailable { reason: String }, "storage unavailable: {reason}");

/// Retryable per §7: up to 3 retries, 25ms apart.
#[derive(Debug, thiserror::Error)]
#[error("actor `{actor_id}` is stopping, retry the request")]
pub struct ActorStopping {
	pub actor_id: String,
}

impl ActorStopping {
	pub const MAX_RETRIES: u32 = 3;
	pub const RETRY_SPACING_MS: u64 = 25;
}

impl RuntimeError for ActorStopping {
	fn group(&self) -> &'static str {
		"lifecycle"
	}
	fn code(&self) -> &'static str {
		"actor_stopping"
	}
}

// ---- Workflow errors ----

taxonomy_error!(
	"workflow", "state_access_outside_step",
	WorkflowStateAccessOutsideStep { workflow_id: String },
	"workflow `{workflow_id}` accessed state/vars/client outside a step"
);
taxonomy_error!(
	"workflow", "workflow_evicted",
	WorkflowEvicted { workflow_id: String },
	"workflow `{workflow_id}` was evicted"
);
taxonomy_error!(
	"workflow", "workflow_timed_out",
	WorkflowTimedOut { workflow_id: String },
	"workflow `{workflow_id}` timed out"
);
taxonomy_error!(
	"workflow", "workflow_rollback_failed",
	WorkflowRollbackFailed { workflow_id: String, reason: String },
	"workflow `{workflow_id}` rollback failed: {reason}"
);

// ---- Internal ----

#[derive(Debug, thiserror::Error)]
#[error("internal error: {0}")]
pub struct InternalError(pub String);

impl RuntimeError for InternalError {
	fn group(&self) -> &'static str {
		"internal"
	}
	fn code(&self) -> &'static str {
		"internal_error"
	}
	fn always_exposed(&self) -> bool {
		false
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exposes_user_errors_unconditionally() {
		let err = ActionNotFound { name: "increment".into() };
		let frame = to_frame(&err, false, Some(7));
		assert_eq!(frame.group, "user");
		assert_eq!(frame.code, "action_not_found");
		assert_eq!(frame.message, "no action named `increment`");
		assert_eq!(frame.action_id, Some(7));
	}

	#[test]
	fn hides_internal_errors_unless_exposed() {
		let err = InternalError("db connection reset".into());
		let hidden = to_frame(&err, false, None);
		assert_eq!(hidden.message, "internal");

		let exposed = to_frame(&err, true, None);
		assert_eq!(exposed.message, "internal error: db connection reset");
	}

	#[test]
	fn actor_stopping_carries_retry_policy() {
		assert_eq!(ActorStopping::MAX_RETRIES, 3);
		assert_eq!(ActorStopping::RETRY_SPACING_MS, 25);
	}
}
