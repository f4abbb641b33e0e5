//! Errors raised by the actor instance/concurrency core, layered over the shared
//! runtime taxonomy (§7). The crate's own `mod error` is why the `error` crate is
//! depended on under the local name `runtime-error` (see workspace `Cargo.toml`).

#[derive(Debug, thiserror::Error)]
pub enum ActorError {
	#[error(transparent)]
	ActionNotFound(#[from] runtime_error::ActionNotFound),
	#[error(transparent)]
	UnknownQueue(#[from] runtime_error::UnknownQueue),
	#[error(transparent)]
	StorageUnavailable(#[from] runtime_error::StorageUnavailable),
	#[error(transparent)]
	StateAccessOutsideStep(#[from] runtime_error::WorkflowStateAccessOutsideStep),
	#[error(transparent)]
	ActorStopping(#[from] runtime_error::ActorStopping),
	#[error("actor mailbox is closed")]
	MailboxClosed,
	#[error("action cancelled: {0}")]
	Cancelled(String),
	#[error(transparent)]
	Workflow(#[from] workflow::WorkflowError),
	#[error("kv error: {0}")]
	Kv(#[from] kv::KvError),
	#[error("serde error: {0}")]
	Serde(#[from] serde_json::Error),
}

pub type ActorResult<T> = Result<T, ActorError>;
