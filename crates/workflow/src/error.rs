//! Workflow-internal error/control-flow signal.
//!
//! Grounded on `gasoline`'s `WorkflowError` (`is_recoverable`/`is_retryable`/
//! `wake_immediate`/`deadline_ts`/`signals`) used by `WorkflowCtx::run` to decide how
//! to persist a parked workflow and what should wake it back up. `Suspend` plays the
//! role gasoline's recoverable-error variants play: it is not a failure, it is the
//! signal that the user function hit an incomplete entry and must be re-entered later.

use kv::Path;

#[derive(Debug, Clone)]
pub enum WakeSource {
	/// Re-entered on the worker's next poll tick (entry resolved without external input,
	/// e.g. a completed in-memory sleep).
	Immediate,
	/// Re-entered when the KV driver's alarm for this workflow fires.
	Alarm { deadline_ms: i64 },
	/// Re-entered when a message matching one of these names is appended.
	Message { names: Vec<String> },
}

/// Raised by a primitive to unwind the user function back to the driver without
/// treating the workflow as failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("workflow suspended at {location:?}: {wake:?}")]
pub struct Suspend {
	pub location: Path,
	pub wake: WakeSource,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
	#[error(transparent)]
	Suspend(#[from] Suspend),

	#[error("step `{name}` failed after {attempts} attempts: {source}")]
	StepExhausted {
		name: String,
		attempts: u32,
		source: anyhow::Error,
	},

	#[error(transparent)]
	StateAccessOutsideStep(#[from] runtime_error::WorkflowStateAccessOutsideStep),

	#[error(transparent)]
	RollbackFailed(#[from] runtime_error::WorkflowRollbackFailed),

	#[error("kv error: {0}")]
	Kv(#[from] kv::KvError),

	#[error("workflow history entry at {0:?} changed kind across replays (non-determinism)")]
	HistoryDiverged(Path),

	#[error("serde error: {0}")]
	Serde(#[from] serde_json::Error),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
