//! History data model (§3.4): name registry, `Entry`/`EntryKind`/`EntryMetadata`,
//! messages, and workflow-level metadata.
//!
//! Grounded on `gasoline`'s `history::event::Event` tagged union and
//! `history::cursor::HistoryResult` (the shape of "a recorded decision at a location,
//! with a status"), rebuilt against spec.md's explicit name-registry + `Path` addressing
//! (see DESIGN.md's `workflow` entry for the divergence from gasoline's own cursor model).

use std::collections::BTreeMap;

use kv::Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status machine for one entry (§3.4). Transitions only move forward; `completed`/
/// `failed` entries never change `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
	Pending,
	Running,
	Completed,
	Failed,
	Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
	pub status: EntryStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub attempts: u32,
	pub last_attempt_at: i64,
	pub created_at: i64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub completed_at: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub rollback_completed_at: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub rollback_error: Option<String>,
}

impl EntryMetadata {
	pub fn new(created_at: i64) -> Self {
		Self {
			status: EntryStatus::Pending,
			error: None,
			attempts: 0,
			last_attempt_at: created_at,
			created_at,
			completed_at: None,
			rollback_completed_at: None,
			rollback_error: None,
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self.status, EntryStatus::Completed | EntryStatus::Failed | EntryStatus::Exhausted)
	}
}

/// Status of one branch inside a `join`/`race` (§3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
	Pending,
	Completed,
	Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepState {
	Pending,
	Completed,
	Interrupted,
}

/// The tagged union of recordable decisions (§3.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EntryKind {
	Step {
		#[serde(skip_serializing_if = "Option::is_none")]
		output: Option<Value>,
		#[serde(skip_serializing_if = "Option::is_none")]
		error: Option<String>,
	},
	Loop {
		state: Value,
		iteration: u32,
		#[serde(skip_serializing_if = "Option::is_none")]
		output: Option<Value>,
	},
	Sleep {
		deadline: i64,
		state: SleepState,
	},
	Message {
		name: String,
		data: Value,
	},
	RollbackCheckpoint {
		name: String,
	},
	Join {
		branches: BTreeMap<String, BranchStatus>,
	},
	Race {
		#[serde(skip_serializing_if = "Option::is_none")]
		winner: Option<String>,
		branches: BTreeMap<String, BranchStatus>,
	},
	Removed {
		original_type: String,
		#[serde(skip_serializing_if = "Option::is_none")]
		original_name: Option<String>,
	},
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
	pub id: Uuid,
	pub location: Path,
	pub kind: EntryKind,
}

/// A durable message (§3.4): `{id, name, data, sentAt}`, FIFO within the same name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
	pub id: Uuid,
	pub name: String,
	pub data: Value,
	pub sent_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
	Pending,
	Running,
	Completed,
	Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowMeta {
	pub state: Option<WorkflowState>,
	pub output: Option<Value>,
	pub error: Option<String>,
	pub input: Option<Value>,
}

/// The name registry itself lives in the `kv` crate (§4.3's `names` prefix is shared
/// key-layout infrastructure, not workflow-specific); re-exported here so callers of
/// this crate don't need to reach into `kv` directly.
pub use kv::NameRegistry;
