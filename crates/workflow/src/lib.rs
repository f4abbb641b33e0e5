pub mod ctx;
pub mod entry;
pub mod error;
pub mod store;
pub mod worker;

pub use ctx::{BranchFn, BranchFuture, HistoryUpdatedHook, Loop, WorkflowCtx};
pub use entry::{
	BranchStatus, Entry, EntryKind, EntryMetadata, EntryStatus, Message, SleepState, WorkflowMeta,
	WorkflowState,
};
pub use kv::NameRegistry;
pub use error::{Suspend, WakeSource, WorkflowError, WorkflowResult};
pub use store::WorkflowStore;
