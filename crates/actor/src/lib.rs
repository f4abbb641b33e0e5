//! Actor lifecycle and concurrency core (§4.4, §4.7–§4.9): per-actor state store,
//! durable in-actor message queue, hibernation controller, and the single-writer
//! mailbox that ties them together.

pub mod error;
pub mod hibernation;
pub mod instance;
pub mod metrics;
pub mod queue;
pub mod state;

pub use error::{ActorError, ActorResult};
pub use hibernation::{HibernatableConn, HibernationController};
pub use instance::{
	spawn, ActorCtx, ActorDefinition, ActorHandle, ConnectOutcome, EventSink, InvokeKind, NullEventSink,
	OwnedInvokeKind, QueueSendTicket, StepAccessGuard, StepGuardHandle,
};
pub use metrics::{ActorMetrics, ActorMetricsSnapshot};
pub use queue::{NextOptions, Queue, QueueMessage};
pub use state::ActorStateStore;
