//! Actor instance (§4.7): the single-writer mailbox that serializes every operation
//! touching an actor's state, plus the user-facing `ActorCtx` and `ActorDefinition`
//! contract application code implements.
//!
//! Grounded on `gasoline::worker::Worker`'s single-task-owns-state shape (mailbox
//! commands processed one at a time by a dedicated `tokio::spawn`ed loop) and on
//! `pegboard-gateway/src/shared_state.rs`'s `Arc<Inner>` + cheap-clone handle pattern
//! for the public `ActorHandle` other crates hold.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kv::KvDriver;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{ActorError, ActorResult};
use crate::hibernation::HibernationController;
use crate::metrics::ActorMetrics;
use crate::queue::{NextOptions, Queue, QueueMessage};
use crate::state::ActorStateStore;

fn now_ms() -> i64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_millis() as i64)
		.unwrap_or(0)
}

/// Broadcast sink the actor hands events to. Implemented by whatever owns the
/// connection set (the `gateway` crate's `ConnectionManager`); kept as a trait here so
/// `actor` never depends on `gateway` — data flows actor → connection manager, not the
/// other way (§2's component dependency order).
pub trait EventSink: Send + Sync {
	fn broadcast(&self, actor_id: &str, event_name: &str, args: Value);
}

pub struct NullEventSink;

impl EventSink for NullEventSink {
	fn broadcast(&self, _actor_id: &str, _event_name: &str, _args: Value) {}
}

pub enum InvokeKind<'a> {
	Action(&'a str),
	Subscribe(&'a str),
}

/// Owned twin of `InvokeKind`, since a mailbox command has to cross an `mpsc` channel
/// and can't carry a borrow.
#[derive(Debug, Clone)]
pub enum OwnedInvokeKind {
	Action(String),
	Subscribe(String),
}

impl OwnedInvokeKind {
	fn as_invoke_kind(&self) -> InvokeKind<'_> {
		match self {
			OwnedInvokeKind::Action(name) => InvokeKind::Action(name),
			OwnedInvokeKind::Subscribe(name) => InvokeKind::Subscribe(name),
		}
	}
}

/// Tracks whether actor state/vars/kv access is currently permitted from inside a
/// hosted `run` workflow's body (§4.7's "state-access guard for workflows": such access
/// is only allowed inside a step). `workflow::WorkflowCtx` has no notion of "actor", so
/// this guard isn't wired into it automatically — whoever constructs a `WorkflowFn` that
/// touches actor state is expected to hold the same `StepAccessGuard` the mailbox arms
/// around each tick (via `spawn`'s `run` parameter) and wrap any state-touching code in
/// `enter()`, e.g. inside the closure passed to `WorkflowCtx::step`. Plain actions never
/// need this — only workflow-driver code does.
#[derive(Clone, Default)]
pub struct StepAccessGuard {
	in_step: Arc<AtomicBool>,
}

pub struct StepGuardHandle(Arc<AtomicBool>);

impl Drop for StepGuardHandle {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

impl StepAccessGuard {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn enter(&self) -> StepGuardHandle {
		self.in_step.store(true, Ordering::SeqCst);
		StepGuardHandle(self.in_step.clone())
	}

	pub fn check(&self, workflow_id: &str) -> ActorResult<()> {
		if self.in_step.load(Ordering::SeqCst) {
			Ok(())
		} else {
			Err(ActorError::StateAccessOutsideStep(runtime_error::WorkflowStateAccessOutsideStep {
				workflow_id: workflow_id.to_string(),
			}))
		}
	}
}

/// Context passed to every hook and action (§4.7). Ordinary actions and lifecycle hooks
/// always permit state/vars/kv access — only a hosted workflow's own driver code is
/// gated, through its own captured `StepAccessGuard` rather than through this type.
pub struct ActorCtx<'a> {
	pub actor_id: &'a str,
	state: &'a ActorStateStore,
	vars: &'a Value,
	queue: &'a Queue,
	kv: &'a dyn KvDriver,
	events: &'a dyn EventSink,
	pub cancellation: tokio_util::sync::CancellationToken,
}

impl<'a> ActorCtx<'a> {
	pub async fn state(&self) -> ActorResult<Value> {
		Ok(self.state.get().await)
	}

	pub async fn mutate_state<F, T>(&self, f: F) -> ActorResult<T>
	where
		F: FnOnce(&mut Value) -> T,
	{
		Ok(self.state.mutate(f).await)
	}

	pub fn vars(&self) -> &Value {
		self.vars
	}

	pub async fn kv_get(&self, key: &[u8]) -> ActorResult<Option<Vec<u8>>> {
		Ok(self.kv.get(key).await?)
	}

	pub async fn kv_put(&self, key: &[u8], value: &[u8]) -> ActorResult<()> {
		Ok(self.kv.set(key, value).await?)
	}

	pub async fn kv_delete(&self, key: &[u8]) -> ActorResult<()> {
		Ok(self.kv.delete(key).await?)
	}

	pub fn broadcast(&self, event_name: &str, args: Value) {
		self.events.broadcast(self.actor_id, event_name, args);
	}

	pub async fn queue_send(&self, name: &str, body: Value, completable: bool) -> ActorResult<Uuid> {
		self.queue.send(name, body, completable, now_ms()).await
	}

	pub async fn queue_next(&self, opts: NextOptions) -> ActorResult<Vec<QueueMessage>> {
		self.queue.next(opts).await
	}

	pub async fn queue_peek(&self, names: &[String], limit: usize) -> ActorResult<Vec<QueueMessage>> {
		self.queue.peek(names, limit).await
	}

	pub async fn schedule_after(&self, ms: i64, name: &str) -> ActorResult<()> {
		self.kv.set_alarm(&alarm_id(self.actor_id, name), now_ms() + ms).await?;
		Ok(())
	}

	pub async fn schedule_at(&self, at_ms: i64, name: &str) -> ActorResult<()> {
		self.kv.set_alarm(&alarm_id(self.actor_id, name), at_ms).await?;
		Ok(())
	}
}

fn alarm_id(actor_id: &str, name: &str) -> String {
	format!("{actor_id}:{name}")
}

/// Lifecycle hooks and action dispatch for one kind of actor (§4.7). Application code
/// (out of this spec's scope per §1) implements this; the framework only defines how
/// it's hosted. Action name → handler resolution happens inside `action` itself, per
/// §9's "store actions in a name → function table on the actor definition."
#[async_trait]
pub trait ActorDefinition: Send + Sync + 'static {
	fn create_state(&self, input: Value) -> Value;

	async fn on_start(&self, _ctx: &ActorCtx<'_>) {}

	async fn on_before_connect(&self, _ctx: &ActorCtx<'_>, _params: &Value) -> ActorResult<()> {
		Ok(())
	}

	async fn can_invoke(&self, _ctx: &ActorCtx<'_>, _conn_id: Uuid, _invoke: InvokeKind<'_>) -> bool {
		true
	}

	async fn on_connect(&self, _ctx: &ActorCtx<'_>, _conn_id: Uuid) {}

	async fn on_disconnect(&self, _ctx: &ActorCtx<'_>, _conn_id: Uuid) {}

	async fn on_stop(&self, _ctx: &ActorCtx<'_>) {}

	async fn on_scheduled(&self, _ctx: &ActorCtx<'_>, _name: &str) {}

	async fn action(&self, ctx: &mut ActorCtx<'_>, name: &str, args: Value) -> ActorResult<Value>;
}

pub struct ConnectOutcome {
	pub conn_id: Uuid,
	/// `true` if this request-id matched a persisted hibernatable conn, in which case
	/// the caller MUST NOT fire a second `onConnect` (§4.5, §8 P7).
	pub reattached: bool,
}

/// Result of an external (HTTP `/queue-send`) enqueue (§4.9, §8 S4). `waiter` is only
/// `Some` when `wait: true` was requested; the caller awaits it with its own deadline,
/// entirely outside the mailbox, so a slow consumer never blocks this actor's other
/// commands.
pub struct QueueSendTicket {
	pub message_id: Uuid,
	pub waiter: Option<oneshot::Receiver<Value>>,
}

enum Command {
	Action { name: String, args: Value, reply: oneshot::Sender<ActorResult<Value>> },
	Connect { request_id: String, params: Value, reply: oneshot::Sender<ActorResult<ConnectOutcome>> },
	Disconnect { conn_id: Uuid },
	CanInvoke { conn_id: Uuid, kind: OwnedInvokeKind, reply: oneshot::Sender<bool> },
	QueueSend { name: String, body: Value, wait: bool, reply: oneshot::Sender<ActorResult<QueueSendTicket>> },
	ScheduledAlarm { name: String },
	WorkflowTick,
	Stop { reply: oneshot::Sender<()> },
}

impl fmt::Debug for Command {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Command::Action { name, .. } => write!(f, "Action({name})"),
			Command::Connect { request_id, .. } => write!(f, "Connect({request_id})"),
			Command::Disconnect { conn_id } => write!(f, "Disconnect({conn_id})"),
			Command::CanInvoke { conn_id, .. } => write!(f, "CanInvoke({conn_id})"),
			Command::QueueSend { name, .. } => write!(f, "QueueSend({name})"),
			Command::ScheduledAlarm { name } => write!(f, "ScheduledAlarm({name})"),
			Command::WorkflowTick => write!(f, "WorkflowTick"),
			Command::Stop { .. } => write!(f, "Stop"),
		}
	}
}

/// Cheap-to-clone handle to a running actor's mailbox. All public entry points funnel
/// through `tx`, which is how single-writer ordering (§5 P1) is enforced: the mailbox
/// task is the only place state is ever touched.
#[derive(Clone)]
pub struct ActorHandle {
	pub actor_id: String,
	pub metrics: Arc<ActorMetrics>,
	tx: mpsc::Sender<Command>,
}

impl ActorHandle {
	pub async fn execute(&self, name: String, args: Value, timeout_ms: u64) -> ActorResult<Value> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(Command::Action { name, args, reply })
			.await
			.map_err(|_| ActorError::MailboxClosed)?;
		match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(ActorError::MailboxClosed),
			Err(_) => Err(ActorError::Cancelled("action deadline exceeded".to_string())),
		}
	}

	pub async fn connect(&self, request_id: String, params: Value) -> ActorResult<ConnectOutcome> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(Command::Connect { request_id, params, reply })
			.await
			.map_err(|_| ActorError::MailboxClosed)?;
		rx.await.map_err(|_| ActorError::MailboxClosed)?
	}

	pub async fn disconnect(&self, conn_id: Uuid) -> ActorResult<()> {
		self.tx.send(Command::Disconnect { conn_id }).await.map_err(|_| ActorError::MailboxClosed)
	}

	/// Asks the actor definition's `can_invoke` hook whether `conn_id` may perform
	/// `kind` (an action call or an event subscription). Used by the gateway's
	/// dispatcher to enforce §4.6's per-request authorization before routing.
	pub async fn can_invoke(&self, conn_id: Uuid, kind: OwnedInvokeKind) -> ActorResult<bool> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(Command::CanInvoke { conn_id, kind, reply })
			.await
			.map_err(|_| ActorError::MailboxClosed)?;
		rx.await.map_err(|_| ActorError::MailboxClosed)
	}

	/// Enqueues an external message onto one of this actor's named queues (§4.9, HTTP
	/// `/queue-send`). If `wait`, the returned ticket's `waiter` resolves once an
	/// in-actor consumer calls `ActorCtx::queue_next` then completes the message —
	/// awaiting it is the caller's job, not this actor's mailbox's.
	pub async fn queue_send(&self, name: String, body: Value, wait: bool) -> ActorResult<QueueSendTicket> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(Command::QueueSend { name, body, wait, reply })
			.await
			.map_err(|_| ActorError::MailboxClosed)?;
		rx.await.map_err(|_| ActorError::MailboxClosed)?
	}

	pub async fn fire_scheduled(&self, name: String) -> ActorResult<()> {
		self.tx
			.send(Command::ScheduledAlarm { name })
			.await
			.map_err(|_| ActorError::MailboxClosed)
	}

	/// Advances the hosted `run` workflow one tick, if any (§4.7's run-loop /
	/// replay-across-hibernation contract). A no-op if this actor has no `run`.
	pub async fn tick_workflow(&self) -> ActorResult<()> {
		self.tx.send(Command::WorkflowTick).await.map_err(|_| ActorError::MailboxClosed)
	}

	pub async fn stop(&self) -> ActorResult<()> {
		let (reply, rx) = oneshot::channel();
		self.tx.send(Command::Stop { reply }).await.map_err(|_| ActorError::MailboxClosed)?;
		rx.await.map_err(|_| ActorError::MailboxClosed)
	}
}

/// The mailbox task itself. Not exposed directly — callers get an `ActorHandle` from
/// `spawn`.
struct ActorInstance<D: ActorDefinition> {
	actor_id: String,
	def: Arc<D>,
	state: ActorStateStore,
	queue: Queue,
	kv: Arc<dyn KvDriver>,
	hibernation: HibernationController,
	events: Arc<dyn EventSink>,
	vars: Value,
	run: Option<workflow::worker::WorkflowFn>,
	rx: mpsc::Receiver<Command>,
	metrics: Arc<ActorMetrics>,
}

/// Spawns a new actor instance, loading its state/queue/hibernatable-conns from `kv`
/// and returning a handle to its mailbox. `run` hosts a durable workflow as the actor's
/// long-lived run loop (§4.7); pass `None` for actors with no run function. If `run`
/// touches actor state directly (outside `ActorCtx`, since a `WorkflowFn` is built
/// before the instance exists), its closures should capture a `StepAccessGuard` and gate
/// that access behind `enter()` inside each `WorkflowCtx::step` body.
pub async fn spawn<D: ActorDefinition>(
	actor_id: String,
	def: Arc<D>,
	kv: Arc<dyn KvDriver>,
	events: Arc<dyn EventSink>,
	input: Value,
	max_hibernatable_conns: usize,
	mailbox_capacity: usize,
	run: Option<workflow::worker::WorkflowFn>,
) -> ActorResult<ActorHandle> {
	let state = {
		let def = def.clone();
		ActorStateStore::load(kv.clone(), move || def.create_state(input)).await?
	};
	let queue = Queue::load(kv.clone()).await?;
	let hibernation = HibernationController::load(kv.clone(), max_hibernatable_conns).await?;
	let (tx, rx) = mpsc::channel(mailbox_capacity);
	let metrics = Arc::new(ActorMetrics::new());

	let instance = ActorInstance {
		actor_id: actor_id.clone(),
		def,
		state,
		queue,
		kv,
		hibernation,
		events,
		vars: Value::Null,
		run,
		rx,
		metrics: metrics.clone(),
	};
	tokio::spawn(instance.run_loop());
	Ok(ActorHandle { actor_id, metrics, tx })
}

impl<D: ActorDefinition> ActorInstance<D> {
	fn ctx(&self) -> ActorCtx<'_> {
		ActorCtx {
			actor_id: &self.actor_id,
			state: &self.state,
			vars: &self.vars,
			queue: &self.queue,
			kv: self.kv.as_ref(),
			events: self.events.as_ref(),
			cancellation: tokio_util::sync::CancellationToken::new(),
		}
	}

	async fn run_loop(mut self) {
		self.def.on_start(&self.ctx()).await;

		while let Some(cmd) = self.rx.recv().await {
			tracing::trace!(actor_id = %self.actor_id, cmd = ?cmd, "actor mailbox processing command");
			match cmd {
				Command::Action { name, args, reply } => {
					let result = self.handle_action(&name, args).await;
					let _ = reply.send(result);
				}
				Command::Connect { request_id, params, reply } => {
					let result = self.handle_connect(request_id, params).await;
					let _ = reply.send(result);
				}
				Command::Disconnect { conn_id } => {
					let ctx = self.ctx();
					self.def.on_disconnect(&ctx, conn_id).await;
					if let Err(err) = self.hibernation.remove(conn_id).await {
						tracing::warn!(%err, actor_id = %self.actor_id, "failed to remove hibernatable conn record");
					}
				}
				Command::CanInvoke { conn_id, kind, reply } => {
					let ctx = self.ctx();
					let allowed = self.def.can_invoke(&ctx, conn_id, kind.as_invoke_kind()).await;
					let _ = reply.send(allowed);
				}
				Command::QueueSend { name, body, wait, reply } => {
					let result = self.handle_queue_send(&name, body, wait).await;
					if result.is_ok() {
						ActorMetrics::incr(&self.metrics.queue_messages_sent);
					}
					let _ = reply.send(result);
				}
				Command::ScheduledAlarm { name } => {
					let ctx = self.ctx();
					self.def.on_scheduled(&ctx, &name).await;
					if let Err(err) = self.state.flush().await {
						tracing::warn!(%err, actor_id = %self.actor_id, "flush after scheduled alarm failed");
					}
				}
				Command::WorkflowTick => {
					ActorMetrics::incr(&self.metrics.workflow_ticks);
					self.handle_workflow_tick().await;
				}
				Command::Stop { reply } => {
					let ctx = self.ctx();
					self.def.on_stop(&ctx).await;
					if let Err(err) = self.state.flush().await {
						tracing::warn!(%err, actor_id = %self.actor_id, "final flush on stop failed");
					}
					let _ = reply.send(());
					break;
				}
			}
		}
	}

	async fn handle_action(&mut self, name: &str, args: Value) -> ActorResult<Value> {
		let mut ctx = self.ctx();
		let out = self.def.action(&mut ctx, name, args).await;
		self.state.flush().await?;
		if out.is_ok() {
			ActorMetrics::incr(&self.metrics.actions_executed);
		} else {
			ActorMetrics::incr(&self.metrics.actions_failed);
		}
		out
	}

	async fn handle_connect(&mut self, request_id: String, params: Value) -> ActorResult<ConnectOutcome> {
		{
			let ctx = self.ctx();
			self.def.on_before_connect(&ctx, &params).await?;
		}

		if let Some(conn_id) = self.hibernation.lookup_reattach(&request_id).await {
			self.hibernation.touch(conn_id, now_ms()).await?;
			ActorMetrics::incr(&self.metrics.connections_reattached);
			return Ok(ConnectOutcome { conn_id, reattached: true });
		}

		let conn_id = Uuid::new_v4();
		self.hibernation.record_new(request_id, conn_id, now_ms()).await?;
		let ctx = self.ctx();
		self.def.on_connect(&ctx, conn_id).await;
		ActorMetrics::incr(&self.metrics.connections_opened);
		Ok(ConnectOutcome { conn_id, reattached: false })
	}

	async fn handle_queue_send(&mut self, name: &str, body: Value, wait: bool) -> ActorResult<QueueSendTicket> {
		let message_id = self.queue.send(name, body, wait, now_ms()).await?;
		let waiter = if wait { Some(self.queue.register_waiter(message_id)) } else { None };
		Ok(QueueSendTicket { message_id, waiter })
	}

	async fn handle_workflow_tick(&mut self) {
		let Some(run_fn) = self.run.clone() else { return };
		match workflow::worker::advance(self.actor_id.clone(), self.kv.clone(), now_ms(), run_fn).await {
			Ok(workflow::worker::Advance::Completed(output)) => {
				tracing::info!(actor_id = %self.actor_id, ?output, "hosted workflow completed");
				self.run = None;
			}
			Ok(workflow::worker::Advance::Suspended(_)) => {}
			Err(err) => {
				tracing::error!(%err, actor_id = %self.actor_id, "hosted workflow run errored, stopping run loop");
				self.run = None;
			}
		}
		if let Err(err) = self.state.flush().await {
			tracing::warn!(%err, actor_id = %self.actor_id, "flush after workflow tick failed");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use kv::MemoryKvDriver;
	use serde_json::json;

	struct Counter;

	#[async_trait]
	impl ActorDefinition for Counter {
		fn create_state(&self, _input: Value) -> Value {
			json!({"count": 0})
		}

		async fn action(&self, ctx: &mut ActorCtx<'_>, name: &str, args: Value) -> ActorResult<Value> {
			match name {
				"increment" => {
					let by = args.get("by").and_then(Value::as_i64).unwrap_or(1);
					let new_count = ctx
						.mutate_state(|s| {
							let count = s["count"].as_i64().unwrap_or(0) + by;
							s["count"] = json!(count);
							count
						})
						.await?;
					ctx.broadcast("changed", json!(new_count));
					Ok(json!({"count": new_count}))
				}
				other => Err(runtime_error::ActionNotFound { name: other.to_string() }.into()),
			}
		}
	}

	#[tokio::test]
	async fn action_mutates_state_and_is_visible_after_flush() {
		let kv: Arc<dyn KvDriver> = Arc::new(MemoryKvDriver::default());
		let handle = spawn(
			"actor-1".to_string(),
			Arc::new(Counter),
			kv,
			Arc::new(NullEventSink),
			Value::Null,
			10,
			16,
			None,
		)
		.await
		.unwrap();

		let out = handle.execute("increment".to_string(), json!({"by": 2}), 1_000).await.unwrap();
		assert_eq!(out, json!({"count": 2}));

		let out2 = handle.execute("increment".to_string(), json!({}), 1_000).await.unwrap();
		assert_eq!(out2, json!({"count": 3}));

		let snapshot = handle.metrics.snapshot();
		assert_eq!(snapshot.actions_executed, 2);
		assert_eq!(snapshot.actions_failed, 0);
	}

	#[tokio::test]
	async fn unknown_action_surfaces_action_not_found() {
		let kv: Arc<dyn KvDriver> = Arc::new(MemoryKvDriver::default());
		let handle =
			spawn("actor-2".to_string(), Arc::new(Counter), kv, Arc::new(NullEventSink), Value::Null, 10, 16, None)
				.await
				.unwrap();

		let err = handle.execute("nope".to_string(), json!({}), 1_000).await.unwrap_err();
		assert!(matches!(err, ActorError::ActionNotFound(_)));
		assert_eq!(handle.metrics.snapshot().actions_failed, 1);
	}

	#[tokio::test]
	async fn reconnect_with_same_request_id_reattaches() {
		let kv: Arc<dyn KvDriver> = Arc::new(MemoryKvDriver::default());
		let handle =
			spawn("actor-3".to_string(), Arc::new(Counter), kv, Arc::new(NullEventSink), Value::Null, 10, 16, None)
				.await
				.unwrap();

		let first = handle.connect("req-1".to_string(), json!({})).await.unwrap();
		assert!(!first.reattached);
		let second = handle.connect("req-1".to_string(), json!({})).await.unwrap();
		assert!(second.reattached);
		assert_eq!(first.conn_id, second.conn_id);
	}

	#[test]
	fn step_access_guard_rejects_access_outside_a_step_and_allows_it_inside() {
		let guard = StepAccessGuard::new();
		assert!(guard.check("wf-1").is_err());
		{
			let _entered = guard.enter();
			assert!(guard.check("wf-1").is_ok());
		}
		assert!(guard.check("wf-1").is_err(), "guard must disarm once the handle drops");
	}
}
