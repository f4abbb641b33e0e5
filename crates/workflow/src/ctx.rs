//! `WorkflowCtx`: the user-facing surface for workflow primitives (§4.10.1).
//!
//! Grounded on `gasoline::ctx::workflow::WorkflowCtx` (`step`→`run_activity`,
//! `sleep`/`sleep_until`'s in-memory-vs-alarm threshold, `listen_with_timeout` composing
//! a sleep + listen, `repeat`/`loope` via a loop builder) with the addressing scheme
//! rebuilt against spec.md's explicit `Path`/name-registry model instead of gasoline's
//! cursor. `join`/`race` fork a child `WorkflowCtx` per branch and drive them as real
//! concurrent tasks (`tokio::spawn`), rather than recording an already-decided outcome,
//! so a `race` against a real timer actually races. See DESIGN.md for the full
//! grounding note.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use kv::{KvDriver, NameRegistry, Path, PathSegment};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::entry::{
	BranchStatus, Entry, EntryKind, EntryMetadata, EntryStatus, Message, SleepState,
};
use crate::error::{Suspend, WakeSource, WorkflowError, WorkflowResult};
use crate::store::WorkflowStore;

/// Outcome of one iteration of a `loope`/`repeat` body (§4.10.1).
pub enum Loop<T> {
	Continue,
	Break(T),
}

/// A branch's future, driving its own forked `WorkflowCtx` to completion and handing it
/// back so the caller can fold its newly-persisted entries into the parent (§4.10.1
/// `join`/`race`).
pub type BranchFuture = Pin<Box<dyn Future<Output = (WorkflowCtx, WorkflowResult<()>)> + Send>>;
pub type BranchFn = Box<dyn FnOnce(WorkflowCtx) -> BranchFuture + Send>;

type CompensateFuture = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;
type CompensateFn = Box<dyn FnOnce() -> CompensateFuture + Send>;

/// A rollback compensator bound at `step_with_rollback` declaration (§4.10.3), recorded
/// in execution order so a rollback walk can invoke them back to front.
struct Compensator {
	path: Path,
	run: CompensateFn,
}

/// Fires after any flush containing a history or metadata write (§4.10.6), letting an
/// optional inspector adapter publish a fresh snapshot.
pub type HistoryUpdatedHook = Arc<dyn Fn(&str) + Send + Sync>;

pub struct WorkflowCtx {
	pub workflow_id: String,
	store: Arc<WorkflowStore>,
	registry: Arc<Mutex<NameRegistry>>,
	entries: BTreeMap<Path, (Entry, EntryMetadata)>,
	/// Path segments contributed by enclosing scopes (loop iterations, join/race
	/// branches); primitives append exactly one more segment on top of this (§3.4).
	scope: Vec<PathSegment>,
	pending_names: Vec<(u32, String)>,
	now_ms: i64,
	max_step_attempts: u32,
	/// Compensators for steps completed so far in this run, oldest first.
	compensators: Vec<Compensator>,
	/// `compensators.len()` at each `rollback_checkpoint` call, so a rollback walk knows
	/// where to stop.
	checkpoint_marks: Vec<usize>,
	history_hook: Option<HistoryUpdatedHook>,
}

impl WorkflowCtx {
	pub async fn load(
		workflow_id: String,
		kv: Arc<dyn KvDriver>,
		now_ms: i64,
	) -> Result<Self, kv::KvError> {
		let store = Arc::new(WorkflowStore::new(kv));
		let registry = store.load_name_registry().await?;
		let entries = store.load_entries().await?;
		Ok(Self {
			workflow_id,
			store,
			registry: Arc::new(Mutex::new(registry)),
			entries,
			scope: Vec::new(),
			pending_names: Vec::new(),
			now_ms,
			max_step_attempts: 3,
			compensators: Vec::new(),
			checkpoint_marks: Vec::new(),
			history_hook: None,
		})
	}

	/// Registers the inspector hook described in §4.10.6. Replacing it mid-run is fine;
	/// there is no ordering requirement across calls.
	pub fn set_history_updated_hook(&mut self, hook: HistoryUpdatedHook) {
		self.history_hook = Some(hook);
	}

	async fn intern(&mut self, name: &str) -> u32 {
		let mut registry = self.registry.lock().await;
		let (idx, new) = registry.intern(name);
		if let Some((idx, name)) = new {
			// Persisted synchronously on next flush by the caller driving replay;
			// within one replay pass we only need the in-memory mapping to be stable.
			self.pending_names.push((idx, name));
		}
		idx
	}

	async fn path_for(&mut self, name: &str) -> Path {
		let idx = self.intern(name).await;
		let mut path = self.scope.clone();
		path.push(PathSegment::NameIndex(idx));
		path
	}

	fn entry_at(&self, path: &Path) -> Option<&(Entry, EntryMetadata)> {
		self.entries.get(path)
	}

	async fn persist(&mut self, entry: Entry, meta: EntryMetadata) -> WorkflowResult<()> {
		self.flush_pending_names().await?;
		self.store.persist_entry(&entry, &meta).await?;
		self.entries.insert(entry.location.clone(), (entry, meta));
		if let Some(hook) = &self.history_hook {
			hook(&self.workflow_id);
		}
		Ok(())
	}

	/// Durably records any name interned since the last flush. Primitives that touch
	/// the KV store without going through `persist` (message send/peek) must call this
	/// themselves, or a freshly loaded `WorkflowCtx` could assign a queue name a
	/// different index than a prior run did.
	async fn flush_pending_names(&mut self) -> WorkflowResult<()> {
		for (idx, name) in self.pending_names.drain(..) {
			self.store.persist_new_name(idx, &name).await?;
		}
		Ok(())
	}

	/// A child context scoped under `branch_path`, sharing this workflow's store and
	/// name registry so interning stays globally consistent even while branches run
	/// concurrently, but starting with its own empty compensator/checkpoint bookkeeping
	/// (a branch only rolls back its own steps).
	fn fork(&self, branch_path: Path) -> WorkflowCtx {
		WorkflowCtx {
			workflow_id: self.workflow_id.clone(),
			store: self.store.clone(),
			registry: self.registry.clone(),
			entries: self.entries.clone(),
			scope: branch_path,
			pending_names: Vec::new(),
			now_ms: self.now_ms,
			max_step_attempts: self.max_step_attempts,
			compensators: Vec::new(),
			checkpoint_marks: Vec::new(),
			history_hook: self.history_hook.clone(),
		}
	}

	/// Folds a finished branch's newly-persisted entries back into this context. Safe
	/// to call unconditionally: sibling branches write disjoint sub-paths, and a
	/// branch's view of pre-existing entries is identical to this context's own.
	fn merge(&mut self, child: WorkflowCtx) {
		self.entries.extend(child.entries);
	}

	async fn step_inner<F, Fut, T>(&mut self, name: &str, path: &Path, f: F) -> WorkflowResult<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, anyhow::Error>>,
		T: Serialize + DeserializeOwned,
	{
		if let Some((entry, meta)) = self.entry_at(path) {
			if meta.is_terminal() {
				return match (&entry.kind, meta.status) {
					(EntryKind::Step { output: Some(output), .. }, EntryStatus::Completed) => {
						Ok(serde_json::from_value(output.clone())?)
					}
					(EntryKind::Step { error: Some(error), .. }, _) => {
						Err(WorkflowError::StepExhausted {
							name: name.to_string(),
							attempts: meta.attempts,
							source: anyhow::anyhow!(error.clone()),
						})
					}
					_ => Err(WorkflowError::HistoryDiverged(path.clone())),
				};
			}
		}

		match f().await {
			Ok(value) => {
				let output = serde_json::to_value(&value)?;
				let mut meta = EntryMetadata::new(self.now_ms);
				meta.status = EntryStatus::Completed;
				meta.completed_at = Some(self.now_ms);
				meta.attempts = 1;
				let entry = Entry {
					id: uuid::Uuid::new_v4(),
					location: path.clone(),
					kind: EntryKind::Step { output: Some(output), error: None },
				};
				self.persist(entry, meta).await?;
				Ok(value)
			}
			Err(err) => {
				let attempts = self
					.entry_at(path)
					.map(|(_, m)| m.attempts + 1)
					.unwrap_or(1);
				let mut meta = EntryMetadata::new(self.now_ms);
				meta.attempts = attempts;
				meta.error = Some(err.to_string());
				meta.status = if attempts >= self.max_step_attempts {
					EntryStatus::Failed
				} else {
					EntryStatus::Pending
				};
				let entry = Entry {
					id: uuid::Uuid::new_v4(),
					location: path.clone(),
					kind: EntryKind::Step { output: None, error: Some(err.to_string()) },
				};
				self.persist(entry, meta).await?;

				if attempts >= self.max_step_attempts {
					if let Err(rollback_err) = self.run_rollback().await {
						return Err(rollback_err);
					}
					Err(WorkflowError::StepExhausted { name: name.to_string(), attempts, source: err })
				} else {
					Err(Suspend { location: path.clone(), wake: WakeSource::Immediate }.into())
				}
			}
		}
	}

	/// Runs `f`'s effect exactly once per distinct `name`, replaying the recorded
	/// output on subsequent runs (§4.10.1 `step`). `f` must be deterministic given its
	/// captured input — all non-determinism (time, randomness, I/O) belongs inside it.
	pub async fn step<F, Fut, T>(&mut self, name: &str, f: F) -> WorkflowResult<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, anyhow::Error>>,
		T: Serialize + DeserializeOwned,
	{
		let path = self.path_for(name).await;
		self.step_inner(name, &path, f).await
	}

	/// Like `step`, but binds `compensate` to the step's recorded output (§4.10.3): if a
	/// later step in this scope exhausts its attempts before the next
	/// `rollback_checkpoint`, `compensate` runs as part of the reverse-order rollback
	/// walk. Registered again on every replay, including cache hits, since the
	/// compensator list itself is in-memory-only bookkeeping for this run.
	pub async fn step_with_rollback<F, Fut, T, C, CFut>(
		&mut self,
		name: &str,
		f: F,
		compensate: C,
	) -> WorkflowResult<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, anyhow::Error>>,
		T: Serialize + DeserializeOwned + Clone + Send + 'static,
		C: FnOnce(T) -> CFut + Send + 'static,
		CFut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
	{
		let path = self.path_for(name).await;
		let value = self.step_inner(name, &path, f).await?;

		let compensate_value = value.clone();
		self.compensators.push(Compensator {
			path,
			run: Box::new(move || Box::pin(compensate(compensate_value)) as CompensateFuture),
		});

		Ok(value)
	}

	/// Always-succeeds marker recording a rollback boundary (§4.10.1). Always updates
	/// the in-memory checkpoint mark (it must be rebuilt every run), even though the
	/// persisted marker entry itself is only written once.
	pub async fn rollback_checkpoint(&mut self, name: &str) -> WorkflowResult<()> {
		self.checkpoint_marks.push(self.compensators.len());

		let path = self.path_for(name).await;
		if self.entry_at(&path).is_some() {
			return Ok(());
		}
		let mut meta = EntryMetadata::new(self.now_ms);
		meta.status = EntryStatus::Completed;
		meta.completed_at = Some(self.now_ms);
		let entry = Entry {
			id: uuid::Uuid::new_v4(),
			location: path,
			kind: EntryKind::RollbackCheckpoint { name: name.to_string() },
		};
		self.persist(entry, meta).await
	}

	/// Walks compensators back to the last `rollback_checkpoint` (or to the start of
	/// this scope if none was set), invoking each in reverse order and recording
	/// `rollbackCompletedAt`/`rollbackError` on its entry (§4.10.3). Stops and surfaces
	/// `WorkflowError::RollbackFailed` at the first compensator that errors.
	async fn run_rollback(&mut self) -> WorkflowResult<()> {
		let boundary = self.checkpoint_marks.last().copied().unwrap_or(0);

		while self.compensators.len() > boundary {
			let compensator = self.compensators.pop().expect("checked non-empty above");
			let outcome = (compensator.run)().await;

			let mut meta = self
				.entry_at(&compensator.path)
				.map(|(_, m)| m.clone())
				.unwrap_or_else(|| EntryMetadata::new(self.now_ms));
			let entry = self.entry_at(&compensator.path).map(|(e, _)| e.clone());

			match outcome {
				Ok(()) => {
					meta.rollback_completed_at = Some(self.now_ms);
					if let Some(entry) = entry {
						self.persist(entry, meta).await?;
					}
				}
				Err(err) => {
					meta.rollback_error = Some(err.to_string());
					if let Some(entry) = entry {
						self.persist(entry, meta).await?;
					}
					return Err(WorkflowError::RollbackFailed(runtime_error::WorkflowRollbackFailed {
						workflow_id: self.workflow_id.clone(),
						reason: err.to_string(),
					}));
				}
			}
		}

		Ok(())
	}

	/// Tombstones a name so future replays don't expect an entry there (§4.10.1).
	pub async fn removed(&mut self, name: &str, original_type: &str) -> WorkflowResult<()> {
		let path = self.path_for(name).await;
		if self.entry_at(&path).is_some() {
			return Ok(());
		}
		let mut meta = EntryMetadata::new(self.now_ms);
		meta.status = EntryStatus::Completed;
		meta.completed_at = Some(self.now_ms);
		let entry = Entry {
			id: uuid::Uuid::new_v4(),
			location: path,
			kind: EntryKind::Removed { original_type: original_type.to_string(), original_name: None },
		};
		self.persist(entry, meta).await
	}

	/// Sleeps are satisfied in-memory when shorter than `workerPollInterval`, else a
	/// persistent alarm is armed and the workflow suspends (§4.10.4).
	pub async fn sleep_until(&mut self, name: &str, deadline_ms: i64) -> WorkflowResult<()> {
		let path = self.path_for(name).await;

		let (deadline_ms, already_completed) = match self.entry_at(&path) {
			Some((entry, meta)) if meta.is_terminal() => {
				if let EntryKind::Sleep { deadline, .. } = &entry.kind {
					(*deadline, true)
				} else {
					return Err(WorkflowError::HistoryDiverged(path));
				}
			}
			_ => {
				let mut meta = EntryMetadata::new(self.now_ms);
				meta.status = EntryStatus::Running;
				let entry = Entry {
					id: uuid::Uuid::new_v4(),
					location: path.clone(),
					kind: EntryKind::Sleep { deadline: deadline_ms, state: SleepState::Pending },
				};
				self.persist(entry, meta).await?;
				(deadline_ms, false)
			}
		};

		if already_completed {
			return Ok(());
		}

		let remaining = deadline_ms - self.now_ms;
		let poll_interval_ms = self.store.kv.worker_poll_interval_ms() as i64;

		if remaining <= poll_interval_ms {
			// Satisfied in-memory: the caller (actor mailbox / worker tick) is expected
			// to await this directly rather than suspend the whole workflow.
			if remaining > 0 {
				tokio::time::sleep(Duration::from_millis(remaining as u64)).await;
			}
			let mut meta = EntryMetadata::new(self.now_ms);
			meta.status = EntryStatus::Completed;
			meta.completed_at = Some(self.now_ms);
			let entry = Entry {
				id: uuid::Uuid::new_v4(),
				location: path,
				kind: EntryKind::Sleep { deadline: deadline_ms, state: SleepState::Completed },
			};
			self.persist(entry, meta).await?;
			Ok(())
		} else {
			Err(Suspend { location: path, wake: WakeSource::Alarm { deadline_ms } }.into())
		}
	}

	pub async fn sleep(&mut self, name: &str, duration_ms: i64) -> WorkflowResult<()> {
		self.sleep_until(name, self.now_ms + duration_ms).await
	}

	/// Consumes up to `limit` messages named `msg_name` from this workflow's own
	/// message queue, recording a `Message` entry per consumed message (§4.10.5).
	pub async fn listen_n(
		&mut self,
		name: &str,
		msg_name: &str,
		limit: usize,
	) -> WorkflowResult<Vec<Value>> {
		let path = self.path_for(name).await;

		// Replay fast-path only covers the common `limit == 1` case (plain `listen`);
		// replaying a `listenN` with limit > 1 re-consumes from the queue below, which
		// is safe because already-consumed messages were deleted on the prior run.
		if limit == 1 {
			if let Some((entry, meta)) = self.entry_at(&path) {
				if meta.is_terminal() {
					if let EntryKind::Message { data, .. } = &entry.kind {
						return Ok(vec![data.clone()]);
					}
				}
			}
		}

		let queue_idx = self.intern(msg_name).await;
		self.flush_pending_names().await?;
		let mut messages = self.store.load_messages(queue_idx as u64).await?;
		messages.truncate(limit);

		if messages.is_empty() {
			return Err(Suspend {
				location: path,
				wake: WakeSource::Message { names: vec![msg_name.to_string()] },
			}
			.into());
		}

		let mut out = Vec::with_capacity(messages.len());
		for (i, (seq, message)) in messages.into_iter().enumerate() {
			let seq_path = {
				let mut p = path.clone();
				if i > 0 {
					p.push(PathSegment::NameIndex(i as u32));
				}
				p
			};
			let mut meta = EntryMetadata::new(self.now_ms);
			meta.status = EntryStatus::Completed;
			meta.completed_at = Some(self.now_ms);
			let entry = Entry {
				id: message.id,
				location: seq_path,
				kind: EntryKind::Message { name: msg_name.to_string(), data: message.data.clone() },
			};
			self.persist(entry, meta).await?;
			// At-least-once (§4.10.5): if this delete never completes (crash), the
			// message is simply redelivered and re-recorded on the next replay, since
			// the entry lookup above only short-circuits for `limit == 1`.
			self.store.delete_message(queue_idx as u64, seq).await?;
			out.push(message.data);
		}

		Ok(out)
	}

	pub async fn listen(&mut self, name: &str, msg_name: &str) -> WorkflowResult<Value> {
		let mut out = self.listen_n(name, msg_name, 1).await?;
		let path = self.path_for(name).await;
		out.pop().ok_or(WorkflowError::HistoryDiverged(path))
	}

	/// `listenN` bounded by a deadline: resolves to an empty vec if no message arrives
	/// in time, modeled as a sleep entry followed by a listen entry (§4.10.1 table).
	pub async fn listen_n_until(
		&mut self,
		name: &str,
		msg_name: &str,
		deadline_ms: i64,
		limit: usize,
	) -> WorkflowResult<Vec<Value>> {
		match self.listen_n(name, msg_name, limit).await {
			Ok(out) => Ok(out),
			Err(WorkflowError::Suspend(suspend)) => {
				if self.now_ms >= deadline_ms {
					Ok(Vec::new())
				} else {
					Err(suspend.into())
				}
			}
			Err(other) => Err(other),
		}
	}

	pub async fn listen_n_with_timeout(
		&mut self,
		name: &str,
		msg_name: &str,
		timeout_ms: i64,
		limit: usize,
	) -> WorkflowResult<Vec<Value>> {
		self.listen_n_until(name, msg_name, self.now_ms + timeout_ms, limit).await
	}

	pub async fn listen_until(
		&mut self,
		name: &str,
		msg_name: &str,
		deadline_ms: i64,
	) -> WorkflowResult<Option<Value>> {
		let mut out = self.listen_n_until(name, msg_name, deadline_ms, 1).await?;
		Ok(out.pop())
	}

	pub async fn listen_with_timeout(
		&mut self,
		name: &str,
		msg_name: &str,
		timeout_ms: i64,
	) -> WorkflowResult<Option<Value>> {
		self.listen_until(name, msg_name, self.now_ms + timeout_ms).await
	}

	/// Non-consuming view into a message queue, for debugging/inspection (§4.10.5).
	pub async fn peek_messages(&mut self, msg_name: &str, limit: usize) -> WorkflowResult<Vec<Value>> {
		let queue_idx = self.intern(msg_name).await;
		self.flush_pending_names().await?;
		let mut messages = self.store.load_messages(queue_idx as u64).await?;
		messages.truncate(limit);
		Ok(messages.into_iter().map(|(_, m)| m.data).collect())
	}

	/// Enqueues a message into this workflow's own durable queue (§4.10.5).
	pub async fn send_message(&mut self, queue_name: &str, data: Value) -> WorkflowResult<()> {
		let queue_idx = self.intern(queue_name).await as u64;
		self.flush_pending_names().await?;
		// `seq` must stay monotonic even after older messages are deleted on
		// consumption, so the next slot is derived from the highest seq still present
		// rather than the queue's current length.
		let existing = self.store.load_messages(queue_idx).await?;
		let seq = existing.iter().map(|(seq, _)| *seq + 1).max().unwrap_or(0);
		let message = Message {
			id: uuid::Uuid::new_v4(),
			name: queue_name.to_string(),
			data,
			sent_at: self.now_ms,
		};
		self.store.append_message(queue_idx, seq, &message).await?;
		Ok(())
	}

	/// Runs `body` repeatedly, threading `state` across iterations, each indexed into
	/// the `Path` via `LoopIterationMarker` (§4.10.1). `name` identifies the loop itself.
	pub async fn loope<S, F, Fut, T>(&mut self, name: &str, mut state: S, mut body: F) -> WorkflowResult<T>
	where
		S: Serialize + DeserializeOwned + Clone,
		F: FnMut(&mut WorkflowCtx, &mut S) -> Fut,
		Fut: Future<Output = WorkflowResult<Loop<T>>>,
		T: Serialize + DeserializeOwned,
	{
		let loop_idx = self.intern(name).await;
		let outer_path = {
			let mut p = self.scope.clone();
			p.push(PathSegment::NameIndex(loop_idx));
			p
		};

		if let Some((entry, meta)) = self.entry_at(&outer_path) {
			if meta.is_terminal() {
				if let EntryKind::Loop { output: Some(output), .. } = &entry.kind {
					return Ok(serde_json::from_value(output.clone())?);
				}
			}
			if let EntryKind::Loop { state: persisted, .. } = &entry.kind {
				state = serde_json::from_value(persisted.clone())?;
			}
		}

		let mut iteration: u32 = self
			.entry_at(&outer_path)
			.and_then(|(e, _)| if let EntryKind::Loop { iteration, .. } = &e.kind { Some(*iteration) } else { None })
			.unwrap_or(0);

		loop {
			self.scope.push(PathSegment::LoopIterationMarker { loop_name_index: loop_idx, iteration });
			let result = body(self, &mut state).await;
			self.scope.pop();

			let state_value = serde_json::to_value(&state)?;
			match result {
				Ok(Loop::Continue) => {
					let mut meta = EntryMetadata::new(self.now_ms);
					meta.status = EntryStatus::Running;
					let entry = Entry {
						id: uuid::Uuid::new_v4(),
						location: outer_path.clone(),
						kind: EntryKind::Loop { state: state_value, iteration: iteration + 1, output: None },
					};
					self.persist(entry, meta).await?;
					iteration += 1;
				}
				Ok(Loop::Break(out)) => {
					let output = serde_json::to_value(&out)?;
					let mut meta = EntryMetadata::new(self.now_ms);
					meta.status = EntryStatus::Completed;
					meta.completed_at = Some(self.now_ms);
					let entry = Entry {
						id: uuid::Uuid::new_v4(),
						location: outer_path,
						kind: EntryKind::Loop { state: state_value, iteration, output: Some(output) },
					};
					self.persist(entry, meta).await?;
					return Ok(out);
				}
				Err(err) => return Err(err),
			}
		}
	}

	/// Every branch must complete; if any fails, the others are treated as cancelled
	/// and the join fails as a whole (§4.10.1). Each branch runs as its own concurrent
	/// task against a forked `WorkflowCtx` scoped under a `BranchMarker` path segment,
	/// so branches genuinely interleave rather than running one after another.
	pub async fn join(
		&mut self,
		name: &str,
		branches: Vec<(String, BranchFn)>,
	) -> WorkflowResult<BTreeMap<String, BranchStatus>> {
		let join_idx = self.intern(name).await;
		let path = {
			let mut p = self.scope.clone();
			p.push(PathSegment::NameIndex(join_idx));
			p
		};

		if let Some((entry, meta)) = self.entry_at(&path) {
			if meta.is_terminal() {
				if let EntryKind::Join { branches } = &entry.kind {
					return Ok(branches.clone());
				}
			}
		}

		let mut handles = Vec::with_capacity(branches.len());
		for (branch_name, run) in branches {
			let branch_idx = self.intern(&branch_name).await;
			let mut branch_path = self.scope.clone();
			branch_path.push(PathSegment::BranchMarker { join_name_index: join_idx, branch_name_index: branch_idx });
			let child = self.fork(branch_path);
			handles.push((branch_name, tokio::spawn(run(child))));
		}

		let mut statuses = BTreeMap::new();
		let mut first_suspend: Option<Suspend> = None;
		let mut hard_failure = false;

		for (branch_name, handle) in handles {
			match handle.await {
				Ok((child, Ok(()))) => {
					self.merge(child);
					statuses.insert(branch_name, BranchStatus::Completed);
				}
				Ok((child, Err(WorkflowError::Suspend(suspend)))) => {
					self.merge(child);
					if first_suspend.is_none() {
						first_suspend = Some(suspend);
					}
					statuses.insert(branch_name, BranchStatus::Pending);
				}
				Ok((child, Err(_other))) => {
					self.merge(child);
					hard_failure = true;
					statuses.insert(branch_name, BranchStatus::Failed);
				}
				Err(join_err) => {
					hard_failure = true;
					statuses.insert(branch_name.clone(), BranchStatus::Failed);
					tracing::warn!(%join_err, branch = %branch_name, "join branch task panicked");
				}
			}
		}

		// A branch still waiting on a real wake source takes priority over recording a
		// terminal join outcome: the whole join isn't done yet, so there is nothing to
		// persist until that branch resolves on a future replay.
		if !hard_failure {
			if let Some(suspend) = first_suspend {
				return Err(suspend.into());
			}
		}

		let mut meta = EntryMetadata::new(self.now_ms);
		meta.status = if hard_failure { EntryStatus::Failed } else { EntryStatus::Completed };
		meta.completed_at = Some(self.now_ms);
		if hard_failure {
			meta.error = Some(format!("join `{name}` had a failed branch"));
		}
		let entry = Entry { id: uuid::Uuid::new_v4(), location: path, kind: EntryKind::Join { branches: statuses.clone() } };
		self.persist(entry, meta).await?;

		if hard_failure {
			Err(WorkflowError::StepExhausted {
				name: name.to_string(),
				attempts: 1,
				source: anyhow::anyhow!("join `{name}` had a failed branch"),
			})
		} else {
			Ok(statuses)
		}
	}

	/// First branch to complete wins; the rest are aborted (not merely marked pending)
	/// as soon as the winner resolves (§4.10.1, scenario S6), so a `race` against a real
	/// timer actually completes as soon as the faster branch does instead of waiting for
	/// both.
	pub async fn race(&mut self, name: &str, branches: Vec<(String, BranchFn)>) -> WorkflowResult<String> {
		let join_idx = self.intern(name).await;
		let path = {
			let mut p = self.scope.clone();
			p.push(PathSegment::NameIndex(join_idx));
			p
		};

		if let Some((entry, meta)) = self.entry_at(&path) {
			if meta.is_terminal() {
				if let EntryKind::Race { winner: Some(winner), .. } = &entry.kind {
					return Ok(winner.clone());
				}
			}
		}

		let mut handles = Vec::with_capacity(branches.len());
		let mut names = Vec::with_capacity(branches.len());
		for (branch_name, run) in branches {
			let branch_idx = self.intern(&branch_name).await;
			let mut branch_path = self.scope.clone();
			branch_path.push(PathSegment::BranchMarker { join_name_index: join_idx, branch_name_index: branch_idx });
			let child = self.fork(branch_path);
			names.push(branch_name);
			handles.push(tokio::spawn(run(child)));
		}

		let (result, winner_idx, remaining) = futures_util::future::select_all(handles).await;
		for handle in remaining {
			handle.abort();
		}

		let winner = names.remove(winner_idx);
		let mut statuses: BTreeMap<String, BranchStatus> =
			names.into_iter().map(|b| (b, BranchStatus::Pending)).collect();

		match result {
			Ok((child, outcome)) => {
				self.merge(child);
				statuses.insert(winner.clone(), if outcome.is_ok() { BranchStatus::Completed } else { BranchStatus::Failed });
			}
			Err(join_err) => {
				tracing::warn!(%join_err, branch = %winner, "race winner task panicked");
				statuses.insert(winner.clone(), BranchStatus::Failed);
			}
		}

		let mut meta = EntryMetadata::new(self.now_ms);
		meta.status = EntryStatus::Completed;
		meta.completed_at = Some(self.now_ms);
		let entry = Entry {
			id: uuid::Uuid::new_v4(),
			location: path,
			kind: EntryKind::Race { winner: Some(winner.clone()), branches: statuses },
		};
		self.persist(entry, meta).await?;
		Ok(winner)
	}
}
