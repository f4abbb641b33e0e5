//! Replay driver and poll loop.
//!
//! Grounded on `gasoline::worker::Worker` (`tokio::select!` over a tick interval, a
//! progress-pinged graceful shutdown) and `WorkflowCtx::run`'s retry-with-backoff
//! commit loop. The addressing/suspend model is spec.md's rather than gasoline's; see
//! `ctx.rs` and DESIGN.md.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kv::KvDriver;
use tokio::sync::watch;

use crate::ctx::WorkflowCtx;
use crate::error::{WorkflowError, WorkflowResult};

const SHUTDOWN_PROGRESS_INTERVAL: Duration = Duration::from_secs(7);

/// A user-supplied workflow body: drives `ctx` to completion or suspension.
pub type WorkflowFn =
	Arc<dyn Fn(&mut WorkflowCtx) -> futures_util::future::BoxFuture<'_, WorkflowResult<serde_json::Value>> + Send + Sync>;

/// Drives one workflow instance through the replay loop described in §4.10.2: load,
/// run the user function from the top, and either complete, fail, or suspend.
pub async fn advance(
	workflow_id: String,
	kv: Arc<dyn KvDriver>,
	now_ms: i64,
	body: WorkflowFn,
) -> WorkflowResult<Advance> {
	let mut ctx = WorkflowCtx::load(workflow_id, kv, now_ms).await?;

	match body(&mut ctx).await {
		Ok(output) => Ok(Advance::Completed(output)),
		Err(WorkflowError::Suspend(suspend)) => Ok(Advance::Suspended(suspend)),
		Err(other) => Err(other),
	}
}

#[derive(Debug)]
pub enum Advance {
	Completed(serde_json::Value),
	Suspended(crate::error::Suspend),
}

/// Polls registered workflow instances and advances each on a fixed interval or on an
/// explicit wake, mirroring `gasoline::Worker`'s tick loop. One instance runs at a
/// time here (this system's single-process model; see DESIGN.md), unlike gasoline's
/// fleet of concurrently-ticked workflows across a shared database.
pub struct Worker {
	tick_interval: Duration,
	running: HashMap<String, tokio::task::JoinHandle<()>>,
}

impl Worker {
	pub fn new(tick_interval: Duration) -> Self {
		Self { tick_interval, running: HashMap::new() }
	}

	/// Runs until `shutdown_rx` fires, pinging progress every
	/// `SHUTDOWN_PROGRESS_INTERVAL` while draining in-flight workflow tasks, same
	/// shape as `gasoline::Worker::shutdown`.
	pub async fn start<F>(mut self, mut shutdown_rx: watch::Receiver<()>, mut poll: F)
	where
		F: FnMut() + Send,
	{
		let mut tick = tokio::time::interval(self.tick_interval);
		tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		loop {
			tokio::select! {
				_ = tick.tick() => {
					poll();
				}
				res = shutdown_rx.changed() => {
					if res.is_err() {
						continue;
					}
					break;
				}
			}
		}

		self.shutdown().await;
	}

	async fn shutdown(&mut self) {
		let mut progress = tokio::time::interval(SHUTDOWN_PROGRESS_INTERVAL);
		progress.tick().await;

		while !self.running.is_empty() {
			self.running.retain(|_, handle| !handle.is_finished());
			if self.running.is_empty() {
				break;
			}
			tokio::select! {
				_ = progress.tick() => {
					tracing::info!(remaining = self.running.len(), "workflow worker still shutting down");
				}
				_ = tokio::time::sleep(Duration::from_millis(50)) => {}
			}
		}
	}
}
