//! Cross-actor alarm-wake dispatch loop (§4.7: "when the alarm fires, the actor is
//! loaded if asleep and the scheduled handler is invoked in mailbox order"). Polls
//! every live actor's own `KvDriver` for armed alarms and fires the matching mailbox
//! command, then clears the alarm.
//!
//! `MemoryKvDriver::alarms()` is a test-only helper — a generic alarm-listing
//! operation isn't part of the `KvDriver` trait, since the real storage backend that
//! would offer one is out of scope per §1 — so this loop is necessarily written
//! against `MemoryKvDriver` concretely rather than `dyn KvDriver`.

use std::sync::Arc;
use std::time::Duration;

use kv::KvDriver;

use crate::app::AppState;

pub async fn run(state: Arc<AppState>) {
	let mut tick = tokio::time::interval(Duration::from_millis(state.config.runtime.worker_poll_interval_ms.max(50)));
	loop {
		tick.tick().await;
		let now = now_ms();

		for (actor_id, kv) in state.registry.snapshot_kv_drivers().await {
			for (alarm_id, wake_at_ms) in kv.alarms() {
				if wake_at_ms > now {
					continue;
				}

				let Some(handle) = state.registry.get(&actor_id).await else { continue };
				// Alarm ids are `"{actor_id}:{name}"` (`actor::instance::alarm_id`).
				let name = alarm_id.rsplit(':').next().unwrap_or(&alarm_id).to_string();

				if let Err(err) = handle.fire_scheduled(name).await {
					tracing::warn!(%err, actor_id, "failed to fire scheduled alarm");
				}
				if let Err(err) = handle.tick_workflow().await {
					tracing::warn!(%err, actor_id, "failed to tick hosted workflow on alarm wake");
				}
				if let Err(err) = kv.clear_alarm(&alarm_id).await {
					tracing::warn!(%err, actor_id, "failed to clear fired alarm");
				}
			}
		}
	}
}

fn now_ms() -> i64 {
	std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}
