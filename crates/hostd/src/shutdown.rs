//! Graceful shutdown for the standalone host process (§10.6 supplemental): stop every
//! live actor's mailbox within a bounded grace period rather than dropping in-flight
//! work on ctrl-c. Grounded on `workflow::worker::Worker::shutdown`'s progress-ping +
//! bounded-drain shape, fanned out here across every actor this process hosts instead
//! of one workflow worker's task set.

use std::sync::Arc;
use std::time::Duration;

use crate::app::AppState;

const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Stops every spawned actor's mailbox, waiting up to `GRACE_PERIOD` for in-flight
/// commands to drain. Actors that don't stop in time are left to the process exit.
pub async fn drain(state: Arc<AppState>) {
	let handles = state.registry.snapshot_handles().await;
	tracing::info!(actor_count = handles.len(), "draining actors before shutdown");

	let stops = handles.into_iter().map(|handle| async move {
		if let Err(err) = handle.stop().await {
			tracing::warn!(%err, actor_id = %handle.actor_id, "actor did not stop cleanly");
		}
	});

	match tokio::time::timeout(GRACE_PERIOD, futures_util::future::join_all(stops)).await {
		Ok(_) => tracing::info!("all actors drained"),
		Err(_) => tracing::warn!("shutdown grace period elapsed with actors still draining"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn drain_stops_every_spawned_actor() {
		let state = Arc::new(AppState::new(config_rt::Config::for_test()));
		state.registry.get_or_spawn("actor-shutdown-1").await.unwrap();
		state.registry.get_or_spawn("actor-shutdown-2").await.unwrap();

		drain(state.clone()).await;

		assert!(state.registry.get("actor-shutdown-1").await.unwrap().execute("echo".to_string(), serde_json::json!({}), 100).await.is_err());
	}
}
