//! Periodic `SpanSnapshot` emission (§4.11: "periodic `SpanSnapshot` records bound
//! read cost for long-lived spans"). `TraceSink::snapshot_all` is span-count-agnostic
//! and cheap when nothing is active, so a fixed interval independent of any
//! individual span's lifecycle is sufficient.

use std::sync::Arc;
use std::time::Duration;

use crate::app::AppState;

const SNAPSHOT_INTERVAL_SECS: u64 = 30;

pub async fn run(state: Arc<AppState>) {
	let mut tick = tokio::time::interval(Duration::from_secs(SNAPSHOT_INTERVAL_SECS));
	loop {
		tick.tick().await;
		if let Err(err) = state.trace.snapshot_all(now_unix_ns()).await {
			tracing::warn!(%err, "periodic trace snapshot failed");
		}
	}
}

fn now_unix_ns() -> i64 {
	std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_nanos() as i64).unwrap_or(0)
}
