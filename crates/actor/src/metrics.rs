//! In-process counters for one actor instance (§10.6 supplemental). No external metrics
//! backend is wired up here — that's an outer surface out of scope per §1 — but the
//! counters are plain atomics so a future exporter can read them without touching the
//! mailbox loop, the same shape `pegboard-gateway`'s metrics task reads off `AtomicU64`
//! fields rather than pushing through the hot path itself.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct ActorMetrics {
	pub actions_executed: AtomicU64,
	pub actions_failed: AtomicU64,
	pub connections_opened: AtomicU64,
	pub connections_reattached: AtomicU64,
	pub queue_messages_sent: AtomicU64,
	pub workflow_ticks: AtomicU64,
}

impl ActorMetrics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn snapshot(&self) -> ActorMetricsSnapshot {
		ActorMetricsSnapshot {
			actions_executed: self.actions_executed.load(Ordering::Relaxed),
			actions_failed: self.actions_failed.load(Ordering::Relaxed),
			connections_opened: self.connections_opened.load(Ordering::Relaxed),
			connections_reattached: self.connections_reattached.load(Ordering::Relaxed),
			queue_messages_sent: self.queue_messages_sent.load(Ordering::Relaxed),
			workflow_ticks: self.workflow_ticks.load(Ordering::Relaxed),
		}
	}

	pub(crate) fn incr(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActorMetricsSnapshot {
	pub actions_executed: u64,
	pub actions_failed: u64,
	pub connections_opened: u64,
	pub connections_reattached: u64,
	pub queue_messages_sent: u64,
	pub workflow_ticks: u64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn snapshot_reflects_recorded_counts() {
		let metrics = ActorMetrics::new();
		ActorMetrics::incr(&metrics.actions_executed);
		ActorMetrics::incr(&metrics.actions_executed);
		ActorMetrics::incr(&metrics.actions_failed);

		let snapshot = metrics.snapshot();
		assert_eq!(snapshot.actions_executed, 2);
		assert_eq!(snapshot.actions_failed, 1);
		assert_eq!(snapshot.connections_opened, 0);
	}
}
