//! In-process counters for the connection manager (§10.6 supplemental), the same shape
//! `pegboard-gateway` exposes for tunnel ping duration / route cache size — plain
//! atomics, no external metrics backend wired up.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct GatewayMetrics {
	pub connections_opened: AtomicU64,
	pub connections_closed: AtomicU64,
	pub frames_sent: AtomicU64,
	pub broadcasts_dropped: AtomicU64,
}

impl GatewayMetrics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn snapshot(&self) -> GatewayMetricsSnapshot {
		GatewayMetricsSnapshot {
			connections_opened: self.connections_opened.load(Ordering::Relaxed),
			connections_closed: self.connections_closed.load(Ordering::Relaxed),
			frames_sent: self.frames_sent.load(Ordering::Relaxed),
			broadcasts_dropped: self.broadcasts_dropped.load(Ordering::Relaxed),
		}
	}

	pub(crate) fn incr(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GatewayMetricsSnapshot {
	pub connections_opened: u64,
	pub connections_closed: u64,
	pub frames_sent: u64,
	pub broadcasts_dropped: u64,
}
