//! Process-wide shared state: the connection manager, dispatcher, trace sink, and
//! actor registry every request handler and background task borrows. Grounded on
//! `pegboard-gateway/src/shared_state.rs`'s single `Arc<Inner>`-style state object
//! threaded through a hyper service, generalized here to an `Arc<AppState>` since
//! hostd has more than one owned subsystem to share.

use std::sync::Arc;

use gateway::{ConnectionManager, DispatcherConfig, ProtocolDispatcher};
use kv::MemoryKvDriver;
use trace::{TraceSink, TraceSinkConfig};

use crate::demo_actor::DemoActor;
use crate::registry::ActorRegistry;

pub struct AppState {
	pub config: Arc<config_rt::Config>,
	pub manager: ConnectionManager,
	pub dispatcher: ProtocolDispatcher,
	pub trace: TraceSink,
	pub registry: ActorRegistry<DemoActor>,
}

impl AppState {
	pub fn new(config: Arc<config_rt::Config>) -> Self {
		let manager = ConnectionManager::new(config.runtime.max_outgoing_message_size);
		let dispatcher = ProtocolDispatcher::new(DispatcherConfig {
			max_incoming_message_size: config.runtime.max_incoming_message_size,
			max_outgoing_message_size: config.runtime.max_outgoing_message_size,
			action_timeout_ms: config.runtime.action_timeout_ms,
		});

		let trace_kv: Arc<dyn kv::KvDriver> = Arc::new(MemoryKvDriver::new(config.runtime.worker_poll_interval_ms));
		let trace = TraceSink::new(
			trace_kv,
			TraceSinkConfig {
				max_active_spans: config.runtime.max_active_spans,
				max_read_limit: config.runtime.max_read_limit,
				max_chunk_bytes: config.runtime.max_chunk_bytes,
				..Default::default()
			},
			now_unix_ns(),
		);

		let registry = ActorRegistry::new(
			Arc::new(DemoActor),
			Arc::new(manager.clone()),
			config.runtime.max_hibernatable_conns,
			256,
			config.runtime.worker_poll_interval_ms,
		);

		Self { config, manager, dispatcher, trace, registry }
	}

	pub fn expose_internal(&self) -> bool {
		self.config.env.expose_internal_errors()
	}
}

fn now_unix_ns() -> i64 {
	std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_nanos() as i64).unwrap_or(0)
}
