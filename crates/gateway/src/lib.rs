//! Multi-transport connection protocol (§3.2–§3.3, §4.5–§4.6, §6): path parsing,
//! per-connection state machine, the connection registry + broadcast fan-out, and the
//! protocol dispatcher that ties frames to actor actions.

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod path;

pub use connection::{Connection, ReadyState, Transport, TransportKind};
pub use dispatcher::{DispatcherConfig, ProtocolDispatcher};
pub use error::{GatewayError, GatewayResult};
pub use manager::ConnectionManager;
pub use metrics::{GatewayMetrics, GatewayMetricsSnapshot};
pub use path::{parse_actor_path, ActorPathInfo};
