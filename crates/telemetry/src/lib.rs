//! Logging bootstrap.
//!
//! Grounded on the teacher's `rivet-runtime` initialization (a `tracing-subscriber`
//! registry fed either `tracing-logfmt` or the built-in pretty formatter, selected by
//! an env var) and `gasoline`'s pervasive `#[tracing::instrument(skip_all)]` usage on
//! worker/step functions, which this crate's callers are expected to follow.

use tracing_subscriber::{prelude::*, EnvFilter};

/// Output format for process logs, selected via `RIVET_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
	/// `key=value` pairs, one line per event — handy for log aggregation.
	Logfmt,
	/// Human-oriented multi-line output — the default, favoring local development.
	Pretty,
}

impl LogFormat {
	pub fn from_env() -> Self {
		match std::env::var("RIVET_LOG_FORMAT").as_deref() {
			Ok("logfmt") => LogFormat::Logfmt,
			_ => LogFormat::Pretty,
		}
	}
}

/// Installs the global `tracing` subscriber. Call once at process start, before any
/// actor, workflow, or connection is created.
pub fn init() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	match LogFormat::from_env() {
		LogFormat::Logfmt => {
			tracing_subscriber::registry()
				.with(filter)
				.with(tracing_logfmt::layer())
				.init();
		}
		LogFormat::Pretty => {
			tracing_subscriber::registry()
				.with(filter)
				.with(tracing_subscriber::fmt::layer().pretty())
				.init();
		}
	}
}

/// Span field names used consistently across the actor/workflow/gateway crates, so
/// log aggregation can group on them regardless of which component emitted the event.
pub mod fields {
	pub const ACTOR_ID: &str = "actor_id";
	pub const CONNECTION_ID: &str = "connection_id";
	pub const WORKFLOW_ID: &str = "workflow_id";
	pub const REQUEST_ID: &str = "request_id";
}

#[cfg(test)]
mod tests {
	use super::*;

	// `RIVET_LOG_FORMAT` is process-global, so these run serially within this module
	// rather than racing other tests via `std::env::set_var`.
	#[test]
	fn defaults_to_pretty_when_unset_or_unrecognized() {
		std::env::remove_var("RIVET_LOG_FORMAT");
		assert_eq!(LogFormat::from_env(), LogFormat::Pretty);

		std::env::set_var("RIVET_LOG_FORMAT", "nonsense");
		assert_eq!(LogFormat::from_env(), LogFormat::Pretty);

		std::env::set_var("RIVET_LOG_FORMAT", "logfmt");
		assert_eq!(LogFormat::from_env(), LogFormat::Logfmt);

		std::env::remove_var("RIVET_LOG_FORMAT");
	}
}
