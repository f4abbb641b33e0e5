//! Process-wide configuration record.
//!
//! Modeled on the teacher's `rivet-config`: a layered config (defaults, then an
//! optional JSON5 file, then environment variables) loaded once into an `Arc<Config>`
//! at process start. Per spec §9 ("global module-level state... forbid runtime
//! mutation after first actor load"), nothing here is mutated after `Config::load`
//! returns; callers clone the `Arc`.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Tunables named throughout the component spec as "configurable" without a mandated
/// default. Defaults below are this implementation's Open Question decisions; see
/// DESIGN.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Runtime {
	/// §4.1 — frames larger than this from a client fail with `IncomingMessageTooLong`.
	pub max_incoming_message_size: usize,
	/// §4.1 — frames larger than this to a client fail with `OutgoingMessageTooLong`.
	pub max_outgoing_message_size: usize,
	/// §5 — implicit deadline for action invocation.
	pub action_timeout_ms: u64,
	/// §4.8 — idle duration before an actor hibernates.
	pub hibernation_idle_ms: u64,
	/// §4.8 — cap on `hibernatableConns` per actor; LRU-evicted on overflow.
	pub max_hibernatable_conns: usize,
	/// §4.2/§4.10.4 — threshold between in-memory and alarm-driven sleeps.
	pub worker_poll_interval_ms: u64,
	/// §4.11 — spans beyond this are dropped depth-first.
	pub max_active_spans: usize,
	/// §4.11 — hard ceiling on `readRange` result size regardless of caller's limit.
	pub max_read_limit: usize,
	/// §4.11 — a single span record larger than this is rejected at write time.
	pub max_chunk_bytes: usize,
	/// §5 — per-connection send queue bound before `BackpressureOverflow`.
	pub backpressure_queue_capacity: usize,
}

impl Default for Runtime {
	fn default() -> Self {
		Self {
			max_incoming_message_size: 4 * 1024 * 1024,
			max_outgoing_message_size: 4 * 1024 * 1024,
			action_timeout_ms: 30_000,
			hibernation_idle_ms: 30_000,
			max_hibernatable_conns: 100,
			worker_poll_interval_ms: 1_500,
			max_active_spans: 1_000,
			max_read_limit: 10_000,
			max_chunk_bytes: 512 * 1024,
			backpressure_queue_capacity: 1_024,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Env {
	/// `RIVET_EXPOSE_ERRORS` — expose internal error messages verbatim.
	pub rivet_expose_errors: bool,
	/// `NODE_ENV` — treated as an alias; `development` implies expose-errors.
	pub node_env: Option<String>,
	/// `RIVET_STORAGE_PATH` — default KV directory when running standalone.
	pub rivet_storage_path: Option<String>,
	pub rivet_endpoint: Option<String>,
	pub rivet_namespace: Option<String>,
	pub rivet_token: Option<String>,
}

impl Env {
	/// §7 propagation policy: internal messages are opaque unless expose-errors is set.
	pub fn expose_internal_errors(&self) -> bool {
		self.rivet_expose_errors || self.node_env.as_deref() == Some("development")
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
	pub runtime: Runtime,
	pub env: Env,
}

impl Config {
	/// Builds the layered config: built-in defaults, an optional JSON5 file at
	/// `path`, then environment variables (`RIVET_*`, `NODE_ENV`), matching the
	/// precedence order `rivet-config` uses.
	pub fn load(path: Option<&std::path::Path>) -> Result<Arc<Config>> {
		let mut builder = ::config::Config::builder()
			.add_source(::config::Config::try_from(&Config::default())?);

		if let Some(path) = path {
			if path.exists() {
				let raw = std::fs::read_to_string(path)
					.with_context(|| format!("reading config file {}", path.display()))?;
				let value: serde_json::Value =
					json5::from_str(&raw).context("parsing config file as JSON5")?;
				builder = builder.add_source(::config::File::from_str(
					&value.to_string(),
					::config::FileFormat::Json,
				));
			}
		}

		let built = builder.build().context("building layered config")?;
		let mut cfg: Config = built.try_deserialize().context("deserializing config")?;

		cfg.env.rivet_expose_errors = env_bool("RIVET_EXPOSE_ERRORS").unwrap_or(cfg.env.rivet_expose_errors);
		cfg.env.node_env = std::env::var("NODE_ENV").ok().or(cfg.env.node_env);
		cfg.env.rivet_storage_path = std::env::var("RIVET_STORAGE_PATH").ok().or(cfg.env.rivet_storage_path);
		cfg.env.rivet_endpoint = std::env::var("RIVET_ENDPOINT").ok().or(cfg.env.rivet_endpoint);
		cfg.env.rivet_namespace = std::env::var("RIVET_NAMESPACE").ok().or(cfg.env.rivet_namespace);
		cfg.env.rivet_token = std::env::var("RIVET_TOKEN").ok().or(cfg.env.rivet_token);

		Ok(Arc::new(cfg))
	}

	/// A default config with no file or environment overlay, for tests.
	pub fn for_test() -> Arc<Config> {
		Arc::new(Config::default())
	}
}

fn env_bool(key: &str) -> Option<bool> {
	std::env::var(key).ok().map(|v| {
		matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_sane() {
		let cfg = Config::default();
		assert!(cfg.runtime.max_incoming_message_size > 0);
		assert!(cfg.runtime.max_hibernatable_conns > 0);
		assert!(!cfg.env.expose_internal_errors());
	}

	#[test]
	fn development_node_env_implies_expose() {
		let env = Env {
			node_env: Some("development".into()),
			..Default::default()
		};
		assert!(env.expose_internal_errors());
	}

	#[test]
	fn load_with_no_file_falls_back_to_defaults() {
		let cfg = Config::load(None).unwrap();
		assert_eq!(cfg.runtime.worker_poll_interval_ms, Runtime::default().worker_poll_interval_ms);
	}
}
