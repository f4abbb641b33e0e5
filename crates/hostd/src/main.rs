//! Standalone binary hosting the actor gateway over HTTP/WebSocket (§1, §6). Grounded
//! on `rivet-engine`'s `main.rs` shape (`clap::Parser` CLI → load config → init telemetry
//! → run), simplified to a single bind-and-serve command since this binary has one job
//! rather than `rivet-engine`'s subcommand dispatch table.

mod alarm;
mod app;
mod demo_actor;
mod http;
mod registry;
mod shutdown;
mod trace_snapshot;
mod transport;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::app::AppState;

#[derive(Parser)]
#[command(name = "hostd", version, about = "Actor runtime gateway")]
struct Cli {
	/// Path to a JSON5 config file overlaying the built-in defaults.
	#[arg(long)]
	config: Option<PathBuf>,

	/// Address to bind the HTTP/WebSocket listener on.
	#[arg(long, default_value = "0.0.0.0:8080")]
	bind: SocketAddr,
}

fn main() -> Result<()> {
	let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
	runtime.block_on(run())
}

async fn run() -> Result<()> {
	telemetry::init();

	let cli = Cli::parse();
	let config = config_rt::Config::load(cli.config.as_deref())?;
	tracing::info!(bind = %cli.bind, runtime = ?config.runtime, "starting hostd");

	let state = Arc::new(AppState::new(config));

	tokio::spawn(alarm::run(state.clone()));
	tokio::spawn(trace_snapshot::run(state.clone()));

	let listener = TcpListener::bind(cli.bind).await?;
	tracing::info!(addr = %cli.bind, "listening");

	loop {
		tokio::select! {
			accepted = listener.accept() => {
				let (stream, peer_addr) = accepted?;
				let state = state.clone();
				tokio::spawn(async move {
					let io = TokioIo::new(stream);
					let service = service_fn(move |req| {
						let state = state.clone();
						async move { http::handle(state, req).await }
					});
					if let Err(err) = hyper::server::conn::http1::Builder::new()
						.serve_connection(io, service)
						.with_upgrades()
						.await
					{
						tracing::debug!(%err, %peer_addr, "connection closed with an error");
					}
				});
			}
			_ = tokio::signal::ctrl_c() => {
				tracing::info!("received ctrl-c, draining before shutdown");
				shutdown::drain(state.clone()).await;
				break;
			}
		}
	}

	Ok(())
}
