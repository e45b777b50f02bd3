//! MeshSentinel node entry point.
//!
//! Wires up the process-lifetime device identifier, loads configuration,
//! and spawns the seven concurrently running components described in
//! `SPEC_FULL.md` §2: Link Registry (in-process, shared), Announcer,
//! Discovery Listener, Keepalive, Subnet Scanner, Reaper, Transport, and
//! the HTTP surface. Only a bind failure on a listening socket is fatal;
//! every other background task logs and continues per the error taxonomy
//! in §7.

use anyhow::Result;
use clap::Parser;
use meshsentinel::config::AppConfig;
use meshsentinel::error::NodeError;
use meshsentinel::http::{self, AppState};
use meshsentinel::mesh::{discovery, keepalive, reaper, transport, MeshHandle};
use meshsentinel::{cluster, device};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// MeshSentinel: offline-first peer-to-peer community safety alert mesh node
#[derive(Parser, Debug)]
#[command(name = "meshsentinel")]
#[command(author = "MeshSentinel Contributors")]
#[command(version)]
#[command(about = "Offline-first peer-to-peer community safety alert mesh node", long_about = None)]
struct Args {
    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to a config.toml file (defaults to the XDG config directory)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_directive.parse()?)
                .from_env_lossy(),
        )
        .init();

    let config = match &args.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };

    let self_device_id = device::generate();
    tracing::info!(device_id = %self_device_id, "starting meshsentinel node");

    let mesh = MeshHandle::new(self_device_id, config.mesh.clone());
    let cluster_client = Arc::new(cluster::Client::new(config.ollama.clone()));
    let http_state = AppState {
        mesh: mesh.clone(),
        cluster: cluster_client,
        sync_client: reqwest::Client::new(),
        http_port: config.http.port,
    };

    // Background components. Only the three bind calls (UDP discovery, TCP
    // transport, HTTP surface) can fail fatally at startup; everything else
    // is a `loop { work(); sleep() }` task that never returns.
    let announcer = {
        let mesh = mesh.clone();
        let http_port = config.http.port;
        tokio::spawn(async move {
            if let Err(e) = discovery::run_announcer(mesh, http_port).await {
                tracing::error!(error = %e, "announcer task exited");
            }
        })
    };

    let listener = {
        let mesh = mesh.clone();
        tokio::spawn(async move {
            if let Err(e) = discovery::run_listener(mesh).await {
                tracing::error!(error = %e, "discovery listener task exited");
            }
        })
    };

    let keepalive_task = {
        let mesh = mesh.clone();
        tokio::spawn(keepalive::run_keepalive(mesh))
    };

    let scanner_task = {
        let mesh = mesh.clone();
        tokio::spawn(keepalive::run_subnet_scanner(mesh))
    };

    let reaper_task = {
        let mesh = mesh.clone();
        tokio::spawn(reaper::run_reaper(mesh))
    };

    let transport_task = {
        let mesh = mesh.clone();
        tokio::spawn(async move {
            if let Err(e) = transport::run_inbound_server(mesh).await {
                tracing::error!(error = %e, "transport task exited");
            }
        })
    };

    let bind_addr = format!("{}:{}", config.http.bind_addr, config.http.port);
    let app = http::router(http_state);
    let http_listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| NodeError::Bind {
            what: "http surface",
            addr: bind_addr.clone(),
            source: e,
        })?;
    tracing::info!(addr = %bind_addr, "http surface: listening");

    let http_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, app).await {
            tracing::error!(error = %e, "http surface task exited");
        }
    });

    // Process shutdown is ungraceful (spec §5): we simply wait for every
    // spawned task, none of which return unless their socket dies.
    let _ = tokio::join!(
        announcer,
        listener,
        keepalive_task,
        scanner_task,
        reaper_task,
        transport_task,
        http_task,
    );

    Ok(())
}
