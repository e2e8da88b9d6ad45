//! RPC Server binary
//!
//! Run with: cargo run --bin rpc-server -- --help

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tls_rpc_demo::logging::{init_logging, LogConfig};
use tls_rpc_demo::math::default_registry;
use tls_rpc_demo::server::{RpcServer, ServerConfig, ServerMode};
use tls_rpc_demo::tls::TlsFiles;
use tokio::task::JoinSet;

#[derive(Parser, Debug)]
#[command(name = "rpc-server")]
#[command(about = "RPC server exposing arithmetic procedures over TLS and/or plaintext")]
struct Args {
    /// Which listeners to start
    #[arg(value_enum, default_value_t = ServerMode::Https)]
    mode: ServerMode,

    /// Host to bind
    #[arg(long, default_value = "localhost")]
    host: String,

    /// TLS listener port
    #[arg(long, default_value = "8443")]
    https_port: u16,

    /// Plaintext listener port
    #[arg(long, default_value = "8000")]
    http_port: u16,

    /// PEM certificate chain for the TLS listener
    #[arg(long, default_value = "server.crt")]
    cert: PathBuf,

    /// PEM private key for the TLS listener
    #[arg(long, default_value = "server.key")]
    key: PathBuf,

    /// Directory for the append-only log file
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of worker threads for handling connections
    #[arg(long, default_value = "4")]
    worker_threads: usize,
}

impl Args {
    fn listeners(&self) -> Vec<ServerConfig> {
        let mut listeners = Vec::new();
        if self.mode.wants_http() {
            listeners.push(ServerConfig::http(format!("{}:{}", self.host, self.http_port)));
        }
        if self.mode.wants_https() {
            listeners.push(ServerConfig::https(
                format!("{}:{}", self.host, self.https_port),
                TlsFiles {
                    cert: self.cert.clone(),
                    key: self.key.clone(),
                },
            ));
        }
        listeners
    }
}

async fn run_with_config(args: Args) -> Result<()> {
    let log_path = init_logging(&LogConfig::new(&args.log_dir, "rpc_server.log", &args.log_level))?;

    tracing::info!("=== RPC Server Configuration ===");
    tracing::info!("Mode: {}", args.mode);
    tracing::info!("Worker threads: {}", args.worker_threads);
    if args.mode.wants_http() {
        tracing::info!("HTTP address: {}:{}", args.host, args.http_port);
    }
    if args.mode.wants_https() {
        tracing::info!("HTTPS address: {}:{}", args.host, args.https_port);
        tracing::info!("Certificate: {}", args.cert.display());
        tracing::info!("Private key: {}", args.key.display());
    }
    tracing::info!("Log file: {}", log_path.display());
    tracing::info!("================================");

    let registry = Arc::new(default_registry().context("building procedure registry")?);

    // Bind everything before serving anything, so a bad certificate or a
    // taken port fails the whole startup.
    let mut servers = Vec::new();
    for config in args.listeners() {
        let server = RpcServer::bind(&config, Arc::clone(&registry))
            .await
            .with_context(|| format!("starting listener on {}", config.listen_addr))?;
        servers.push(server);
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let mut tasks = JoinSet::new();
    for server in servers {
        let mut shutdown_rx = shutdown_rx.clone();
        tasks.spawn(server.serve_until(async move {
            let _ = shutdown_rx.changed().await;
        }));
    }

    tracing::info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    while let Some(joined) = tasks.join_next().await {
        joined??;
    }

    tracing::info!("All servers stopped");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let worker_threads = args.worker_threads;

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?
        .block_on(run_with_config(args))
}
