//! solanumd - a Solanum-style IRC daemon.
//!
//! The connection-and-access core: wire parsing, the layered
//! access-control database, the client state machine with capability
//! negotiation, and the hook pipeline every send decision flows through.

mod access;
mod caps;
mod config;
mod context;
mod db;
mod error;
mod handlers;
mod hooks;
mod metrics;
mod network;
mod policy;
mod s2s;
mod security;
mod send;
mod state;
mod tasks;

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::Config;
use crate::context::CoreContext;
use crate::handlers::Registry;

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `solanumd.toml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "solanumd.toml".to_string(),
    };

    // canonicalize so REHASH does not depend on the working directory
    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();
    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: Failed to load config from {}: {}", config_path, e);
        e
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match config.serverinfo.log_format {
        config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        config::LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    if let Err(errors) = config::validate(&config) {
        for err in &errors {
            error!(error = %err, "Configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(
        server = %config.serverinfo.name,
        network = %config.serverinfo.network_name,
        sid = %config.serverinfo.sid,
        "Starting solanumd"
    );

    // ban database
    let bandb = match &config.database {
        Some(database) => Some(db::BanDb::open(&database.path).await?),
        None => None,
    };

    let listen = config.listen.clone();
    let tls_config = config.tls.clone();
    let ctx = CoreContext::new(config, config_path, bandb);

    // replay persisted bans into the live index
    if let Some(bandb) = &ctx.bandb {
        let stored = bandb.load_all().await?;
        ctx.install_stored_bans(&stored);
    }

    metrics::init();
    policy::register_all(&ctx);
    info!("Policies registered");

    let registry = Arc::new(Registry::new());
    let _ = ctx.registry.set(registry.clone());

    tasks::spawn_all(&ctx, &registry);
    info!("Maintenance tasks started");

    // graceful shutdown on SIGINT/SIGTERM, exit code 0
    {
        let shutdown_tx = ctx.shutdown_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT - initiating graceful shutdown"),
                _ = sigterm.recv() => info!("Received SIGTERM - initiating graceful shutdown"),
            }
            let _ = shutdown_tx.send(());
        });
    }

    // listeners; a bind failure is process-fatal
    let plain = tokio::net::TcpListener::bind((listen.host.as_str(), listen.port))
        .await
        .map_err(|e| anyhow::anyhow!("cannot bind {}:{}: {}", listen.host, listen.port, e))?;
    info!(port = listen.port, "Client listener bound");
    tokio::spawn(network::run_plain_listener(
        ctx.clone(),
        registry.clone(),
        plain,
        listen.port,
    ));

    if let Some(tls_port) = listen.tls_port {
        let tls = tls_config
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("tls_port set without [tls] block"))?;
        let handle = network::spawn_tls_service(ctx.clone(), tls)?;
        let listener = tokio::net::TcpListener::bind((listen.host.as_str(), tls_port))
            .await
            .map_err(|e| anyhow::anyhow!("cannot bind {}:{}: {}", listen.host, tls_port, e))?;
        info!(port = tls_port, "TLS listener bound");
        tokio::spawn(network::run_tls_listener(
            ctx.clone(),
            registry.clone(),
            listener,
            tls_port,
            handle,
        ));
    }

    if let Some(server_port) = listen.server_port {
        let listener = tokio::net::TcpListener::bind((listen.host.as_str(), server_port))
            .await
            .map_err(|e| anyhow::anyhow!("cannot bind {}:{}: {}", listen.host, server_port, e))?;
        info!(port = server_port, "Server listener bound");
        tokio::spawn(network::run_server_listener(
            ctx.clone(),
            registry.clone(),
            listener,
        ));
    }

    // park until shutdown
    let mut shutdown_rx = ctx.shutdown_tx.subscribe();
    let _ = shutdown_rx.recv().await;

    info!("Shutting down, waiting for connections to flush");
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    Ok(())
}
