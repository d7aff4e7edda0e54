//! Gateway binary entry point. Grounded on the teacher's `main`: parse the
//! CLI, load config, spawn background collaborators, serve until
//! `ctrl_c`.

use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shardmesh::cli::{self, Cli, Commands};
use shardmesh::config;
use shardmesh::gateway::{http, Gateway};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();

    if matches!(&cli.command, Some(Commands::Configcheck)) {
        match cli::config_check(&cli.config) {
            Ok(()) => {
                info!(path = %cli.config.display(), "configuration is valid");
                std::process::exit(0);
            }
            Err(err) => {
                error!(path = %cli.config.display(), %err, "configuration is invalid");
                std::process::exit(1);
            }
        }
    }

    let loaded = match config::load(&cli.config) {
        Ok(loaded) => (*loaded).clone(),
        Err(err) => {
            error!(path = %cli.config.display(), %err, "falling back to default configuration");
            shardmesh::config::Config::default()
        }
    };
    let config = match &cli.command {
        Some(command @ Commands::Run { .. }) => cli::apply_overrides(loaded, command),
        _ => loaded,
    };

    let (gateway, receiver) = Gateway::bootstrap(&config);

    let event_bus = gateway.event_bus.clone();
    let cache = gateway.cache.clone();
    let batch_size = config.cache.event_batch_size;
    let batch_wait = Duration::from_millis(config.cache.event_batch_wait_ms);
    tokio::spawn(async move {
        event_bus.run(receiver, cache, batch_size, batch_wait).await;
    });

    let sessions = gateway.sessions.clone();
    let sweep_interval = Duration::from_millis(config.general.session_sweep_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            let evicted = sessions.sweep();
            if evicted > 0 {
                tracing::debug!(evicted, "swept idle sessions");
            }
        }
    });

    let router = gateway.router.clone();
    let health_interval = Duration::from_millis(config.general.health_check_interval_ms);
    let initial_shards = gateway.routing.get_current_policy().known_shards().into_iter().collect();
    tokio::spawn(router.run_health_sampler(gateway.storage.clone(), initial_shards, health_interval));

    let txn_gateway = gateway.clone();
    let txn_sweep_interval = Duration::from_millis(config.general.transaction_sweep_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(txn_sweep_interval);
        loop {
            ticker.tick().await;
            let expired = txn_gateway.sweep_expired_transactions();
            if expired > 0 {
                tracing::debug!(expired, "swept idle transactions");
            }
        }
    });

    let sql_gateway = gateway.clone();
    let listen_port = config.general.listen_port;
    let sql_server = tokio::spawn(async move {
        if let Err(err) = http::serve(sql_gateway, listen_port).await {
            error!(%err, "SQL listener exited");
        }
    });

    let metrics_gateway = gateway.clone();
    let metrics_port = config.general.metrics_port;
    let metrics_server = tokio::spawn(async move {
        if let Err(err) = http::serve_metrics(metrics_gateway, metrics_port).await {
            error!(%err, "metrics listener exited");
        }
    });

    tokio::select! {
        _ = sql_server => {}
        _ = metrics_server => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
}
