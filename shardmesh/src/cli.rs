//! Command-line surface. Grounded on the teacher's `cli.rs`: a `Cli` struct
//! holding global flags plus an optional `Commands` subcommand, and a
//! `ConfigCheckError` enum for `configcheck`'s multi-file error reporting.

use std::fs::read_to_string;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::config::Config;

/// ShardMesh is a sharded, MySQL-wire-compatible SQL service with
/// policy-driven routing and an online shard-split orchestrator.
#[derive(Parser, Debug)]
#[command(name = "shardmesh", version)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "shardmesh.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the gateway.
    Run {
        /// Override the configured shard count at bootstrap (first run only;
        /// ignored once a routing policy has been persisted by a split).
        #[arg(long)]
        shard_count: Option<u32>,

        /// Override the per-shard storage cap, in gigabytes.
        #[arg(long)]
        max_shard_size_gb: Option<u64>,

        /// Override the SQL listener port.
        #[arg(long)]
        listen_port: Option<u16>,

        /// Override the health/metrics listener port.
        #[arg(long)]
        metrics_port: Option<u16>,
    },

    /// Check the configuration file for errors without starting the gateway.
    Configcheck,
}

#[derive(Debug, Error)]
pub enum ConfigCheckError {
    #[error("I/O error on `{0}`: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("TOML parse error in `{0}`: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
}

/// Confirm that `config_path` parses as a valid [`Config`].
pub fn config_check(config_path: &PathBuf) -> Result<(), ConfigCheckError> {
    let text = read_to_string(config_path).map_err(|e| ConfigCheckError::Io(config_path.clone(), e))?;
    toml::from_str::<Config>(&text).map_err(|e| ConfigCheckError::Parse(config_path.clone(), e))?;
    Ok(())
}

/// Folds `Run`'s override flags into a loaded [`Config`].
pub fn apply_overrides(mut config: Config, command: &Commands) -> Config {
    if let Commands::Run {
        shard_count,
        max_shard_size_gb,
        listen_port,
        metrics_port,
    } = command
    {
        if let Some(n) = shard_count {
            config.sharding.shard_count = *n;
        }
        if let Some(gb) = max_shard_size_gb {
            config.sharding.max_shard_size_bytes = gb * 1024 * 1024 * 1024;
        }
        if let Some(port) = listen_port {
            config.general.listen_port = *port;
        }
        if let Some(port) = metrics_port {
            config.general.metrics_port = *port;
        }
    }
    config
}
