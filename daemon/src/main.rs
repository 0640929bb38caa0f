//! Accord daemon: opens the ledger, wires the negotiation engine and serves
//! the command surface.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use accord_rights::{LocalRights, RightsAuthority, RightsRegistry};
use accord_rights_client::RightsClient;
use accord_rpc::{AppState, RequestIdentity, RpcMetrics, RpcServer};
use accord_store_lmdb::LmdbEnvironment;
use accord_utils::{init_logging, LogFormat};
use accord_workflow::{Coordinator, SharedLedger};
use clap::Parser;
use tracing::info;

use crate::config::DaemonConfig;

/// Named databases in the environment; only one is used today.
const MAX_DBS: u32 = 4;

#[derive(Parser)]
#[command(name = "accord-daemon", about = "Capability-gated negotiation service")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "ACCORD_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for ledger storage.
    #[arg(long, env = "ACCORD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Command server port.
    #[arg(long, env = "ACCORD_RPC_PORT")]
    rpc_port: Option<u16>,

    /// Command server bind address.
    #[arg(long, env = "ACCORD_RPC_BIND")]
    rpc_bind: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "ACCORD_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "ACCORD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Remote rights registry; rights are kept locally when unset.
    #[arg(long, env = "ACCORD_RIGHTS_REGISTRY_URL")]
    rights_registry_url: Option<String>,

    /// Timeout for remote rights calls, in milliseconds.
    #[arg(long, env = "ACCORD_RPC_TIMEOUT_MS")]
    rpc_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Serve the command surface until interrupted.
    Serve,
    /// Print the effective configuration as TOML and exit.
    Config,
}

impl Cli {
    fn apply(&self, base: DaemonConfig) -> DaemonConfig {
        DaemonConfig {
            data_dir: self.data_dir.clone().unwrap_or(base.data_dir),
            rpc_port: self.rpc_port.unwrap_or(base.rpc_port),
            rpc_bind: self.rpc_bind.clone().unwrap_or(base.rpc_bind),
            log_format: self.log_format.unwrap_or(base.log_format),
            log_level: self.log_level.clone().unwrap_or(base.log_level),
            rights_registry_url: self
                .rights_registry_url
                .clone()
                .or(base.rights_registry_url),
            rpc_timeout_ms: self.rpc_timeout_ms.unwrap_or(base.rpc_timeout_ms),
            ..base
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let base = match &cli.config {
        Some(path) => DaemonConfig::from_toml_file(path)?,
        None => DaemonConfig::default(),
    };
    let config = cli.apply(base);
    config.validate()?;

    match cli.command {
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Serve => {
            init_logging(config.log_format, &config.log_level)?;
            serve(config).await
        }
    }
}

async fn serve(config: DaemonConfig) -> anyhow::Result<()> {
    let env = LmdbEnvironment::open(&config.data_dir, MAX_DBS, config.map_size_bytes())?;
    let ledger: SharedLedger = Arc::new(env.ledger_store());
    let registry = Arc::new(RightsRegistry::new(Arc::clone(&ledger)));

    let rights: Arc<dyn RightsAuthority> = match &config.rights_registry_url {
        Some(url) => {
            info!(%url, timeout_ms = config.rpc_timeout_ms, "using remote rights registry");
            Arc::new(RightsClient::new(
                url,
                Arc::new(RequestIdentity),
                config.rpc_timeout(),
            )?)
        }
        None => Arc::new(LocalRights::new(Arc::clone(&registry))),
    };

    let coordinator = Coordinator::new(ledger, rights)?
        .with_retry_policy(config.retry_policy())
        .with_event_capacity(config.event_capacity);
    let state = AppState {
        coordinator: Arc::new(coordinator),
        registry,
        metrics: Arc::new(RpcMetrics::new()),
    };
    let server = RpcServer::new(config.rpc_bind.clone(), config.rpc_port, Arc::new(state));

    info!(
        data_dir = %config.data_dir.display(),
        "starting Accord daemon on {}:{}",
        config.rpc_bind,
        config.rpc_port
    );
    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received, stopping"),
    }
    info!("Accord daemon exited cleanly");
    Ok(())
}
