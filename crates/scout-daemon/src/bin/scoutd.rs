//! Scout daemon CLI
//!
//! Usage:
//!   scoutd run                 Run the daemon in the foreground
//!   scoutd config              Print the effective configuration as TOML

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use scout_core::config::{DaemonConfig, FolderRegistry};
use scout_daemon::lifecycle::LifecycleDeps;
use scout_daemon::{
    FileStateTracker, FmdmService, FolderOrchestrator, NoopProvider, PidLock, ResourceConfig,
    ResourceManager, SyncServer,
};

#[derive(Parser)]
#[command(name = "scoutd")]
#[command(about = "Folder indexing daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Run {
        /// Config file (default: the platform config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Config file (default: the platform config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { config, port } => run(config, port).await,
        Commands::Config { config } => {
            let config = load_config(config)?;
            print!(
                "{}",
                toml::to_string_pretty(&config).context("serializing config")?
            );
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<DaemonConfig> {
    match path {
        Some(p) => DaemonConfig::load_from(&p).map_err(|e| anyhow!("{}", e)),
        None => Ok(DaemonConfig::load()),
    }
}

async fn run(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port {
        config.listen.port = port;
    }

    // One daemon per configuration
    let pid_path = DaemonConfig::default_pid_path()
        .ok_or_else(|| anyhow!("no data directory available"))?;
    let _pid_lock = PidLock::acquire(pid_path).map_err(|e| anyhow!("{}", e))?;

    let registry_path = DaemonConfig::default_registry_path()
        .ok_or_else(|| anyhow!("no config directory available"))?;
    let registry =
        Arc::new(FolderRegistry::open(registry_path).map_err(|e| anyhow!("{}", e))?);

    let db_path = DaemonConfig::default_state_db_path()
        .ok_or_else(|| anyhow!("no data directory available"))?;
    let tracker = Arc::new(FileStateTracker::open(&db_path).map_err(|e| anyhow!("{}", e))?);

    let resources = Arc::new(ResourceManager::with_config(ResourceConfig {
        max_concurrent_ops: config.index.max_concurrent_ops,
        max_queued_ops: config.index.max_queued_ops,
        memory_soft_limit_mb: config.index.memory_soft_limit_mb,
        memory_hard_limit_mb: config.index.memory_hard_limit_mb,
    }));

    let fmdm = Arc::new(FmdmService::new(config.index.available_models.clone()));
    fmdm.clone()
        .spawn_heartbeat(Duration::from_secs(config.watch.heartbeat_secs));

    let deps = Arc::new(LifecycleDeps {
        tracker,
        resources,
        provider: Arc::new(NoopProvider),
        fmdm: fmdm.clone(),
        excludes: config.index.exclude.clone(),
        max_files_per_batch: config.index.max_files_per_batch,
    });

    let orchestrator = FolderOrchestrator::new(registry, deps, &config);
    orchestrator.restore_from_config();
    orchestrator.run();

    let server = SyncServer::new(orchestrator.clone(), fmdm);
    let addr = SocketAddr::new(config.listen.bind, config.listen.port);

    info!("scoutd {} starting on {}", env!("CARGO_PKG_VERSION"), addr);

    tokio::select! {
        result = server.serve(addr) => {
            result.context("sync server failed")?;
        }
        _ = signal::ctrl_c() => {
            info!("Shutting down");
            orchestrator.shutdown();
        }
    }

    Ok(())
}
