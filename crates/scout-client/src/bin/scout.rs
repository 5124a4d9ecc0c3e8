//! Scout CLI
//!
//! Usage:
//!   scout status [--watch]         Show the daemon's current snapshot
//!   scout add <path> [--model M]   Add a folder to the monitored set
//!   scout remove <path>            Remove a folder
//!   scout validate <path>          Dry-run the folder validation rules
//!   scout ping                     Measure daemon round-trip latency

use std::time::Duration;

use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use scout_client::ClientSyncAdapter;
use scout_core::types::{ClientKind, Fmdm};
use scout_core::DEFAULT_PORT;

#[derive(Parser)]
#[command(name = "scout")]
#[command(about = "Folder indexing daemon client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon WebSocket URL
    #[arg(short, long, global = true)]
    url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the daemon's current snapshot
    Status {
        /// Keep printing snapshots as they arrive
        #[arg(short, long)]
        watch: bool,
    },

    /// Add a folder to the monitored set
    Add {
        /// Absolute folder path
        path: String,

        /// Embedding model (daemon default when omitted)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Remove a folder from the monitored set
    Remove {
        /// Absolute folder path
        path: String,
    },

    /// Dry-run the folder validation rules
    Validate {
        /// Absolute folder path
        path: String,
    },

    /// Measure daemon round-trip latency
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let url = cli
        .url
        .unwrap_or_else(|| format!("ws://127.0.0.1:{}", DEFAULT_PORT));

    let adapter = ClientSyncAdapter::connect(&url, ClientKind::Cli)
        .await
        .map_err(|e| anyhow!("{} (is scoutd running at {}?)", e, url))?;

    match cli.command {
        Commands::Status { watch } => {
            let snapshot = adapter
                .wait_for_snapshot(Duration::from_secs(5))
                .await
                .map_err(|e| anyhow!("{}", e))?;
            print_snapshot(&snapshot);

            if watch {
                let mut rx = adapter.subscribe();
                while let Ok(snapshot) = rx.recv().await {
                    println!();
                    print_snapshot(&snapshot);
                }
            }
        }

        Commands::Add { path, model } => {
            // Surface warnings (e.g. descendant replacement) before acting
            let report = adapter
                .validate(&path)
                .await
                .map_err(|e| anyhow!("{}", e))?;
            for warning in &report.warnings {
                println!("warning: {}", warning.message);
                if let Some(folders) = &warning.affected_folders {
                    for folder in folders {
                        println!("  would replace: {}", folder);
                    }
                }
            }

            let response = adapter
                .add_folder(&path, model)
                .await
                .map_err(|e| anyhow!("{}", e))?;
            if response.success {
                println!("added {}", path);
            } else {
                bail!(
                    "add failed: {}",
                    response.error.unwrap_or_else(|| "unknown error".into())
                );
            }
        }

        Commands::Remove { path } => {
            let response = adapter
                .remove_folder(&path)
                .await
                .map_err(|e| anyhow!("{}", e))?;
            if response.success {
                println!("removed {}", path);
            } else {
                bail!(
                    "remove failed: {}",
                    response.error.unwrap_or_else(|| "unknown error".into())
                );
            }
        }

        Commands::Validate { path } => {
            let response = adapter
                .validate(&path)
                .await
                .map_err(|e| anyhow!("{}", e))?;
            if response.valid {
                println!("ok");
            }
            for error in &response.errors {
                println!("error: {}", error.message);
            }
            for warning in &response.warnings {
                println!("warning: {}", warning.message);
                if let Some(folders) = &warning.affected_folders {
                    for folder in folders {
                        println!("  would replace: {}", folder);
                    }
                }
            }
            if !response.valid {
                std::process::exit(1);
            }
        }

        Commands::Ping => {
            let rtt = adapter.ping().await.map_err(|e| anyhow!("{}", e))?;
            println!("pong in {:?}", rtt);
        }
    }

    adapter.close();
    Ok(())
}

fn print_snapshot(snapshot: &Fmdm) {
    println!(
        "daemon v{} (pid {}, up {}s) - {} client(s)",
        snapshot.version,
        snapshot.daemon.pid,
        snapshot.daemon.uptime_seconds,
        snapshot.connections.count
    );

    if snapshot.folders.is_empty() {
        println!("no folders configured");
        return;
    }

    for folder in &snapshot.folders {
        let mut line = format!("  {}  [{}]  {}", folder.path, folder.state, folder.model);
        if let Some(progress) = folder.progress_percent {
            line.push_str(&format!("  {}%", progress));
        }
        if let Some(error) = &folder.error {
            line.push_str(&format!("  ({})", error));
        }
        println!("{}", line);
    }
}
