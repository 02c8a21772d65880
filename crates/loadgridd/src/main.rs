//! loadgridd — the LoadGrid daemon.
//!
//! Single binary that assembles the LoadGrid subsystems:
//! - State store (redb), acting as instance registry and metrics source
//! - Metrics cache
//! - Rate limiter (admission control for the API)
//! - Autoscaler control loop
//! - REST API
//!
//! # Usage
//!
//! ```text
//! loadgridd run --config /etc/loadgrid/loadgrid.toml --port 8443
//! loadgridd check-config --config /etc/loadgrid/loadgrid.toml
//! ```

mod config;
mod standalone;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "loadgridd", about = "LoadGrid autoscaling daemon")]
struct Cli {
    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the autoscaler and the API server in one process.
    Run {
        /// Path to loadgrid.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on.
        #[arg(long, default_value = "8443")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/loadgrid")]
        data_dir: PathBuf,
    },
    /// Parse and validate a configuration file, then exit.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,loadgridd=debug,loadgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
        } => {
            let daemon_config = match &config {
                Some(path) => {
                    info!(path = %path.display(), "loading configuration");
                    DaemonConfig::from_file(path)?
                }
                None => DaemonConfig::default(),
            };
            standalone::run(daemon_config, port, data_dir).await
        }
        Command::CheckConfig { config } => {
            let daemon_config = DaemonConfig::from_file(&config)?;
            daemon_config.validate()?;
            info!(path = %config.display(), "configuration is valid");
            Ok(())
        }
    }
}
