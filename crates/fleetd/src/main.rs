//! fleetd: the fleet manager daemon.
//!
//! Assembles the control plane in one process:
//! - State store (redb)
//! - Leader election over the reconcile workers
//! - Cluster, instance and dynamic scaling workers
//! - Agent and admin API
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleetd/fleetd.toml
//! fleetd check-config --config /etc/fleetd/fleetd.toml
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fleet_core::FleetConfig;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleet=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet manager daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long, default_value = "/etc/fleetd/fleetd.toml")]
        config: PathBuf,
    },
    /// Parse and validate a configuration file, then print it with defaults
    /// filled in.
    CheckConfig {
        #[arg(long, default_value = "/etc/fleetd/fleetd.toml")]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
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
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config } => {
            let config = FleetConfig::from_file(&config)?;
            config.validate()?;
            daemon::run(config).await
        }
        Command::CheckConfig { config } => {
            let config = FleetConfig::from_file(&config)?;
            config.validate()?;
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
