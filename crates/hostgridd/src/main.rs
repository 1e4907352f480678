//! hostgridd: the Hostgrid operator binary.
//!
//! Wires configuration, the instance registry, the shared database pool
//! and the backend adapters into an [`Orchestrator`] and exposes its
//! operations as subcommands.
//!
//! # Usage
//!
//! ```text
//! hostgridd init-config --base-domain hostgrid.app
//! hostgridd --config hostgrid.toml provision request.json
//! hostgridd status 6f1c0d9e-...
//! ```
//!
//! [`Orchestrator`]: hostgrid_provision::Orchestrator

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "hostgridd",
    about = "Hostgrid: provisioning for hosted instances",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to hostgrid.toml.
    #[arg(long, global = true, default_value = "hostgrid.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter hostgrid.toml.
    InitConfig {
        /// Domain instances are served under.
        #[arg(long, default_value = "hostgrid.app")]
        base_domain: String,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Provision the instance described by a JSON request file.
    Provision {
        request: PathBuf,
    },
    /// Tear an instance down.
    Destroy {
        id: String,
    },
    /// Show the registry record of an instance.
    Status {
        id: String,
    },
    /// Probe an instance URL once.
    Health {
        id: String,
        url: String,
    },
    /// Show shared pool members and their tenant counts.
    Pool,
    /// List resources that rollback or teardown could not remove.
    Orphans,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hostgrid=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
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
        Command::InitConfig { base_domain, force } => {
            commands::init_config(&cli.config, &base_domain, force)
        }
        Command::Provision { request } => commands::provision(&cli.config, &request).await,
        Command::Destroy { id } => commands::destroy(&cli.config, &id).await,
        Command::Status { id } => commands::status(&cli.config, &id),
        Command::Health { id, url } => commands::health(&cli.config, &id, &url).await,
        Command::Pool => commands::pool(&cli.config),
        Command::Orphans => commands::orphans(&cli.config),
    }
}
