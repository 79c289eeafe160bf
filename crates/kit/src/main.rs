//! esxclone command line entry point

use clap::{Parser, Subcommand};
use color_eyre::{Report, Result};

use esxclone::{clone, hosts};

/// Clone powered-off VMs between standalone ESXi hosts.
///
/// esxclone copies a VM's configuration and disk from one host to another
/// over SSH, renames it, resets its per-instance identity, hands it a
/// network identity through the OVF environment and registers it.
#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available esxclone commands
#[derive(Subcommand)]
enum Commands {
    /// Clone a VM onto a destination host
    Clone(clone::CloneOpts),

    /// List the hosts of the inventory
    Hosts(hosts::HostsOpts),
}

/// Install and configure the tracing/logging system.
///
/// Logs are filtered by the RUST_LOG environment variable, defaulting to 'info',
/// and written to stderr so that stdout only carries command output.
fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn main() -> Result<(), Report> {
    install_tracing();
    color_eyre::install()?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Clone(opts) => clone::run(opts)?,
        Commands::Hosts(opts) => hosts::run(opts)?,
    }
    tracing::debug!("exiting");
    Ok(())
}
