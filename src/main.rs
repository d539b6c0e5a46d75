// file: src/main.rs
// version: 2.0.0
// guid: h8i9j0k1-l2m3-4567-8901-234567hijklm

//! Kubernetes auto installer - Main entry point

use anyhow::Context;
use clap::Parser;
use k8s_auto_installer::{
    cli::{
        args::{Cli, Commands, InstallMode},
        commands::*,
    },
    logging::logger,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.json_logs {
        logger::init_json_logger()?;
    } else {
        logger::init_logger(cli.verbose, cli.quiet)?;
    }

    let settings = load_settings(cli.settings.as_deref()).context("Failed to load settings")?;

    match cli.command {
        Commands::Install { mode } => match mode {
            InstallMode::AllInOne {
                k8s_version,
                cni,
                pod_cidr,
                service_cidr,
                cluster_name,
                dry_run,
            } => {
                install_all_in_one_command(
                    settings,
                    k8s_version,
                    cni.map(Into::into),
                    pod_cidr,
                    service_cidr,
                    cluster_name,
                    dry_run,
                )
                .await?
            }
            InstallMode::HaSecure { config, dry_run } => {
                install_ha_command(settings, &config, dry_run).await?
            }
        },
        Commands::Validate { config } => validate_command(settings, &config).await?,
        Commands::Plan { config } => plan_command(settings, &config).await?,
        Commands::CheckConnectivity { config } => {
            check_connectivity_command(settings, &config).await?
        }
    }

    Ok(())
}
