// file: src/cli/commands.rs
// version: 2.0.0
// guid: g7h8i9j0-k1l2-3456-7890-123456ghijkl

//! Command implementations for the CLI

use crate::{
    config::{
        validator::collect_errors, CniProvider, ConfigLoader, InstallationConfig, Settings,
    },
    error::InstallerError,
    installer::{
        factory::step_sequence,
        preflight::{preflight_hosts, run_preflight},
        ClusterInfo, InstallationProgress, InstallerFactory, InstallerService, Status,
    },
    logging::with_async_operation_span,
    network::{ExecutorPool, RemoteExecutor},
    steps::{host_label, InstallationStep},
    Result,
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Load settings from `path`, or built-in defaults plus environment overrides
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    ConfigLoader::new().load_settings_or_default(path)
}

fn load_config(path: &Path) -> Result<InstallationConfig> {
    info!("Loading installation config from {}", path.display());
    ConfigLoader::new().load_installation_config(path)
}

/// Install a single-node cluster on this machine
#[allow(clippy::too_many_arguments)]
pub async fn install_all_in_one_command(
    settings: Settings,
    k8s_version: Option<String>,
    cni: Option<CniProvider>,
    pod_cidr: Option<String>,
    service_cidr: Option<String>,
    cluster_name: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let mut config = InstallationConfig::all_in_one(&settings);
    if let Some(version) = k8s_version {
        config.k8s_version = version;
    }
    if let Some(cni) = cni {
        config.cni_provider = cni;
    }
    if let Some(cidr) = pod_cidr {
        config.pod_cidr = cidr;
    }
    if let Some(cidr) = service_cidr {
        config.service_cidr = cidr;
    }
    if let Some(name) = cluster_name {
        config.cluster_name = name;
    }

    run_installation(settings, config, dry_run).await
}

/// Install an HA cluster described by a config file
pub async fn install_ha_command(settings: Settings, config_path: &Path, dry_run: bool) -> Result<()> {
    let config = load_config(config_path)?;
    if config.mode != crate::config::InstallationMode::HaSecure {
        return Err(InstallerError::validation(format!(
            "{} describes a {} installation; use `install all-in-one`",
            config_path.display(),
            config.mode
        )));
    }
    run_installation(settings, config, dry_run).await
}

async fn run_installation(settings: Settings, config: InstallationConfig, dry_run: bool) -> Result<()> {
    let factory = InstallerFactory::new(settings);

    if dry_run {
        factory.validate(&config)?;
        info!("DRY RUN: no host will be modified");
        print_plan(&config, &step_sequence(&config));
        return Ok(());
    }

    let service = InstallerService::new(factory);
    let id = service.create_installer(config).await?;
    let installer = service.get(&id).await?;
    println!(
        "{} {} installation {}",
        "Started".green().bold(),
        installer.mode(),
        id.bold()
    );

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .map_err(|e| InstallerError::internal(format!("Invalid progress template: {}", e)))?
            .progress_chars("#>-"),
    );

    let progress = loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Received Ctrl+C, cancelling installation {}", id);
                if let Err(e) = installer.cancel().await {
                    warn!("Could not cancel: {}", e);
                }
            }
        }

        let progress = installer.progress().await;
        pb.set_position(progress.progress_percentage() as u64);
        pb.set_message(format!(
            "{} {}",
            progress.status,
            progress.current_step_name.clone().unwrap_or_default()
        ));
        if progress.status.is_terminal() {
            pb.finish_and_clear();
            break progress;
        }
    };

    print_summary(&progress, installer.cluster_info().await.as_ref());

    match progress.status {
        Status::Success => Ok(()),
        status => Err(InstallerError::internal(format!(
            "Installation {} finished as {}",
            id, status
        ))),
    }
}

/// Validate an installation config
pub async fn validate_command(settings: Settings, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let errors = collect_errors(&config, &settings);

    if errors.is_empty() {
        println!(
            "{} {} ({} mode, {} nodes)",
            "Valid:".green().bold(),
            config_path.display(),
            config.mode,
            config.nodes.len()
        );
        return Ok(());
    }

    println!("{} {}", "Invalid:".red().bold(), config_path.display());
    for error in &errors {
        println!("  - {}", error);
    }
    Err(InstallerError::validation(errors.join("; ")))
}

/// Print the step sequence for an installation config
pub async fn plan_command(settings: Settings, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    InstallerFactory::new(settings).validate(&config)?;
    print_plan(&config, &step_sequence(&config));
    Ok(())
}

/// Run pre-flight checks against every host in an installation config
pub async fn check_connectivity_command(settings: Settings, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let executor = ExecutorPool::new(settings.connectivity_timeout());

    for host in preflight_hosts(&config) {
        let reachable = executor.test_connectivity(host).await;
        let label = host_label(host);
        if reachable {
            println!("  {} {}", "reachable".green(), label);
        } else {
            println!("  {} {}", "unreachable".red(), label);
        }
    }

    let failures = with_async_operation_span("preflight", || {
        run_preflight(&config, &settings, &executor)
    })
    .await;
    executor.close_all().await;

    if failures.is_empty() {
        println!("{}", "All pre-flight checks passed".green().bold());
        return Ok(());
    }

    println!("{}", "Pre-flight checks failed:".red().bold());
    for failure in &failures {
        println!("  - {}", failure);
    }
    Err(InstallerError::validation(format!(
        "Pre-installation checks failed: {}",
        failures.join("; ")
    )))
}

fn print_plan(config: &InstallationConfig, steps: &[InstallationStep]) {
    println!(
        "{} {} installation of Kubernetes {} with {}",
        "Plan:".bold(),
        config.mode,
        config.k8s_version,
        config.cni_provider
    );

    for (index, step) in steps.iter().enumerate() {
        let hosts: Vec<&str> = step
            .target
            .resolve(config)
            .into_iter()
            .map(host_label)
            .collect();
        println!(
            "{:>2}. {} [{}: {}]",
            index + 1,
            step.name.bold(),
            step.target,
            if hosts.is_empty() {
                "none".to_string()
            } else {
                hosts.join(", ")
            }
        );
        println!("    {}", step.description);
        for line in step.action.outline() {
            println!("      {}", line);
        }
    }
}

fn print_summary(progress: &InstallationProgress, cluster_info: Option<&ClusterInfo>) {
    let status = match progress.status {
        Status::Success => progress.status.to_string().green().bold(),
        Status::Cancelled => progress.status.to_string().yellow().bold(),
        _ => progress.status.to_string().red().bold(),
    };
    println!(
        "Installation {} {} after {:.0}s ({}/{} steps)",
        progress.installation_id,
        status,
        progress.duration(),
        progress.current_step,
        progress.total_steps
    );

    for result in &progress.step_results {
        let mark = if result.success {
            "ok".green()
        } else {
            "FAILED".red()
        };
        println!(
            "  {:<6} {:<32} {:<16} {:>7.2}s",
            mark,
            result.step_name,
            result.host.as_deref().unwrap_or("localhost"),
            result.duration_seconds
        );
    }

    if let Some(message) = &progress.error_message {
        println!("{} {}", "Error:".red().bold(), message);
    }
    if let Some(info) = cluster_info {
        println!();
        print!("{}", info.access_instructions());
    }
}
