// file: src/cli/args.rs
// version: 2.0.0
// guid: f6g7h8i9-j0k1-2345-6789-012345fghijk

//! Command line argument definitions

use crate::config::CniProvider;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "k8s-auto-installer")]
#[command(about = "Bootstrap Kubernetes control planes on one host or an HA cluster")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[arg(long, global = true, help = "Emit structured JSON logs (level from RUST_LOG)")]
    pub json_logs: bool,

    #[arg(
        short,
        long,
        global = true,
        env = "K8S_INSTALLER_SETTINGS",
        help = "Settings YAML overriding built-in defaults"
    )]
    pub settings: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install a Kubernetes cluster
    Install {
        #[command(subcommand)]
        mode: InstallMode,
    },

    /// Validate an installation config without touching any host
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the step sequence an installation config would run
    Plan {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run pre-flight checks against every host in an installation config
    CheckConnectivity {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum InstallMode {
    /// Single-node cluster on this machine
    AllInOne {
        #[arg(long, help = "Kubernetes version, e.g. 1.30 or 1.30.2")]
        k8s_version: Option<String>,

        #[arg(long, value_enum)]
        cni: Option<CniArg>,

        #[arg(long)]
        pod_cidr: Option<String>,

        #[arg(long)]
        service_cidr: Option<String>,

        #[arg(long)]
        cluster_name: Option<String>,

        #[arg(long, help = "Show what would be done without actually doing it")]
        dry_run: bool,
    },

    /// Load balancer plus three or more masters over SSH
    HaSecure {
        #[arg(short, long, help = "Installation config YAML listing the nodes")]
        config: PathBuf,

        #[arg(long, help = "Show what would be done without actually doing it")]
        dry_run: bool,
    },
}

/// CNI argument for CLI
#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum CniArg {
    Cilium,
    Calico,
    Flannel,
}

impl From<CniArg> for CniProvider {
    fn from(cni: CniArg) -> Self {
        match cni {
            CniArg::Cilium => CniProvider::Cilium,
            CniArg::Calico => CniProvider::Calico,
            CniArg::Flannel => CniProvider::Flannel,
        }
    }
}
