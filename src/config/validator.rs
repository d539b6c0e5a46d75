// file: src/config/validator.rs
// version: 2.0.0
// guid: e5f6g7h8-i9j0-1234-5678-90abcdef1234

//! Installation request validation
//!
//! Every violation is collected so a caller sees the whole list at once; the
//! result is a single `InstallerError::Validation` joining them with `; `.

use super::{InstallationConfig, InstallationMode, NodeConfig, Settings};
use crate::error::InstallerError;
use crate::Result;
use regex::Regex;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use validator::Validate;

/// Minimum node count for an HA installation
pub const HA_MIN_NODES: usize = 4;
/// Minimum master count for an HA installation
pub const HA_MIN_MASTERS: usize = 3;

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\d+(\.\d+)?$").expect("Invalid version regex"))
}

fn hostname_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?)*$",
        )
        .expect("Invalid hostname regex")
    })
}

fn dns_label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").expect("Invalid DNS label regex")
    })
}

/// Validate an installation request against its mode's invariants
pub fn validate_installation(config: &InstallationConfig, settings: &Settings) -> Result<()> {
    info!("Validating {} installation request", config.mode);

    let errors = collect_errors(config, settings);
    if errors.is_empty() {
        if config.enable_network_policies && !config.cni_provider.supports_network_policies() {
            warn!(
                "Network policies requested but {} does not enforce them",
                config.cni_provider
            );
        }
        debug!("Installation request is valid");
        return Ok(());
    }

    for error in &errors {
        warn!("Config error: {}", error);
    }
    Err(InstallerError::validation(errors.join("; ")))
}

/// Every violation found in the request, in a stable order
pub fn collect_errors(config: &InstallationConfig, settings: &Settings) -> Vec<String> {
    let mut errors = Vec::new();

    if !version_regex().is_match(&config.k8s_version) {
        errors.push(format!("Invalid Kubernetes version: {}", config.k8s_version));
    } else if !settings.is_supported_version(&config.k8s_version) {
        errors.push(format!(
            "Unsupported Kubernetes version: {}",
            config.k8s_version
        ));
    }

    if !dns_label_regex().is_match(&config.cluster_name) {
        errors.push(format!("Invalid cluster name: {}", config.cluster_name));
    }

    let pod = parse_ipv4_cidr(&config.pod_cidr);
    let service = parse_ipv4_cidr(&config.service_cidr);
    if pod.is_none() {
        errors.push(format!("Invalid pod CIDR: {}", config.pod_cidr));
    }
    if service.is_none() {
        errors.push(format!("Invalid service CIDR: {}", config.service_cidr));
    }
    if let (Some(pod), Some(service)) = (pod, service) {
        if cidrs_overlap(pod, service) {
            errors.push(format!(
                "Pod CIDR {} overlaps service CIDR {}",
                config.pod_cidr, config.service_cidr
            ));
        }
    }

    match config.mode {
        InstallationMode::AllInOne => {
            if !config.nodes.is_empty() {
                errors.push("All-in-One mode runs on the local host and takes no nodes".to_string());
            }
        }
        InstallationMode::HaSecure => {
            if config.nodes.len() < HA_MIN_NODES {
                errors.push(format!(
                    "HA mode requires at least {} nodes, got {}",
                    HA_MIN_NODES,
                    config.nodes.len()
                ));
            }
            if config.masters().len() < HA_MIN_MASTERS {
                errors.push(format!(
                    "HA mode requires at least {} master nodes",
                    HA_MIN_MASTERS
                ));
            }
            if config.load_balancers().is_empty() {
                errors.push("HA mode requires a load balancer node".to_string());
            }
        }
    }

    let mut seen = HashSet::new();
    for node in &config.nodes {
        if !seen.insert(node.host.as_str()) {
            errors.push(format!("Duplicate host: {}", node.host));
        }
        errors.extend(node_errors(node));
    }

    errors
}

fn node_errors(node: &NodeConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if let Err(field_errors) = node.validate() {
        let mut messages: Vec<String> = field_errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("invalid {}", field))
                })
            })
            .collect();
        messages.sort();
        errors.extend(messages.into_iter().map(|m| format!("Node {}: {}", node.host, m)));
    }

    if !node.host.is_empty() && !is_valid_host(&node.host) {
        errors.push(format!("Invalid host address: {}", node.host));
    }

    if let Some(key) = node.expanded_key_path() {
        if !key.exists() {
            errors.push(format!(
                "Node {}: SSH key file not found: {}",
                node.host,
                key.display()
            ));
        }
    }

    errors
}

/// IPv4 literal or RFC 1123 hostname; dotted numbers must be a real address
pub fn is_valid_host(host: &str) -> bool {
    if host.parse::<Ipv4Addr>().is_ok() {
        return true;
    }
    let all_numeric = host.split('.').all(|part| part.chars().all(|c| c.is_ascii_digit()));
    !all_numeric && host.len() <= 253 && hostname_regex().is_match(host)
}

/// Parse `a.b.c.d/n` into its network address and prefix length
pub fn parse_ipv4_cidr(cidr: &str) -> Option<(u32, u8)> {
    let (addr, prefix) = cidr.split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    if prefix > 32 {
        return None;
    }
    Some((u32::from(addr) & prefix_mask(prefix), prefix))
}

fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

/// Two ranges overlap when they agree on the shorter prefix
pub fn cidrs_overlap(a: (u32, u8), b: (u32, u8)) -> bool {
    let mask = prefix_mask(a.1.min(b.1));
    (a.0 & mask) == (b.0 & mask)
}
