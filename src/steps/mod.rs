// file: src/steps/mod.rs
// version: 2.0.0
// guid: h8i9j0k1-l2m3-4567-8901-bcdef234567

//! Installation steps: what runs, where it runs and what it reported
//!
//! A step is stateless. The installer runs the same `InstallationStep` once
//! per host its `StepTarget` resolves to, passing a fresh `StepContext`.

pub mod all_in_one;
pub mod commands;
pub mod ha_secure;
pub mod script;

pub use script::{Expect, Probe, Script, Task};

use crate::config::{InstallationConfig, NodeConfig, Settings};
use crate::error::InstallerError;
use crate::installer::retry::{CancelFlag, Sleeper};
use crate::network::{CommandOutput, RemoteExecutor};
use crate::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Hosts a step runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepTarget {
    /// The machine this process runs on
    Local,
    LoadBalancers,
    /// First master in node order; bootstraps the control plane
    FirstMaster,
    /// Every master after the first, in node order
    JoiningMasters,
    Masters,
    Workers,
    /// Masters then workers
    KubernetesNodes,
}

impl StepTarget {
    /// Hosts in execution order; `None` is the local machine
    pub fn resolve<'a>(&self, config: &'a InstallationConfig) -> Vec<Option<&'a NodeConfig>> {
        let nodes: Vec<&NodeConfig> = match self {
            StepTarget::Local => return vec![None],
            StepTarget::LoadBalancers => config.load_balancers(),
            StepTarget::FirstMaster => config.first_master().into_iter().collect(),
            StepTarget::JoiningMasters => config.masters().into_iter().skip(1).collect(),
            StepTarget::Masters => config.masters(),
            StepTarget::Workers => config.workers(),
            StepTarget::KubernetesNodes => {
                let mut nodes = config.masters();
                nodes.extend(config.workers());
                nodes
            }
        };
        nodes.into_iter().map(Some).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepTarget::Local => "local host",
            StepTarget::LoadBalancers => "load balancers",
            StepTarget::FirstMaster => "first master",
            StepTarget::JoiningMasters => "joining masters",
            StepTarget::Masters => "all masters",
            StepTarget::Workers => "workers",
            StepTarget::KubernetesNodes => "all kubernetes nodes",
        }
    }
}

impl fmt::Display for StepTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    /// Runs while the installation is `installing`
    Install,
    /// Moves the installation to `configuring` when it starts
    Configure,
}

/// Outcome of one step on one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub success: bool,
    pub duration_seconds: f64,
    pub error_message: Option<String>,
    pub output: Option<String>,
    pub host: Option<String>,
}

impl StepResult {
    pub fn success(
        step_name: impl Into<String>,
        duration: Duration,
        output: Option<String>,
        host: Option<String>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            success: true,
            duration_seconds: round2(duration.as_secs_f64()),
            error_message: None,
            output,
            host,
        }
    }

    pub fn failure(
        step_name: impl Into<String>,
        duration: Duration,
        error: impl Into<String>,
        host: Option<String>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            success: false,
            duration_seconds: round2(duration.as_secs_f64()),
            error_message: Some(error.into()),
            output: None,
            host,
        }
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Values produced by one step and consumed by later ones
#[derive(Debug, Default)]
pub struct FactStore(RwLock<HashMap<String, String>>);

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.0.write().await.insert(name.into(), value.into());
    }

    pub async fn get(&self, name: &str) -> Option<String> {
        self.0.read().await.get(name).cloned()
    }

    /// Replace `{{name}}` placeholders with stored facts
    pub async fn render(&self, template: &str) -> Result<String> {
        if !template.contains("{{") {
            return Ok(template.to_string());
        }

        let facts = self.0.read().await;
        let mut missing = Vec::new();
        let rendered = placeholder_regex().replace_all(template, |caps: &regex::Captures| {
            match facts.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    missing.push(caps[1].to_string());
                    String::new()
                }
            }
        });

        if missing.is_empty() {
            Ok(rendered.into_owned())
        } else {
            Err(InstallerError::internal(format!(
                "Command references unknown facts: {}",
                missing.join(", ")
            )))
        }
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([a-z_]+)\}\}").expect("Invalid placeholder regex"))
}

/// Everything a step action may use while running on one host
pub struct StepContext<'a> {
    pub installation_id: &'a str,
    pub step_name: &'a str,
    pub config: &'a InstallationConfig,
    pub settings: &'a Settings,
    /// `None` for the local machine
    pub host: Option<&'a NodeConfig>,
    pub executor: &'a dyn RemoteExecutor,
    /// Budget for each command the action runs
    pub timeout: Duration,
    pub cancel: &'a CancelFlag,
    pub sleeper: &'a dyn Sleeper,
    /// Where this installation's kubeconfig is written
    pub kubeconfig_path: &'a Path,
    pub facts: &'a FactStore,
}

impl<'a> StepContext<'a> {
    pub fn host_label(&self) -> &str {
        host_label(self.host)
    }

    /// Run a command, treating a non-zero exit as a step failure
    pub async fn run(&self, command: &str) -> Result<CommandOutput> {
        let rendered = self.facts.render(command).await?;
        let output = self.run_rendered(&rendered).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(InstallerError::command_failed(
                self.step_name,
                self.host_label(),
                rendered,
                Some(output.exit_code),
                output.error_text(),
            ))
        }
    }

    /// Run a command and hand back its output whatever the exit status
    pub async fn run_unchecked(&self, command: &str) -> Result<CommandOutput> {
        let rendered = self.facts.render(command).await?;
        self.run_rendered(&rendered).await
    }

    async fn run_rendered(&self, command: &str) -> Result<CommandOutput> {
        debug!("[{}] {}: {}", self.step_name, self.host_label(), command);
        self.executor.execute(self.host, command, self.timeout).await
    }
}

pub fn host_label(host: Option<&NodeConfig>) -> &str {
    host.map(|h| h.host.as_str()).unwrap_or("localhost")
}

/// The work a step performs on one host
#[async_trait]
pub trait StepAction: Send + Sync {
    /// Perform the work; `Ok` carries an optional summary for the step result
    async fn run(&self, ctx: &StepContext<'_>) -> Result<Option<String>>;

    /// Human-readable outline of what `run` does, for plans and dry runs
    fn outline(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Step action backed by a closure
pub struct FnAction<F> {
    func: F,
}

impl<F> FnAction<F>
where
    F: for<'c> Fn(&'c StepContext<'c>) -> BoxFuture<'c, Result<Option<String>>> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> StepAction for FnAction<F>
where
    F: for<'c> Fn(&'c StepContext<'c>) -> BoxFuture<'c, Result<Option<String>>> + Send + Sync,
{
    async fn run(&self, ctx: &StepContext<'_>) -> Result<Option<String>> {
        (self.func)(ctx).await
    }
}

/// One named unit of work in a mode's step sequence
#[derive(Clone)]
pub struct InstallationStep {
    pub name: String,
    pub description: String,
    pub target: StepTarget,
    pub phase: StepPhase,
    pub action: Arc<dyn StepAction>,
    pub retryable: bool,
    /// `None` takes `settings.k8s.max_retries`
    pub max_retries: Option<u32>,
    /// Budget per host attempt; `None` takes `settings.ssh.command_timeout_secs`
    pub timeout: Option<Duration>,
}

impl InstallationStep {
    /// Local, retryable install step using the settings' retry and timeout defaults
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        action: impl StepAction + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            target: StepTarget::Local,
            phase: StepPhase::Install,
            action: Arc::new(action),
            retryable: true,
            max_retries: None,
            timeout: None,
        }
    }

    pub fn on(mut self, target: StepTarget) -> Self {
        self.target = target;
        self
    }

    pub fn configure(mut self) -> Self {
        self.phase = StepPhase::Configure;
        self
    }

    /// Allow `max_retries` retries; zero makes the step non-retryable
    pub fn retries(mut self, max_retries: u32) -> Self {
        self.retryable = max_retries > 0;
        self.max_retries = Some(max_retries);
        self
    }

    pub fn no_retry(self) -> Self {
        self.retries(0)
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Some(Duration::from_secs(secs));
        self
    }

    /// Retries this step actually gets
    pub fn effective_retries(&self, settings: &Settings) -> u32 {
        if self.retryable {
            self.max_retries.unwrap_or(settings.k8s.max_retries)
        } else {
            0
        }
    }

    pub fn effective_timeout(&self, settings: &Settings) -> Duration {
        self.timeout.unwrap_or_else(|| settings.command_timeout())
    }
}

impl fmt::Debug for InstallationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationStep")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("phase", &self.phase)
            .field("retryable", &self.retryable)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .finish()
    }
}
