// file: src/steps/script.rs
// version: 1.0.0
// guid: 2e7a9c14-5b3f-4d80-a6c1-8f0d3e2b7a59

//! Declarative step actions
//!
//! Both mode sequences are lists of `Script`s: ordered shell tasks with
//! optional probes that make re-running a step safe on a host where the
//! work is already done.

use super::{StepAction, StepContext};
use crate::error::InstallerError;
use crate::network::CommandOutput;
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a probe's output must look like to count as satisfied
///
/// Every variant also requires a zero exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    Success,
    Contains(String),
    /// Trimmed stdout equals the value
    Equals(String),
    NonEmpty,
    /// At least one row, and every row has one of `accepted` in `column`
    AllRows { column: usize, accepted: Vec<String> },
}

impl Expect {
    pub fn matches(&self, output: &CommandOutput) -> bool {
        if !output.success() {
            return false;
        }
        match self {
            Expect::Success => true,
            Expect::Contains(needle) => output.stdout.contains(needle.as_str()),
            Expect::Equals(value) => output.stdout.trim() == value,
            Expect::NonEmpty => !output.stdout.trim().is_empty(),
            Expect::AllRows { column, accepted } => rows_match(&output.stdout, *column, accepted),
        }
    }
}

/// Whether tabular output has rows and every row's `column` is accepted
pub fn rows_match(stdout: &str, column: usize, accepted: &[String]) -> bool {
    let mut rows = stdout.lines().filter(|l| !l.trim().is_empty()).peekable();
    if rows.peek().is_none() {
        return false;
    }
    rows.all(|row| {
        row.split_whitespace()
            .nth(column)
            .map(|value| accepted.iter().any(|a| a == value))
            .unwrap_or(false)
    })
}

/// A read-only command whose output answers a yes/no question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub command: String,
    pub expect: Expect,
}

impl Probe {
    pub fn new(command: impl Into<String>, expect: Expect) -> Self {
        Self {
            command: command.into(),
            expect,
        }
    }

    pub fn succeeds(command: impl Into<String>) -> Self {
        Self::new(command, Expect::Success)
    }

    pub fn contains(command: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::new(command, Expect::Contains(needle.into()))
    }

    pub fn equals(command: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(command, Expect::Equals(value.into()))
    }

    pub fn non_empty(command: impl Into<String>) -> Self {
        Self::new(command, Expect::NonEmpty)
    }

    pub fn rows(command: impl Into<String>, column: usize, accepted: &[&str]) -> Self {
        Self::new(
            command,
            Expect::AllRows {
                column,
                accepted: accepted.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    /// Satisfied when `path` exists on the host
    pub fn file_exists(path: &str) -> Self {
        Self::equals(format!("test -f {} && echo present", path), "present")
    }

    /// Run the probe; only transport failures are errors
    pub async fn check(&self, ctx: &StepContext<'_>) -> Result<bool> {
        let output = ctx.run_unchecked(&self.command).await?;
        Ok(self.expect.matches(&output))
    }
}

/// One unit of work inside a `Script`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Run a command; non-critical failures are logged and ignored
    Run {
        description: String,
        command: String,
        critical: bool,
        unless: Option<Probe>,
    },
    /// Store trimmed stdout as a fact for later steps
    Capture {
        description: String,
        command: String,
        fact: String,
    },
    /// Poll a probe until it passes or the attempts run out
    WaitFor {
        description: String,
        probe: Probe,
        interval: Duration,
        attempts: u32,
        fatal: bool,
    },
    /// Fail the step unless the probe passes
    Check { description: String, probe: Probe },
    /// Copy a kubeconfig from the host to this installation's kubeconfig path
    FetchKubeconfig { remote: String },
}

impl Task {
    pub fn outline(&self) -> String {
        match self {
            Task::Run {
                command,
                critical,
                unless,
                ..
            } => {
                let mut line = command.clone();
                if !critical {
                    line.push_str("  (non-critical)");
                }
                if let Some(probe) = unless {
                    line.push_str(&format!("  (unless: {})", probe.command));
                }
                line
            }
            Task::Capture { command, fact, .. } => format!("{}  (-> {{{{{}}}}})", command, fact),
            Task::WaitFor {
                probe, attempts, ..
            } => format!("wait for: {}  (x{})", probe.command, attempts),
            Task::Check { probe, .. } => format!("check: {}", probe.command),
            Task::FetchKubeconfig { remote } => format!("fetch {} -> installation kubeconfig", remote),
        }
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<Option<String>> {
        match self {
            Task::Run {
                description,
                command,
                critical,
                unless,
            } => {
                if let Some(probe) = unless {
                    if probe.check(ctx).await? {
                        debug!("{}: already satisfied", description);
                        return Ok(Some(format!("{} (already done)", description)));
                    }
                }
                info!("{} on {}", description, ctx.host_label());
                match ctx.run(command).await {
                    Ok(_) => Ok(None),
                    Err(e) if !critical && is_command_failure(&e) => {
                        warn!("Non-critical task '{}' failed: {}", description, e);
                        Ok(Some(format!("{} failed (ignored)", description)))
                    }
                    Err(e) => Err(e),
                }
            }
            Task::Capture {
                description,
                command,
                fact,
            } => {
                let output = ctx.run(command).await?;
                let value = output.stdout.trim();
                if value.is_empty() {
                    return Err(InstallerError::step(
                        ctx.step_name,
                        ctx.host_label(),
                        format!("{} produced no output", description),
                    ));
                }
                ctx.facts.set(fact.as_str(), value).await;
                debug!("Captured fact {}", fact);
                Ok(None)
            }
            Task::WaitFor {
                description,
                probe,
                interval,
                attempts,
                fatal,
            } => {
                let attempts = (*attempts).max(1);
                for attempt in 1..=attempts {
                    if probe.check(ctx).await? {
                        debug!("{} satisfied after {} attempts", description, attempt);
                        return Ok(None);
                    }
                    if attempt < attempts {
                        ctx.sleeper.sleep(*interval).await;
                    }
                }
                if *fatal {
                    Err(InstallerError::timeout(format!(
                        "Timed out waiting for {} on {}",
                        description,
                        ctx.host_label()
                    )))
                } else {
                    warn!("Gave up waiting for {}", description);
                    Ok(Some(format!("{} not confirmed", description)))
                }
            }
            Task::Check { description, probe } => {
                if probe.check(ctx).await? {
                    Ok(None)
                } else {
                    Err(InstallerError::command_failed(
                        ctx.step_name,
                        ctx.host_label(),
                        probe.command.as_str(),
                        None,
                        format!("Check failed: {}", description),
                    ))
                }
            }
            Task::FetchKubeconfig { remote } => {
                ctx.executor
                    .fetch_file(ctx.host, remote, ctx.kubeconfig_path)
                    .await?;
                Ok(Some(format!(
                    "Kubeconfig written to {}",
                    ctx.kubeconfig_path.display()
                )))
            }
        }
    }
}

fn is_command_failure(error: &InstallerError) -> bool {
    matches!(
        error,
        InstallerError::StepExecution { .. } | InstallerError::Timeout(_)
    )
}

/// Ordered tasks with an optional probe that skips the whole script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    skip_when: Option<Probe>,
    tasks: Vec<Task>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip every task when `probe` passes
    pub fn skip_when(mut self, probe: Probe) -> Self {
        self.skip_when = Some(probe);
        self
    }

    pub fn run(self, description: impl Into<String>, command: impl Into<String>) -> Self {
        self.push_run(description.into(), command.into(), true, None)
    }

    pub fn run_optional(self, description: impl Into<String>, command: impl Into<String>) -> Self {
        self.push_run(description.into(), command.into(), false, None)
    }

    pub fn run_unless(
        self,
        description: impl Into<String>,
        command: impl Into<String>,
        probe: Probe,
    ) -> Self {
        self.push_run(description.into(), command.into(), true, Some(probe))
    }

    fn push_run(
        mut self,
        description: String,
        command: String,
        critical: bool,
        unless: Option<Probe>,
    ) -> Self {
        self.tasks.push(Task::Run {
            description,
            command,
            critical,
            unless,
        });
        self
    }

    pub fn capture(
        mut self,
        description: impl Into<String>,
        command: impl Into<String>,
        fact: impl Into<String>,
    ) -> Self {
        self.tasks.push(Task::Capture {
            description: description.into(),
            command: command.into(),
            fact: fact.into(),
        });
        self
    }

    /// Poll every `interval` for up to `timeout`, failing the step afterwards
    pub fn wait_for(
        self,
        description: impl Into<String>,
        probe: Probe,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        self.push_wait(description.into(), probe, interval, timeout, true)
    }

    /// Like `wait_for` but only warns when the probe never passes
    pub fn wait_for_optional(
        self,
        description: impl Into<String>,
        probe: Probe,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        self.push_wait(description.into(), probe, interval, timeout, false)
    }

    fn push_wait(
        mut self,
        description: String,
        probe: Probe,
        interval: Duration,
        timeout: Duration,
        fatal: bool,
    ) -> Self {
        let attempts = if interval.is_zero() {
            1
        } else {
            (timeout.as_secs_f64() / interval.as_secs_f64()).ceil().max(1.0) as u32
        };
        self.tasks.push(Task::WaitFor {
            description,
            probe,
            interval,
            attempts,
            fatal,
        });
        self
    }

    pub fn check(mut self, description: impl Into<String>, probe: Probe) -> Self {
        self.tasks.push(Task::Check {
            description: description.into(),
            probe,
        });
        self
    }

    pub fn fetch_kubeconfig(mut self, remote: impl Into<String>) -> Self {
        self.tasks.push(Task::FetchKubeconfig {
            remote: remote.into(),
        });
        self
    }

    /// Append `other`'s tasks; its skip probe is dropped
    pub fn extend(mut self, other: Script) -> Self {
        self.tasks.extend(other.tasks);
        self
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }
}

#[async_trait]
impl StepAction for Script {
    async fn run(&self, ctx: &StepContext<'_>) -> Result<Option<String>> {
        if let Some(probe) = &self.skip_when {
            if probe.check(ctx).await? {
                info!(
                    "{} already completed on {}, skipping",
                    ctx.step_name,
                    ctx.host_label()
                );
                return Ok(Some("Already completed, skipped".to_string()));
            }
        }

        let mut notes = Vec::new();
        for task in &self.tasks {
            if let Some(note) = task.execute(ctx).await? {
                notes.push(note);
            }
        }

        Ok(if notes.is_empty() {
            None
        } else {
            Some(notes.join("\n"))
        })
    }

    fn outline(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(probe) = &self.skip_when {
            lines.push(format!("skip when: {}", probe.command));
        }
        lines.extend(self.tasks.iter().map(Task::outline));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstallationConfig, Settings};
    use crate::installer::retry::{CancelFlag, Sleeper};
    use crate::network::mock::ScriptedExecutor;
    use crate::steps::FactStore;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingSleeper(Mutex<Vec<Duration>>);

    #[async_trait]
    impl Sleeper for CountingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    struct Harness {
        config: InstallationConfig,
        settings: Settings,
        executor: ScriptedExecutor,
        cancel: CancelFlag,
        sleeper: CountingSleeper,
        facts: FactStore,
    }

    impl Harness {
        fn new(executor: ScriptedExecutor) -> Self {
            let settings = Settings::default();
            Self {
                config: InstallationConfig::all_in_one(&settings),
                settings,
                executor,
                cancel: CancelFlag::new(),
                sleeper: CountingSleeper::default(),
                facts: FactStore::new(),
            }
        }

        fn ctx(&self) -> StepContext<'_> {
            StepContext {
                installation_id: "ab12cd34",
                step_name: "Test Step",
                config: &self.config,
                settings: &self.settings,
                host: None,
                executor: &self.executor,
                timeout: Duration::from_secs(30),
                cancel: &self.cancel,
                sleeper: &self.sleeper,
                kubeconfig_path: Path::new("/tmp/config-ab12cd34"),
                facts: &self.facts,
            }
        }
    }

    #[test]
    fn test_rows_match() {
        let ready = "cp-1   Ready    control-plane   5m   v1.30.2\n";
        let not_ready = "cp-1   NotReady control-plane   5m   v1.30.2\n";
        let accepted = vec!["Ready".to_string()];

        assert!(rows_match(ready, 1, &accepted));
        assert!(!rows_match(not_ready, 1, &accepted));
        assert!(!rows_match("\n", 1, &accepted));
    }

    #[tokio::test]
    async fn test_skip_probe_short_circuits() {
        // Arrange
        let executor = ScriptedExecutor::new().respond("which kubeadm", CommandOutput::ok("/usr/bin/kubeadm"));
        let harness = Harness::new(executor);
        let script = Script::new()
            .skip_when(Probe::non_empty("which kubeadm"))
            .run("Install packages", "apt-get install -y kubeadm");

        // Act
        let note = StepAction::run(&script, &harness.ctx()).await.unwrap();

        // Assert
        assert_eq!(note.as_deref(), Some("Already completed, skipped"));
        assert!(!harness.executor.ran("apt-get install"));
    }

    #[tokio::test]
    async fn test_non_critical_failure_is_ignored() {
        let executor = ScriptedExecutor::new().respond("apt-mark", CommandOutput::failed(100, "locked"));
        let harness = Harness::new(executor);
        let script = Script::new()
            .run_optional("Hold packages", "apt-mark hold kubelet")
            .run("Enable kubelet", "systemctl enable --now kubelet");

        let note = StepAction::run(&script, &harness.ctx()).await.unwrap();

        assert_eq!(note.as_deref(), Some("Hold packages failed (ignored)"));
        assert!(harness.executor.ran("systemctl enable --now kubelet"));
    }

    #[tokio::test]
    async fn test_critical_failure_carries_command_context() {
        let executor = ScriptedExecutor::new().respond("kubeadm init", CommandOutput::failed(1, "port 6443 in use"));
        let harness = Harness::new(executor);
        let script = Script::new().run("Initialize", "kubeadm init --pod-network-cidr=10.10.0.0/16");

        let err = StepAction::run(&script, &harness.ctx()).await.unwrap_err();

        match err {
            InstallerError::StepExecution {
                step,
                command,
                exit_code,
                message,
                ..
            } => {
                assert_eq!(step, "Test Step");
                assert_eq!(command.as_deref(), Some("kubeadm init --pod-network-cidr=10.10.0.0/16"));
                assert_eq!(exit_code, Some(1));
                assert_eq!(message, "port 6443 in use");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_capture_then_render() {
        let executor = ScriptedExecutor::new()
            .respond("token create", CommandOutput::ok("kubeadm join lb:6443 --token t\n"));
        let harness = Harness::new(executor);
        let script = Script::new()
            .capture("Join command", "kubeadm token create --print-join-command", "join_command")
            .run("Join", "{{join_command}} --control-plane");

        StepAction::run(&script, &harness.ctx()).await.unwrap();

        assert!(harness.executor.ran("kubeadm join lb:6443 --token t --control-plane"));
    }

    #[tokio::test]
    async fn test_wait_for_polls_with_sleeper() {
        let executor = ScriptedExecutor::new().respond("get nodes", CommandOutput::ok("cp-1 NotReady"));
        let harness = Harness::new(executor);
        let script = Script::new().wait_for(
            "nodes Ready",
            Probe::rows("kubectl get nodes --no-headers", 1, &["Ready"]),
            Duration::from_secs(10),
            Duration::from_secs(30),
        );

        let err = StepAction::run(&script, &harness.ctx()).await.unwrap_err();

        assert!(matches!(err, InstallerError::Timeout(_)));
        assert_eq!(harness.sleeper.0.lock().unwrap().len(), 2);
        assert_eq!(harness.executor.count("get nodes"), 3);
    }

    #[test]
    fn test_outline_lists_tasks() {
        let script = Script::new()
            .skip_when(Probe::file_exists("/etc/kubernetes/admin.conf"))
            .run_optional("Pull images", "kubeadm config images pull");

        let lines = script.outline();

        assert_eq!(
            lines,
            vec![
                "skip when: test -f /etc/kubernetes/admin.conf && echo present".to_string(),
                "kubeadm config images pull  (non-critical)".to_string(),
            ]
        );
    }
}
