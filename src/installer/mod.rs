// file: src/installer/mod.rs
// version: 2.0.0
// guid: g7h8i9j0-k1l2-3456-7890-abcdef123456

//! Installation state machine
//!
//! An `Installer` owns one validated config, its step sequence and its
//! progress record. `run` drives it through validation, the steps and
//! verification; pollers read `progress` concurrently.

pub mod cluster_info;
pub mod factory;
pub mod preflight;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod service;
pub mod verification;

pub use cluster_info::{ClusterInfo, ClusterNode};
pub use factory::{new_installation_id, ExecutorFactory, InstallerFactory};
pub use progress::{InstallationProgress, ProgressTracker, Status};
pub use registry::Registry;
pub use retry::{CancelFlag, RetryPolicy, Sleeper, TokioSleeper};
pub use service::InstallerService;

use crate::config::{InstallationConfig, InstallationMode, NodeConfig, Settings};
use crate::error::InstallerError;
use crate::logging::installation_span;
use crate::network::RemoteExecutor;
use crate::steps::{host_label, FactStore, InstallationStep, StepContext, StepPhase, StepResult};
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn, Instrument};
use verification::Verifier;

enum StepOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// One installation: config, steps, connections and progress
pub struct Installer {
    id: String,
    config: Arc<InstallationConfig>,
    settings: Arc<Settings>,
    steps: Vec<InstallationStep>,
    executor: Arc<dyn RemoteExecutor>,
    sleeper: Arc<dyn Sleeper>,
    progress: ProgressTracker,
    cancel: CancelFlag,
    facts: FactStore,
    kubeconfig_path: PathBuf,
    cluster_info: RwLock<Option<ClusterInfo>>,
}

impl Installer {
    /// Build an installer in `pending`; the config must already be validated
    pub fn new(
        id: impl Into<String>,
        config: InstallationConfig,
        settings: Arc<Settings>,
        steps: Vec<InstallationStep>,
        executor: Arc<dyn RemoteExecutor>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let id = id.into();
        let kubeconfig_path = settings.kubeconfig_path(&id);
        debug!(
            "Created {} installer {} with {} steps",
            config.mode,
            id,
            steps.len()
        );

        Self {
            progress: ProgressTracker::new(id.clone(), steps.len()),
            id,
            config: Arc::new(config),
            settings,
            steps,
            executor,
            sleeper,
            cancel: CancelFlag::new(),
            facts: FactStore::new(),
            kubeconfig_path,
            cluster_info: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> InstallationMode {
        self.config.mode
    }

    pub fn config(&self) -> &InstallationConfig {
        &self.config
    }

    pub fn steps(&self) -> &[InstallationStep] {
        &self.steps
    }

    pub fn kubeconfig_path(&self) -> &Path {
        &self.kubeconfig_path
    }

    /// Consistent snapshot of the progress record
    pub async fn progress(&self) -> InstallationProgress {
        self.progress.snapshot().await
    }

    pub async fn status(&self) -> Status {
        self.progress.status().await
    }

    /// Cluster facts, present once the installation succeeded
    pub async fn cluster_info(&self) -> Option<ClusterInfo> {
        self.cluster_info.read().await.clone()
    }

    /// Request cancellation
    ///
    /// Takes effect at the next step boundary or retry backoff; a command
    /// already running is left to finish and its result is discarded.
    pub async fn cancel(&self) -> Result<()> {
        if self.progress.cancel(&self.cancel).await {
            info!("Installation {} cancelled", self.id);
            return Ok(());
        }

        match self.progress.status().await {
            Status::Cancelled => Ok(()),
            status => Err(self.already_terminal(status)),
        }
    }

    fn already_terminal(&self, status: Status) -> InstallerError {
        InstallerError::AlreadyTerminal {
            id: self.id.clone(),
            status: status.to_string(),
        }
    }

    /// Run the installation to a terminal state
    ///
    /// Never returns an error: every failure ends up in the progress record.
    pub async fn run(&self) {
        let span = installation_span(&self.id, self.config.mode.as_str());
        self.execute().instrument(span).await;
        self.executor.close_all().await;
    }

    /// Run on a separate task so a panic becomes a `failed` status
    pub async fn run_guarded(self: Arc<Self>) {
        let worker = Arc::clone(&self);
        let handle = tokio::spawn(async move { worker.run().await });

        if let Err(e) = handle.await {
            let step = self
                .progress
                .current_step_name()
                .await
                .unwrap_or_else(|| "initialization".to_string());
            let message = format!("Unexpected internal error during step '{}'", step);
            error!("Installation {}: {}: {}", self.id, message, e);
            self.progress.fail(message, None).await;
            self.executor.close_all().await;
        }
    }

    async fn execute(&self) {
        if self.cancel.is_cancelled() {
            self.finish_cancelled().await;
            return;
        }

        info!(
            "Starting {} installation {} ({} steps)",
            self.config.mode,
            self.id,
            self.steps.len()
        );

        self.progress.set_status(Status::Validating).await;
        let failures =
            preflight::run_preflight(&self.config, &self.settings, self.executor.as_ref()).await;
        if !failures.is_empty() {
            let message = format!("Pre-installation checks failed: {}", failures.join("; "));
            error!("{}", message);
            self.progress.fail(message, None).await;
            return;
        }

        if self.cancel.is_cancelled() {
            self.finish_cancelled().await;
            return;
        }
        self.progress.set_status(Status::Installing).await;

        for (index, step) in self.steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.finish_cancelled().await;
                return;
            }
            if step.phase == StepPhase::Configure {
                self.progress.set_status(Status::Configuring).await;
            }

            match self.run_step(index, step).await {
                StepOutcome::Completed => {}
                StepOutcome::Failed => return,
                StepOutcome::Cancelled => {
                    self.finish_cancelled().await;
                    return;
                }
            }
        }

        if self.cancel.is_cancelled() {
            self.finish_cancelled().await;
            return;
        }
        self.verify().await;
    }

    async fn verify(&self) {
        self.progress.set_status(Status::Verifying).await;
        info!("Verifying cluster health");

        let verifier = Verifier {
            installation_id: &self.id,
            config: &self.config,
            settings: &self.settings,
            executor: self.executor.as_ref(),
            sleeper: self.sleeper.as_ref(),
            cancel: &self.cancel,
            kubeconfig_path: &self.kubeconfig_path,
        };

        match verifier.verify().await {
            Ok(info) => {
                *self.cluster_info.write().await = Some(info);
                if self.progress.succeed().await {
                    info!("Installation {} completed successfully", self.id);
                }
            }
            Err(_) if self.cancel.is_cancelled() => self.finish_cancelled().await,
            Err(e) => {
                error!("Installation {} failed verification: {}", self.id, e);
                self.progress.fail(e.to_string(), None).await;
            }
        }
    }

    async fn finish_cancelled(&self) {
        if self.progress.mark_cancelled().await {
            info!("Installation {} cancelled", self.id);
        } else {
            debug!("Installation {} stopped after cancellation", self.id);
        }
    }

    /// Run one step on every host it targets, in order
    async fn run_step(&self, index: usize, step: &InstallationStep) -> StepOutcome {
        let number = index + 1;
        self.progress.begin_step(&step.name).await;
        info!(
            "Step {}/{}: {} on {}",
            number,
            self.steps.len(),
            step.name,
            step.target
        );

        let hosts = step.target.resolve(&self.config);
        if hosts.is_empty() {
            debug!("Step '{}' has no target hosts", step.name);
            let result = StepResult::success(
                &step.name,
                Duration::ZERO,
                Some("no target hosts".to_string()),
                None,
            );
            self.progress.record_result(result, Some(number)).await;
            return StepOutcome::Completed;
        }

        let last = hosts.len() - 1;
        for (position, host) in hosts.into_iter().enumerate() {
            let Some(result) = self.run_on_host(step, host).await else {
                return StepOutcome::Cancelled;
            };

            if self.cancel.is_cancelled() {
                warn!(
                    "Discarding result of '{}' on {}: installation was cancelled",
                    step.name,
                    host_label(host)
                );
                return StepOutcome::Cancelled;
            }

            if !result.success {
                let message = result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("Step '{}' failed", step.name));
                self.progress.fail(message, Some(result)).await;
                return StepOutcome::Failed;
            }

            let completed = (position == last).then_some(number);
            self.progress.record_result(result, completed).await;
        }

        StepOutcome::Completed
    }

    /// Attempt a step on one host with retries; `None` when cancelled between attempts
    async fn run_on_host(
        &self,
        step: &InstallationStep,
        host: Option<&NodeConfig>,
    ) -> Option<StepResult> {
        let label = host_label(host);
        let node = host.map(|h| h.host.clone());
        let policy = RetryPolicy::new(
            step.effective_retries(&self.settings),
            self.settings.retry_delay(),
        );
        let started = Instant::now();
        let mut retries = 0;

        loop {
            match self.attempt(step, host).await {
                Ok(output) => {
                    info!(
                        "Step '{}' succeeded on {} in {:.2}s",
                        step.name,
                        label,
                        started.elapsed().as_secs_f64()
                    );
                    return Some(StepResult::success(&step.name, started.elapsed(), output, node));
                }
                Err(e) if e.is_retryable()
                    && policy.allows_retry(retries)
                    && !self.cancel.is_cancelled() =>
                {
                    retries += 1;
                    let delay = policy.delay_for(retries);
                    warn!(
                        "Step '{}' failed on {} (retry {}/{} in {}s): {}",
                        step.name,
                        label,
                        retries,
                        policy.max_retries,
                        delay.as_secs(),
                        e
                    );
                    self.sleeper.sleep(delay).await;
                    if self.cancel.is_cancelled() {
                        return None;
                    }
                }
                Err(e) => {
                    error!("Step '{}' failed on {}: {}", step.name, label, e);
                    return Some(StepResult::failure(
                        &step.name,
                        started.elapsed(),
                        e.to_string(),
                        node,
                    ));
                }
            }
        }
    }

    async fn attempt(&self, step: &InstallationStep, host: Option<&NodeConfig>) -> Result<Option<String>> {
        let timeout = step.effective_timeout(&self.settings);
        let ctx = StepContext {
            installation_id: &self.id,
            step_name: &step.name,
            config: self.config.as_ref(),
            settings: self.settings.as_ref(),
            host,
            executor: self.executor.as_ref(),
            timeout,
            cancel: &self.cancel,
            sleeper: self.sleeper.as_ref(),
            kubeconfig_path: &self.kubeconfig_path,
            facts: &self.facts,
        };

        match tokio::time::timeout(timeout, step.action.run(&ctx)).await {
            Ok(result) => result,
            Err(_) => Err(InstallerError::timeout(format!(
                "Step '{}' timed out after {}s on {}",
                step.name,
                timeout.as_secs(),
                host_label(host)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::mock::ScriptedExecutor;
    use crate::network::CommandOutput;
    use crate::steps::{FnAction, Script};
    use async_trait::async_trait;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper(Mutex<Vec<Duration>>);

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    /// Cancels its installer the first time anything waits
    #[derive(Default)]
    struct CancellingSleeper {
        target: std::sync::OnceLock<Arc<Installer>>,
        sleeps: AtomicU32,
    }

    #[async_trait]
    impl Sleeper for CancellingSleeper {
        async fn sleep(&self, _duration: Duration) {
            self.sleeps.fetch_add(1, Ordering::SeqCst);
            if let Some(installer) = self.target.get() {
                installer.cancel().await.unwrap();
            }
        }
    }

    fn cancelling_installer(
        steps: Vec<InstallationStep>,
        executor: Arc<ScriptedExecutor>,
    ) -> (Arc<Installer>, Arc<CancellingSleeper>) {
        let sleeper = Arc::new(CancellingSleeper::default());
        let installer = Arc::new(installer(steps, executor, sleeper.clone()));
        let _ = sleeper.target.set(Arc::clone(&installer));
        (installer, sleeper)
    }

    fn healthy_executor() -> ScriptedExecutor {
        ScriptedExecutor::new()
            .respond(
                "cluster-info",
                CommandOutput::ok("Kubernetes control plane is running at https://127.0.0.1:6443"),
            )
            .respond("uniq -c", CommandOutput::ok("      6 kube-system\n"))
            .respond(
                "get nodes",
                CommandOutput::ok("node-1   Ready   control-plane   2m   v1.30.2   10.0.0.5\n"),
            )
            .respond(
                "get pods",
                CommandOutput::ok("cilium-abcde   1/1   Running   0   2m\n"),
            )
    }

    fn installer(
        steps: Vec<InstallationStep>,
        executor: Arc<ScriptedExecutor>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Installer {
        let settings = Settings::default();
        let config = InstallationConfig::all_in_one(&settings);
        Installer::new("abcd1234", config, Arc::new(settings), steps, executor, sleeper)
    }

    fn command_step(name: &str, command: &str) -> InstallationStep {
        InstallationStep::new(name, name, Script::new().run(name, command))
    }

    #[tokio::test]
    async fn test_runs_steps_then_verifies() {
        // Arrange
        let executor = Arc::new(healthy_executor());
        let sleeper = Arc::new(RecordingSleeper::default());
        let steps = vec![
            command_step("one", "echo one"),
            command_step("two", "echo two").configure(),
        ];
        let installer = installer(steps, executor.clone(), sleeper);

        // Act
        installer.run().await;

        // Assert
        let progress = installer.progress().await;
        assert_eq!(progress.status, Status::Success);
        assert_eq!(progress.current_step, 2);
        assert_eq!(progress.progress_percentage(), 100.0);
        assert!(installer.cluster_info().await.is_some());
        assert_eq!(executor.close_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_with_linear_backoff() {
        // Arrange
        let executor = Arc::new(
            healthy_executor().respond("flaky", CommandOutput::failed(1, "boom")),
        );
        let sleeper = Arc::new(RecordingSleeper::default());
        let steps = vec![command_step("flaky", "flaky-command").retries(3)];
        let installer = installer(steps, executor.clone(), sleeper.clone());

        // Act
        installer.run().await;

        // Assert
        let progress = installer.progress().await;
        assert_eq!(progress.status, Status::Failed);
        assert_eq!(executor.count("flaky-command"), 4);
        assert_eq!(
            *sleeper.0.lock().unwrap(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(15)
            ]
        );
        assert_eq!(progress.step_results.len(), 1);
        assert!(!progress.step_results[0].success);
        assert_eq!(progress.current_step, 0);
    }

    #[tokio::test]
    async fn test_validation_errors_are_never_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let action = FnAction::new(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(InstallerError::validation("bad input")) }.boxed()
        });
        let steps = vec![InstallationStep::new("bad", "bad", action).retries(3)];
        let installer = installer(
            steps,
            Arc::new(healthy_executor()),
            Arc::new(RecordingSleeper::default()),
        );

        installer.run().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(installer.status().await, Status::Failed);
    }

    #[tokio::test]
    async fn test_step_timeout_is_enforced() {
        // Arrange
        let action = FnAction::new(|_ctx| {
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(None)
            }
            .boxed()
        });
        let mut step = InstallationStep::new("slow", "slow", action).no_retry();
        step.timeout = Some(Duration::from_millis(20));
        let installer = installer(
            vec![step],
            Arc::new(healthy_executor()),
            Arc::new(RecordingSleeper::default()),
        );

        // Act
        installer.run().await;

        // Assert
        let progress = installer.progress().await;
        assert_eq!(progress.status, Status::Failed);
        assert!(progress
            .error_message
            .unwrap()
            .contains("Step 'slow' timed out after 0s on localhost"));
    }

    #[tokio::test]
    async fn test_preflight_failure_stops_before_steps() {
        // Arrange
        let executor = Arc::new(
            healthy_executor().respond("command -v kubeadm-missing", CommandOutput::failed(1, "")),
        );
        let mut settings = Settings::default();
        settings.preflight.required_binaries = vec!["kubeadm-missing".to_string()];
        let config = InstallationConfig::all_in_one(&settings);
        let installer = Installer::new(
            "abcd1234",
            config,
            Arc::new(settings),
            vec![command_step("one", "echo one")],
            executor.clone(),
            Arc::new(RecordingSleeper::default()),
        );

        // Act
        installer.run().await;

        // Assert
        let progress = installer.progress().await;
        assert_eq!(progress.status, Status::Failed);
        assert_eq!(
            progress.error_message.as_deref(),
            Some("Pre-installation checks failed: localhost: required binary 'kubeadm-missing' not found")
        );
        assert!(!executor.ran("echo one"));
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let installer = installer(
            vec![command_step("one", "echo one")],
            Arc::new(healthy_executor()),
            Arc::new(RecordingSleeper::default()),
        );

        installer.cancel().await.unwrap();
        installer.run().await;

        let progress = installer.progress().await;
        assert_eq!(progress.status, Status::Cancelled);
        assert!(progress.step_results.is_empty());
        // Cancelling twice is fine
        assert!(installer.cancel().await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_after_failure_is_rejected() {
        let executor = Arc::new(healthy_executor().respond("boom", CommandOutput::failed(2, "")));
        let installer = installer(
            vec![command_step("boom", "boom").no_retry()],
            executor,
            Arc::new(RecordingSleeper::default()),
        );
        installer.run().await;

        let err = installer.cancel().await.unwrap_err();

        assert!(matches!(err, InstallerError::AlreadyTerminal { .. }));
        assert_eq!(err.to_string(), "Installation abcd1234 is already failed");
    }

    #[tokio::test]
    async fn test_panicking_step_is_reported() {
        // Arrange
        let action = FnAction::new(|ctx| {
            async move {
                if ctx.step_name == "Explode" {
                    panic!("step exploded");
                }
                Ok(None)
            }
            .boxed()
        });
        let installer = Arc::new(installer(
            vec![InstallationStep::new("Explode", "panics", action)],
            Arc::new(healthy_executor()),
            Arc::new(RecordingSleeper::default()),
        ));

        // Act
        installer.clone().run_guarded().await;

        // Assert
        let progress = installer.progress().await;
        assert_eq!(progress.status, Status::Failed);
        assert_eq!(
            progress.error_message.as_deref(),
            Some("Unexpected internal error during step 'Explode'")
        );
    }

    #[tokio::test]
    async fn test_unset_retry_budget_comes_from_settings() {
        // Arrange
        let executor = Arc::new(
            healthy_executor().respond("always-fails", CommandOutput::failed(1, "nope")),
        );
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut settings = Settings::default();
        settings.k8s.max_retries = 1;
        let config = InstallationConfig::all_in_one(&settings);
        let installer = Installer::new(
            "abcd1234",
            config,
            Arc::new(settings),
            vec![command_step("Install Packages", "always-fails")],
            executor.clone(),
            sleeper.clone(),
        );

        // Act
        installer.run().await;

        // Assert
        assert_eq!(installer.status().await, Status::Failed);
        assert_eq!(executor.count("always-fails"), 2);
        assert_eq!(*sleeper.0.lock().unwrap(), vec![Duration::from_secs(5)]);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_skips_remaining_attempts() {
        // Arrange
        let executor = Arc::new(
            healthy_executor().respond("flaky-command", CommandOutput::failed(1, "boom")),
        );
        let steps = vec![
            command_step("flaky", "flaky-command").retries(3),
            command_step("after", "echo after"),
        ];
        let (installer, sleeper) = cancelling_installer(steps, executor.clone());

        // Act
        installer.run().await;

        // Assert
        let progress = installer.progress().await;
        assert_eq!(progress.status, Status::Cancelled);
        assert_eq!(executor.count("flaky-command"), 1);
        assert_eq!(sleeper.sleeps.load(Ordering::SeqCst), 1);
        assert!(progress.step_results.is_empty());
        assert!(!executor.ran("echo after"));
        assert_eq!(executor.close_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_verifying() {
        // Arrange
        // cluster-info never reports a running control plane, so verification polls
        let executor = Arc::new(ScriptedExecutor::new());
        let (installer, sleeper) =
            cancelling_installer(vec![command_step("one", "echo one")], executor.clone());

        // Act
        installer.run().await;

        // Assert
        let progress = installer.progress().await;
        assert_eq!(progress.status, Status::Cancelled);
        assert_eq!(progress.error_message.as_deref(), Some("Installation cancelled"));
        assert_eq!(progress.step_results.len(), 1);
        assert_eq!(progress.current_step, 1);
        assert_eq!(sleeper.sleeps.load(Ordering::SeqCst), 1);
        assert_eq!(executor.count("cluster-info"), 1);
        assert!(installer.cluster_info().await.is_none());
    }
}
