// file: src/installer/progress.rs
// version: 1.0.0
// guid: 6f1b3d85-0e4a-4c29-9a7d-b25e8c4f1a03

//! Installation lifecycle status and the lock-guarded progress record

use super::retry::CancelFlag;
use crate::steps::{round2, StepResult};
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use tokio::sync::RwLock;
use tracing::debug;

/// Installation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Validating,
    Installing,
    Configuring,
    Verifying,
    Success,
    Failed,
    Cancelled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Validating => "validating",
            Status::Installing => "installing",
            Status::Configuring => "configuring",
            Status::Verifying => "verifying",
            Status::Success => "success",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Failed | Status::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            Status::Pending => 0,
            Status::Validating => 1,
            Status::Installing => 2,
            Status::Configuring => 3,
            Status::Verifying => 4,
            Status::Success | Status::Failed | Status::Cancelled => 5,
        }
    }

    /// Forward-only transitions; terminal states never change
    pub fn can_transition_to(&self, next: Status) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return next != Status::Success || *self == Status::Verifying;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one installation
#[derive(Debug, Clone, PartialEq)]
pub struct InstallationProgress {
    pub installation_id: String,
    pub current_step: usize,
    pub total_steps: usize,
    pub status: Status,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub step_results: Vec<StepResult>,
    /// Step currently running, for display only
    pub current_step_name: Option<String>,
}

impl InstallationProgress {
    pub fn new(installation_id: impl Into<String>, total_steps: usize) -> Self {
        Self {
            installation_id: installation_id.into(),
            current_step: 0,
            total_steps,
            status: Status::Pending,
            start_time: Utc::now(),
            end_time: None,
            error_message: None,
            step_results: Vec::new(),
            current_step_name: None,
        }
    }

    /// `current_step / total_steps * 100`, rounded to two decimals
    pub fn progress_percentage(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        round2(self.current_step as f64 / self.total_steps as f64 * 100.0)
    }

    /// Seconds since start, up to `end_time` once terminal
    pub fn duration(&self) -> f64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        let millis = (end - self.start_time).num_milliseconds().max(0);
        round2(millis as f64 / 1000.0)
    }

    pub fn failed_results(&self) -> impl Iterator<Item = &StepResult> {
        self.step_results.iter().filter(|r| !r.success)
    }
}

impl Serialize for InstallationProgress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("InstallationProgress", 10)?;
        state.serialize_field("installation_id", &self.installation_id)?;
        state.serialize_field("current_step", &self.current_step)?;
        state.serialize_field("total_steps", &self.total_steps)?;
        state.serialize_field("status", &self.status)?;
        state.serialize_field("progress_percentage", &self.progress_percentage())?;
        state.serialize_field("duration", &self.duration())?;
        state.serialize_field("start_time", &self.start_time)?;
        state.serialize_field("end_time", &self.end_time)?;
        state.serialize_field("error_message", &self.error_message)?;
        state.serialize_field("step_results", &self.step_results)?;
        state.end()
    }
}

/// Lock-guarded progress owned by one installer
///
/// Every mutation happens under a single write lock so readers never see a
/// step counter that disagrees with the recorded results.
#[derive(Debug)]
pub struct ProgressTracker {
    inner: RwLock<InstallationProgress>,
}

impl ProgressTracker {
    pub fn new(installation_id: impl Into<String>, total_steps: usize) -> Self {
        Self {
            inner: RwLock::new(InstallationProgress::new(installation_id, total_steps)),
        }
    }

    pub async fn snapshot(&self) -> InstallationProgress {
        self.inner.read().await.clone()
    }

    pub async fn status(&self) -> Status {
        self.inner.read().await.status
    }

    pub async fn current_step_name(&self) -> Option<String> {
        self.inner.read().await.current_step_name.clone()
    }

    /// Move to `status` if allowed; returns whether the status changed
    pub async fn set_status(&self, status: Status) -> bool {
        let mut progress = self.inner.write().await;
        if !progress.status.can_transition_to(status) {
            debug!(
                "Ignoring status change {} -> {} for {}",
                progress.status, status, progress.installation_id
            );
            return false;
        }
        progress.status = status;
        if status.is_terminal() {
            progress.end_time = Some(Utc::now());
        }
        true
    }

    pub async fn begin_step(&self, name: &str) {
        self.inner.write().await.current_step_name = Some(name.to_string());
    }

    /// Append a result and, when `completed` is set, move the step counter to it
    pub async fn record_result(&self, result: StepResult, completed: Option<usize>) {
        let mut progress = self.inner.write().await;
        if progress.status.is_terminal() {
            debug!(
                "Dropping result for '{}': installation already {}",
                result.step_name, progress.status
            );
            return;
        }
        progress.step_results.push(result);
        if let Some(step) = completed {
            if step > progress.current_step {
                progress.current_step = step.min(progress.total_steps);
            }
        }
    }

    /// Record `FAILED` with `message`, appending the failing result in the same update
    pub async fn fail(&self, message: impl Into<String>, result: Option<StepResult>) -> bool {
        let mut progress = self.inner.write().await;
        if progress.status.is_terminal() {
            return false;
        }
        if let Some(result) = result {
            progress.step_results.push(result);
        }
        progress.status = Status::Failed;
        progress.error_message = Some(message.into());
        progress.end_time = Some(Utc::now());
        progress.current_step_name = None;
        true
    }

    pub async fn succeed(&self) -> bool {
        let changed = self.set_status(Status::Success).await;
        if changed {
            self.inner.write().await.current_step_name = None;
        }
        changed
    }

    pub async fn mark_cancelled(&self) -> bool {
        let mut progress = self.inner.write().await;
        Self::apply_cancel(&mut progress)
    }

    /// Raise `flag` and record `CANCELLED` in one update
    ///
    /// A result recorded after this returns is dropped, and no reader can
    /// observe `cancelled` with the flag still lowered. Leaves a terminal
    /// installation and its flag untouched.
    pub async fn cancel(&self, flag: &CancelFlag) -> bool {
        let mut progress = self.inner.write().await;
        if progress.status.is_terminal() {
            return false;
        }
        flag.cancel();
        Self::apply_cancel(&mut progress)
    }

    fn apply_cancel(progress: &mut InstallationProgress) -> bool {
        if progress.status.is_terminal() {
            return false;
        }
        progress.status = Status::Cancelled;
        progress.error_message = Some("Installation cancelled".to_string());
        progress.end_time = Some(Utc::now());
        progress.current_step_name = None;
        true
    }
}
