//! Persisted campaign and run records.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between the components of a run key.
pub const KEY_SEPARATOR: char = '|';

/// Build the key that identifies a run within a campaign.
pub fn run_key(model_name: &str, engine_name: &str, quant: &str) -> String {
    format!("{model_name}{KEY_SEPARATOR}{engine_name}{KEY_SEPARATOR}{quant}")
}

/// Status of a single run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl RunStatus {
    /// Whether the run reached an outcome in the invocation that recorded it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed | RunStatus::Skipped)
    }

    /// Whether the run counts as done for resume purposes.
    ///
    /// Skipped runs are not done: they were denied for resource reasons and
    /// are retried on the next invocation.
    pub fn is_done(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a whole campaign.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Running,
    Completed,
}

/// Persisted record for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    pub model_name: String,
    pub engine_name: String,
    pub quant: String,
    pub status: RunStatus,
    /// Wall time of the run in seconds (0 until it finishes).
    pub duration_s: f64,
    /// Directory holding the benchmark output, if any.
    pub output_dir: Option<String>,
    /// Failure or skip reason.
    pub error: Option<String>,
    /// Set when the run reaches a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Create a pending run record.
    pub fn pending(model_name: &str, engine_name: &str, quant: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            engine_name: engine_name.to_string(),
            quant: quant.to_string(),
            status: RunStatus::Pending,
            duration_s: 0.0,
            output_dir: None,
            error: None,
            completed_at: None,
        }
    }

    pub fn key(&self) -> String {
        run_key(&self.model_name, &self.engine_name, &self.quant)
    }

    /// Apply a point update.
    ///
    /// Moving into a terminal status stamps `completed_at`; moving back to
    /// `pending`/`running` clears the previous outcome so a retried run
    /// never carries a stale error.
    pub fn apply(&mut self, update: RunUpdate) {
        if let Some(status) = update.status {
            self.status = status;
            if status.is_terminal() {
                self.completed_at = Some(Utc::now());
            } else {
                self.completed_at = None;
                self.error = None;
                self.output_dir = None;
                self.duration_s = 0.0;
            }
        }
        if let Some(duration_s) = update.duration_s {
            self.duration_s = duration_s;
        }
        if let Some(output_dir) = update.output_dir {
            self.output_dir = Some(output_dir);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
    }
}

/// Fields to change on a run. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub duration_s: Option<f64>,
    pub output_dir: Option<String>,
    pub error: Option<String>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, duration_s: f64) -> Self {
        self.duration_s = Some(duration_s);
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<String>) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Durable state of one campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignState {
    pub campaign_id: String,
    pub campaign_name: String,
    pub status: CampaignStatus,
    pub started_at: DateTime<Utc>,
    /// Runs in registration order.
    pub runs: Vec<RunState>,
}

impl CampaignState {
    /// Create a running campaign with no runs registered.
    pub fn new(campaign_id: &str, campaign_name: &str) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            campaign_name: campaign_name.to_string(),
            status: CampaignStatus::Running,
            started_at: Utc::now(),
            runs: Vec::new(),
        }
    }

    pub fn run(&self, key: &str) -> Option<&RunState> {
        self.runs.iter().find(|r| r.key() == key)
    }

    pub fn run_mut(&mut self, key: &str) -> Option<&mut RunState> {
        self.runs.iter_mut().find(|r| r.key() == key)
    }

    /// Register a pending run unless one with the same key exists.
    ///
    /// Returns `true` if a new record was added.
    pub fn register(&mut self, model_name: &str, engine_name: &str, quant: &str) -> bool {
        let key = run_key(model_name, engine_name, quant);
        if self.run(&key).is_some() {
            return false;
        }
        self.runs.push(RunState::pending(model_name, engine_name, quant));
        true
    }

    /// Keys of runs that are not retried on resume (`success` or `failed`).
    pub fn completed_keys(&self) -> BTreeSet<String> {
        self.runs
            .iter()
            .filter(|r| r.status.is_done())
            .map(RunState::key)
            .collect()
    }

    /// Keys of runs that still need work, in registration order.
    pub fn pending_keys(&self) -> Vec<String> {
        self.runs
            .iter()
            .filter(|r| !r.status.is_done())
            .map(RunState::key)
            .collect()
    }

    pub fn count(&self, status: RunStatus) -> usize {
        self.runs.iter().filter(|r| r.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(statuses: &[(&str, RunStatus)]) -> CampaignState {
        let mut state = CampaignState::new("c1", "campaign");
        for (quant, status) in statuses {
            state.register("m", "llama_cpp", quant);
            state
                .run_mut(&run_key("m", "llama_cpp", quant))
                .unwrap()
                .apply(RunUpdate::status(*status));
        }
        state
    }

    #[test]
    fn test_run_key_format() {
        assert_eq!(run_key("M", "vllm", "bf16"), "M|vllm|bf16");
        assert_eq!(RunState::pending("M", "vllm", "bf16").key(), "M|vllm|bf16");
    }

    #[test]
    fn test_completed_keys_excludes_skipped_and_pending() {
        let state = state_with(&[
            ("Q4_K_M", RunStatus::Success),
            ("Q8_0", RunStatus::Failed),
            ("Q2_K", RunStatus::Skipped),
            ("Q5_K_M", RunStatus::Running),
            ("Q6_K", RunStatus::Pending),
        ]);

        let done = state.completed_keys();
        assert_eq!(done.len(), 2);
        assert!(done.contains("m|llama_cpp|Q4_K_M"));
        assert!(done.contains("m|llama_cpp|Q8_0"));

        let pending = state.pending_keys();
        assert_eq!(
            pending,
            vec!["m|llama_cpp|Q2_K", "m|llama_cpp|Q5_K_M", "m|llama_cpp|Q6_K"]
        );
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut state = CampaignState::new("c1", "campaign");
        assert!(state.register("m", "vllm", "bf16"));
        assert!(!state.register("m", "vllm", "bf16"));
        assert_eq!(state.runs.len(), 1);
    }

    #[test]
    fn test_terminal_update_stamps_completed_at() {
        let mut run = RunState::pending("m", "vllm", "bf16");
        run.apply(RunUpdate::status(RunStatus::Running));
        assert!(run.completed_at.is_none());

        run.apply(
            RunUpdate::status(RunStatus::Success)
                .with_duration(12.5)
                .with_output_dir("/out/m"),
        );
        assert!(run.completed_at.is_some());
        assert_eq!(run.duration_s, 12.5);
        assert_eq!(run.output_dir.as_deref(), Some("/out/m"));
    }

    #[test]
    fn test_retry_clears_previous_outcome() {
        let mut run = RunState::pending("m", "vllm", "bf16");
        run.apply(RunUpdate::status(RunStatus::Skipped).with_error("insufficient disk space"));
        assert!(run.error.is_some());

        run.apply(RunUpdate::status(RunStatus::Running));
        assert!(run.error.is_none());
        assert!(run.completed_at.is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&RunStatus::Skipped).unwrap();
        assert_eq!(json, "\"skipped\"");
        let json = serde_json::to_string(&CampaignStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
