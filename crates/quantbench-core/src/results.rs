//! Per-run outcomes and their campaign-level roll-up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::RunCompletedEvent;
use quantbench_state::{run_key, CampaignState, RunState, RunStatus};

/// Outcome of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignRunResult {
    pub model_name: String,
    pub engine_name: String,
    pub quant: String,
    pub status: RunStatus,
    pub duration_s: f64,
    pub error: Option<String>,
    pub output_dir: Option<String>,
}

impl CampaignRunResult {
    pub fn key(&self) -> String {
        run_key(&self.model_name, &self.engine_name, &self.quant)
    }

    pub fn from_run_state(run: &RunState) -> Self {
        Self {
            model_name: run.model_name.clone(),
            engine_name: run.engine_name.clone(),
            quant: run.quant.clone(),
            status: run.status,
            duration_s: run.duration_s,
            error: run.error.clone(),
            output_dir: run.output_dir.clone(),
        }
    }

    /// Completion event for the notification layer.
    pub fn to_event(&self, campaign_id: &str) -> RunCompletedEvent {
        RunCompletedEvent {
            campaign_id: campaign_id.to_string(),
            model_name: self.model_name.clone(),
            engine_name: self.engine_name.clone(),
            quant: self.quant.clone(),
            status: self.status,
            duration_s: self.duration_s,
            error: self.error.clone(),
        }
    }
}

/// Aggregate result of a campaign invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignResult {
    pub campaign_id: String,
    pub campaign_name: String,
    /// Unique per invocation; a resumed campaign gets a new one.
    pub invocation_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub runs: Vec<CampaignRunResult>,
}

impl CampaignResult {
    pub fn new(campaign_id: &str, campaign_name: &str) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            campaign_name: campaign_name.to_string(),
            invocation_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            runs: Vec::new(),
        }
    }

    /// Roll up every terminal run recorded in `state`, across invocations.
    pub fn from_state(state: &CampaignState) -> Self {
        let mut result = Self::new(&state.campaign_id, &state.campaign_name);
        result.started_at = state.started_at;
        result.runs = state
            .runs
            .iter()
            .filter(|r| r.status.is_terminal())
            .map(CampaignRunResult::from_run_state)
            .collect();
        result.finished_at = state.runs.iter().filter_map(|r| r.completed_at).max();
        result
    }

    pub fn total(&self) -> usize {
        self.runs.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(RunStatus::Success)
    }

    pub fn failed(&self) -> usize {
        self.count(RunStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(RunStatus::Skipped)
    }

    /// Sum of per-run durations in seconds.
    pub fn total_duration_s(&self) -> f64 {
        self.runs.iter().map(|r| r.duration_s).sum()
    }

    /// `succeeded / total`, or 0 for an empty campaign.
    pub fn success_rate(&self) -> f64 {
        if self.runs.is_empty() {
            return 0.0;
        }
        self.succeeded() as f64 / self.total() as f64
    }

    fn count(&self, status: RunStatus) -> usize {
        self.runs.iter().filter(|r| r.status == status).count()
    }
}
