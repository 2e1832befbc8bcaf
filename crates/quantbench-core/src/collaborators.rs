//! Interfaces to the systems the campaign engine drives.
//!
//! These traits define the collaborator seams:
//! - `Discovery`: enumerate quant/tag variants from a registry
//! - `ModelStorage`: download (and optionally remove) model artifacts
//! - `BenchmarkExecutor`: run a benchmark suite against a local model
//! - `DiskQuery`: report free space on the storage volume
//! - `RunEventSink`: receive per-run completion events
//!
//! Production implementations live in `discovery` and `disk`; test doubles
//! live in `fakes`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::run_spec::{ModelFormat, ModelRef};
use quantbench_state::RunStatus;

/// Enumerates the variants available for a model in a registry.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Variant names (GGUF quant types or Ollama tags) for `reference`.
    async fn discover(&self, format: ModelFormat, reference: &str) -> anyhow::Result<Vec<String>>;
}

/// Fetches model artifacts to local storage.
#[async_trait]
pub trait ModelStorage: Send + Sync {
    /// Download the model and return its local path. Errors on failure.
    async fn download(&self, model: &ModelRef) -> anyhow::Result<PathBuf>;

    /// Remove a previously downloaded model.
    async fn cleanup(&self, path: &Path) -> anyhow::Result<()>;
}

/// Pass/fail verdict reported by the benchmark executor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkStatus {
    Passed,
    Failed,
}

/// Outcome of one benchmark suite execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkOutcome {
    pub status: BenchmarkStatus,
    pub output_dir: Option<String>,
    pub error: Option<String>,
}

impl BenchmarkOutcome {
    pub fn passed(output_dir: impl Into<String>) -> Self {
        Self {
            status: BenchmarkStatus::Passed,
            output_dir: Some(output_dir.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: BenchmarkStatus::Failed,
            output_dir: None,
            error: Some(error.into()),
        }
    }
}

/// Runs benchmark suites. Treated as a black box by the scheduler.
#[async_trait]
pub trait BenchmarkExecutor: Send + Sync {
    async fn run(
        &self,
        model_path: &Path,
        engine_name: &str,
        config: &serde_json::Map<String, serde_json::Value>,
        suite: &str,
    ) -> anyhow::Result<BenchmarkOutcome>;
}

/// Reports free space on a volume.
#[async_trait]
pub trait DiskQuery: Send + Sync {
    async fn free_space_gb(&self, path: &Path) -> anyhow::Result<f64>;
}

/// Emitted once per run when its outcome is recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunCompletedEvent {
    pub campaign_id: String,
    pub model_name: String,
    pub engine_name: String,
    pub quant: String,
    pub status: RunStatus,
    pub duration_s: f64,
    pub error: Option<String>,
}

/// Consumer of per-run completion events (e.g. a notification dispatcher).
pub trait RunEventSink: Send + Sync {
    fn on_run_complete(&self, event: &RunCompletedEvent);
}

/// Forwards completion events over a tokio channel.
///
/// Events are dropped with a warning once the receiver is gone; a
/// notification consumer going away never stops a campaign.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RunCompletedEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunCompletedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RunEventSink for ChannelSink {
    fn on_run_complete(&self, event: &RunCompletedEvent) {
        if self.tx.send(event.clone()).is_err() {
            warn!(
                model = %event.model_name,
                engine = %event.engine_name,
                quant = %event.quant,
                "run event receiver dropped; event discarded"
            );
        }
    }
}
