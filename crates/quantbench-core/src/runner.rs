//! Run execution: shared per-run steps and the sequential strategy.
//!
//! Every run goes through the same steps regardless of strategy:
//! 1. admission (`should_skip`, then the disk check); a denial records `skipped`
//! 2. download via [`ModelStorage`]; an error records `failed`
//! 3. benchmark via [`BenchmarkExecutor`]; an error records `failed`
//! 4. the outcome is written to state and persisted before the next run
//!
//! No per-run error escapes the run loop. Only state persistence failures
//! propagate to the caller.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::collaborators::{
    BenchmarkExecutor, BenchmarkStatus, Discovery, DiskQuery, ModelStorage, RunEventSink,
};
use crate::error::{CampaignError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::results::CampaignRunResult;
use crate::run_spec::RunSpec;
use crate::scheduler::Scheduler;
use quantbench_state::{CampaignState, RunStatus, RunUpdate, StateManager};

/// Campaign state shared between the execution loop and download workers.
pub type SharedState = Arc<Mutex<CampaignState>>;

/// `output_dir` recorded for dry-run successes.
pub const DRY_RUN_OUTPUT: &str = "dry-run";

/// External systems a campaign drives.
#[derive(Clone)]
pub struct Collaborators {
    pub discovery: Arc<dyn Discovery>,
    pub storage: Arc<dyn ModelStorage>,
    pub executor: Arc<dyn BenchmarkExecutor>,
    pub disk: Arc<dyn DiskQuery>,
    pub sink: Option<Arc<dyn RunEventSink>>,
}

/// Terminal outcome of one run, before it is recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub duration_s: f64,
    pub output_dir: Option<String>,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Skipped,
            duration_s: 0.0,
            output_dir: None,
            error: Some(reason.into()),
        }
    }

    pub fn failed(error: impl Into<String>, duration_s: f64) -> Self {
        Self {
            status: RunStatus::Failed,
            duration_s,
            output_dir: None,
            error: Some(error.into()),
        }
    }

    pub fn success(output_dir: Option<String>, duration_s: f64) -> Self {
        Self {
            status: RunStatus::Success,
            duration_s,
            output_dir,
            error: None,
        }
    }

    pub fn dry_run() -> Self {
        Self::success(Some(DRY_RUN_OUTPUT.to_string()), 0.0)
    }
}

/// A completed download, ready for benchmarking.
#[derive(Debug, Clone)]
pub struct Download {
    pub path: PathBuf,
    pub elapsed_s: f64,
}

/// Result of the pre-benchmark steps of a run.
#[derive(Debug, Clone)]
pub enum Prepared {
    /// Model is on disk; benchmark next.
    Ready(Download),
    /// Run already has its outcome (skipped, failed download, or dry run).
    Finished(RunOutcome),
}

/// Per-run steps shared by the sequential and parallel strategies.
pub struct RunContext {
    campaign_id: String,
    scheduler: Arc<Scheduler>,
    state_manager: StateManager,
    storage: Arc<dyn ModelStorage>,
    executor: Arc<dyn BenchmarkExecutor>,
    sink: Option<Arc<dyn RunEventSink>>,
    dry_run: bool,
}

impl RunContext {
    pub fn new(
        campaign_id: &str,
        scheduler: Arc<Scheduler>,
        state_manager: StateManager,
        collaborators: &Collaborators,
        dry_run: bool,
    ) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            scheduler,
            state_manager,
            storage: Arc::clone(&collaborators.storage),
            executor: Arc::clone(&collaborators.executor),
            sink: collaborators.sink.clone(),
            dry_run,
        }
    }

    /// Admission decision for `run`, evaluated against current free space.
    ///
    /// Returns the `skipped` outcome when the run may not proceed.
    pub async fn admission(&self, run: &RunSpec) -> Option<RunOutcome> {
        let key = run.key();
        if let Some(reason) = self.scheduler.skip_reason(run) {
            obs::emit_run_skipped(&key, &reason);
            return Some(RunOutcome::skipped(reason));
        }
        if let Err(e) = self.scheduler.admit(run).await {
            let reason = e.to_string();
            obs::emit_run_skipped(&key, &reason);
            return Some(RunOutcome::skipped(reason));
        }
        None
    }

    /// Admission, `running` mark, and download for one run.
    ///
    /// The disk check happens here, immediately before the download starts.
    pub async fn prepare(&self, run: &RunSpec, state: &SharedState) -> Result<Prepared> {
        if let Some(skipped) = self.admission(run).await {
            return Ok(Prepared::Finished(skipped));
        }
        if self.dry_run {
            return Ok(Prepared::Finished(RunOutcome::dry_run()));
        }

        self.mark_running(run, state).await?;
        obs::emit_run_admitted(&run.key(), run.estimated_size_gb);

        let started = Instant::now();
        let prepared = match self.safe_download(run).await {
            Ok(path) => Prepared::Ready(Download {
                path,
                elapsed_s: started.elapsed().as_secs_f64(),
            }),
            Err(e) => Prepared::Finished(RunOutcome::failed(
                e.to_string(),
                started.elapsed().as_secs_f64(),
            )),
        };
        Ok(prepared)
    }

    /// Download the model for `run`, converting any collaborator error into
    /// `CampaignError::Download` instead of propagating it.
    pub async fn safe_download(&self, run: &RunSpec) -> Result<PathBuf> {
        METRICS.inc_downloads();
        let model = run.model_ref();
        debug!(run_key = %run.key(), pull_ref = %model.pull_ref(), "downloading model");
        self.storage
            .download(&model)
            .await
            .map_err(|e| CampaignError::Download {
                key: run.key(),
                message: format!("{e:#}"),
            })
    }

    /// Execute the benchmark suite on a downloaded model.
    pub async fn benchmark(&self, run: &RunSpec, download: Download) -> RunOutcome {
        let started = Instant::now();
        let result = self
            .executor
            .run(&download.path, &run.engine_name, &run.engine_config, &run.suite)
            .await;
        let duration_s = download.elapsed_s + started.elapsed().as_secs_f64();

        if self.scheduler.config().disk.cleanup_after_run {
            if let Err(e) = self.storage.cleanup(&download.path).await {
                warn!(
                    run_key = %run.key(),
                    path = %download.path.display(),
                    error = %e,
                    "cleanup failed"
                );
            }
        }

        match result {
            Ok(outcome) => match outcome.status {
                BenchmarkStatus::Passed => RunOutcome::success(outcome.output_dir, duration_s),
                BenchmarkStatus::Failed => {
                    let mut failed = RunOutcome::failed(
                        outcome
                            .error
                            .unwrap_or_else(|| "benchmark reported failure".to_string()),
                        duration_s,
                    );
                    failed.output_dir = outcome.output_dir;
                    failed
                }
            },
            Err(e) => RunOutcome::failed(
                CampaignError::Execution {
                    key: run.key(),
                    message: format!("{e:#}"),
                }
                .to_string(),
                duration_s,
            ),
        }
    }

    /// Record the outcome under the state lock, persist, and notify.
    pub async fn finalize(
        &self,
        run: &RunSpec,
        outcome: RunOutcome,
        state: &SharedState,
    ) -> Result<CampaignRunResult> {
        let mut update = RunUpdate::status(outcome.status).with_duration(outcome.duration_s);
        if let Some(dir) = &outcome.output_dir {
            update = update.with_output_dir(dir.clone());
        }
        if let Some(error) = &outcome.error {
            update = update.with_error(error.clone());
        }

        {
            let mut guard = state.lock().await;
            guard.register(&run.model_name, &run.engine_name, &run.quant);
            self.state_manager.update_run(&mut guard, &run.key(), update)?;
        }

        let result = CampaignRunResult {
            model_name: run.model_name.clone(),
            engine_name: run.engine_name.clone(),
            quant: run.quant.clone(),
            status: outcome.status,
            duration_s: outcome.duration_s,
            error: outcome.error,
            output_dir: outcome.output_dir,
        };

        METRICS.record_run(result.status);
        obs::emit_run_finished(&result);
        if let Some(sink) = &self.sink {
            sink.on_run_complete(&result.to_event(&self.campaign_id));
        }
        Ok(result)
    }

    async fn mark_running(&self, run: &RunSpec, state: &SharedState) -> Result<()> {
        let mut guard = state.lock().await;
        guard.register(&run.model_name, &run.engine_name, &run.quant);
        self.state_manager
            .update_run(&mut guard, &run.key(), RunUpdate::status(RunStatus::Running))?;
        Ok(())
    }
}

/// Execution strategy for an ordered list of runs.
#[async_trait]
pub trait CampaignRunner: Send + Sync {
    /// Drive every run to a recorded outcome, in order.
    ///
    /// Returns one result per input run, in input order.
    async fn execute(
        &self,
        runs: Vec<RunSpec>,
        state: SharedState,
    ) -> Result<Vec<CampaignRunResult>>;
}

/// One run at a time: download, benchmark, record.
pub struct SequentialRunner {
    ctx: Arc<RunContext>,
}

impl SequentialRunner {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl CampaignRunner for SequentialRunner {
    async fn execute(
        &self,
        runs: Vec<RunSpec>,
        state: SharedState,
    ) -> Result<Vec<CampaignRunResult>> {
        let total = runs.len();
        let mut results = Vec::with_capacity(total);

        for (idx, run) in runs.iter().enumerate() {
            info!(run = idx + 1, total, run_key = %run.key(), "starting run");
            let outcome = match self.ctx.prepare(run, &state).await? {
                Prepared::Ready(download) => self.ctx.benchmark(run, download).await,
                Prepared::Finished(outcome) => outcome,
            };
            results.push(self.ctx.finalize(run, outcome, &state).await?);
        }

        Ok(results)
    }
}
