//! Download-overlapped execution.
//!
//! While run N benchmarks, a background task admits and downloads run N+1.
//! Benchmarks stay strictly sequential and results are recorded in input
//! order. At most one download is ever ahead of the benchmark in progress.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::results::CampaignRunResult;
use crate::run_spec::RunSpec;
use crate::runner::{CampaignRunner, Prepared, RunContext, RunOutcome, SharedState};

type PrefetchHandle = JoinHandle<Result<Prepared>>;

/// Prefetches the next run's model while the current one benchmarks.
pub struct ParallelRunner {
    ctx: Arc<RunContext>,
}

impl ParallelRunner {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    /// Admission, `running` mark and download for `run` on a worker task.
    fn spawn_prefetch(&self, run: &RunSpec, state: &SharedState) -> PrefetchHandle {
        let ctx = Arc::clone(&self.ctx);
        let state = Arc::clone(state);
        let run = run.clone();
        debug!(run_key = %run.key(), "prefetch scheduled");
        tokio::spawn(async move { ctx.prepare(&run, &state).await })
    }

    /// Wait for a prefetch. A crashed worker becomes a failed run.
    async fn join(run: &RunSpec, handle: PrefetchHandle) -> Result<Prepared> {
        match handle.await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(run_key = %run.key(), error = %e, "download worker did not complete");
                Ok(Prepared::Finished(RunOutcome::failed(
                    format!("download worker for {} did not complete: {e}", run.key()),
                    0.0,
                )))
            }
        }
    }
}

#[async_trait]
impl CampaignRunner for ParallelRunner {
    async fn execute(
        &self,
        runs: Vec<RunSpec>,
        state: SharedState,
    ) -> Result<Vec<CampaignRunResult>> {
        let total = runs.len();
        let mut results = Vec::with_capacity(total);
        let mut next = runs.first().map(|run| self.spawn_prefetch(run, &state));

        for (idx, run) in runs.iter().enumerate() {
            let Some(handle) = next.take() else {
                break;
            };
            info!(run = idx + 1, total, run_key = %run.key(), "starting run");
            let prepared = Self::join(run, handle).await?;

            // N's download is finished; start N+1's before N benchmarks.
            next = runs.get(idx + 1).map(|r| self.spawn_prefetch(r, &state));

            let outcome = match prepared {
                Prepared::Ready(download) => self.ctx.benchmark(run, download).await,
                Prepared::Finished(outcome) => outcome,
            };

            match self.ctx.finalize(run, outcome, &state).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    if let Some(handle) = next.take() {
                        handle.abort();
                    }
                    return Err(e);
                }
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::CampaignConfig;
    use crate::fakes::{EventLog, FakeExecutor, FakeStorage, FixedDiskQuery, StaticDiscovery};
    use crate::run_spec::ModelFormat;
    use crate::runner::Collaborators;
    use crate::scheduler::Scheduler;
    use quantbench_state::fakes::MemoryStateStore;
    use quantbench_state::{RunStatus, StateManager};
    use tokio::sync::Mutex;

    const CONFIG: &str = r#"{
        "campaign_name": "p",
        "models": [{"name": "A", "safetensors_repo": "org/a"}],
        "engines": [{"name": "vllm"}],
        "disk": {"reserve_gb": 10}
    }"#;

    fn spec(model: &str, size: f64) -> RunSpec {
        RunSpec {
            model_name: model.to_string(),
            engine_name: "vllm".to_string(),
            quant: "bf16".to_string(),
            suite: "standard".to_string(),
            engine_config: Default::default(),
            estimated_size_gb: size,
            format: ModelFormat::Safetensors,
            source_ref: format!("org/{model}"),
        }
    }

    fn runner(
        storage: Arc<FakeStorage>,
        executor: Arc<FakeExecutor>,
    ) -> (ParallelRunner, SharedState) {
        let config = Arc::new(CampaignConfig::from_json_str(CONFIG).unwrap());
        let collaborators = Collaborators {
            discovery: Arc::new(StaticDiscovery::new()),
            storage,
            executor,
            disk: Arc::new(FixedDiskQuery::new(1000.0)),
            sink: None,
        };
        let scheduler = Arc::new(
            Scheduler::new(
                config,
                collaborators.discovery.clone(),
                collaborators.disk.clone(),
            )
            .unwrap(),
        );
        let manager = StateManager::new(Arc::new(MemoryStateStore::new()));
        let state = Arc::new(Mutex::new(manager.create("p", "p")));
        let ctx = Arc::new(RunContext::new("p", scheduler, manager, &collaborators, false));
        (ParallelRunner::new(ctx), state)
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_download_overlaps_current_benchmark() {
        let log = EventLog::new();
        let storage = Arc::new(
            FakeStorage::new()
                .with_delay(Duration::from_millis(50))
                .with_log(log.clone()),
        );
        let executor = Arc::new(
            FakeExecutor::new()
                .with_delay(Duration::from_millis(100))
                .with_log(log.clone()),
        );
        let (runner, state) = runner(storage.clone(), executor.clone());

        let results = runner
            .execute(vec![spec("A", 1.0), spec("B", 2.0), spec("C", 3.0)], state)
            .await
            .unwrap();

        let keys: Vec<String> = results.iter().map(|r| r.key()).collect();
        assert_eq!(keys, vec!["A|vllm|bf16", "B|vllm|bf16", "C|vllm|bf16"]);
        assert!(results.iter().all(|r| r.status == RunStatus::Success));

        // Start and end of one download and one benchmark per run.
        assert_eq!(log.entries().len(), 12);
        let pos = |e: &str| log.position(e).unwrap();
        assert!(pos("download.start B|bf16") < pos("execute.end A|vllm|bf16"));
        assert!(pos("download.end A|bf16") < pos("download.start B|bf16"));
        assert!(pos("execute.end A|vllm|bf16") < pos("execute.start B|vllm|bf16"));
        assert_eq!(storage.max_in_flight(), 1);
        assert_eq!(executor.calls(), keys);
    }

    #[tokio::test]
    async fn test_failed_prefetch_does_not_block_following_runs() {
        let storage = Arc::new(FakeStorage::new().failing_on("B"));
        let executor = Arc::new(FakeExecutor::new());
        let (runner, state) = runner(storage, executor.clone());

        let results = runner
            .execute(vec![spec("A", 1.0), spec("B", 2.0), spec("C", 3.0)], state.clone())
            .await
            .unwrap();

        let statuses: Vec<RunStatus> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![RunStatus::Success, RunStatus::Failed, RunStatus::Success]
        );
        assert_eq!(executor.calls(), vec!["A|vllm|bf16", "C|vllm|bf16"]);
        assert_eq!(
            state.lock().await.run("B|vllm|bf16").unwrap().status,
            RunStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_empty_run_list() {
        let (runner, state) = runner(Arc::new(FakeStorage::new()), Arc::new(FakeExecutor::new()));
        assert!(runner.execute(Vec::new(), state).await.unwrap().is_empty());
    }
}
