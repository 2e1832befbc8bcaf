//! Campaign entry point: load or create state, schedule, execute, finish.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, Instrument};

use crate::config::CampaignConfig;
use crate::error::Result;
use crate::metrics::METRICS;
use crate::obs;
use crate::parallel::ParallelRunner;
use crate::results::CampaignResult;
use crate::run_spec::RunSpec;
use crate::runner::{CampaignRunner, Collaborators, RunContext, SequentialRunner};
use crate::scheduler::Scheduler;
use quantbench_state::{CampaignState, CampaignStatus, StateManager};

/// How runs are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Download, benchmark, record; one run at a time.
    #[default]
    Sequential,
    /// Download run N+1 while run N benchmarks.
    Parallel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CampaignOptions {
    pub strategy: Strategy,
    /// Validate the plan without downloading or benchmarking.
    pub dry_run: bool,
}

/// One configured campaign bound to its collaborators and state store.
pub struct Campaign {
    campaign_id: String,
    scheduler: Arc<Scheduler>,
    collaborators: Collaborators,
    state_manager: StateManager,
    options: CampaignOptions,
}

impl Campaign {
    pub fn new(
        config: CampaignConfig,
        collaborators: Collaborators,
        state_manager: StateManager,
    ) -> Result<Self> {
        config.validate()?;
        let campaign_id = config.campaign_id();
        let scheduler = Scheduler::new(
            Arc::new(config),
            Arc::clone(&collaborators.discovery),
            Arc::clone(&collaborators.disk),
        )?;
        Ok(Self {
            campaign_id,
            scheduler: Arc::new(scheduler),
            collaborators,
            state_manager,
            options: CampaignOptions::default(),
        })
    }

    pub fn with_options(mut self, options: CampaignOptions) -> Self {
        self.options = options;
        self
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    pub fn config(&self) -> &CampaignConfig {
        self.scheduler.config()
    }

    pub fn options(&self) -> CampaignOptions {
        self.options
    }

    /// Remaining runs in execution order, without executing or persisting.
    pub async fn plan(&self) -> Vec<RunSpec> {
        let state = self.state_manager.load(&self.campaign_id);
        self.scheduler.schedule(state.as_ref()).await
    }

    /// Execute every remaining run and return this invocation's results.
    ///
    /// Per-run failures are recorded on the run. Only configuration and
    /// state persistence errors are returned.
    pub async fn run(&self) -> Result<CampaignResult> {
        let span = obs::campaign_span(&self.campaign_id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<CampaignResult> {
        let name = self.config().campaign_name.clone();
        let (mut state, resumed) = match self.state_manager.load(&self.campaign_id) {
            Some(state) => (state, true),
            None => (self.state_manager.create(&self.campaign_id, &name), false),
        };
        state.status = CampaignStatus::Running;

        let runs = self.scheduler.schedule(Some(&state)).await;
        let registered = register_pending(&mut state, &runs);
        self.state_manager.save(&state)?;
        info!(
            campaign_id = %self.campaign_id,
            runs = runs.len(),
            newly_registered = registered,
            strategy = ?self.options.strategy,
            dry_run = self.options.dry_run,
            "campaign scheduled"
        );
        obs::emit_campaign_started(&self.campaign_id, &name, runs.len(), resumed);

        let mut result = CampaignResult::new(&self.campaign_id, &name);
        result.started_at = state.started_at;

        let shared = Arc::new(Mutex::new(state));
        let ctx = Arc::new(RunContext::new(
            &self.campaign_id,
            Arc::clone(&self.scheduler),
            self.state_manager.clone(),
            &self.collaborators,
            self.options.dry_run,
        ));
        let runner: Box<dyn CampaignRunner> = match self.options.strategy {
            Strategy::Sequential => Box::new(SequentialRunner::new(ctx)),
            Strategy::Parallel => Box::new(ParallelRunner::new(ctx)),
        };
        result.runs = runner.execute(runs, Arc::clone(&shared)).await?;

        {
            let mut state = shared.lock().await;
            self.state_manager.finish(&mut state)?;
        }
        result.finished_at = Some(Utc::now());

        METRICS.flush();
        obs::emit_campaign_finished(
            &self.campaign_id,
            result.total(),
            result.succeeded(),
            result.failed(),
            result.skipped(),
            result.success_rate(),
        );
        Ok(result)
    }
}

/// Register each run as `pending`; existing records are left as they are.
fn register_pending(state: &mut CampaignState, runs: &[RunSpec]) -> usize {
    runs.iter()
        .filter(|run| state.register(&run.model_name, &run.engine_name, &run.quant))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeExecutor, FakeStorage, FixedDiskQuery, StaticDiscovery};
    use crate::run_spec::ModelFormat;
    use quantbench_state::fakes::MemoryStateStore;
    use quantbench_state::RunStatus;

    fn campaign(discovery: StaticDiscovery, store: Arc<MemoryStateStore>) -> Campaign {
        let config = CampaignConfig::from_json_str(
            r#"{
                "campaign_name": "gguf sweep",
                "models": [{"name": "M", "gguf_repo": "org/m-gguf", "estimated_size_gb": 5}],
                "engines": [{"name": "llama_cpp"}],
                "disk": {"reserve_gb": 10}
            }"#,
        )
        .unwrap();
        let collaborators = Collaborators {
            discovery: Arc::new(discovery),
            storage: Arc::new(FakeStorage::new()),
            executor: Arc::new(FakeExecutor::new()),
            disk: Arc::new(FixedDiskQuery::new(500.0)),
            sink: None,
        };
        Campaign::new(config, collaborators, StateManager::new(store)).unwrap()
    }

    #[tokio::test]
    async fn test_plan_does_not_persist() {
        let store = Arc::new(MemoryStateStore::new());
        let discovery = StaticDiscovery::new().with_variants(
            ModelFormat::Gguf,
            "org/m-gguf",
            &["Q4_K_M", "Q8_0"],
        );
        let campaign = campaign(discovery, store.clone());

        let plan = campaign.plan().await;
        assert_eq!(plan.len(), 2);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_run_completes_and_persists() {
        let store = Arc::new(MemoryStateStore::new());
        let discovery = StaticDiscovery::new().with_variants(
            ModelFormat::Gguf,
            "org/m-gguf",
            &["Q4_K_M", "Q8_0"],
        );
        let campaign = campaign(discovery, store.clone());

        let result = campaign.run().await.unwrap();
        assert_eq!(result.total(), 2);
        assert_eq!(result.succeeded(), 2);
        assert!(result.finished_at.is_some());

        let state = StateManager::new(store).load(campaign.campaign_id()).unwrap();
        assert_eq!(state.status, CampaignStatus::Completed);
        assert_eq!(state.count(RunStatus::Success), 2);
    }

    #[test]
    fn test_register_pending_leaves_existing_records() {
        let mut state = CampaignState::new("c", "c");
        state.register("M", "llama_cpp", "Q4_K_M");
        let run = RunSpec {
            model_name: "M".to_string(),
            engine_name: "llama_cpp".to_string(),
            quant: "Q4_K_M".to_string(),
            suite: "standard".to_string(),
            engine_config: Default::default(),
            estimated_size_gb: 5.0,
            format: ModelFormat::Gguf,
            source_ref: "org/m-gguf".to_string(),
        };
        let mut other = run.clone();
        other.quant = "Q8_0".to_string();

        assert_eq!(register_pending(&mut state, &[run, other]), 1);
        assert_eq!(state.runs.len(), 2);
    }

    #[test]
    fn test_default_options() {
        let options = CampaignOptions::default();
        assert_eq!(options.strategy, Strategy::Sequential);
        assert!(!options.dry_run);
    }
}
