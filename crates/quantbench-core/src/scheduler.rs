//! Run planning and admission control.
//!
//! Turns a [`CampaignConfig`] into the ordered list of concrete runs:
//! - `plan_runs`: engine/format eligibility per (model, engine) pair
//! - `expand_runs`: one run per discovered variant, minus skip patterns
//! - `order_by_size`: smallest first, stable
//! - `filter_completed`: drop runs the persisted state already finished
//!
//! Admission (`check_disk_space`, `should_skip`) is evaluated per run by the
//! runners, immediately before a download.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::collaborators::{Discovery, DiskQuery};
use crate::config::CampaignConfig;
use crate::error::{CampaignError, Result};
use crate::run_spec::{ModelFormat, RunSpec, SAFETENSORS_QUANT};
use quantbench_state::CampaignState;

/// Compiled `quant_filter.skip_patterns`.
///
/// Patterns are globs over the whole variant name: `*` matches any run of
/// characters, `?` a single character. Matching ignores ASCII case so one
/// pattern covers both GGUF (`Q8_0`) and Ollama (`q8_0`) spellings.
#[derive(Debug, Clone, Default)]
pub struct QuantFilter {
    patterns: Vec<(String, Regex)>,
}

impl QuantFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let regex = Regex::new(&glob_to_regex(pattern.trim())).map_err(|e| {
                CampaignError::Configuration(format!("invalid skip pattern {pattern:?}: {e}"))
            })?;
            compiled.push((pattern.clone(), regex));
        }
        Ok(Self { patterns: compiled })
    }

    /// The first pattern matching `variant`, if any.
    pub fn matching_pattern(&self, variant: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(variant))
            .map(|(p, _)| p.as_str())
    }

    pub fn excludes(&self, variant: &str) -> bool {
        self.matching_pattern(variant).is_some()
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut re = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    re
}

/// Plans runs for one campaign config.
pub struct Scheduler {
    config: Arc<CampaignConfig>,
    discovery: Arc<dyn Discovery>,
    disk: Arc<dyn DiskQuery>,
    quant_filter: QuantFilter,
}

impl Scheduler {
    pub fn new(
        config: Arc<CampaignConfig>,
        discovery: Arc<dyn Discovery>,
        disk: Arc<dyn DiskQuery>,
    ) -> Result<Self> {
        let quant_filter = QuantFilter::new(&config.quant_filter.skip_patterns)?;
        Ok(Self {
            config,
            discovery,
            disk,
            quant_filter,
        })
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    /// Eligible (model, engine) entries before discovery.
    ///
    /// Safetensors engines yield a resolved `bf16` run when the model declares
    /// a safetensors repo. Discovery formats yield one placeholder (empty
    /// quant) per model declaring the matching repo or tag.
    pub fn plan_runs(&self) -> Vec<RunSpec> {
        let mut planned = Vec::new();
        for model in &self.config.models {
            for engine in &self.config.engines {
                for format in engine.accepted_formats() {
                    let Some(source_ref) = model.source_for(format) else {
                        debug!(
                            model = %model.name,
                            engine = %engine.name,
                            format = %format,
                            "model declares no source for engine format"
                        );
                        continue;
                    };
                    let quant = match format {
                        ModelFormat::Safetensors => SAFETENSORS_QUANT.to_string(),
                        ModelFormat::Gguf | ModelFormat::Ollama => String::new(),
                    };
                    planned.push(RunSpec {
                        model_name: model.name.clone(),
                        engine_name: engine.name.clone(),
                        quant,
                        suite: engine.suite.clone(),
                        engine_config: engine.config.clone(),
                        estimated_size_gb: model.estimated_size_gb,
                        format,
                        source_ref: source_ref.to_string(),
                    });
                }
            }
        }
        info!(planned = planned.len(), "planned runs");
        planned
    }

    /// Resolve placeholders into one run per discovered variant.
    ///
    /// Variants matching a skip pattern are dropped. A failed or empty
    /// discovery contributes zero runs and is logged, never raised. Each
    /// (format, reference) is queried once; duplicate keys are collapsed.
    pub async fn expand_runs(&self, planned: Vec<RunSpec>) -> Vec<RunSpec> {
        let mut cache: HashMap<(ModelFormat, String), Vec<String>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut expanded = Vec::new();

        for spec in planned {
            if spec.is_resolved() {
                if seen.insert(spec.key()) {
                    expanded.push(spec);
                } else {
                    debug!(run_key = %spec.key(), format = %spec.format, "duplicate run collapsed");
                }
                continue;
            }

            let cache_key = (spec.format, spec.source_ref.clone());
            if !cache.contains_key(&cache_key) {
                let variants = match self.discovery.discover(spec.format, &spec.source_ref).await {
                    Ok(variants) => variants,
                    Err(e) => {
                        let err = CampaignError::Discovery {
                            reference: spec.source_ref.clone(),
                            message: format!("{e:#}"),
                        };
                        warn!(
                            model = %spec.model_name,
                            engine = %spec.engine_name,
                            error = %err,
                            "discovery failed; pair contributes no runs"
                        );
                        Vec::new()
                    }
                };
                cache.insert(cache_key.clone(), variants);
            }
            let variants = &cache[&cache_key];

            if variants.is_empty() {
                info!(
                    model = %spec.model_name,
                    engine = %spec.engine_name,
                    reference = %spec.source_ref,
                    "no variants discovered"
                );
                continue;
            }

            for variant in variants {
                let variant = variant.trim();
                if variant.is_empty() {
                    continue;
                }
                if let Some(pattern) = self.quant_filter.matching_pattern(variant) {
                    debug!(
                        model = %spec.model_name,
                        quant = %variant,
                        pattern = %pattern,
                        "variant excluded by skip pattern"
                    );
                    continue;
                }
                let run = spec.resolve(variant);
                if seen.insert(run.key()) {
                    expanded.push(run);
                } else {
                    debug!(
                        run_key = %run.key(),
                        format = %run.format,
                        reference = %run.source_ref,
                        "duplicate variant collapsed"
                    );
                }
            }
        }

        info!(runs = expanded.len(), "expanded runs");
        expanded
    }

    /// Stable ascending sort by estimated size.
    pub fn order_by_size(mut runs: Vec<RunSpec>) -> Vec<RunSpec> {
        runs.sort_by(|a, b| a.estimated_size_gb.total_cmp(&b.estimated_size_gb));
        runs
    }

    /// Drop runs whose key is already `success` or `failed` in `state`.
    pub fn filter_completed(runs: Vec<RunSpec>, state: &CampaignState) -> Vec<RunSpec> {
        let done = state.completed_keys();
        let before = runs.len();
        let remaining: Vec<RunSpec> = runs
            .into_iter()
            .filter(|r| !done.contains(&r.key()))
            .collect();
        if remaining.len() < before {
            info!(
                skipped = before - remaining.len(),
                remaining = remaining.len(),
                "resuming: completed runs filtered out"
            );
        }
        remaining
    }

    /// Full pipeline: plan, expand, order, and filter against prior state.
    pub async fn schedule(&self, state: Option<&CampaignState>) -> Vec<RunSpec> {
        let planned = self.plan_runs();
        let runs = Self::order_by_size(self.expand_runs(planned).await);
        match state {
            Some(state) => Self::filter_completed(runs, state),
            None => runs,
        }
    }

    /// Admission check against current free space.
    ///
    /// Queries the OS on every call. Fails with `ResourceExhausted` when the
    /// download would leave less than `reserve_gb` free, or `DiskQuery` when
    /// free space cannot be determined.
    pub async fn admit(&self, run: &RunSpec) -> Result<()> {
        let path = self.config.disk.storage_path();
        let free_gb = self
            .disk
            .free_space_gb(Path::new(path))
            .await
            .map_err(|e| CampaignError::DiskQuery {
                path: path.to_string(),
                message: format!("{e:#}"),
            })?;
        let reserve_gb = self.config.disk.reserve_gb;
        if free_gb - run.estimated_size_gb >= reserve_gb {
            Ok(())
        } else {
            Err(CampaignError::ResourceExhausted {
                key: run.key(),
                required_gb: run.estimated_size_gb + reserve_gb,
                free_gb,
            })
        }
    }

    /// `true` iff free space minus the run's size stays at or above the reserve.
    pub async fn check_disk_space(&self, run: &RunSpec) -> bool {
        self.admit(run).await.is_ok()
    }

    /// Policy reason forbidding `run` outright, independent of disk state.
    pub fn skip_reason(&self, run: &RunSpec) -> Option<String> {
        let limit = self.config.resource_limits.max_model_size_gb;
        if limit > 0.0 && run.estimated_size_gb > limit {
            return Some(format!(
                "estimated size {:.1} GB exceeds resource_limits.max_model_size_gb {:.1} GB",
                run.estimated_size_gb, limit
            ));
        }
        None
    }

    pub fn should_skip(&self, run: &RunSpec) -> bool {
        self.skip_reason(run).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FixedDiskQuery, StaticDiscovery};
    use quantbench_state::{RunStatus, RunUpdate};

    fn config(json: &str) -> Arc<CampaignConfig> {
        Arc::new(CampaignConfig::from_json_str(json).unwrap())
    }

    fn scheduler(
        config: Arc<CampaignConfig>,
        discovery: StaticDiscovery,
        free_gb: f64,
    ) -> Scheduler {
        Scheduler::new(config, Arc::new(discovery), Arc::new(FixedDiskQuery::new(free_gb))).unwrap()
    }

    fn run(model: &str, size: f64) -> RunSpec {
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

    #[test]
    fn test_glob_matching() {
        let filter = QuantFilter::new(&["IQ1_*".to_string(), "Q?_0".to_string()]).unwrap();
        assert!(filter.excludes("IQ1_S"));
        assert!(filter.excludes("IQ1_M"));
        assert!(filter.excludes("iq1_s"));
        assert!(filter.excludes("Q8_0"));
        assert!(!filter.excludes("Q4_K_M"));
        assert!(!filter.excludes("IQ2_XS"));
        assert!(!filter.excludes("XIQ1_S"));
        assert_eq!(filter.matching_pattern("Q4_0"), Some("Q?_0"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let filter = QuantFilter::new(&["8b.q4+*".to_string()]).unwrap();
        assert!(filter.excludes("8b.q4+k"));
        assert!(!filter.excludes("8bxq4+k"));
    }

    #[test]
    fn test_plan_requires_declared_source() {
        let s = scheduler(
            config(
                r#"{
                "campaign_name": "c",
                "models": [
                    {"name": "A", "safetensors_repo": "org/a", "gguf_repo": "org/a-gguf"},
                    {"name": "B", "ollama_tag": "b"},
                    {"name": "C"}
                ],
                "engines": [{"name": "vllm"}, {"name": "llama_cpp"}, {"name": "ollama"}]
            }"#,
            ),
            StaticDiscovery::new(),
            1000.0,
        );
        let planned = s.plan_runs();
        let keys: Vec<String> = planned.iter().map(RunSpec::key).collect();
        assert_eq!(keys, vec!["A|vllm|bf16", "A|llama_cpp|", "B|ollama|"]);
        assert!(planned[0].is_resolved());
        assert!(!planned[1].is_resolved());
        assert_eq!(planned[1].source_ref, "org/a-gguf");
    }

    #[tokio::test]
    async fn test_discovery_failure_contributes_zero_runs() {
        let s = scheduler(
            config(
                r#"{
                "campaign_name": "c",
                "models": [
                    {"name": "A", "gguf_repo": "org/a"},
                    {"name": "B", "gguf_repo": "org/b"}
                ],
                "engines": [{"name": "llama_cpp"}]
            }"#,
            ),
            StaticDiscovery::new()
                .with_failure(ModelFormat::Gguf, "org/a", "HTTP 503")
                .with_variants(ModelFormat::Gguf, "org/b", &["Q4_K_M"]),
            1000.0,
        );
        let runs = s.expand_runs(s.plan_runs()).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].key(), "B|llama_cpp|Q4_K_M");
    }

    #[tokio::test]
    async fn test_discovery_is_cached_per_reference() {
        let discovery = Arc::new(
            StaticDiscovery::new().with_variants(
                ModelFormat::Gguf,
                "org/a",
                &["Q4_K_M", "Q4_K_M", " "],
            ),
        );
        let s = Scheduler::new(
            config(
                r#"{
                "campaign_name": "c",
                "models": [{"name": "A", "gguf_repo": "org/a"}],
                "engines": [{"name": "llama_cpp"}, {"name": "llama.cpp-server"}]
            }"#,
            ),
            discovery.clone(),
            Arc::new(FixedDiskQuery::new(1000.0)),
        )
        .unwrap();
        let runs = s.expand_runs(s.plan_runs()).await;
        assert_eq!(discovery.calls(), 1);
        let keys: Vec<String> = runs.iter().map(RunSpec::key).collect();
        assert_eq!(keys, vec!["A|llama_cpp|Q4_K_M", "A|llama.cpp-server|Q4_K_M"]);
    }

    #[tokio::test]
    async fn test_same_variant_from_two_formats_yields_one_run() {
        let discovery = StaticDiscovery::new()
            .with_variants(ModelFormat::Gguf, "org/a-gguf", &["Q4_K_M"])
            .with_variants(ModelFormat::Ollama, "a", &["Q4_K_M", "latest"]);
        let s = scheduler(
            config(
                r#"{
                "campaign_name": "c",
                "models": [{"name": "A", "gguf_repo": "org/a-gguf", "ollama_tag": "a"}],
                "engines": [{"name": "omni", "formats": ["gguf", "ollama"]}]
            }"#,
            ),
            discovery,
            1000.0,
        );
        let runs = s.expand_runs(s.plan_runs()).await;
        let keys: Vec<String> = runs.iter().map(RunSpec::key).collect();
        assert_eq!(keys, vec!["A|omni|Q4_K_M", "A|omni|latest"]);
        assert_eq!(runs[0].format, ModelFormat::Gguf);
    }

    #[test]
    fn test_order_by_size_is_stable() {
        let runs = vec![run("big", 70.0), run("tie-1", 8.0), run("small", 1.0), run("tie-2", 8.0)];
        let ordered: Vec<String> = Scheduler::order_by_size(runs)
            .into_iter()
            .map(|r| r.model_name)
            .collect();
        assert_eq!(ordered, vec!["small", "tie-1", "tie-2", "big"]);
    }

    #[test]
    fn test_filter_completed_retries_skipped() {
        let mut state = CampaignState::new("c", "c");
        for (model, status) in [
            ("a", RunStatus::Success),
            ("b", RunStatus::Failed),
            ("c", RunStatus::Skipped),
        ] {
            state.register(model, "vllm", "bf16");
            state
                .run_mut(&format!("{model}|vllm|bf16"))
                .unwrap()
                .apply(RunUpdate::status(status));
        }
        let remaining = Scheduler::filter_completed(
            vec![run("a", 1.0), run("b", 1.0), run("c", 1.0), run("d", 1.0)],
            &state,
        );
        let names: Vec<&str> = remaining.iter().map(|r| r.model_name.as_str()).collect();
        assert_eq!(names, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_disk_admission_boundary() {
        let cfg = config(
            r#"{
            "campaign_name": "c",
            "models": [{"name": "M", "safetensors_repo": "org/m"}],
            "engines": [{"name": "vllm"}],
            "disk": {"reserve_gb": 100}
        }"#,
        );
        let disk = Arc::new(FixedDiskQuery::new(110.0));
        let s = Scheduler::new(cfg, Arc::new(StaticDiscovery::new()), disk.clone()).unwrap();

        assert!(s.check_disk_space(&run("M", 10.0)).await);
        assert!(!s.check_disk_space(&run("M", 10.5)).await);

        disk.set_free(500.0);
        assert!(s.check_disk_space(&run("M", 10.5)).await);
        assert_eq!(disk.queries(), 3);
    }

    #[tokio::test]
    async fn test_disk_query_failure_denies_admission() {
        let s = Scheduler::new(
            config(
                r#"{
                "campaign_name": "c",
                "models": [{"name": "M"}],
                "engines": [{"name": "vllm"}]
            }"#,
            ),
            Arc::new(StaticDiscovery::new()),
            Arc::new(FixedDiskQuery::failing()),
        )
        .unwrap();
        match s.admit(&run("M", 1.0)).await {
            Err(CampaignError::DiskQuery { message, .. }) => assert!(message.contains("statfs")),
            other => panic!("expected DiskQuery error, got {other:?}"),
        }
    }

    #[test]
    fn test_should_skip_respects_size_limit() {
        let s = scheduler(
            config(
                r#"{
                "campaign_name": "c",
                "models": [{"name": "M"}],
                "engines": [{"name": "vllm"}],
                "resource_limits": {"max_model_size_gb": 40}
            }"#,
            ),
            StaticDiscovery::new(),
            1000.0,
        );
        assert!(!s.should_skip(&run("M", 40.0)));
        assert!(s.should_skip(&run("M", 40.1)));
        assert!(s.skip_reason(&run("M", 70.0)).unwrap().contains("max_model_size_gb"));

        let unlimited = scheduler(
            config(
                r#"{
                "campaign_name": "c",
                "models": [{"name": "M"}],
                "engines": [{"name": "vllm"}]
            }"#,
            ),
            StaticDiscovery::new(),
            1000.0,
        );
        assert!(!unlimited.should_skip(&run("M", 10_000.0)));
    }
}
