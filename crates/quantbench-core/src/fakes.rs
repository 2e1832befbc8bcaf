//! In-memory collaborator fakes (testing only)
//!
//! Provides `StaticDiscovery`, `FakeStorage`, `FakeExecutor`,
//! `FixedDiskQuery` and `RecordingSink`, which satisfy the collaborator
//! contracts without any network, disk or subprocess access.
//!
//! `FakeStorage` and `FakeExecutor` can share an [`EventLog`] so tests can
//! assert on the interleaving of downloads and benchmark executions.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::collaborators::{
    BenchmarkExecutor, BenchmarkOutcome, Discovery, DiskQuery, ModelStorage, RunCompletedEvent,
    RunEventSink,
};
use crate::run_spec::{ModelFormat, ModelRef};
use quantbench_state::run_key;

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

/// Ordered log of collaborator activity, e.g. `download.start M|Q4_K_M`.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Index of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == entry)
    }
}

// ---------------------------------------------------------------------------
// StaticDiscovery
// ---------------------------------------------------------------------------

/// Discovery answering from a fixed table. Unknown references yield no variants.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    answers: HashMap<(ModelFormat, String), std::result::Result<Vec<String>, String>>,
    calls: AtomicUsize,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variants(
        mut self,
        format: ModelFormat,
        reference: &str,
        variants: &[&str],
    ) -> Self {
        self.answers.insert(
            (format, reference.to_string()),
            Ok(variants.iter().map(|v| v.to_string()).collect()),
        );
        self
    }

    pub fn with_failure(mut self, format: ModelFormat, reference: &str, message: &str) -> Self {
        self.answers
            .insert((format, reference.to_string()), Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self, format: ModelFormat, reference: &str) -> anyhow::Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answers.get(&(format, reference.to_string())) {
            Some(Ok(variants)) => Ok(variants.clone()),
            Some(Err(message)) => Err(anyhow::anyhow!("{message}")),
            None => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeStorage
// ---------------------------------------------------------------------------

/// Storage that "downloads" to `/fake/models/<model>/<quant>`.
#[derive(Debug, Default)]
pub struct FakeStorage {
    failing_models: HashSet<String>,
    delay: Duration,
    log: EventLog,
    downloads: Mutex<Vec<ModelRef>>,
    cleanups: Mutex<Vec<PathBuf>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every download of `model_name`.
    pub fn failing_on(mut self, model_name: &str) -> Self {
        self.failing_models.insert(model_name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub fn downloads(&self) -> Vec<ModelRef> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn cleanups(&self) -> Vec<PathBuf> {
        self.cleanups.lock().unwrap().clone()
    }

    /// Highest number of downloads observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn path_for(model_name: &str, quant: &str) -> PathBuf {
        PathBuf::from("/fake/models").join(model_name).join(quant)
    }
}

#[async_trait]
impl ModelStorage for FakeStorage {
    async fn download(&self, model: &ModelRef) -> anyhow::Result<PathBuf> {
        let tag = format!("{}|{}", model.model_name, model.quant);
        self.log.push(format!("download.start {tag}"));
        self.downloads.lock().unwrap().push(model.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.log.push(format!("download.end {tag}"));

        if self.failing_models.contains(&model.model_name) {
            anyhow::bail!("connection reset while fetching {}", model.pull_ref());
        }
        Ok(Self::path_for(&model.model_name, &model.quant))
    }

    async fn cleanup(&self, path: &Path) -> anyhow::Result<()> {
        self.cleanups.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeExecutor
// ---------------------------------------------------------------------------

/// Executor that passes every run unless told otherwise.
///
/// The run key is recovered from a `FakeStorage` path plus the engine name.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    erroring: HashSet<String>,
    reporting_failure: HashSet<String>,
    delay: Duration,
    log: EventLog,
    calls: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `Err` for the run with this key.
    pub fn erroring_on(mut self, key: &str) -> Self {
        self.erroring.insert(key.to_string());
        self
    }

    /// Return a `Failed` outcome for the run with this key.
    pub fn reporting_failure_on(mut self, key: &str) -> Self {
        self.reporting_failure.insert(key.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Keys of every executed run, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn key_for(model_path: &Path, engine_name: &str) -> String {
        let quant = model_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let model = model_path
            .parent()
            .and_then(Path::file_name)
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        run_key(model, engine_name, quant)
    }
}

#[async_trait]
impl BenchmarkExecutor for FakeExecutor {
    async fn run(
        &self,
        model_path: &Path,
        engine_name: &str,
        _config: &serde_json::Map<String, serde_json::Value>,
        suite: &str,
    ) -> anyhow::Result<BenchmarkOutcome> {
        let key = Self::key_for(model_path, engine_name);
        self.log.push(format!("execute.start {key}"));
        self.calls.lock().unwrap().push(key.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.log.push(format!("execute.end {key}"));

        if self.erroring.contains(&key) {
            anyhow::bail!("engine {engine_name} crashed running suite {suite}");
        }
        if self.reporting_failure.contains(&key) {
            return Ok(BenchmarkOutcome::failed("accuracy below threshold"));
        }
        Ok(BenchmarkOutcome::passed(format!(
            "/fake/results/{}",
            key.replace('|', "/")
        )))
    }
}

// ---------------------------------------------------------------------------
// FixedDiskQuery
// ---------------------------------------------------------------------------

/// Disk query returning a settable amount of free space.
#[derive(Debug)]
pub struct FixedDiskQuery {
    free_gb: Mutex<f64>,
    failing: bool,
    queries: AtomicUsize,
}

impl FixedDiskQuery {
    pub fn new(free_gb: f64) -> Self {
        Self {
            free_gb: Mutex::new(free_gb),
            failing: false,
            queries: AtomicUsize::new(0),
        }
    }

    /// A disk query whose every call errors.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new(0.0)
        }
    }

    pub fn set_free(&self, free_gb: f64) {
        *self.free_gb.lock().unwrap() = free_gb;
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiskQuery for FixedDiskQuery {
    async fn free_space_gb(&self, path: &Path) -> anyhow::Result<f64> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            anyhow::bail!("statfs {} failed: no such device", path.display());
        }
        Ok(*self.free_gb.lock().unwrap())
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Sink that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RunCompletedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunCompletedEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl RunEventSink for RecordingSink {
    fn on_run_complete(&self, event: &RunCompletedEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
