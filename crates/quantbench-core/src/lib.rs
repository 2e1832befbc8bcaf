//! quantbench Core Library
//!
//! Orchestrates benchmark campaigns over model × engine × quant:
//! planning and variant discovery, disk-aware admission, sequential and
//! download-overlapped execution, and result aggregation. Durable state
//! comes from `quantbench-state`.

pub mod campaign;
pub mod collaborators;
pub mod config;
pub mod discovery;
pub mod disk;
pub mod error;
pub mod fakes;
pub mod metrics;
pub mod obs;
pub mod parallel;
pub mod results;
pub mod run_spec;
pub mod runner;
pub mod scheduler;
pub mod telemetry;

pub use campaign::{Campaign, CampaignOptions, Strategy};

pub use collaborators::{
    BenchmarkExecutor, BenchmarkOutcome, BenchmarkStatus, ChannelSink, Discovery, DiskQuery,
    ModelStorage, RunCompletedEvent, RunEventSink,
};

pub use config::{
    CampaignConfig, DiskConfig, EngineSpec, ModelSpec, QuantFilterConfig, ResourceLimits,
};

pub use discovery::{RegistryConfig, RegistryDiscovery};
pub use disk::DfDiskQuery;
pub use error::{CampaignError, Result};
pub use parallel::ParallelRunner;
pub use results::{CampaignResult, CampaignRunResult};
pub use run_spec::{ModelFormat, ModelRef, RunSpec};
pub use runner::{CampaignRunner, Collaborators, RunContext, SequentialRunner, SharedState};
pub use scheduler::{QuantFilter, Scheduler};
pub use telemetry::{init_tracing, init_tracing_from_env};

pub use quantbench_state::{
    CampaignState, CampaignStatus, FsStateStore, RunState, RunStatus, StateError, StateManager,
};
