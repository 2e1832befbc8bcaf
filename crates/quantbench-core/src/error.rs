//! Campaign error taxonomy.
//!
//! Only `Configuration` and `State` propagate out of a campaign. The per-run
//! variants are built at the run boundary and their display text becomes the
//! `error` recorded on the run.

use quantbench_state::StateError;

/// Errors produced while planning or executing a campaign.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("invalid campaign config: {0}")]
    Configuration(String),

    #[error("discovery failed for {reference}: {message}")]
    Discovery { reference: String, message: String },

    #[error("download failed for {key}: {message}")]
    Download { key: String, message: String },

    #[error("benchmark failed for {key}: {message}")]
    Execution { key: String, message: String },

    #[error("insufficient disk space for {key}: need {required_gb:.1} GB, {free_gb:.1} GB free")]
    ResourceExhausted {
        key: String,
        required_gb: f64,
        free_gb: f64,
    },

    #[error("disk space query failed for {path}: {message}")]
    DiskQuery { path: String, message: String },

    #[error("state persistence error: {0}")]
    State(#[from] StateError),
}

/// Result type for campaign operations.
pub type Result<T> = std::result::Result<T, CampaignError>;
