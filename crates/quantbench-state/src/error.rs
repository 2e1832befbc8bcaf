//! Error types for quantbench-state

use thiserror::Error;

/// Result type for state operations
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Errors that can occur in the state persistence layer
#[derive(Error, Debug)]
pub enum StateError {
    /// Filesystem error while reading or writing state
    #[error("State I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// State could not be encoded
    #[error("State serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisted document exists but cannot be used
    #[error("State for campaign '{campaign_id}' is corrupt: {detail}")]
    Corrupt { campaign_id: String, detail: String },

    /// Campaign id cannot be used as a storage key
    #[error("Invalid campaign id: {0:?}")]
    InvalidCampaignId(String),

    /// Point update addressed a run that is not registered
    #[error("Run not found in campaign state: {key}")]
    RunNotFound { key: String },

    /// Every write attempt failed; resume guarantees no longer hold
    #[error("Failed to persist state for '{campaign_id}' after {attempts} attempt(s): {source}")]
    PersistFailed {
        campaign_id: String,
        attempts: u32,
        #[source]
        source: Box<StateError>,
    },
}
