//! Campaign state lifecycle: create, load, save and point updates.
//!
//! The manager is the only component that serializes or persists
//! `CampaignState`. Runners hold the state behind a lock and route every
//! mutation through [`StateManager::update_run`], which persists before
//! returning.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::model::{CampaignState, CampaignStatus, RunUpdate};
use crate::store::StateStore;

/// Default number of write attempts before a save is reported as failed.
pub const DEFAULT_PERSIST_ATTEMPTS: u32 = 3;

/// Owns persistence of campaign state.
#[derive(Clone)]
pub struct StateManager {
    store: Arc<dyn StateStore>,
    persist_attempts: u32,
}

impl StateManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            persist_attempts: DEFAULT_PERSIST_ATTEMPTS,
        }
    }

    /// Override the number of write attempts per save (minimum 1).
    pub fn with_persist_attempts(mut self, attempts: u32) -> Self {
        self.persist_attempts = attempts.max(1);
        self
    }

    /// Start a fresh campaign record. Nothing is persisted until `save`.
    pub fn create(&self, campaign_id: &str, campaign_name: &str) -> CampaignState {
        debug!(campaign_id = %campaign_id, "creating campaign state");
        CampaignState::new(campaign_id, campaign_name)
    }

    /// Load prior state for `campaign_id`.
    ///
    /// Returns `None` when there is no prior state. An unreadable or corrupt
    /// document is logged and also yields `None`, so a damaged file degrades
    /// to a fresh start instead of blocking the campaign.
    pub fn load(&self, campaign_id: &str) -> Option<CampaignState> {
        let bytes = match self.store.read(campaign_id) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(campaign_id = %campaign_id, error = %e, "state unreadable; starting fresh");
                return None;
            }
        };

        match decode(campaign_id, &bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(campaign_id = %campaign_id, error = %e, "state corrupt; starting fresh");
                None
            }
        }
    }

    /// Persist `state`, retrying failed writes.
    ///
    /// Returns `StateError::PersistFailed` once every attempt has failed.
    pub fn save(&self, state: &CampaignState) -> StateResult<()> {
        let data = serde_json::to_vec_pretty(state)?;
        let mut last_err = None;

        for attempt in 1..=self.persist_attempts {
            match self.store.write(&state.campaign_id, &data) {
                Ok(()) => {
                    debug!(campaign_id = %state.campaign_id, attempt, "state saved");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        event = "state.persist_retry",
                        campaign_id = %state.campaign_id,
                        attempt,
                        error = %e,
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(StateError::PersistFailed {
            campaign_id: state.campaign_id.clone(),
            attempts: self.persist_attempts,
            source: Box::new(last_err.unwrap_or_else(|| {
                StateError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "no write attempted",
                ))
            })),
        })
    }

    /// Apply `update` to the run identified by `key`, then persist.
    pub fn update_run(
        &self,
        state: &mut CampaignState,
        key: &str,
        update: RunUpdate,
    ) -> StateResult<()> {
        let run = state.run_mut(key).ok_or_else(|| StateError::RunNotFound {
            key: key.to_string(),
        })?;
        run.apply(update);
        self.save(state)
    }

    /// Whether `key` is in the campaign's completed set.
    pub fn is_run_done(&self, state: &CampaignState, key: &str) -> bool {
        state.run(key).map(|r| r.status.is_done()).unwrap_or(false)
    }

    /// Mark the campaign finished and persist.
    pub fn finish(&self, state: &mut CampaignState) -> StateResult<()> {
        state.status = CampaignStatus::Completed;
        self.save(state)
    }

    /// Ids of every campaign with persisted state.
    pub fn list_campaigns(&self) -> StateResult<Vec<String>> {
        self.store.list()
    }
}

fn decode(campaign_id: &str, bytes: &[u8]) -> StateResult<CampaignState> {
    let state: CampaignState =
        serde_json::from_slice(bytes).map_err(|e| StateError::Corrupt {
            campaign_id: campaign_id.to_string(),
            detail: e.to_string(),
        })?;
    if state.campaign_id != campaign_id {
        return Err(StateError::Corrupt {
            campaign_id: campaign_id.to_string(),
            detail: format!("document belongs to campaign '{}'", state.campaign_id),
        });
    }
    Ok(state)
}
