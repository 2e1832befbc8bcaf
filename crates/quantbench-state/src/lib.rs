//! quantbench-state - Durable campaign state
//!
//! Provides the persistence layer that makes campaigns resumable:
//! - `CampaignState` / `RunState`: the persisted record of every run
//! - `StateStore`: backend-agnostic byte storage keyed by campaign id
//! - `FsStateStore`: one JSON document per campaign, replaced atomically
//! - `StateManager`: create / load / save / point-update operations
//!
//! In-memory fakes for testing live in the `fakes` module.

pub mod error;
pub mod fakes;
pub mod manager;
pub mod model;
pub mod store;

pub use error::{StateError, StateResult};
pub use manager::StateManager;
pub use model::{
    run_key, CampaignState, CampaignStatus, RunState, RunStatus, RunUpdate, KEY_SEPARATOR,
};
pub use store::{FsStateStore, StateStore};
