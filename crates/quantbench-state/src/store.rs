//! Backend-agnostic storage for serialized campaign state.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{StateError, StateResult};

/// Byte-level storage of one document per campaign id.
///
/// Guarantees:
/// - `write` replaces the whole document or leaves the previous one intact.
/// - `read` never observes a partially written document.
/// - `read` of an unknown id returns `Ok(None)`.
pub trait StateStore: Send + Sync {
    /// Read the stored document for `campaign_id`, if any.
    fn read(&self, campaign_id: &str) -> StateResult<Option<Vec<u8>>>;

    /// Replace the stored document for `campaign_id`.
    fn write(&self, campaign_id: &str, data: &[u8]) -> StateResult<()>;

    /// List every campaign id with a stored document, sorted.
    fn list(&self) -> StateResult<Vec<String>>;
}

/// Reject ids that would escape the store root or collide with temp files.
pub(crate) fn validate_campaign_id(campaign_id: &str) -> StateResult<()> {
    let valid = !campaign_id.is_empty()
        && !campaign_id.starts_with('.')
        && campaign_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StateError::InvalidCampaignId(campaign_id.to_string()))
    }
}

/// Filesystem-backed store.
///
/// Layout: `<root>/<campaign_id>.json`
pub struct FsStateStore {
    root: PathBuf,
}

impl FsStateStore {
    /// Create a store rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StateResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the document for `campaign_id`.
    pub fn state_path(&self, campaign_id: &str) -> PathBuf {
        self.root.join(format!("{campaign_id}.json"))
    }
}

impl StateStore for FsStateStore {
    fn read(&self, campaign_id: &str) -> StateResult<Option<Vec<u8>>> {
        validate_campaign_id(campaign_id)?;
        match fs::read(self.state_path(campaign_id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Io(e)),
        }
    }

    fn write(&self, campaign_id: &str, data: &[u8]) -> StateResult<()> {
        validate_campaign_id(campaign_id)?;
        fs::create_dir_all(&self.root)?;

        // Atomic write: temp file in the same directory, then rename over the target.
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.state_path(campaign_id))
            .map_err(|e| e.error)?;
        Ok(())
    }

    fn list(&self) -> StateResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_campaign_id(stem).is_ok() {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
