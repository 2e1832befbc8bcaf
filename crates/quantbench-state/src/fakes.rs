//! In-memory fakes for storage traits (testing only)

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::error::{StateError, StateResult};
use crate::store::{validate_campaign_id, StateStore};

/// In-memory store backed by a `BTreeMap<campaign_id, bytes>`.
///
/// `fail_next_writes(n)` makes the next `n` writes fail with an I/O error,
/// which exercises the save retry path.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    docs: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_writes: AtomicU32,
    writes: AtomicU32,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls to `write`.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Store raw bytes, bypassing validation (used to plant corrupt documents).
    pub fn insert_raw(&self, campaign_id: &str, data: &[u8]) {
        self.docs
            .lock()
            .unwrap()
            .insert(campaign_id.to_string(), data.to_vec());
    }
}

impl StateStore for MemoryStateStore {
    fn read(&self, campaign_id: &str) -> StateResult<Option<Vec<u8>>> {
        validate_campaign_id(campaign_id)?;
        Ok(self.docs.lock().unwrap().get(campaign_id).cloned())
    }

    fn write(&self, campaign_id: &str, data: &[u8]) -> StateResult<()> {
        validate_campaign_id(campaign_id)?;
        let remaining = self.failing_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(StateError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.docs
            .lock()
            .unwrap()
            .insert(campaign_id.to_string(), data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list(&self) -> StateResult<Vec<String>> {
        Ok(self.docs.lock().unwrap().keys().cloned().collect())
    }
}
