//! In-memory record store for tests and dry runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{StateError, StateResult};
use crate::store::RecordStore;
use crate::types::MonitorRecord;

#[derive(Debug, Default)]
struct Inner {
    record: Mutex<MonitorRecord>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

/// Ephemeral [`RecordStore`]. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing record, as if it had been saved earlier.
    pub fn with_record(record: MonitorRecord) -> Self {
        let store = Self::new();
        *store.lock() = record;
        store
    }

    /// The currently stored record.
    pub fn record(&self) -> MonitorRecord {
        self.lock().clone()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.inner.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail with a write error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.inner.fail_saves.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorRecord> {
        self.inner
            .record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RecordStore for MemoryStore {
    fn load(&self) -> StateResult<MonitorRecord> {
        Ok(self.record())
    }

    fn save(&self, record: &MonitorRecord) -> StateResult<()> {
        if self.inner.fail_saves.load(Ordering::SeqCst) {
            return Err(StateError::Write("in-memory store: save disabled".to_string()));
        }
        *self.lock() = record.clone();
        self.inner.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
