use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
};

use super::{CacheEntry, CacheError, PeriodStore};
use crate::record::{PeriodId, PeriodRecord};

/// In-process store. Counts writes so callers can check that unchanged
/// periods are not rewritten.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<PeriodId, CacheEntry>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `store` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PeriodStore for MemoryStore {
    fn exists(&self, id: &PeriodId) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    fn load(&self, id: &PeriodId) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    fn store(&self, record: &PeriodRecord) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry::new(record.clone(), Utc::now());
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id().clone(), entry.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(entry)
    }

    fn list(&self) -> Result<Vec<String>, CacheError> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .map(PeriodId::key)
            .collect();
        keys.sort();
        Ok(keys)
    }
}
