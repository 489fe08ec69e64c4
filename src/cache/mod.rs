// src/cache/mod.rs

mod columnar;
mod memory;
mod schema;

pub use columnar::ParquetStore;
pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

use crate::record::{Fingerprint, PeriodId, PeriodRecord};

/// Everything that can go wrong talking to the period cache. All of it is
/// fatal for the run.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("bad meta JSON in cache: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
    #[error("cache entry `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        CacheError::Corrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Last accepted snapshot of a period.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub record: PeriodRecord,
    pub fingerprint: Fingerprint,
    pub written_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(record: PeriodRecord, written_at: DateTime<Utc>) -> Self {
        let fingerprint = record.fingerprint();
        Self {
            record,
            fingerprint,
            written_at,
        }
    }
}

/// Durable store of one entry per period id.
///
/// `store` replaces any previous entry atomically: a reader sees either the
/// old entry or the new one, never a mix. Callers guarantee a single writer
/// per key.
pub trait PeriodStore: Send + Sync {
    fn exists(&self, id: &PeriodId) -> bool;

    fn load(&self, id: &PeriodId) -> Result<Option<CacheEntry>, CacheError>;

    fn store(&self, record: &PeriodRecord) -> Result<CacheEntry, CacheError>;

    /// Storage keys of every entry, sorted.
    fn list(&self) -> Result<Vec<String>, CacheError>;
}
