// src/reconcile/mod.rs

pub mod diff;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheError, PeriodStore};
use crate::record::{PeriodId, PeriodRecord};

pub use diff::{DiffSummary, ItemChange, ItemKey};

/// What to do when a period's fresh content differs from its cache entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergencePolicy {
    /// Accept the fresh record and overwrite the cache entry.
    #[default]
    AcceptFresh,
    /// Keep using the cached record; the cache is not written.
    KeepCached,
    /// Report the divergence and abort the run.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    AcceptedFresh,
    KeptCached,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    New,
    Unchanged,
    Diverged,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutcomeKind::New => "new",
            OutcomeKind::Unchanged => "unchanged",
            OutcomeKind::Diverged => "diverged",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationOutcome {
    /// Never seen before; written to the cache.
    New(PeriodRecord),
    /// Same content as the cache entry; nothing written.
    Unchanged(CacheEntry),
    Diverged {
        fresh: PeriodRecord,
        cached: CacheEntry,
        diff: DiffSummary,
        resolution: Resolution,
    },
}

impl ReconciliationOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            ReconciliationOutcome::New(_) => OutcomeKind::New,
            ReconciliationOutcome::Unchanged(_) => OutcomeKind::Unchanged,
            ReconciliationOutcome::Diverged { .. } => OutcomeKind::Diverged,
        }
    }

    pub fn period_id(&self) -> &PeriodId {
        match self {
            ReconciliationOutcome::New(r) => r.id(),
            ReconciliationOutcome::Unchanged(e) => e.record.id(),
            ReconciliationOutcome::Diverged { fresh, .. } => fresh.id(),
        }
    }

    /// The record that goes on to aggregation, if any.
    pub fn accepted(&self) -> Option<&PeriodRecord> {
        match self {
            ReconciliationOutcome::New(r) => Some(r),
            ReconciliationOutcome::Unchanged(e) => Some(&e.record),
            ReconciliationOutcome::Diverged {
                fresh,
                cached,
                resolution,
                ..
            } => match resolution {
                Resolution::AcceptedFresh => Some(fresh),
                Resolution::KeptCached => Some(&cached.record),
                Resolution::Rejected => None,
            },
        }
    }

    pub fn into_accepted(self) -> Option<PeriodRecord> {
        match self {
            ReconciliationOutcome::New(r) => Some(r),
            ReconciliationOutcome::Unchanged(e) => Some(e.record),
            ReconciliationOutcome::Diverged {
                fresh,
                cached,
                resolution,
                ..
            } => match resolution {
                Resolution::AcceptedFresh => Some(fresh),
                Resolution::KeptCached => Some(cached.record),
                Resolution::Rejected => None,
            },
        }
    }
}

/// Compares fresh records against the cache and keeps the cache current.
pub struct Reconciler<'a, S: PeriodStore + ?Sized> {
    store: &'a S,
    policy: DivergencePolicy,
    secondary_key: Option<String>,
}

impl<'a, S: PeriodStore + ?Sized> Reconciler<'a, S> {
    pub fn new(store: &'a S, policy: DivergencePolicy) -> Self {
        Self {
            store,
            policy,
            secondary_key: None,
        }
    }

    /// Meta column used to tell items of one energy type apart in diffs.
    pub fn with_secondary_key(mut self, header: Option<String>) -> Self {
        self.secondary_key = header;
        self
    }

    pub fn reconcile(&self, fresh: PeriodRecord) -> Result<ReconciliationOutcome, CacheError> {
        let cached = if self.store.exists(fresh.id()) {
            self.store.load(fresh.id())?
        } else {
            None
        };

        let cached = match cached {
            None => {
                let entry = self.store.store(&fresh)?;
                info!(period = %fresh.id(), fingerprint = %entry.fingerprint.short(), "new period cached");
                return Ok(ReconciliationOutcome::New(fresh));
            }
            Some(c) => c,
        };

        if cached.fingerprint == fresh.fingerprint() && cached.record.date_range() == fresh.date_range() {
            debug!(period = %fresh.id(), "unchanged");
            return Ok(ReconciliationOutcome::Unchanged(cached));
        }

        let diff = diff::diff(&cached.record, &fresh, self.secondary_key.as_deref());
        let resolution = match self.policy {
            DivergencePolicy::AcceptFresh => {
                self.store.store(&fresh)?;
                Resolution::AcceptedFresh
            }
            DivergencePolicy::KeepCached => Resolution::KeptCached,
            DivergencePolicy::Fail => Resolution::Rejected,
        };
        warn!(
            period = %fresh.id(),
            cached_at = %cached.written_at,
            resolution = ?resolution,
            "period diverged from cache: {}",
            diff
        );

        Ok(ReconciliationOutcome::Diverged {
            fresh,
            cached,
            diff,
            resolution,
        })
    }
}
