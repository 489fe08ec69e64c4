// src/engine.rs

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::aggregate::{aggregate, AggregationConfig, AggregationError, SummaryTable};
use crate::cache::{CacheError, PeriodStore};
use crate::grid::SheetInput;
pub use crate::grid::SheetFailure;
use crate::normalize::{NormalizeError, Normalized, Normalizer, ParseWarning};
use crate::reconcile::{
    DiffSummary, DivergencePolicy, OutcomeKind, ReconciliationOutcome, Reconciler, Resolution,
};
use crate::record::{PeriodId, PeriodRecord};

/// Errors that end a run. Sheet-level problems never show up here; they go
/// to [`RunReport::failures`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error("period {period} diverged from its cache entry ({diff}) and divergence policy is `fail`")]
    DivergenceRejected { period: PeriodId, diff: DiffSummary },
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodReport {
    pub source_file: String,
    pub sheet_name: String,
    pub period_key: String,
    pub date_range: String,
    pub outcome: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub fingerprint: String,
    pub items: usize,
    /// `None` when the sum does not fit in a `Decimal`.
    pub total_charge: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffSummary>,
}

impl PeriodReport {
    fn from_outcome(outcome: &ReconciliationOutcome) -> Self {
        let (record, resolution, diff) = match outcome {
            ReconciliationOutcome::New(r) => (r, None, None),
            ReconciliationOutcome::Unchanged(e) => (&e.record, None, None),
            ReconciliationOutcome::Diverged {
                fresh,
                diff,
                resolution,
                ..
            } => (fresh, Some(*resolution), Some(diff.clone())),
        };
        let id = record.id();
        Self {
            source_file: id.source_file().to_string(),
            sheet_name: id.sheet_name().to_string(),
            period_key: id.key(),
            date_range: record.date_range().to_string(),
            outcome: outcome.kind(),
            resolution,
            fingerprint: record.fingerprint().to_string(),
            items: record.line_items().len(),
            total_charge: record.total_charge(),
            diff,
        }
    }
}

/// A sheet whose record was replaced by a later sheet with the same period
/// id and date range in the same run.
#[derive(Debug, Clone, Serialize)]
pub struct SupersededSheet {
    pub source_file: String,
    pub sheet_name: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetWarning {
    pub source_file: String,
    pub sheet_name: String,
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub periods: Vec<PeriodReport>,
    pub failures: Vec<SheetFailure>,
    pub warnings: Vec<SheetWarning>,
    pub superseded: Vec<SupersededSheet>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            periods: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
            superseded: Vec::new(),
        }
    }
}

impl RunReport {
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.periods.iter().filter(|p| p.outcome == kind).count()
    }

    /// Human-readable summary through `tracing`.
    pub fn log(&self) {
        info!(
            new = self.count(OutcomeKind::New),
            unchanged = self.count(OutcomeKind::Unchanged),
            diverged = self.count(OutcomeKind::Diverged),
            failed = self.failures.len(),
            warnings = self.warnings.len(),
            superseded = self.superseded.len(),
            "run finished"
        );
        for p in self.periods.iter().filter(|p| p.outcome == OutcomeKind::Diverged) {
            if let Some(diff) = &p.diff {
                warn!(
                    "diverged: {} [{}] {} ({:?})",
                    p.source_file, p.sheet_name, diff, p.resolution
                );
            }
        }
        for f in &self.failures {
            error!("skipped: {} [{}]: {}", f.source_file, f.sheet_name, f.error);
        }
        for w in &self.warnings {
            warn!("{} [{}] row {}: {}", w.source_file, w.sheet_name, w.row, w.message);
        }
    }
}

pub struct RunOutput {
    pub summary: SummaryTable,
    pub report: RunReport,
    /// Records that went into the summary, in input order.
    pub accepted: Vec<PeriodRecord>,
}

/// One batch run: normalize every sheet, reconcile each period against the
/// store, aggregate what was accepted.
pub struct Engine<'a, S: PeriodStore + ?Sized> {
    store: &'a S,
    normalizer: Normalizer,
    aggregation: AggregationConfig,
    policy: DivergencePolicy,
}

impl<'a, S: PeriodStore + ?Sized> Engine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            normalizer: Normalizer::default(),
            aggregation: AggregationConfig::default(),
            policy: DivergencePolicy::default(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationConfig) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_policy(mut self, policy: DivergencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn run(&self, sheets: Vec<SheetInput>) -> Result<RunOutput, EngineError> {
        let mut report = RunReport::default();
        info!(sheets = sheets.len(), policy = ?self.policy, "run started");

        // 1) normalize all sheets in parallel; order is kept
        let normalized: Vec<(&SheetInput, Result<Normalized, NormalizeError>)> = sheets
            .par_iter()
            .map(|sheet| {
                let id = PeriodId::new(&sheet.source_file, &sheet.sheet_name);
                (
                    sheet,
                    self.normalizer.normalize(id, &sheet.grid, &sheet.sheet_name),
                )
            })
            .collect();

        // 2) one record per period id; a later sheet with the same range wins
        let mut slots: HashMap<PeriodId, usize> = HashMap::new();
        let mut records: Vec<PeriodRecord> = Vec::new();
        for (sheet, result) in normalized {
            let Normalized { record, warnings } = match result {
                Ok(n) => n,
                Err(e) => {
                    warn!(file = %sheet.source_file, sheet = %sheet.sheet_name, error = %e, "sheet skipped");
                    report.failures.push(SheetFailure {
                        source_file: sheet.source_file.clone(),
                        sheet_name: sheet.sheet_name.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            report
                .warnings
                .extend(warnings.into_iter().map(|ParseWarning { row, message }| {
                    SheetWarning {
                        source_file: sheet.source_file.clone(),
                        sheet_name: sheet.sheet_name.clone(),
                        row,
                        message,
                    }
                }));

            let Some(slot) = slots.get(record.id()).copied() else {
                slots.insert(record.id().clone(), records.len());
                records.push(record);
                continue;
            };
            let earlier = &records[slot];
            if earlier.date_range() != record.date_range() {
                // nothing has been reconciled yet, so the cache is untouched
                return Err(AggregationError::ConflictingRange {
                    period: record.id().clone(),
                    first: *earlier.date_range(),
                    second: *record.date_range(),
                }
                .into());
            }
            warn!(period = %record.id(), "sheet superseded by a later one with the same identity");
            report.superseded.push(SupersededSheet {
                source_file: sheet.source_file.clone(),
                sheet_name: sheet.sheet_name.clone(),
                fingerprint: earlier.fingerprint().to_string(),
            });
            records[slot] = record;
        }

        // 3) reconcile each period once
        let reconciler = Reconciler::new(self.store, self.policy)
            .with_secondary_key(self.normalizer.config().secondary_key_header.clone());
        let mut accepted = Vec::new();
        for record in records {
            let outcome = reconciler.reconcile(record)?;
            report.periods.push(PeriodReport::from_outcome(&outcome));
            match outcome {
                ReconciliationOutcome::Diverged {
                    fresh,
                    diff,
                    resolution: Resolution::Rejected,
                    ..
                } => {
                    return Err(EngineError::DivergenceRejected {
                        period: fresh.id().clone(),
                        diff,
                    });
                }
                other => accepted.extend(other.into_accepted()),
            }
        }

        // 4) aggregate
        let summary = aggregate(&accepted, &self.aggregation.known_types)?;
        info!(
            periods = accepted.len(),
            ranges = summary.ranges().count(),
            "summary built"
        );

        Ok(RunOutput {
            summary,
            report,
            accepted,
        })
    }
}
