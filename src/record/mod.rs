// src/record/mod.rs

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, fmt, path::Path};

mod fingerprint;

pub use fingerprint::{fingerprint, Fingerprint};

/// Identity of one billing period: the workbook it was read from plus the sheet name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodId {
    source_file: String,
    sheet_name: String,
}

impl PeriodId {
    pub fn new(source_file: impl Into<String>, sheet_name: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            sheet_name: sheet_name.into(),
        }
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// Filesystem-safe storage key: `<file stem>---<sheet>---<hash8>`.
    ///
    /// The sanitized parts keep the key readable on disk; the hash suffix is taken
    /// over the raw names so two identities that sanitize to the same text still
    /// get distinct keys.
    pub fn key(&self) -> String {
        let stem = Path::new(&self.source_file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.source_file);
        let digest = Sha256::new()
            .chain_update(self.source_file.as_bytes())
            .chain_update([0u8])
            .chain_update(self.sheet_name.as_bytes())
            .finalize();
        let suffix: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
        format!(
            "{}---{}---{}",
            safe_component(stem),
            safe_component(&self.sheet_name),
            suffix
        )
    }
}

impl fmt::Display for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.source_file, self.sheet_name)
    }
}

fn safe_component(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '-' | '_'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Half-open date interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Returns `None` unless `start < end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Builds a range from an inclusive last day.
    pub fn from_inclusive(start: NaiveDate, last: NaiveDate) -> Option<Self> {
        last.succ_opt().and_then(|end| Self::new(start, end))
    }

    /// The whole calendar month.
    pub fn month(year: i32, month: u32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let end = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// One charge row of a billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub energy_type: String,
    pub charge_amount: Decimal,
    pub meta: BTreeMap<String, String>,
}

impl LineItem {
    pub fn new(energy_type: impl Into<String>, charge_amount: Decimal) -> Self {
        Self {
            energy_type: energy_type.into(),
            charge_amount,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Normalized content of one billing period. Immutable once built: a changed
/// period is a new record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodRecord {
    id: PeriodId,
    date_range: DateRange,
    line_items: Vec<LineItem>,
}

impl PeriodRecord {
    pub fn new(id: PeriodId, date_range: DateRange, line_items: Vec<LineItem>) -> Self {
        Self {
            id,
            date_range,
            line_items,
        }
    }

    pub fn id(&self) -> &PeriodId {
        &self.id
    }

    pub fn date_range(&self) -> &DateRange {
        &self.date_range
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(&self.line_items)
    }

    /// Sum of all charges; `None` if it does not fit in a `Decimal`.
    pub fn total_charge(&self) -> Option<Decimal> {
        self.line_items
            .iter()
            .try_fold(Decimal::ZERO, |acc, i| acc.checked_add(i.charge_amount))
    }
}
