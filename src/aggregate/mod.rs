// src/aggregate/mod.rs

pub mod export;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::record::{DateRange, PeriodId, PeriodRecord};

/// Bucket for energy types outside the known list.
pub const UNSPECIFIED: &str = "unspecified";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("period {period} was accepted with two date ranges: {first} and {second}")]
    ConflictingRange {
        period: PeriodId,
        first: DateRange,
        second: DateRange,
    },
    #[error("charges for {range} overflow the decimal range (at `{energy_type}`)")]
    Overflow {
        range: DateRange,
        energy_type: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Types kept under their own name; anything else is summed under
    /// `unspecified`. Empty means every type is known.
    pub known_types: Vec<String>,
    /// Leading pivot columns, in this order.
    pub type_order: Vec<String>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        let types: Vec<String> = ["电", "采暖热表", "生活热水表", "自来水", "中水", "燃气"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self {
            known_types: types.clone(),
            type_order: types,
        }
    }
}

/// Fold accepted records into per-(range, type) and per-range totals.
///
/// Each period id contributes one record. A later record with the same id and
/// range replaces the earlier one, so an exact duplicate counts once. The same
/// id with two different ranges is an error.
pub fn aggregate<'a, I>(records: I, known_types: &[String]) -> Result<SummaryTable, AggregationError>
where
    I: IntoIterator<Item = &'a PeriodRecord>,
{
    let known: HashSet<&str> = known_types.iter().map(String::as_str).collect();

    // 1) keep one record per period id, in first-seen order
    let mut slots: HashMap<&PeriodId, usize> = HashMap::new();
    let mut latest: Vec<&PeriodRecord> = Vec::new();
    for record in records {
        let Some(slot) = slots.get(record.id()).copied() else {
            slots.insert(record.id(), latest.len());
            latest.push(record);
            continue;
        };
        let kept = latest[slot];
        if kept.date_range() != record.date_range() {
            return Err(AggregationError::ConflictingRange {
                period: record.id().clone(),
                first: *kept.date_range(),
                second: *record.date_range(),
            });
        }
        if kept.fingerprint() == record.fingerprint() {
            debug!(period = %record.id(), "duplicate record ignored");
        } else {
            debug!(period = %record.id(), "record superseded by a later one");
        }
        latest[slot] = record;
    }

    // 2) fold line items into buckets
    let mut table = SummaryTable::default();
    for record in latest {
        let range = *record.date_range();
        let range_total = table.by_range.entry(range).or_insert(Decimal::ZERO);
        for item in record.line_items() {
            let label = if known.is_empty() || known.contains(item.energy_type.as_str()) {
                item.energy_type.clone()
            } else {
                UNSPECIFIED.to_string()
            };
            let overflow = || AggregationError::Overflow {
                range,
                energy_type: item.energy_type.clone(),
            };
            *range_total = range_total
                .checked_add(item.charge_amount)
                .ok_or_else(overflow)?;
            let bucket = table.by_type.entry((range, label)).or_insert(Decimal::ZERO);
            *bucket = bucket.checked_add(item.charge_amount).ok_or_else(overflow)?;
        }
    }

    Ok(table)
}

/// Totals by (date range, energy type) and by date range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryTable {
    by_type: BTreeMap<(DateRange, String), Decimal>,
    by_range: BTreeMap<DateRange, Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub date_range: String,
    pub energy_type: String,
    pub total_charge: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeTotal {
    pub date_range: String,
    pub total_charge: Decimal,
}

/// Wide form: one row per range, one column per energy type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pivot {
    pub columns: Vec<String>,
    pub rows: Vec<PivotRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotRow {
    pub date_range: DateRange,
    /// Same order as [`Pivot::columns`]; zero where a type has no charge.
    pub cells: Vec<Decimal>,
    pub total: Decimal,
}

impl SummaryTable {
    pub fn get(&self, range: &DateRange, energy_type: &str) -> Option<Decimal> {
        self.by_type
            .get(&(*range, energy_type.to_string()))
            .copied()
    }

    pub fn range_total(&self, range: &DateRange) -> Option<Decimal> {
        self.by_range.get(range).copied()
    }

    pub fn ranges(&self) -> impl Iterator<Item = &DateRange> {
        self.by_range.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.by_range.is_empty()
    }

    pub fn energy_types(&self) -> BTreeSet<&str> {
        self.by_type.keys().map(|(_, t)| t.as_str()).collect()
    }

    /// Long form, ordered by range then energy type.
    pub fn rows(&self) -> Vec<SummaryRow> {
        self.by_type
            .iter()
            .map(|((range, energy_type), total)| SummaryRow {
                date_range: range.to_string(),
                energy_type: energy_type.clone(),
                total_charge: *total,
            })
            .collect()
    }

    pub fn range_totals(&self) -> Vec<RangeTotal> {
        self.by_range
            .iter()
            .map(|(range, total)| RangeTotal {
                date_range: range.to_string(),
                total_charge: *total,
            })
            .collect()
    }

    /// Columns: the `type_order` entries that have charges, then the
    /// remaining types alphabetically, then `unspecified`.
    pub fn pivot(&self, type_order: &[String]) -> Pivot {
        let present = self.energy_types();
        let mut columns: Vec<String> = Vec::new();
        for t in type_order {
            if t != UNSPECIFIED && present.contains(t.as_str()) && !columns.contains(t) {
                columns.push(t.clone());
            }
        }
        for t in &present {
            if *t != UNSPECIFIED && !columns.iter().any(|c| c == t) {
                columns.push(t.to_string());
            }
        }
        if present.contains(UNSPECIFIED) {
            columns.push(UNSPECIFIED.to_string());
        }

        let rows = self
            .by_range
            .iter()
            .map(|(range, total)| PivotRow {
                date_range: *range,
                cells: columns
                    .iter()
                    .map(|c| self.get(range, c).unwrap_or(Decimal::ZERO))
                    .collect(),
                total: *total,
            })
            .collect();

        Pivot { columns, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LineItem;
    use rust_decimal_macros::dec;

    fn jan() -> DateRange {
        DateRange::month(2024, 1).unwrap()
    }

    fn feb() -> DateRange {
        DateRange::month(2024, 2).unwrap()
    }

    fn record(sheet: &str, range: DateRange, items: &[(&str, Decimal)]) -> PeriodRecord {
        PeriodRecord::new(
            PeriodId::new("bills.xlsx", sheet),
            range,
            items.iter().map(|(t, a)| LineItem::new(*t, *a)).collect(),
        )
    }

    fn all_known() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn buckets_and_range_totals() {
        let records = vec![record(
            "jan",
            jan(),
            &[("electric", dec!(100.00)), ("water", dec!(50.00))],
        )];
        let table = aggregate(&records, &all_known()).unwrap();
        assert_eq!(table.get(&jan(), "electric"), Some(dec!(100.00)));
        assert_eq!(table.get(&jan(), "water"), Some(dec!(50.00)));
        assert_eq!(table.range_total(&jan()), Some(dec!(150.00)));
    }

    #[test]
    fn per_range_sums_are_conserved() {
        let records = vec![
            record("a", jan(), &[("电", dec!(0.10)), ("燃气", dec!(0.20))]),
            record("b", jan(), &[("电", dec!(0.30)), ("蒸汽", dec!(1.05))]),
            record("c", feb(), &[("中水", dec!(7.77))]),
        ];
        let table = aggregate(&records, &AggregationConfig::default().known_types).unwrap();

        for range in [jan(), feb()] {
            let items: Decimal = records
                .iter()
                .filter(|r| *r.date_range() == range)
                .map(|r| r.total_charge().unwrap())
                .sum();
            let buckets: Decimal = table
                .rows()
                .iter()
                .filter(|row| row.date_range == range.to_string())
                .map(|row| row.total_charge)
                .sum();
            assert_eq!(buckets, items);
            assert_eq!(table.range_total(&range), Some(items));
        }
        assert_eq!(table.get(&jan(), "电"), Some(dec!(0.40)));
        assert_eq!(table.get(&jan(), UNSPECIFIED), Some(dec!(1.05)));
        assert_eq!(table.get(&jan(), "蒸汽"), None);
    }

    #[test]
    fn same_period_with_two_ranges_is_an_error() {
        let records = vec![
            record("jan", jan(), &[("电", dec!(1))]),
            record("jan", feb(), &[("电", dec!(1))]),
        ];
        assert_eq!(
            aggregate(&records, &all_known()),
            Err(AggregationError::ConflictingRange {
                period: PeriodId::new("bills.xlsx", "jan"),
                first: jan(),
                second: feb(),
            })
        );
    }

    #[test]
    fn exact_duplicates_count_once() {
        let r = record("jan", jan(), &[("电", dec!(10))]);
        let table = aggregate(&[r.clone(), r], &all_known()).unwrap();
        assert_eq!(table.range_total(&jan()), Some(dec!(10)));
    }

    #[test]
    fn later_record_for_the_same_period_replaces_the_earlier() {
        let records = vec![
            record("jan", jan(), &[("电", dec!(100))]),
            record("other", jan(), &[("电", dec!(5))]),
            record("jan", jan(), &[("电", dec!(120))]),
        ];
        let table = aggregate(&records, &all_known()).unwrap();
        assert_eq!(table.get(&jan(), "电"), Some(dec!(125)));
        assert_eq!(table.range_total(&jan()), Some(dec!(125)));
    }

    #[test]
    fn overflowing_sums_are_an_error() {
        let records = vec![
            record("a", jan(), &[("电", Decimal::MAX)]),
            record("b", jan(), &[("燃气", Decimal::MAX)]),
        ];
        assert_eq!(
            aggregate(&records, &all_known()),
            Err(AggregationError::Overflow {
                range: jan(),
                energy_type: "燃气".into(),
            })
        );

        let same_type = vec![
            record("a", jan(), &[("电", Decimal::MAX)]),
            record("b", feb(), &[("电", Decimal::MAX)]),
            record("c", feb(), &[("电", Decimal::ONE)]),
        ];
        assert!(matches!(
            aggregate(&same_type, &all_known()),
            Err(AggregationError::Overflow { .. })
        ));
    }

    #[test]
    fn empty_period_still_has_a_total() {
        let table = aggregate(&[record("jan", jan(), &[])], &all_known()).unwrap();
        assert_eq!(table.range_total(&jan()), Some(Decimal::ZERO));
        assert!(table.rows().is_empty());
    }

    #[test]
    fn pivot_orders_configured_then_alphabetical_then_unspecified() {
        let records = vec![
            record("jan", jan(), &[("b", dec!(1)), ("z", dec!(2)), ("a", dec!(3))]),
            record("feb", feb(), &[("x", dec!(4)), ("q", dec!(5))]),
        ];
        let known: Vec<String> = ["a", "b", "x", "z"].iter().map(|s| s.to_string()).collect();
        let table = aggregate(&records, &known).unwrap();
        let order: Vec<String> = vec!["z".into(), "missing".into()];
        let pivot = table.pivot(&order);

        // "missing" has no charges anywhere, so it gets no column
        assert_eq!(pivot.columns, vec!["z", "a", "b", "x", UNSPECIFIED]);
        assert_eq!(pivot.rows[0].date_range, jan());
        assert_eq!(
            pivot.rows[0].cells,
            vec![dec!(2), dec!(3), dec!(1), dec!(0), dec!(0)]
        );
        assert_eq!(pivot.rows[1].cells[4], dec!(5));
        assert_eq!(pivot.rows[1].total, dec!(9));
    }
}
