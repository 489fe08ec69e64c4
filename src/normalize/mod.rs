// src/normalize/mod.rs

pub mod amount;
pub mod date_range;
pub mod fill;
pub mod layout;

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::grid::{RawCell, RawCellGrid};
use crate::record::{DateRange, LineItem, PeriodId, PeriodRecord};

use self::layout::{header_key, ColumnLayout};

/// Sheet-level failures. Either one skips the sheet; the run goes on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("layout error: {0}")]
    Layout(String),
    #[error("merged cell gap at sheet row {row} in column `{column}` has no value above it")]
    MergedCellAmbiguity { row: usize, column: String },
}

/// A row dropped from a sheet, or folded into another row. `row` is the
/// 1-based row number within the sheet grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    pub row: usize,
    pub message: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Accepted header texts for the energy type column.
    pub category_headers: Vec<String>,
    /// Accepted header texts for the charge column.
    pub amount_headers: Vec<String>,
    /// Meta column that tells apart two items of the same energy type.
    pub secondary_key_header: Option<String>,
    /// Category values that mark total rows; these rows are not line items.
    pub summary_labels: Vec<String>,
    pub header_search_rows: usize,
    /// Decimal places charges are fixed to.
    pub charge_scale: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        let strings = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            category_headers: strings(&["能源类型", "energy type", "energy_type", "category"]),
            amount_headers: strings(&["费用(元)", "费用", "charge", "amount", "cost"]),
            secondary_key_header: Some("表号".to_string()),
            summary_labels: strings(&["合计", "小计", "总计", "total", "subtotal"]),
            header_search_rows: 10,
            charge_scale: 2,
        }
    }
}

/// Result of normalizing one sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub record: PeriodRecord,
    pub warnings: Vec<ParseWarning>,
}

/// Turns one raw sheet grid into a [`PeriodRecord`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Normalize one sheet.
    ///
    /// `period_label_hint` is tried first for the date range (normally the sheet
    /// name); if it does not parse, the cells from the top of the sheet down to
    /// the header row are tried in order.
    #[tracing::instrument(level = "debug", skip(self, grid), fields(period = %id))]
    pub fn normalize(
        &self,
        id: PeriodId,
        grid: &RawCellGrid,
        period_label_hint: &str,
    ) -> Result<Normalized, NormalizeError> {
        let layout = layout::locate_columns(grid, &self.config)?;
        let date_range = find_date_range(grid, &layout, period_label_hint)?;

        // 1) drop blank rows, keeping their sheet row numbers
        let (row_numbers, data_rows) = layout.data_rows(grid);

        // 2) repair merged category cells
        let filled = fill::forward_fill(&data_rows, layout.category.index).map_err(|gap| {
            NormalizeError::MergedCellAmbiguity {
                row: row_numbers[gap.row],
                column: layout.category.name.clone(),
            }
        })?;

        // 3) one line item per usable row
        let mut warnings = Vec::new();
        let mut items: Vec<(usize, LineItem)> = Vec::with_capacity(filled.len());
        for (row, cells) in row_numbers.iter().copied().zip(&filled) {
            let energy_type = match cells[layout.category.index].as_text() {
                Some(t) => t,
                None => continue,
            };
            if self.is_summary_label(&energy_type) {
                debug!(row, label = %energy_type, "skipping summary row");
                continue;
            }
            let parsed = cells
                .get(layout.amount.index)
                .map_or(Err(amount::AmountIssue::Missing), |cell| {
                    amount::parse_amount(cell, self.config.charge_scale)
                });
            let charge_amount = match parsed {
                Ok(v) => v,
                Err(issue) => {
                    warn!(row, %issue, "dropping row");
                    warnings.push(ParseWarning {
                        row,
                        message: format!("{} ({}), row dropped", issue, energy_type),
                    });
                    continue;
                }
            };
            let meta = layout
                .meta
                .iter()
                .filter_map(|col| {
                    let value = cells.get(col.index)?.as_text()?;
                    Some((col.name.clone(), value))
                })
                .collect();
            items.push((
                row,
                LineItem {
                    energy_type,
                    charge_amount,
                    meta,
                },
            ));
        }

        // 4) fold rows that share (energy type, secondary key)
        let line_items = self.merge_duplicates(items, &mut warnings);

        Ok(Normalized {
            record: PeriodRecord::new(id, date_range, line_items),
            warnings,
        })
    }

    fn is_summary_label(&self, energy_type: &str) -> bool {
        let key = header_key(energy_type);
        self.config
            .summary_labels
            .iter()
            .any(|label| header_key(label) == key)
    }

    fn merge_duplicates(
        &self,
        items: Vec<(usize, LineItem)>,
        warnings: &mut Vec<ParseWarning>,
    ) -> Vec<LineItem> {
        let mut merged: Vec<(usize, LineItem)> = Vec::with_capacity(items.len());
        let mut index: HashMap<(String, Option<String>), usize> = HashMap::new();

        for (row, item) in items {
            let key = (
                item.energy_type.clone(),
                self.config
                    .secondary_key_header
                    .as_deref()
                    .and_then(|h| secondary_value(&item, h))
                    .map(str::to_string),
            );
            match index.get(&key) {
                Some(&pos) => {
                    let (first_row, target) = &mut merged[pos];
                    let Some(sum) = target.charge_amount.checked_add(item.charge_amount) else {
                        warn!(row, "merged charge overflows, dropping row");
                        warnings.push(ParseWarning {
                            row,
                            message: format!(
                                "charge for `{}` overflows when merged into row {}, row dropped",
                                item.energy_type, first_row
                            ),
                        });
                        continue;
                    };
                    target.charge_amount = sum;
                    target.meta = agreeing_meta(&target.meta, &item.meta);
                    warnings.push(ParseWarning {
                        row,
                        message: format!(
                            "duplicate line item `{}` merged into row {}",
                            item.energy_type, first_row
                        ),
                    });
                }
                None => {
                    index.insert(key, merged.len());
                    merged.push((row, item));
                }
            }
        }

        merged.into_iter().map(|(_, item)| item).collect()
    }
}

/// Value of the meta column named `header`, matched the way headers are.
pub(crate) fn secondary_value<'a>(item: &'a LineItem, header: &str) -> Option<&'a str> {
    let wanted = header_key(header);
    item.meta
        .iter()
        .find(|(k, _)| header_key(k) == wanted)
        .map(|(_, v)| v.as_str())
}

fn agreeing_meta(
    a: &BTreeMap<String, String>,
    b: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    a.iter()
        .filter(|(k, v)| b.get(*k) == Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn find_date_range(
    grid: &[Vec<RawCell>],
    layout: &ColumnLayout,
    hint: &str,
) -> Result<DateRange, NormalizeError> {
    if let Some(range) = date_range::parse_period_label(hint) {
        return Ok(range);
    }
    grid.iter()
        .take(layout.header_row + 1)
        .flatten()
        .filter_map(RawCell::as_text)
        .find_map(|text| date_range::parse_period_label(&text))
        .ok_or_else(|| {
            NormalizeError::Layout(format!(
                "no period label in sheet name `{}` or in the header area",
                hint
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn text(s: &str) -> RawCell {
        RawCell::Text(s.to_string())
    }

    fn num(n: f64) -> RawCell {
        RawCell::Number(n)
    }

    fn header() -> Vec<RawCell> {
        vec![text("能源类型"), text("表号"), text("实际消耗"), text("费用(元)")]
    }

    fn normalize(grid: &RawCellGrid, hint: &str) -> Result<Normalized, NormalizeError> {
        Normalizer::default().normalize(PeriodId::new("bills.xlsx", hint), grid, hint)
    }

    #[test]
    fn merged_category_cells_are_filled() {
        let grid = vec![
            header(),
            vec![text("电"), text("E-1"), num(300.0), num(100.0)],
            vec![RawCell::Empty, text("E-2"), num(90.0), num(30.5)],
            vec![text("自来水"), text("W-1"), num(12.0), num(50.0)],
            vec![RawCell::Empty, text("W-2"), num(3.0), num(7.25)],
        ];
        let out = normalize(&grid, "2024-01-01..2024-02-01").unwrap();
        let types: Vec<&str> = out
            .record
            .line_items()
            .iter()
            .map(|i| i.energy_type.as_str())
            .collect();
        assert_eq!(types, vec!["电", "电", "自来水", "自来水"]);
        assert_eq!(out.record.line_items()[1].meta["表号"], "E-2");
        assert_eq!(out.record.line_items()[1].meta["实际消耗"], "90");
        assert_eq!(out.record.total_charge(), Some(dec!(187.75)));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn gap_without_value_above_is_ambiguous() {
        let grid = vec![
            header(),
            vec![RawCell::Empty, text("E-1"), num(1.0), num(2.0)],
            vec![text("电"), text("E-2"), num(1.0), num(2.0)],
        ];
        assert_eq!(
            normalize(&grid, "2024-01"),
            Err(NormalizeError::MergedCellAmbiguity {
                row: 2,
                column: "能源类型".into()
            })
        );
    }

    #[test]
    fn blank_rows_are_not_gaps() {
        let grid = vec![
            header(),
            vec![RawCell::Empty, RawCell::Empty, RawCell::Empty, RawCell::Empty],
            vec![text("燃气"), text("G-1"), num(5.0), num(20.0)],
            vec![],
        ];
        let out = normalize(&grid, "2024-01").unwrap();
        assert_eq!(out.record.line_items().len(), 1);
    }

    #[test]
    fn bad_amounts_drop_the_row_with_a_warning() {
        let grid = vec![
            header(),
            vec![text("电"), text("E-1"), num(1.0), num(100.0)],
            vec![text("中水"), text("R-1"), num(1.0), text("待定")],
            vec![text("燃气"), text("G-1"), num(1.0), num(-3.0)],
            vec![text("自来水"), text("W-1"), num(1.0), RawCell::Empty],
        ];
        let out = normalize(&grid, "2024-01").unwrap();
        assert_eq!(out.record.line_items().len(), 1);
        let rows: Vec<usize> = out.warnings.iter().map(|w| w.row).collect();
        assert_eq!(rows, vec![3, 4, 5]);
        assert!(out.warnings[0].message.contains("待定"));
    }

    #[test]
    fn summary_rows_are_skipped() {
        let grid = vec![
            header(),
            vec![text("电"), text("E-1"), num(1.0), num(100.0)],
            vec![text("合计"), RawCell::Empty, RawCell::Empty, num(100.0)],
        ];
        let out = normalize(&grid, "2024-01").unwrap();
        assert_eq!(out.record.total_charge(), Some(dec!(100)));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn duplicates_without_secondary_key_are_summed() {
        let grid = vec![
            vec![text("能源类型"), text("备注"), text("费用(元)")],
            vec![text("电"), text("峰"), num(60.0)],
            vec![RawCell::Empty, text("谷"), num(40.0)],
        ];
        let out = normalize(&grid, "2024-01").unwrap();
        assert_eq!(out.record.line_items().len(), 1);
        let item = &out.record.line_items()[0];
        assert_eq!(item.charge_amount, dec!(100));
        // conflicting meta values are dropped
        assert!(item.meta.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].row, 3);
    }

    #[test]
    fn duplicate_that_would_overflow_is_dropped_with_a_warning() {
        let huge = "50000000000000000000000000000";
        let grid = vec![
            vec![text("能源类型"), text("费用(元)")],
            vec![text("电"), text(huge)],
            vec![RawCell::Empty, text(huge)],
            vec![text("燃气"), num(1.0)],
        ];
        let out = normalize(&grid, "2024-01").unwrap();
        let items = out.record.line_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].charge_amount, huge.parse::<rust_decimal::Decimal>().unwrap());
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].row, 3);
        assert!(out.warnings[0].message.contains("overflows"));
    }

    #[test]
    fn secondary_key_keeps_same_type_apart() {
        let grid = vec![
            header(),
            vec![text("电"), num(1001.0), num(1.0), num(60.0)],
            vec![RawCell::Empty, num(1002.0), num(1.0), num(40.0)],
        ];
        let out = normalize(&grid, "2024-01").unwrap();
        assert_eq!(out.record.line_items().len(), 2);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn date_range_falls_back_to_header_cells() {
        let grid = vec![
            vec![text("账期"), text("2024.03.01-2024.03.31")],
            header(),
            vec![text("电"), text("E-1"), num(1.0), num(1.0)],
        ];
        let out = normalize(&grid, "Sheet1").unwrap();
        assert_eq!(out.record.date_range().to_string(), "2024-03-01..2024-04-01");
    }

    #[test]
    fn missing_period_label_is_a_layout_error() {
        let grid = vec![header(), vec![text("电"), text("E-1"), num(1.0), num(1.0)]];
        assert!(matches!(
            normalize(&grid, "Sheet1"),
            Err(NormalizeError::Layout(_))
        ));
    }

    #[test]
    fn energy_types_are_trimmed() {
        let grid = vec![header(), vec![text("  电 "), text("E-1"), num(1.0), num(1.0)]];
        let out = normalize(&grid, "2024-01").unwrap();
        assert_eq!(out.record.line_items()[0].energy_type, "电");
    }
}
