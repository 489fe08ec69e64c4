use crate::grid::{RawCell, RawCellGrid};

use super::{NormalizeError, NormalizerConfig};

/// A located column: its index and the header text as written in the sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub index: usize,
    pub name: String,
}

/// Where the header row is and which columns play which role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    pub header_row: usize,
    pub category: Column,
    pub amount: Column,
    /// Every other labelled column, carried into line item meta.
    pub meta: Vec<Column>,
}

impl ColumnLayout {
    /// Rows below the header that have something in a located column, with
    /// their 1-based sheet row numbers.
    pub fn data_rows(&self, grid: &[Vec<RawCell>]) -> (Vec<usize>, RawCellGrid) {
        grid.iter()
            .enumerate()
            .skip(self.header_row + 1)
            .filter(|(_, row)| !self.is_blank(row))
            .map(|(idx, row)| (idx + 1, row.clone()))
            .unzip()
    }

    fn is_blank(&self, row: &[RawCell]) -> bool {
        std::iter::once(self.category.index)
            .chain(std::iter::once(self.amount.index))
            .chain(self.meta.iter().map(|c| c.index))
            .all(|i| row.get(i).map_or(true, RawCell::is_empty))
    }
}

/// Find the first row within `header_search_rows` that names both a category
/// column and an amount column.
pub fn locate_columns(
    grid: &[Vec<RawCell>],
    config: &NormalizerConfig,
) -> Result<ColumnLayout, NormalizeError> {
    for (row_idx, row) in grid.iter().take(config.header_search_rows).enumerate() {
        let headers: Vec<(usize, String)> = row
            .iter()
            .enumerate()
            .filter_map(|(i, cell)| cell.as_text().map(|t| (i, t)))
            .collect();

        let category = headers
            .iter()
            .find(|(_, h)| matches_any(h, &config.category_headers));
        let amount = headers.iter().find(|(i, h)| {
            matches_any(h, &config.amount_headers) && Some(*i) != category.map(|c| c.0)
        });

        if let (Some((ci, cn)), Some((ai, an))) = (category, amount) {
            let meta = headers
                .iter()
                .filter(|(i, _)| i != ci && i != ai)
                .map(|(i, h)| Column {
                    index: *i,
                    name: h.clone(),
                })
                .collect();
            return Ok(ColumnLayout {
                header_row: row_idx,
                category: Column {
                    index: *ci,
                    name: cn.clone(),
                },
                amount: Column {
                    index: *ai,
                    name: an.clone(),
                },
                meta,
            });
        }
    }

    Err(NormalizeError::Layout(format!(
        "no header row with a category column ({}) and an amount column ({}) in the first {} rows",
        config.category_headers.join(" / "),
        config.amount_headers.join(" / "),
        config.header_search_rows
    )))
}

/// Header comparison ignores case, surrounding and inner whitespace, and
/// full-width parentheses.
pub(crate) fn header_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '（' => '(',
            '）' => ')',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

fn matches_any(header: &str, candidates: &[String]) -> bool {
    let key = header_key(header);
    candidates.iter().any(|c| header_key(c) == key)
}
