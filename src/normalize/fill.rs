use crate::grid::{RawCell, RawCellGrid};

/// An empty cell in the filled column with no value anywhere above it.
/// `row` indexes the slice handed to [`forward_fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnresolvedGap {
    pub row: usize,
}

/// Repair a vertically merged column: every empty cell in `column` takes the
/// nearest non-empty value above it. Returns a new grid; `rows` is untouched.
/// Rows too short to reach `column` are padded with empty cells first.
pub fn forward_fill(rows: &[Vec<RawCell>], column: usize) -> Result<RawCellGrid, UnresolvedGap> {
    let mut last: Option<&RawCell> = None;
    let mut filled = Vec::with_capacity(rows.len());

    for (idx, row) in rows.iter().enumerate() {
        let mut out = row.clone();
        if out.len() <= column {
            out.resize(column + 1, RawCell::Empty);
        }
        match row.get(column) {
            Some(cell) if !cell.is_empty() => last = Some(cell),
            _ => {
                let above = last.ok_or(UnresolvedGap { row: idx })?;
                out[column] = above.clone();
            }
        }
        filled.push(out);
    }

    Ok(filled)
}
