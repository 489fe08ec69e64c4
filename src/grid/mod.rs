// src/grid/mod.rs

pub mod workbook;

use serde::Serialize;
use std::fmt;

/// A single cell as read from a sheet. `Empty` also stands for the continuation
/// rows of a vertically merged cell.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl RawCell {
    /// Empty, or text that is only whitespace.
    pub fn is_empty(&self) -> bool {
        match self {
            RawCell::Empty => true,
            RawCell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Trimmed textual value, `None` when empty. Numbers use the shortest
    /// representation that round-trips (`12345.0` → `"12345"`).
    pub fn as_text(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        match self {
            RawCell::Text(s) => Some(s.trim().to_string()),
            RawCell::Number(n) => Some(n.to_string()),
            RawCell::Bool(b) => Some(b.to_string()),
            RawCell::Empty => None,
        }
    }
}

impl fmt::Display for RawCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(&text),
            None => Ok(()),
        }
    }
}

/// Rows of cells, top to bottom, as the sheet lays them out.
pub type RawCellGrid = Vec<Vec<RawCell>>;

/// One sheet handed to the engine.
#[derive(Debug, Clone)]
pub struct SheetInput {
    pub source_file: String,
    pub sheet_name: String,
    pub grid: RawCellGrid,
}

impl SheetInput {
    pub fn new(
        source_file: impl Into<String>,
        sheet_name: impl Into<String>,
        grid: RawCellGrid,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            sheet_name: sheet_name.into(),
            grid,
        }
    }
}

/// A sheet (or a whole workbook, with `sheet_name` empty) that was skipped.
#[derive(Debug, Clone, Serialize)]
pub struct SheetFailure {
    pub source_file: String,
    pub sheet_name: String,
    pub error: String,
}
