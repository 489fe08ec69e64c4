use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, DataType, Range, Reader};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use super::{RawCell, RawCellGrid, SheetFailure, SheetInput};

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "ods"];

/// All workbooks directly inside `input_dir`, sorted by name. Office lock files
/// (`~$book.xlsx`) are skipped.
pub fn list_workbooks(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(input_dir)
        .with_context(|| format!("reading input directory {:?}", input_dir))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if name.starts_with("~$") {
            debug!(name, "skipping lock file");
            continue;
        }
        let is_workbook = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |ext| {
                WORKBOOK_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });
        if is_workbook {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Open a workbook and render every sheet as a cell grid, in workbook order.
/// Only a workbook that cannot be opened is an error; a sheet that cannot be
/// read comes back as a [`SheetFailure`] next to the others.
#[tracing::instrument(level = "info", skip(path), fields(path = %path.display()))]
pub fn load_workbook(path: &Path) -> Result<Vec<Result<SheetInput, SheetFailure>>> {
    let mut workbook =
        open_workbook_auto(path).with_context(|| format!("opening workbook {:?}", path))?;
    let source_file = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("workbook path {:?} has no file name", path))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheets = read_sheets(&source_file, sheet_names, |name| {
        workbook.worksheet_range(name)
    });
    info!(
        loaded = sheets.iter().filter(|s| s.is_ok()).count(),
        failed = sheets.iter().filter(|s| s.is_err()).count(),
        "loaded workbook"
    );
    Ok(sheets)
}

fn read_sheets<F, E>(
    source_file: &str,
    sheet_names: Vec<String>,
    mut read: F,
) -> Vec<Result<SheetInput, SheetFailure>>
where
    F: FnMut(&str) -> std::result::Result<Range<Data>, E>,
    E: fmt::Display,
{
    sheet_names
        .into_iter()
        .map(|sheet_name| match read(&sheet_name) {
            Ok(range) => {
                let grid = range_to_grid(&range);
                debug!(sheet = %sheet_name, rows = grid.len(), "loaded sheet");
                Ok(SheetInput::new(source_file, sheet_name, grid))
            }
            Err(e) => {
                warn!(sheet = %sheet_name, error = %e, "cannot read sheet");
                Err(SheetFailure {
                    source_file: source_file.to_string(),
                    sheet_name,
                    error: format!("reading sheet: {}", e),
                })
            }
        })
        .collect()
}

fn range_to_grid(range: &Range<Data>) -> RawCellGrid {
    range
        .rows()
        .map(|row| row.iter().map(to_raw_cell).collect())
        .collect()
}

fn to_raw_cell(cell: &Data) -> RawCell {
    match cell {
        Data::Empty => RawCell::Empty,
        Data::String(s) => RawCell::Text(s.clone()),
        Data::Float(f) => RawCell::Number(*f),
        Data::Int(i) => RawCell::Number(*i as f64),
        Data::Bool(b) => RawCell::Bool(*b),
        // period labels are sometimes typed as real dates in the header area
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_date() {
            Some(date) => RawCell::Text(date.format("%Y-%m-%d").to_string()),
            None => RawCell::Text(cell.to_string()),
        },
        Data::DurationIso(s) => RawCell::Text(s.clone()),
        Data::Error(e) => RawCell::Text(format!("#{:?}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn lists_only_workbooks_and_skips_lock_files() -> Result<()> {
        let dir = tempdir()?;
        for name in ["b.xlsx", "a.XLS", "~$b.xlsx", "notes.txt", "c.ods"] {
            File::create(dir.path().join(name))?;
        }
        fs::create_dir(dir.path().join("nested.xlsx"))?;

        let found: Vec<String> = list_workbooks(dir.path())?
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(found, vec!["a.XLS", "b.xlsx", "c.ods"]);
        Ok(())
    }

    #[test]
    fn cell_conversion_keeps_merged_continuations_empty() {
        assert_eq!(to_raw_cell(&Data::Empty), RawCell::Empty);
        assert_eq!(to_raw_cell(&Data::Int(7)), RawCell::Number(7.0));
        assert_eq!(
            to_raw_cell(&Data::String("电".into())),
            RawCell::Text("电".into())
        );
    }

    #[test]
    fn one_unreadable_sheet_does_not_drop_the_others() {
        let names = vec!["2024-01".to_string(), "chart".to_string(), "2024-02".to_string()];
        let sheets = read_sheets("bills.xlsx", names, |name| {
            if name == "chart" {
                return Err("not a worksheet");
            }
            let mut range = Range::new((0, 0), (0, 1));
            range.set_value((0, 0), Data::String("电".into()));
            range.set_value((0, 1), Data::Float(12.5));
            Ok(range)
        });

        assert_eq!(sheets.len(), 3);
        let ok: Vec<&str> = sheets
            .iter()
            .filter_map(|s| s.as_ref().ok())
            .map(|s| s.sheet_name.as_str())
            .collect();
        assert_eq!(ok, vec!["2024-01", "2024-02"]);
        let first = sheets[0].as_ref().unwrap();
        assert_eq!(first.grid, vec![vec![RawCell::Text("电".into()), RawCell::Number(12.5)]]);

        let failure = sheets[1].as_ref().unwrap_err();
        assert_eq!(failure.source_file, "bills.xlsx");
        assert_eq!(failure.sheet_name, "chart");
        assert!(failure.error.contains("not a worksheet"));
    }

    #[test]
    fn unreadable_workbook_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.xlsx");
        fs::write(&path, b"not a zip archive")?;
        assert!(load_workbook(&path).is_err());
        Ok(())
    }
}
