use energyledger::{
    grid::{workbook::load_workbook, RawCell},
    normalize::{fill::forward_fill, layout::locate_columns, NormalizerConfig},
};
use std::{env, path::Path, process::exit};

fn main() {
    // Expect a workbook path and an optional sheet name.
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <WORKBOOK> [SHEET]", args[0]);
        exit(1);
    }
    if let Err(e) = inspect_sheet(Path::new(&args[1]), args.get(2).map(String::as_str)) {
        eprintln!("Error: {:#}", e);
        exit(1);
    }
}

/// Print the sheet names, where the columns were found, and the grid after
/// merged category cells are filled.
fn inspect_sheet(path: &Path, wanted: Option<&str>) -> anyhow::Result<()> {
    let loaded = load_workbook(path)?;

    println!("=== Workbook: {} ===", path.display());
    let mut sheets = Vec::with_capacity(loaded.len());
    for (i, sheet) in loaded.into_iter().enumerate() {
        match sheet {
            Ok(s) => {
                println!("{:>3}  {} ({} rows)", i, s.sheet_name, s.grid.len());
                sheets.push(s);
            }
            Err(f) => println!("{:>3}  {} !! {}", i, f.sheet_name, f.error),
        }
    }
    println!();

    let sheet = match wanted {
        Some(name) => sheets.iter().find(|s| s.sheet_name == name),
        None => sheets.first(),
    }
    .ok_or_else(|| anyhow::anyhow!("no such sheet in {}", path.display()))?;

    println!("=== Sheet: {} ===", sheet.sheet_name);
    let layout = match locate_columns(&sheet.grid, &NormalizerConfig::default()) {
        Ok(l) => l,
        Err(e) => {
            println!("{}", e);
            print_grid(&sheet.grid);
            return Ok(());
        }
    };
    println!(
        "header row {}: category `{}` (col {}), amount `{}` (col {})",
        layout.header_row + 1,
        layout.category.name,
        layout.category.index + 1,
        layout.amount.name,
        layout.amount.index + 1
    );
    let meta: Vec<&str> = layout.meta.iter().map(|c| c.name.as_str()).collect();
    println!("meta columns: {}", meta.join(", "));
    println!();

    // blank rows are dropped before filling, as the normalizer does
    let (row_numbers, data) = layout.data_rows(&sheet.grid);
    match forward_fill(&data, layout.category.index) {
        Ok(filled) => {
            print_grid(&sheet.grid[..=layout.header_row]);
            print_grid(&filled);
        }
        Err(gap) => {
            println!(
                "unresolved gap at sheet row {}; raw grid follows",
                row_numbers[gap.row]
            );
            print_grid(&sheet.grid);
        }
    }
    Ok(())
}

fn print_grid(rows: &[Vec<RawCell>]) {
    for row in rows {
        let cells: Vec<String> = row.iter().map(|c| format!("{:<12}", c.to_string())).collect();
        println!("| {} |", cells.join(" | "));
    }
}
