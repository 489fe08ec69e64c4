use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use super::SummaryTable;

/// Long form: `date_range,energy_type,total_charge`, then one
/// `<range>,total,<sum>` row per range.
pub fn write_summary_csv(table: &SummaryTable, path: &Path) -> Result<()> {
    write_atomically(path, |w| {
        let mut csv = csv::Writer::from_writer(w);
        for row in table.rows() {
            csv.serialize(row)?;
        }
        for total in table.range_totals() {
            csv.write_record([
                total.date_range.as_str(),
                "total",
                total.total_charge.to_string().as_str(),
            ])?;
        }
        csv.flush()?;
        Ok(())
    })
}

/// Wide form: one row per date range, `type_order` columns first.
pub fn write_pivot_csv(table: &SummaryTable, type_order: &[String], path: &Path) -> Result<()> {
    let pivot = table.pivot(type_order);
    write_atomically(path, |w| {
        let mut csv = csv::Writer::from_writer(w);
        let mut header = vec!["date_range".to_string()];
        header.extend(pivot.columns.iter().cloned());
        header.push("total".to_string());
        csv.write_record(&header)?;

        for row in &pivot.rows {
            let mut record = vec![row.date_range.to_string()];
            record.extend(row.cells.iter().map(|c| c.to_string()));
            record.push(row.total.to_string());
            csv.write_record(&record)?;
        }
        csv.flush()?;
        Ok(())
    })
}

/// Pretty JSON of any serializable report.
pub fn write_report_json<T: Serialize>(report: &T, path: &Path) -> Result<()> {
    write_atomically(path, |w| {
        serde_json::to_writer_pretty(&mut *w, report)?;
        w.write_all(b"\n")?;
        Ok(())
    })
}

/// Write to `<path>.tmp`, then rename over `path`.
fn write_atomically<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    let file = File::create(tmp_path)
        .with_context(|| format!("creating temp file {}", tmp_path.display()))?;
    let mut writer = BufWriter::new(file);
    fill(&mut writer).with_context(|| format!("writing {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("flushing {}", tmp_path.display()))?;
    drop(writer);

    fs::rename(tmp_path, path).with_context(|| {
        format!(
            "failed to rename `{}` to `{}`",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}
