use anyhow::{Context, Result};
use energyledger::{
    aggregate::export::{write_pivot_csv, write_report_json, write_summary_csv},
    cache::ParquetStore,
    config::Config,
    engine::{Engine, SheetFailure},
    grid::workbook::{list_workbooks, load_workbook},
    normalize::Normalizer,
};
use std::{env, fs, path::PathBuf, time::Instant};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    // ─── 1) load config ──────────────────────────────────────────────
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let config = Config::load(&config_path)?;

    // ─── 2) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!(config = %config_path.display(), "startup");

    // ─── 3) configure dirs ───────────────────────────────────────────
    let paths = &config.paths;
    for d in [&paths.input_dir, &paths.output_dir, &paths.cache_dir] {
        fs::create_dir_all(d).with_context(|| format!("creating directory {}", d.display()))?;
    }

    // ─── 4) read workbooks ───────────────────────────────────────────
    let started = Instant::now();
    let workbooks = list_workbooks(&paths.input_dir)?;
    info!("{} workbooks in {}", workbooks.len(), paths.input_dir.display());

    let mut sheets = Vec::new();
    let mut unreadable = Vec::new();
    for path in &workbooks {
        match load_workbook(path) {
            Ok(loaded) => {
                for sheet in loaded {
                    match sheet {
                        Ok(s) => sheets.push(s),
                        Err(failure) => unreadable.push(failure),
                    }
                }
            }
            Err(e) => {
                error!(path = %path.display(), "cannot read workbook: {:#}", e);
                unreadable.push(SheetFailure {
                    source_file: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string()),
                    sheet_name: String::new(),
                    error: format!("{:#}", e),
                });
            }
        }
    }

    // ─── 5) normalize, reconcile, aggregate ──────────────────────────
    let store = ParquetStore::new(&paths.cache_dir)?;
    let engine = Engine::new(&store)
        .with_normalizer(Normalizer::new(config.normalizer.clone()))
        .with_aggregation(config.aggregation.clone())
        .with_policy(config.divergence_policy);
    let mut output = engine.run(sheets)?;
    unreadable.append(&mut output.report.failures);
    output.report.failures = unreadable;

    // ─── 6) write outputs ────────────────────────────────────────────
    let out_dir = &paths.output_dir;
    write_summary_csv(&output.summary, &out_dir.join("energy_usage_summary.csv"))?;
    write_pivot_csv(
        &output.summary,
        &config.aggregation.type_order,
        &out_dir.join("energy_usage_pivot.csv"),
    )?;
    write_report_json(&output.report, &out_dir.join("reconciliation_report.json"))?;

    output.report.log();
    info!(
        "done in {:.2?}; {} periods accepted, outputs in {}",
        started.elapsed(),
        output.accepted.len(),
        out_dir.display()
    );
    Ok(())
}
