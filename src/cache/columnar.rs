use chrono::{DateTime, NaiveDate, Utc};
use glob::glob;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::Compression,
    file::{metadata::KeyValue, properties::WriterProperties},
};
use std::{
    collections::HashMap,
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use super::{schema, CacheEntry, CacheError, PeriodStore};
use crate::record::{DateRange, Fingerprint, PeriodId, PeriodRecord};

const FORMAT_VERSION: &str = "1";

const KEY_FORMAT_VERSION: &str = "energyledger.format_version";
const KEY_SOURCE_FILE: &str = "energyledger.source_file";
const KEY_SHEET_NAME: &str = "energyledger.sheet_name";
const KEY_RANGE_START: &str = "energyledger.range_start";
const KEY_RANGE_END: &str = "energyledger.range_end";
const KEY_FINGERPRINT: &str = "energyledger.fingerprint";
const KEY_WRITTEN_AT: &str = "energyledger.written_at_us";

/// Directory of `<period key>.parquet` files, one per period. Line items are
/// rows; period-level fields live in the file's key/value metadata so an
/// empty period still round-trips.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    dir: PathBuf,
}

impl ParquetStore {
    /// Open the store at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.parquet", key))
    }

    /// Load by storage key, as listed by [`PeriodStore::list`].
    pub fn load_key(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.path_for(key);
        if !path.is_file() {
            return Ok(None);
        }
        read_entry(&path, key).map(Some)
    }

    fn write_entry(&self, record: &PeriodRecord) -> Result<CacheEntry, CacheError> {
        let key = record.id().key();
        let final_path = self.path_for(&key);
        let tmp_path = self.dir.join(format!("{}.parquet.tmp", key));
        let entry = CacheEntry::new(record.clone(), Utc::now());

        // 1) items → batch
        let batch = schema::items_to_batch(record.line_items())?;

        // 2) period fields → file metadata
        let range = record.date_range();
        let kv = [
            (KEY_FORMAT_VERSION, FORMAT_VERSION.to_string()),
            (KEY_SOURCE_FILE, record.id().source_file().to_string()),
            (KEY_SHEET_NAME, record.id().sheet_name().to_string()),
            (KEY_RANGE_START, range.start().to_string()),
            (KEY_RANGE_END, range.end().to_string()),
            (KEY_FINGERPRINT, entry.fingerprint.to_string()),
            (KEY_WRITTEN_AT, entry.written_at.timestamp_micros().to_string()),
        ]
        .into_iter()
        .map(|(k, v)| KeyValue::new(k.to_string(), v))
        .collect();
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_key_value_metadata(Some(kv))
            .build();

        // 3) write the .tmp file and flush it to disk
        let write_tmp = || -> Result<(), CacheError> {
            let file = File::create(&tmp_path).map_err(|e| CacheError::io(&tmp_path, e))?;
            let mut writer = ArrowWriter::try_new(BufWriter::new(file), batch.schema(), Some(props))?;
            writer.write(&batch)?;
            let file = writer
                .into_inner()?
                .into_inner()
                .map_err(|e| CacheError::io(&tmp_path, e.into_error()))?;
            file.sync_all().map_err(|e| CacheError::io(&tmp_path, e))
        };
        if let Err(e) = write_tmp() {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        // 4) atomically replace the previous entry
        fs::rename(&tmp_path, &final_path).map_err(|e| CacheError::io(&final_path, e))?;
        debug!(key = %key, items = record.line_items().len(), "cache entry written");
        Ok(entry)
    }
}

impl PeriodStore for ParquetStore {
    fn exists(&self, id: &PeriodId) -> bool {
        self.path_for(&id.key()).is_file()
    }

    fn load(&self, id: &PeriodId) -> Result<Option<CacheEntry>, CacheError> {
        let key = id.key();
        let entry = match self.load_key(&key)? {
            Some(e) => e,
            None => return Ok(None),
        };
        if entry.record.id() != id {
            return Err(CacheError::corrupt(
                key,
                format!("entry belongs to {}, not {}", entry.record.id(), id),
            ));
        }
        Ok(Some(entry))
    }

    #[tracing::instrument(level = "debug", skip(self, record), fields(period = %record.id()))]
    fn store(&self, record: &PeriodRecord) -> Result<CacheEntry, CacheError> {
        self.write_entry(record)
    }

    fn list(&self) -> Result<Vec<String>, CacheError> {
        let pattern = format!(
            "{}/*.parquet",
            glob::Pattern::escape(&self.dir.to_string_lossy())
        );
        let mut keys = Vec::new();
        for entry in glob(&pattern)? {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "cannot read cache directory entry");
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn read_entry(path: &Path, key: &str) -> Result<CacheEntry, CacheError> {
    let file = File::open(path).map_err(|e| CacheError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let kv: HashMap<String, String> = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .map(|pairs| {
            pairs
                .iter()
                .filter_map(|p| Some((p.key.clone(), p.value.clone()?)))
                .collect()
        })
        .unwrap_or_default();
    let field = |name: &str| {
        kv.get(name)
            .map(String::as_str)
            .ok_or_else(|| CacheError::corrupt(key, format!("missing metadata `{}`", name)))
    };

    let version = field(KEY_FORMAT_VERSION)?;
    if version != FORMAT_VERSION {
        return Err(CacheError::corrupt(
            key,
            format!("unsupported format version {}", version),
        ));
    }
    let date = |name: &str| {
        let raw = field(name)?;
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|e| CacheError::corrupt(key, format!("bad date `{}`: {}", raw, e)))
    };
    let date_range = DateRange::new(date(KEY_RANGE_START)?, date(KEY_RANGE_END)?)
        .ok_or_else(|| CacheError::corrupt(key, "empty date range"))?;
    let written_at = field(KEY_WRITTEN_AT)?
        .parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_micros)
        .ok_or_else(|| CacheError::corrupt(key, "bad write timestamp"))?;
    let id = PeriodId::new(field(KEY_SOURCE_FILE)?, field(KEY_SHEET_NAME)?);
    let stored_fingerprint = Fingerprint::from_hex(field(KEY_FINGERPRINT)?);

    let mut items = Vec::new();
    for batch in builder.build()? {
        items.extend(schema::batch_to_items(&batch?, key)?);
    }

    let record = PeriodRecord::new(id, date_range, items);
    let entry = CacheEntry::new(record, written_at);
    if entry.fingerprint != stored_fingerprint {
        return Err(CacheError::corrupt(
            key,
            format!(
                "stored fingerprint {} does not match items ({})",
                stored_fingerprint.short(),
                entry.fingerprint.short()
            ),
        ));
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LineItem;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn jan(items: Vec<LineItem>) -> PeriodRecord {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        )
        .unwrap();
        PeriodRecord::new(PeriodId::new("bills.xlsx", "2024-01"), range, items)
    }

    #[test]
    fn entries_survive_a_new_store_instance() {
        let dir = tempdir().unwrap();
        let record = jan(vec![
            LineItem::new("电", dec!(100.00)).with_meta("表号", "E-1"),
            LineItem::new("自来水", dec!(50.00)),
        ]);
        let written = ParquetStore::new(dir.path())
            .unwrap()
            .store(&record)
            .unwrap();

        let store = ParquetStore::new(dir.path()).unwrap();
        assert!(store.exists(record.id()));
        let loaded = store.load(record.id()).unwrap().unwrap();
        assert_eq!(loaded.record, record);
        assert_eq!(loaded.fingerprint, record.fingerprint());
        assert_eq!(
            loaded.written_at.timestamp_micros(),
            written.written_at.timestamp_micros()
        );
    }

    #[test]
    fn empty_period_round_trips() {
        let dir = tempdir().unwrap();
        let store = ParquetStore::new(dir.path()).unwrap();
        let record = jan(Vec::new());
        store.store(&record).unwrap();
        let loaded = store.load(record.id()).unwrap().unwrap();
        assert_eq!(loaded.record, record);
    }

    #[test]
    fn missing_entry_is_none() {
        let dir = tempdir().unwrap();
        let store = ParquetStore::new(dir.path()).unwrap();
        let id = PeriodId::new("bills.xlsx", "2024-02");
        assert!(!store.exists(&id));
        assert!(store.load(&id).unwrap().is_none());
    }

    #[test]
    fn overwrite_replaces_and_leaves_no_tmp() {
        let dir = tempdir().unwrap();
        let store = ParquetStore::new(dir.path()).unwrap();
        store
            .store(&jan(vec![LineItem::new("电", dec!(100.00))]))
            .unwrap();
        let fresh = jan(vec![LineItem::new("电", dec!(120.00))]);
        store.store(&fresh).unwrap();

        let loaded = store.load(fresh.id()).unwrap().unwrap();
        assert_eq!(loaded.record.total_charge(), Some(dec!(120)));

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}.parquet", fresh.id().key())]);
    }

    #[test]
    fn list_returns_sorted_keys() {
        let dir = tempdir().unwrap();
        let store = ParquetStore::new(dir.path()).unwrap();
        let a = jan(Vec::new());
        let b = PeriodRecord::new(
            PeriodId::new("annex.xlsx", "2024-01"),
            *a.date_range(),
            Vec::new(),
        );
        store.store(&a).unwrap();
        store.store(&b).unwrap();
        fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        let mut expected = vec![a.id().key(), b.id().key()];
        expected.sort();
        assert_eq!(store.list().unwrap(), expected);
    }

    #[test]
    fn garbage_file_is_an_error() {
        let dir = tempdir().unwrap();
        let store = ParquetStore::new(dir.path()).unwrap();
        let id = PeriodId::new("bills.xlsx", "2024-01");
        fs::write(dir.path().join(format!("{}.parquet", id.key())), b"not parquet").unwrap();
        assert!(store.load(&id).is_err());
    }
}
