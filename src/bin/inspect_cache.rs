use energyledger::cache::{CacheEntry, ParquetStore, PeriodStore};
use std::{env, process::exit};

fn main() {
    // Expect a cache directory and an optional entry key.
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <CACHE_DIR> [KEY]", args[0]);
        exit(1);
    }
    if let Err(e) = run(&args[1], args.get(2).map(String::as_str)) {
        eprintln!("Error: {}", e);
        exit(1);
    }
}

fn run(dir: &str, key: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let store = ParquetStore::new(dir)?;
    match key {
        Some(k) => match store.load_key(k)? {
            Some(entry) => dump(k, &entry),
            None => return Err(format!("no entry `{}` in {}", k, dir).into()),
        },
        None => list(&store)?,
    }
    Ok(())
}

fn list(store: &ParquetStore) -> Result<(), Box<dyn std::error::Error>> {
    let keys = store.list()?;
    println!("=== {} entries in {} ===", keys.len(), store.dir().display());
    for key in keys {
        match store.load_key(&key) {
            Ok(Some(e)) => println!(
                "{:<48} {:<24} {} {:>3} items  {}",
                key,
                e.record.date_range().to_string(),
                e.fingerprint.short(),
                e.record.line_items().len(),
                e.written_at.format("%Y-%m-%d %H:%M:%S")
            ),
            Ok(None) => {}
            Err(err) => println!("{:<48} !! {}", key, err),
        }
    }
    Ok(())
}

fn dump(key: &str, entry: &CacheEntry) {
    let record = &entry.record;
    println!("=== {} ===", key);
    println!("Period:      {}", record.id());
    println!("Date range:  {}", record.date_range());
    println!("Fingerprint: {}", entry.fingerprint);
    println!("Written at:  {}", entry.written_at);
    match record.total_charge() {
        Some(total) => println!("Total:       {}", total),
        None => println!("Total:       (overflows)"),
    }
    println!();
    for item in record.line_items() {
        let meta: Vec<String> = item.meta.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        println!(
            "- {:<12} {:>14}  {}",
            item.energy_type,
            item.charge_amount,
            meta.join(", ")
        );
    }
}
