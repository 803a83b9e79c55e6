//! The `soul cached` commands: inspect and prune the local cache.

use anyhow::Result;

use crate::cache::CacheStore;
use crate::config::Config;

pub fn run_list(config: &Config) -> Result<()> {
    let cache = CacheStore::open(&config.paths.cache_dir)?;
    let entries = cache.list();

    if entries.is_empty() {
        println!("no cached souls.");
        return Ok(());
    }

    println!(
        "{:<28} {:<24} {:<10} {:<20} {:<20}",
        "NAME", "LABEL", "HASH", "CACHED", "LAST USED"
    );
    for entry in entries {
        let hash_short: String = entry.hash.chars().take(8).collect();
        println!(
            "{:<28} {:<24} {:<10} {:<20} {:<20}",
            entry.name,
            entry.label.as_deref().unwrap_or("-"),
            hash_short,
            format_ts_iso(entry.cached_at),
            format_ts_iso(entry.last_used_at)
        );
    }

    Ok(())
}

pub fn run_remove(config: &Config, name: &str) -> Result<()> {
    let mut cache = CacheStore::open(&config.paths.cache_dir)?;

    if cache.remove(name)? {
        println!("removed '{}' from the cache.", name);
    } else {
        eprintln!(
            "Error: no cached soul named '{}'. See `soul cached list`.",
            name
        );
        std::process::exit(1);
    }
    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
