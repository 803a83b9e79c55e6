//! Local cache of fetched personality documents.
//!
//! An index of everything the user has ever fetched, keyed by name
//! (case-insensitive), with hash-based change detection and recency
//! tracking. The index lives at `<cache_dir>/index.json`; each entry's
//! content is a markdown file under `<cache_dir>/entries/`. Entries are
//! never garbage-collected — removal is explicit.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::registry::slugify;

const INDEX_FILE: &str = "index.json";
const ENTRIES_DIR: &str = "entries";

/// One cached document. `cached_at` tracks fetch time; `last_used_at`
/// tracks activation (apply via swap), not mere fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub name: String,
    pub label: Option<String>,
    pub hash: String,
    /// Content filename under `entries/`, assigned once at insert.
    pub file: String,
    pub cached_at: i64,
    pub last_used_at: i64,
}

/// The cache store, rooted at a configured directory.
pub struct CacheStore {
    root: PathBuf,
    entries: Vec<CacheEntry>,
}

impl CacheStore {
    /// Open the cache at `root`, loading the index if one exists.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let index_path = root.join(INDEX_FILE);

        let entries = if index_path.exists() {
            let content = std::fs::read_to_string(&index_path)
                .with_context(|| format!("Failed to read cache index: {}", index_path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse cache index: {}", index_path.display()))?
        } else {
            Vec::new()
        };

        Ok(Self { root, entries })
    }

    /// Insert or overwrite the entry for `name`.
    ///
    /// A case-insensitive match on name updates the existing entry in
    /// place (hash, label, fetch time, content) — the same name never
    /// accumulates duplicates. `last_used_at` is left alone on refetch;
    /// only [`CacheStore::touch`] bumps it.
    pub fn put(&mut self, name: &str, content: &str, hash: &str, label: Option<&str>) -> Result<()> {
        let now = Utc::now().timestamp();

        let file = match self.position(name) {
            Some(i) => {
                let entry = &mut self.entries[i];
                entry.hash = hash.to_string();
                entry.cached_at = now;
                if let Some(label) = label {
                    entry.label = Some(label.to_string());
                }
                entry.file.clone()
            }
            None => {
                let file = self.assign_file(name);
                self.entries.push(CacheEntry {
                    name: name.to_string(),
                    label: label.map(str::to_string),
                    hash: hash.to_string(),
                    file: file.clone(),
                    cached_at: now,
                    last_used_at: now,
                });
                file
            }
        };

        let path = self.root.join(ENTRIES_DIR).join(&file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write cache entry: {}", path.display()))?;

        self.save()
    }

    /// Exact case-insensitive match on stored name, then stored label.
    /// Returns the entry and its content, or absent. A listed entry whose
    /// content file has gone missing counts as absent.
    pub fn get(&self, name_or_label: &str) -> Result<Option<(CacheEntry, String)>> {
        let needle = name_or_label.to_lowercase();
        let found = self
            .entries
            .iter()
            .find(|e| e.name.to_lowercase() == needle)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| e.label.as_deref().is_some_and(|l| l.to_lowercase() == needle))
            });

        let Some(entry) = found else {
            return Ok(None);
        };

        let path = self.root.join(ENTRIES_DIR).join(&entry.file);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some((entry.clone(), content))),
            Err(_) => Ok(None),
        }
    }

    /// Bump `last_used_at` without altering hash or content. Called when a
    /// cached document is actually applied, not merely fetched.
    pub fn touch(&mut self, name: &str) -> Result<bool> {
        match self.position(name) {
            Some(i) => {
                self.entries[i].last_used_at = Utc::now().timestamp();
                self.save()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Entries ordered most-recently-activated first, falling back to
    /// most-recently-fetched.
    pub fn list(&self) -> Vec<CacheEntry> {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| {
            b.last_used_at
                .cmp(&a.last_used_at)
                .then(b.cached_at.cmp(&a.cached_at))
        });
        entries
    }

    /// Remove the entry for `name` (case-insensitive) and its content
    /// file. Returns whether an entry existed.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        match self.position(name) {
            Some(i) => {
                let entry = self.entries.remove(i);
                let _ = std::fs::remove_file(self.root.join(ENTRIES_DIR).join(&entry.file));
                self.save()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        let needle = name.to_lowercase();
        self.entries
            .iter()
            .position(|e| e.name.to_lowercase() == needle)
    }

    /// Pick a content filename for a new entry, disambiguating when two
    /// distinct names slugify to the same base.
    fn assign_file(&self, name: &str) -> String {
        let base = slugify(name);
        let base = if base.is_empty() {
            "soul".to_string()
        } else {
            base
        };

        let candidate = format!("{}.md", base);
        if !self.entries.iter().any(|e| e.file == candidate) {
            return candidate;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}.md", base, n);
            if !self.entries.iter().any(|e| e.file == candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let index_path = self.root.join(INDEX_FILE);
        let content = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&index_path, content)
            .with_context(|| format!("Failed to write cache index: {}", index_path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_then_get_round_trips() {
        let tmp = TempDir::new().unwrap();
        let mut cache = CacheStore::open(tmp.path()).unwrap();

        cache
            .put("Pirate Captain", "# Ahoy\n", "hash-1", Some("pirate-captain"))
            .unwrap();

        let (entry, content) = cache.get("pirate captain").unwrap().unwrap();
        assert_eq!(entry.name, "Pirate Captain");
        assert_eq!(content, "# Ahoy\n");

        // Lookup by label also hits.
        let (by_label, _) = cache.get("Pirate-Captain").unwrap().unwrap();
        assert_eq!(by_label.hash, "hash-1");

        assert!(cache.get("unknown").unwrap().is_none());
    }

    #[test]
    fn refetch_overwrites_in_place() {
        let tmp = TempDir::new().unwrap();
        let mut cache = CacheStore::open(tmp.path()).unwrap();

        cache.put("Stoic", "v1", "hash-1", None).unwrap();
        cache.put("stoic", "v2", "hash-2", None).unwrap();

        let entries = cache.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].hash, "hash-2");

        let (_, content) = cache.get("Stoic").unwrap().unwrap();
        assert_eq!(content, "v2");
    }

    #[test]
    fn list_orders_by_activation_then_fetch() {
        let tmp = TempDir::new().unwrap();
        let mut cache = CacheStore::open(tmp.path()).unwrap();
        cache.put("a", "a", "h", None).unwrap();
        cache.put("b", "b", "h", None).unwrap();
        cache.put("c", "c", "h", None).unwrap();

        // Pin timestamps: "b" was activated most recently; "a" and "c"
        // were never activated, so fetch time breaks the tie.
        for entry in cache.entries.iter_mut() {
            match entry.name.as_str() {
                "a" => {
                    entry.cached_at = 300;
                    entry.last_used_at = 300;
                }
                "b" => {
                    entry.cached_at = 100;
                    entry.last_used_at = 900;
                }
                "c" => {
                    entry.cached_at = 200;
                    entry.last_used_at = 200;
                }
                _ => unreachable!(),
            }
        }

        let names: Vec<_> = cache.list().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn touch_does_not_alter_hash() {
        let tmp = TempDir::new().unwrap();
        let mut cache = CacheStore::open(tmp.path()).unwrap();
        cache.put("Stoic", "v1", "hash-1", None).unwrap();

        assert!(cache.touch("stoic").unwrap());
        assert!(!cache.touch("missing").unwrap());

        let (entry, content) = cache.get("Stoic").unwrap().unwrap();
        assert_eq!(entry.hash, "hash-1");
        assert_eq!(content, "v1");
    }

    #[test]
    fn remove_reports_existence_and_deletes_content() {
        let tmp = TempDir::new().unwrap();
        let mut cache = CacheStore::open(tmp.path()).unwrap();
        cache.put("Stoic", "v1", "hash-1", None).unwrap();

        assert!(cache.remove("STOIC").unwrap());
        assert!(!cache.remove("Stoic").unwrap());
        assert!(cache.get("Stoic").unwrap().is_none());
        assert!(!tmp.path().join("entries/stoic.md").exists());
    }

    #[test]
    fn colliding_filenames_are_disambiguated() {
        let tmp = TempDir::new().unwrap();
        let mut cache = CacheStore::open(tmp.path()).unwrap();
        cache.put("Ride or Die", "first", "h1", None).unwrap();
        cache.put("ride-or-die!", "second", "h2", None).unwrap();

        let (_, first) = cache.get("Ride or Die").unwrap().unwrap();
        let (_, second) = cache.get("ride-or-die!").unwrap().unwrap();
        assert_eq!(first, "first");
        assert_eq!(second, "second");
    }

    #[test]
    fn index_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let mut cache = CacheStore::open(tmp.path()).unwrap();
            cache.put("Stoic", "v1", "hash-1", Some("stoic")).unwrap();
        }

        let cache = CacheStore::open(tmp.path()).unwrap();
        let (entry, content) = cache.get("Stoic").unwrap().unwrap();
        assert_eq!(entry.label.as_deref(), Some("stoic"));
        assert_eq!(content, "v1");
    }
}
