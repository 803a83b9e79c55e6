//! Resolution of a user-supplied token into a personality document.
//!
//! Resolution runs in strict order and never guesses:
//!
//! 1. an existing filesystem path is read directly, bypassing the cache;
//! 2. an exact cache match (case-insensitive name or label) is used as-is;
//! 3. a fuzzy cache match (normalized bidirectional substring) fails with
//!    the candidate list rather than silently activating the wrong soul;
//! 4. otherwise the token is treated as a registry label: metadata and
//!    content are fetched concurrently, both required, and the result is
//!    cached. On a miss, a best-effort search on the token's first word
//!    supplies up to five suggested labels in the failure message.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::cache::CacheStore;
use crate::client::RegistryClient;
use crate::config::Config;
use crate::storage::hex_sha256;

const MAX_SUGGESTIONS: i64 = 5;

/// Where a resolved document came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    LocalFile(PathBuf),
    Cache,
    Registry,
}

/// A resolved personality document, ready for the swap engine.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub name: String,
    pub label: Option<String>,
    pub content: String,
    pub source: ResolvedSource,
}

/// Resolve `token` into a document, consulting the filesystem, the cache,
/// and finally the registry.
pub async fn resolve(config: &Config, cache: &mut CacheStore, token: &str) -> Result<Resolved> {
    // 1. Local filesystem path — no cache interaction.
    let path = Path::new(token);
    if path.is_file() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| token.to_string());
        return Ok(Resolved {
            name,
            label: None,
            content,
            source: ResolvedSource::LocalFile(path.to_path_buf()),
        });
    }

    // 2. Exact cache match.
    if let Some((entry, content)) = cache.get(token)? {
        return Ok(Resolved {
            name: entry.name,
            label: entry.label,
            content,
            source: ResolvedSource::Cache,
        });
    }

    // 3. Fuzzy cache match: report, never guess.
    let needle = normalize(token);
    if !needle.is_empty() {
        let candidates: Vec<String> = cache
            .list()
            .iter()
            .filter(|e| {
                let n = normalize(&e.name);
                !n.is_empty() && (n.contains(&needle) || needle.contains(&n))
            })
            .map(|e| e.name.clone())
            .collect();

        if !candidates.is_empty() {
            bail!(
                "'{}' does not exactly match a cached soul, but looks like: {}. \
                 Use the exact name, or `soul cached list` to inspect the cache.",
                token,
                candidates.join(", ")
            );
        }
    }

    // 4. Registry fetch: metadata and content together, both required.
    let client = RegistryClient::new(&config.registry)?;
    let label_candidate = token.to_lowercase().replace(' ', "-");
    let (meta, content) = tokio::join!(
        client.fetch_soul(&label_candidate),
        client.fetch_content(&label_candidate)
    );

    match (meta, content) {
        (Ok(meta), Ok(content)) => {
            let hash = hex_sha256(content.as_bytes());
            cache.put(&meta.name, &content, &hash, Some(&meta.label))?;
            Ok(Resolved {
                name: meta.name,
                label: Some(meta.label),
                content,
                source: ResolvedSource::Registry,
            })
        }
        _ => {
            let first_word = token.split_whitespace().next().unwrap_or(token);
            let suggestions = client
                .suggest_labels(first_word, MAX_SUGGESTIONS)
                .await
                .unwrap_or_default();

            if suggestions.is_empty() {
                bail!(
                    "soul '{}' was not found locally or in the registry. \
                     Try `soul search {}` to browse available souls.",
                    token,
                    first_word
                );
            }
            bail!(
                "soul '{}' was not found. Did you mean: {}? \
                 Apply one with `soul apply <label>`.",
                token,
                suggestions.join(", ")
            );
        }
    }
}

/// Normalized comparison form: lower-case, with runs of hyphen, underscore,
/// and whitespace collapsed to a single space, trimmed.
pub fn normalize(token: &str) -> String {
    let mut out = String::new();
    let mut pending_space = false;
    for c in token.to_lowercase().chars() {
        if c == '-' || c == '_' || c.is_whitespace() {
            pending_space = true;
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Json;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir, registry_url: &str) -> Config {
        let mut config = Config::default();
        config.paths.cache_dir = tmp.path().join("cache");
        config.registry.base_url = registry_url.to_string();
        config.registry.timeout_secs = 5;
        config
    }

    async fn spawn_registry_stub() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new()
            .route(
                "/api/souls/night-owl",
                get(|| async {
                    Json(serde_json::json!({
                        "slug": "a1b2c3d4e5f6",
                        "label": "night-owl",
                        "name": "Night Owl",
                        "description": "nocturnal",
                        "tags": ["calm"],
                        "owner": "owl@example.com",
                        "rating_avg": 0.0,
                        "rating_count": 0,
                        "downloads_count": 0,
                        "image_url": null,
                        "created_at": 0,
                        "updated_at": 0
                    }))
                }),
            )
            .route(
                "/api/souls/night-owl/content",
                get(|| async { "# Night Owl\n\nQuiet and observant.\n" }),
            )
            .fallback(|| async { (axum::http::StatusCode::NOT_FOUND, "not found") });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn normalize_collapses_separators() {
        assert_eq!(normalize("Night-Owl"), "night owl");
        assert_eq!(normalize("  night__owl  "), "night owl");
        assert_eq!(normalize("night - _ owl"), "night owl");
        assert_eq!(normalize("---"), "");
    }

    #[tokio::test]
    async fn local_path_wins_and_skips_cache() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, "http://127.0.0.1:1");
        let mut cache = CacheStore::open(&config.paths.cache_dir).unwrap();

        let file = tmp.path().join("pirate.md");
        std::fs::write(&file, "# Pirate\n").unwrap();

        let resolved = resolve(&config, &mut cache, file.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(resolved.name, "pirate");
        assert_eq!(resolved.content, "# Pirate\n");
        assert_eq!(
            resolved.source,
            ResolvedSource::LocalFile(file.clone())
        );
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn exact_cache_match_is_used() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, "http://127.0.0.1:1");
        let mut cache = CacheStore::open(&config.paths.cache_dir).unwrap();
        cache
            .put("Pirate Captain", "# Ahoy\n", "h1", Some("pirate-captain"))
            .unwrap();

        let resolved = resolve(&config, &mut cache, "pirate captain").await.unwrap();
        assert_eq!(resolved.source, ResolvedSource::Cache);
        assert_eq!(resolved.content, "# Ahoy\n");
    }

    #[tokio::test]
    async fn fuzzy_match_reports_candidates_instead_of_guessing() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, "http://127.0.0.1:1");
        let mut cache = CacheStore::open(&config.paths.cache_dir).unwrap();
        cache
            .put("Pirate Captain", "# Ahoy\n", "h1", None)
            .unwrap();

        let err = resolve(&config, &mut cache, "pirate").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Pirate Captain"), "got: {}", msg);
        assert!(msg.contains("cached list"), "got: {}", msg);
    }

    #[tokio::test]
    async fn registry_fetch_caches_result() {
        let tmp = TempDir::new().unwrap();
        let url = spawn_registry_stub().await;
        let config = test_config(&tmp, &url);
        let mut cache = CacheStore::open(&config.paths.cache_dir).unwrap();

        let resolved = resolve(&config, &mut cache, "Night Owl").await.unwrap();
        assert_eq!(resolved.source, ResolvedSource::Registry);
        assert_eq!(resolved.name, "Night Owl");
        assert_eq!(resolved.label.as_deref(), Some("night-owl"));

        let (entry, content) = cache.get("night-owl").unwrap().unwrap();
        assert_eq!(entry.name, "Night Owl");
        assert_eq!(content, "# Night Owl\n\nQuiet and observant.\n");
    }

    #[tokio::test]
    async fn registry_miss_reports_clear_error() {
        let tmp = TempDir::new().unwrap();
        let url = spawn_registry_stub().await;
        let config = test_config(&tmp, &url);
        let mut cache = CacheStore::open(&config.paths.cache_dir).unwrap();

        let err = resolve(&config, &mut cache, "does-not-exist").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("does-not-exist"), "got: {}", msg);
        assert!(msg.contains("not found"), "got: {}", msg);
        assert!(cache.is_empty());
    }
}
