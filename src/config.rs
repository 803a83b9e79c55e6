use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Filesystem locations managed by the client-side engines.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PathsConfig {
    /// The active personality file the swap engine manages.
    #[serde(default = "default_soul_file")]
    pub soul_file: PathBuf,
    /// Single-slot backup of the pre-swap original.
    #[serde(default = "default_backup_file")]
    pub backup_file: PathBuf,
    /// Root directory of the local fetch cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Base URL of the registry API, without a trailing slash.
    #[serde(default = "default_registry_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

/// S3-compatible object storage used by the registry server.
///
/// Credentials may be left out of the file and provided via the
/// `OPENSOUL_STORAGE_ACCESS_KEY_ID` / `OPENSOUL_STORAGE_SECRET_ACCESS_KEY`
/// environment variables instead.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    /// Endpoint URL, e.g. `https://<account>.r2.cloudflarestorage.com`.
    #[serde(default)]
    pub endpoint_url: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_soul_file() -> PathBuf {
    PathBuf::from("./SOUL.md")
}
fn default_backup_file() -> PathBuf {
    PathBuf::from("./.opensoul/backup.md")
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("./.opensoul/cache")
}
fn default_registry_url() -> String {
    "https://registry.opensoul.dev".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./.opensoul/registry.sqlite")
}
fn default_bucket() -> String {
    "opensoul".to_string()
}
fn default_region() -> String {
    "auto".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_bind() -> String {
    "127.0.0.1:7777".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            soul_file: default_soul_file(),
            backup_file: default_backup_file(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            bucket: default_bucket(),
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            registry: RegistryConfig::default(),
            db: DbConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Load configuration from `path`, creating the file from defaults when it
/// does not exist.
///
/// Every field has an explicit default, so a partial file parses cleanly.
/// When the parsed file is missing fields, the merged configuration is
/// written back so the file on disk always shows the full set of settings.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        write_config(path, &config)?;
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    if config.registry.base_url.trim().is_empty() {
        anyhow::bail!("registry.base_url must not be empty");
    }
    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    // Persist the merged view back when the file was partial.
    let merged = toml::to_string_pretty(&config)?;
    let on_disk: toml::Value = toml::from_str(&content)?;
    let full: toml::Value = toml::from_str(&merged)?;
    if on_disk != full {
        write_config(path, &config)?;
    }

    Ok(config)
}

fn write_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}
