//! The `soul apply`, `soul rollback`, and `soul status` commands.
//!
//! `apply` ties the lifecycle together: resolve the token, write the
//! document through the swap engine, and record the activation in the
//! local cache (local file applies bypass the cache entirely).

use anyhow::Result;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::resolve::{self, ResolvedSource};
use crate::swap::{SwapEngine, SwapState};

pub async fn run_apply(config: &Config, token: &str) -> Result<()> {
    let mut cache = CacheStore::open(&config.paths.cache_dir)?;

    let resolved = match resolve::resolve(config, &mut cache, token).await {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let engine = SwapEngine::new(&config.paths.soul_file, &config.paths.backup_file);
    let backed_up = engine.swap(&resolved.content)?;

    if !matches!(resolved.source, ResolvedSource::LocalFile(_)) {
        cache.touch(&resolved.name)?;
    }

    let origin = match &resolved.source {
        ResolvedSource::LocalFile(path) => format!("local file {}", path.display()),
        ResolvedSource::Cache => "cache".to_string(),
        ResolvedSource::Registry => "registry".to_string(),
    };

    println!(
        "applied soul '{}' from {} to {}",
        resolved.name,
        origin,
        config.paths.soul_file.display()
    );
    if backed_up {
        println!(
            "  original backed up to {}",
            config.paths.backup_file.display()
        );
    }
    println!("  undo with: soul rollback");
    Ok(())
}

pub fn run_rollback(config: &Config) -> Result<()> {
    let engine = SwapEngine::new(&config.paths.soul_file, &config.paths.backup_file);

    if engine.rollback()? {
        println!(
            "restored original {} from backup",
            config.paths.soul_file.display()
        );
    } else {
        eprintln!(
            "Error: no backup exists at {} — nothing to roll back. \
             Apply a soul first with `soul apply <name>`.",
            config.paths.backup_file.display()
        );
        std::process::exit(1);
    }
    Ok(())
}

pub fn run_status(config: &Config) -> Result<()> {
    let engine = SwapEngine::new(&config.paths.soul_file, &config.paths.backup_file);
    let status = engine.status();

    println!("--- Soul Status ---");
    println!("file:    {}", status.path.display());
    println!(
        "state:   {}",
        match status.state {
            SwapState::Original => "original",
            SwapState::Swapped => "swapped",
        }
    );
    println!(
        "backup:  {}",
        if status.has_backup { "present" } else { "none" }
    );
    if let Some(preview) = status.preview {
        println!("preview: {}", preview);
    }
    Ok(())
}
