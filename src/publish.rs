//! The `soul publish` and `soul rate` commands.

use anyhow::{Context, Result};
use std::path::Path;

use crate::client::RegistryClient;
use crate::config::Config;
use crate::models::PublishRequest;

pub async fn run_publish(
    config: &Config,
    file: &Path,
    name: String,
    owner: String,
    description: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let client = RegistryClient::new(&config.registry)?;
    let req = PublishRequest {
        name,
        description,
        tags,
        owner,
        content,
        image: None,
    };

    match client.publish(&req).await {
        Ok(soul) => {
            println!("published '{}' as '{}' (slug {})", soul.name, soul.label, soul.slug);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub async fn run_rate(config: &Config, ident: &str, value: i64, rater: String) -> Result<()> {
    let client = RegistryClient::new(&config.registry)?;

    match client.rate(ident, &rater, value).await {
        Ok(summary) => {
            println!(
                "rated '{}': average {:.1} from {} rating(s)",
                ident, summary.rating_avg, summary.rating_count
            );
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
    Ok(())
}
