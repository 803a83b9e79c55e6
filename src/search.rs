//! The `soul search` command: browse the registry from the terminal.

use anyhow::Result;

use crate::client::RegistryClient;
use crate::config::Config;
use crate::registry::{ListQuery, SortMode, DEFAULT_PAGE_SIZE};

pub async fn run_search(
    config: &Config,
    query: Option<String>,
    tag: Option<String>,
    sort: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
) -> Result<()> {
    let sort = match SortMode::parse(sort.as_deref()) {
        Ok(sort) => sort,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let client = RegistryClient::new(&config.registry)?;
    let list = ListQuery {
        search: query,
        tag,
        sort,
        page: page.unwrap_or(1),
        limit: limit.unwrap_or(DEFAULT_PAGE_SIZE),
    };

    let result = match client.search(&list).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if result.souls.is_empty() {
        println!("No souls found.");
        return Ok(());
    }

    println!(
        "{:<24} {:<28} {:<12} {:>9}  OWNER",
        "LABEL", "NAME", "RATING", "DOWNLOADS"
    );
    for soul in &result.souls {
        let rating = format!("{:.1} ({})", soul.rating_avg, soul.rating_count);
        println!(
            "{:<24} {:<28} {:<12} {:>9}  {}",
            soul.label, soul.name, rating, soul.downloads_count, soul.owner
        );
    }
    println!();
    println!(
        "page {} — showing {} of {} souls",
        result.page,
        result.souls.len(),
        result.total
    );

    Ok(())
}
