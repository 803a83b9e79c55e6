//! HTTP client for the registry API.
//!
//! Used by the CLI commands and the resolution algorithm. Each call is a
//! single request with a bounded timeout; there is no retry state.

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;

use crate::config::RegistryConfig;
use crate::models::{PublishRequest, RatingSummary, Soul, SoulPage};
use crate::registry::ListQuery;

pub struct RegistryClient {
    base: String,
    http: reqwest::Client,
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            base: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Fetch a soul's metadata by slug or label.
    pub async fn fetch_soul(&self, ident: &str) -> Result<Soul> {
        let url = format!("{}/api/souls/{}", self.base, ident);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach registry at {}", self.base))?;

        if resp.status() == StatusCode::NOT_FOUND {
            bail!("soul not found: {}", ident);
        }
        if !resp.status().is_success() {
            bail!(
                "registry request failed (HTTP {}): {}",
                resp.status(),
                body_message(resp).await
            );
        }

        Ok(resp.json().await?)
    }

    /// Fetch a soul's document content by slug or label.
    pub async fn fetch_content(&self, ident: &str) -> Result<String> {
        let url = format!("{}/api/souls/{}/content", self.base, ident);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach registry at {}", self.base))?;

        if resp.status() == StatusCode::NOT_FOUND {
            bail!("soul content not found: {}", ident);
        }
        if !resp.status().is_success() {
            bail!(
                "registry request failed (HTTP {}): {}",
                resp.status(),
                body_message(resp).await
            );
        }

        Ok(resp.text().await?)
    }

    /// Query the registry listing.
    pub async fn search(&self, query: &ListQuery) -> Result<SoulPage> {
        let url = format!("{}/api/souls", self.base);
        let mut params: Vec<(&str, String)> = vec![
            ("sort", query.sort.as_str().to_string()),
            ("page", query.page.to_string()),
            ("limit", query.limit.to_string()),
        ];
        if let Some(ref search) = query.search {
            params.push(("search", search.clone()));
        }
        if let Some(ref tag) = query.tag {
            params.push(("tag", tag.clone()));
        }

        let resp = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .with_context(|| format!("Failed to reach registry at {}", self.base))?;

        if !resp.status().is_success() {
            bail!(
                "registry search failed (HTTP {}): {}",
                resp.status(),
                body_message(resp).await
            );
        }

        Ok(resp.json().await?)
    }

    /// Best-effort label suggestions for a search word.
    pub async fn suggest_labels(&self, word: &str, limit: i64) -> Result<Vec<String>> {
        let page = self
            .search(&ListQuery {
                search: Some(word.to_string()),
                limit,
                ..Default::default()
            })
            .await?;
        Ok(page.souls.into_iter().map(|s| s.label).collect())
    }

    /// Upload a new soul.
    pub async fn publish(&self, req: &PublishRequest) -> Result<Soul> {
        let url = format!("{}/api/souls", self.base);
        let resp = self
            .http
            .post(&url)
            .json(req)
            .send()
            .await
            .with_context(|| format!("Failed to reach registry at {}", self.base))?;

        if !resp.status().is_success() {
            bail!(
                "publish failed (HTTP {}): {}",
                resp.status(),
                body_message(resp).await
            );
        }

        Ok(resp.json().await?)
    }

    /// Submit a rating.
    pub async fn rate(&self, ident: &str, rater: &str, value: i64) -> Result<RatingSummary> {
        let url = format!("{}/api/souls/{}/rate", self.base, ident);
        let body = serde_json::json!({ "rater": rater, "value": value });
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach registry at {}", self.base))?;

        if resp.status() == StatusCode::NOT_FOUND {
            bail!("soul not found: {}", ident);
        }
        if !resp.status().is_success() {
            bail!(
                "rating failed (HTTP {}): {}",
                resp.status(),
                body_message(resp).await
            );
        }

        Ok(resp.json().await?)
    }
}

/// Extract the server's error message from a failed response, falling back
/// to the raw body.
async fn body_message(resp: reqwest::Response) -> String {
    let body = resp.text().await.unwrap_or_default();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
        if let Some(message) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return message.to_string();
        }
    }
    body.chars().take(300).collect()
}
