//! Core data types shared between the registry, the HTTP server, and the
//! client-side commands.

use serde::{Deserialize, Serialize};

/// A personality document record in the registry.
///
/// `slug` is an opaque random identifier; `label` is the human-readable
/// unique slug derived from the name. Both are globally unique.
/// `rating_avg` and `rating_count` are caches of the true aggregate over
/// the ratings table, recomputed on every rating change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Soul {
    pub slug: String,
    pub label: String,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub owner: String,
    pub rating_avg: f64,
    pub rating_count: i64,
    pub downloads_count: i64,
    pub image_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One page of a registry listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoulPage {
    pub souls: Vec<Soul>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Upload payload accepted by `POST /api/souls`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub owner: String,
    pub content: String,
    #[serde(default)]
    pub image: Option<ImageUpload>,
}

/// Optional image attached to an upload, base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUpload {
    pub content_type: String,
    pub data: String,
}

/// Owner-checked edit payload accepted by `PUT /api/souls/{ident}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub editor: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Rating submission accepted by `POST /api/souls/{ident}/rate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRequest {
    pub rater: String,
    pub value: i64,
}

/// Aggregate rating state returned after a rating is upserted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RatingSummary {
    pub rating_avg: f64,
    pub rating_count: i64,
}
