//! Registry identity and aggregation layer.
//!
//! Owns the soul records in SQLite: minting slugs and unique labels,
//! upserting ratings and recomputing their aggregates, and ordering
//! listings by the requested sort mode.
//!
//! # Identity
//!
//! Every soul carries two unique identifiers:
//!
//! - `slug` — a short random string, minted once, never derived from the
//!   name;
//! - `label` — the slugified name, suffixed `-2`, `-3`, … on collision.
//!
//! Label assignment probes the table and then inserts; a concurrent upload
//! of the same name can win the probe race, so the insert runs in a
//! retry-on-unique-violation loop that re-probes and lands on the next
//! free suffix.
//!
//! # Aggregation
//!
//! `rating_avg` and `rating_count` on the soul row are read-optimization
//! caches. They are recomputed from the ratings table on every rating
//! change — never incrementally adjusted — so two concurrent raters
//! converge regardless of interleaving.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{RatingSummary, Soul, SoulPage};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Upper bound on label-insert retries; each attempt re-probes the table,
/// so this is only reachable under sustained concurrent uploads of the
/// same name.
const LABEL_INSERT_ATTEMPTS: usize = 8;

// ============ Identity ============

/// Mint a short random slug (12 hex characters of a v4 UUID).
pub fn mint_slug() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Derive the base label from a display name: lower-case, every run of
/// non-alphanumeric characters collapsed to a single hyphen, leading and
/// trailing hyphens trimmed.
pub fn slugify(name: &str) -> String {
    let mut out = String::new();
    let mut pending_hyphen = false;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    out
}

/// Find the first free label for `name`: the base slug if unused,
/// otherwise `-2`, `-3`, … probed in order.
pub async fn derive_label(pool: &SqlitePool, name: &str) -> Result<String> {
    let base = slugify(name);
    let base = if base.is_empty() {
        "soul".to_string()
    } else {
        base
    };

    if !label_taken(pool, &base).await? {
        return Ok(base);
    }
    let mut n: u64 = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !label_taken(pool, &candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

async fn label_taken(pool: &SqlitePool, label: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM souls WHERE label = ?")
        .bind(label)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Fields needed to insert a new soul row. Content bytes are persisted to
/// object storage by the caller before this row exists.
#[derive(Debug, Clone)]
pub struct NewSoul {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub owner: String,
    pub image_url: Option<String>,
}

/// Insert a new soul, deriving its unique label.
///
/// The probe-then-insert sequence retries on a unique violation so that
/// two concurrent uploads of the same name both succeed with distinct
/// labels.
pub async fn insert_soul(pool: &SqlitePool, new: NewSoul) -> Result<Soul> {
    if new.name.trim().is_empty() {
        bail!("name must not be empty");
    }
    if new.owner.trim().is_empty() {
        bail!("owner must not be empty");
    }

    let tags_json = serde_json::to_string(&new.tags)?;

    for _ in 0..LABEL_INSERT_ATTEMPTS {
        let label = derive_label(pool, &new.name).await?;
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO souls (id, label, name, description, tags_json, owner, rating_avg, rating_count, downloads_count, image_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, 0, 0, ?, ?, ?)
            "#,
        )
        .bind(&new.slug)
        .bind(&label)
        .bind(&new.name)
        .bind(&new.description)
        .bind(&tags_json)
        .bind(&new.owner)
        .bind(&new.image_url)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await;

        match result {
            Ok(_) => {
                return Ok(Soul {
                    slug: new.slug,
                    label,
                    name: new.name,
                    description: new.description,
                    tags: new.tags,
                    owner: new.owner,
                    rating_avg: 0.0,
                    rating_count: 0,
                    downloads_count: 0,
                    image_url: new.image_url,
                    created_at: now,
                    updated_at: now,
                });
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => continue,
            Err(e) => return Err(e.into()),
        }
    }

    bail!("could not assign a unique label for '{}'", new.name)
}

/// Look up a soul by slug or label.
pub async fn find_soul(pool: &SqlitePool, ident: &str) -> Result<Option<Soul>> {
    let row = sqlx::query("SELECT * FROM souls WHERE id = ? OR label = ? LIMIT 1")
        .bind(ident)
        .bind(ident)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_soul).transpose()
}

/// Update the mutable metadata of a soul. `None` leaves a field unchanged.
pub async fn update_soul(
    pool: &SqlitePool,
    slug: &str,
    description: Option<String>,
    tags: Option<Vec<String>>,
) -> Result<Soul> {
    let existing = find_soul(pool, slug)
        .await?
        .with_context(|| format!("soul not found: {}", slug))?;

    let description = description.or_else(|| existing.description.clone());
    let tags = tags.unwrap_or_else(|| existing.tags.clone());
    let tags_json = serde_json::to_string(&tags)?;
    let now = Utc::now().timestamp();

    sqlx::query("UPDATE souls SET description = ?, tags_json = ?, updated_at = ? WHERE id = ?")
        .bind(&description)
        .bind(&tags_json)
        .bind(now)
        .bind(&existing.slug)
        .execute(pool)
        .await?;

    Ok(Soul {
        description,
        tags,
        updated_at: now,
        ..existing
    })
}

/// Remove a soul and its ratings. Storage cleanup is the caller's job.
pub async fn delete_soul(pool: &SqlitePool, slug: &str) -> Result<()> {
    sqlx::query("DELETE FROM ratings WHERE soul_id = ?")
        .bind(slug)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM souls WHERE id = ?")
        .bind(slug)
        .execute(pool)
        .await?;
    Ok(())
}

/// Count one download of a soul's content.
pub async fn record_download(pool: &SqlitePool, slug: &str) -> Result<()> {
    sqlx::query("UPDATE souls SET downloads_count = downloads_count + 1 WHERE id = ?")
        .bind(slug)
        .execute(pool)
        .await?;
    Ok(())
}

// ============ Ratings ============

/// Upsert one rating and recompute the soul's aggregate state.
///
/// `value` must be an integer in [1,5]. A later submission from the same
/// rater overwrites; the average and count are recomputed as the true
/// mean and row count over all current ratings, then persisted back onto
/// the soul row.
pub async fn rate(
    pool: &SqlitePool,
    slug: &str,
    rater: &str,
    value: i64,
) -> Result<RatingSummary> {
    if !(1..=5).contains(&value) {
        bail!("rating must be an integer between 1 and 5 (got {})", value);
    }
    if rater.trim().is_empty() {
        bail!("rater must not be empty");
    }

    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO ratings (soul_id, rater, value, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(soul_id, rater) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(slug)
    .bind(rater)
    .bind(value)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT AVG(value) AS avg, COUNT(*) AS count FROM ratings WHERE soul_id = ?")
        .bind(slug)
        .fetch_one(pool)
        .await?;

    let avg: f64 = row.get::<Option<f64>, _>("avg").unwrap_or(0.0);
    let count: i64 = row.get("count");
    let avg = round1(avg);

    sqlx::query("UPDATE souls SET rating_avg = ?, rating_count = ? WHERE id = ?")
        .bind(avg)
        .bind(count)
        .bind(slug)
        .execute(pool)
        .await?;

    Ok(RatingSummary {
        rating_avg: avg,
        rating_count: count,
    })
}

/// Round to one decimal place, half away from zero.
fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

// ============ Ranking & Listing ============

/// Listing order for the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Descending update timestamp (the default).
    Recent,
    /// Descending download count, ties broken by descending rating count.
    Popular,
    /// Descending weighted score.
    Top,
}

impl Default for SortMode {
    fn default() -> Self {
        SortMode::Recent
    }
}

impl SortMode {
    /// Parse the `sort` query parameter; unset means `recent`.
    pub fn parse(s: Option<&str>) -> Result<Self> {
        match s.unwrap_or("recent") {
            "recent" => Ok(SortMode::Recent),
            "popular" => Ok(SortMode::Popular),
            "top" => Ok(SortMode::Top),
            other => bail!("unknown sort mode: '{}'. Use recent, popular, or top.", other),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortMode::Recent => "recent",
            SortMode::Popular => "popular",
            SortMode::Top => "top",
        }
    }
}

/// Composite ranking value for `top`: average rating plus logarithmically
/// damped volume terms. The damping keeps a huge download count from
/// permanently outranking a slightly better average, while still placing
/// proven documents above an untested 5.0 with one rating.
pub fn weighted_score(rating_avg: f64, rating_count: i64, downloads_count: i64) -> f64 {
    0.5 * rating_avg
        + 0.3 * (1.0 + rating_count as f64).ln()
        + 0.2 * (1.0 + downloads_count as f64).ln()
}

fn rank(souls: &mut [Soul], mode: SortMode) {
    match mode {
        SortMode::Recent => souls.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        SortMode::Popular => souls.sort_by(|a, b| {
            b.downloads_count
                .cmp(&a.downloads_count)
                .then(b.rating_count.cmp(&a.rating_count))
        }),
        SortMode::Top => souls.sort_by(|a, b| {
            let sa = weighted_score(a.rating_avg, a.rating_count, a.downloads_count);
            let sb = weighted_score(b.rating_avg, b.rating_count, b.downloads_count);
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        }),
    }
}

/// Listing parameters. Filters apply before ranking and pagination.
#[derive(Debug, Clone)]
pub struct ListQuery {
    /// Case-insensitive substring over name, description, and owner.
    pub search: Option<String>,
    /// Exact tag membership.
    pub tag: Option<String>,
    pub sort: SortMode,
    /// 1-based page number; values below 1 are clamped.
    pub page: i64,
    /// Page size, clamped to 1–100.
    pub limit: i64,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            search: None,
            tag: None,
            sort: SortMode::default(),
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

/// List souls: filter, rank, paginate.
pub async fn list_souls(pool: &SqlitePool, query: &ListQuery) -> Result<SoulPage> {
    let rows = sqlx::query("SELECT * FROM souls").fetch_all(pool).await?;
    let mut souls = rows
        .iter()
        .map(row_to_soul)
        .collect::<Result<Vec<Soul>>>()?;

    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let needle = search.to_lowercase();
        souls.retain(|s| {
            s.name.to_lowercase().contains(&needle)
                || s.description
                    .as_deref()
                    .unwrap_or("")
                    .to_lowercase()
                    .contains(&needle)
                || s.owner.to_lowercase().contains(&needle)
        });
    }

    if let Some(tag) = query.tag.as_deref().filter(|t| !t.trim().is_empty()) {
        souls.retain(|s| s.tags.iter().any(|t| t == tag));
    }

    rank(&mut souls, query.sort);

    let total = souls.len() as i64;
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let offset = ((page - 1) * limit) as usize;
    let souls = souls
        .into_iter()
        .skip(offset)
        .take(limit as usize)
        .collect();

    Ok(SoulPage {
        souls,
        total,
        page,
        limit,
    })
}

fn row_to_soul(row: &sqlx::sqlite::SqliteRow) -> Result<Soul> {
    let tags_json: String = row.get("tags_json");
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();

    Ok(Soul {
        slug: row.get("id"),
        label: row.get("label"),
        name: row.get("name"),
        description: row.get("description"),
        tags,
        owner: row.get("owner"),
        rating_avg: row.get("rating_avg"),
        rating_count: row.get("rating_count"),
        downloads_count: row.get("downloads_count"),
        image_url: row.get("image_url"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
