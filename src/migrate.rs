use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all registry tables. Idempotent; also usable against an
/// in-memory pool in tests.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Soul records. `id` holds the opaque slug; `label` is the derived
    // human-readable slug. Both are unique.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS souls (
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            owner TEXT NOT NULL,
            rating_avg REAL NOT NULL DEFAULT 0,
            rating_count INTEGER NOT NULL DEFAULT 0,
            downloads_count INTEGER NOT NULL DEFAULT 0,
            image_url TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One rating per (soul, rater); a resubmission overwrites.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ratings (
            soul_id TEXT NOT NULL,
            rater TEXT NOT NULL,
            value INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(soul_id, rater),
            FOREIGN KEY (soul_id) REFERENCES souls(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_souls_updated_at ON souls(updated_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_souls_owner ON souls(owner)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ratings_soul_id ON ratings(soul_id)")
        .execute(pool)
        .await?;

    Ok(())
}
