//! Registry HTTP server.
//!
//! Exposes the registry over a JSON API. The web marketplace and its OAuth
//! login flow live elsewhere and talk to these endpoints; here the owner
//! or editor identity simply arrives as a field in the request body.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/souls` | List souls (`search`, `tag`, `sort`, `page`, `limit`) |
//! | `POST` | `/api/souls` | Upload a soul (mints slug and label) |
//! | `GET`  | `/api/souls/{ident}` | Metadata by slug or label |
//! | `PUT`  | `/api/souls/{ident}` | Owner-checked edit |
//! | `DELETE` | `/api/souls/{ident}` | Owner-checked delete |
//! | `GET`  | `/api/souls/{ident}/content` | Document bytes (counts a download) |
//! | `POST` | `/api/souls/{ident}/rate` | Submit a rating |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "soul not found: x" } }
//! ```
//!
//! Error codes: `bad_request` (400), `forbidden` (403), `not_found` (404),
//! `internal` (500). Storage write failures surface as `internal`: a failed
//! PUT means the content was not durably persisted, so the operation must
//! not report success.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::models::{PublishRequest, RateRequest, Soul, UpdateRequest};
use crate::registry;
use crate::storage::StorageClient;
use crate::{db, migrate};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pool: SqlitePool,
    storage: Arc<StorageClient>,
}

/// Start the registry server on the configured bind address.
///
/// Runs schema migrations first, so a fresh database works without a
/// separate `soul init`. The server runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    let storage = Arc::new(StorageClient::new(&config.storage)?);
    let state = AppState { pool, storage };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/souls", get(handle_list).post(handle_upload))
        .route(
            "/api/souls/{ident}",
            get(handle_get).put(handle_update).delete(handle_delete),
        )
        .route("/api/souls/{ident}/content", get(handle_content))
        .route("/api/souls/{ident}/rate", post(handle_rate))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("registry listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn forbidden(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::FORBIDDEN,
        code: "forbidden".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map registry/storage errors to HTTP statuses by message shape, so the
/// lower layers can stay on plain `anyhow` errors.
fn classify_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();

    if msg.contains("not found") {
        not_found(msg)
    } else if msg.contains("only the owner") {
        forbidden(msg)
    } else if msg.contains("must not be empty")
        || msg.contains("must be")
        || msg.contains("invalid")
        || msg.contains("unknown")
    {
        bad_request(msg)
    } else {
        internal(msg)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/souls ============

#[derive(Deserialize)]
struct ListParams {
    search: Option<String>,
    tag: Option<String>,
    sort: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

async fn handle_list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<crate::models::SoulPage>, AppError> {
    let sort = registry::SortMode::parse(params.sort.as_deref()).map_err(classify_error)?;
    let query = registry::ListQuery {
        search: params.search,
        tag: params.tag,
        sort,
        page: params.page.unwrap_or(1),
        limit: params.limit.unwrap_or(registry::DEFAULT_PAGE_SIZE),
    };

    let page = registry::list_souls(&state.pool, &query)
        .await
        .map_err(classify_error)?;
    Ok(Json(page))
}

// ============ POST /api/souls ============

async fn handle_upload(
    State(state): State<AppState>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<Soul>, AppError> {
    if req.name.trim().is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    if req.owner.trim().is_empty() {
        return Err(bad_request("owner must not be empty"));
    }
    if req.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }

    let slug = registry::mint_slug();

    // Content must be durable before the record exists.
    state
        .storage
        .put(&soul_key(&slug), req.content.as_bytes())
        .await
        .map_err(classify_error)?;

    let image_url = match &req.image {
        Some(image) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&image.data)
                .map_err(|_| bad_request("invalid image encoding"))?;
            let key = format!("{}/{}", slug, image_filename(&image.content_type));
            let url = state
                .storage
                .put(&key, &bytes)
                .await
                .map_err(classify_error)?;
            Some(url)
        }
        None => None,
    };

    let soul = registry::insert_soul(
        &state.pool,
        registry::NewSoul {
            slug,
            name: req.name,
            description: req.description,
            tags: req.tags,
            owner: req.owner,
            image_url,
        },
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(soul))
}

/// Object filename for an uploaded image, derived from its content type.
fn image_filename(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "image.png",
        "image/jpeg" | "image/jpg" => "image.jpg",
        "image/webp" => "image.webp",
        "image/gif" => "image.gif",
        _ => "image.bin",
    }
}

fn soul_key(slug: &str) -> String {
    format!("{}/soul.md", slug)
}

// ============ GET /api/souls/{ident} ============

async fn handle_get(
    State(state): State<AppState>,
    Path(ident): Path<String>,
) -> Result<Json<Soul>, AppError> {
    let soul = require_soul(&state.pool, &ident).await?;
    Ok(Json(soul))
}

// ============ GET /api/souls/{ident}/content ============

async fn handle_content(
    State(state): State<AppState>,
    Path(ident): Path<String>,
) -> Result<Response, AppError> {
    let soul = require_soul(&state.pool, &ident).await?;

    let bytes = state
        .storage
        .get(&soul_key(&soul.slug))
        .await
        .map_err(classify_error)?
        .ok_or_else(|| not_found(format!("soul content not found: {}", ident)))?;

    registry::record_download(&state.pool, &soul.slug)
        .await
        .map_err(classify_error)?;

    let body = String::from_utf8_lossy(&bytes).to_string();
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        body,
    )
        .into_response())
}

// ============ PUT /api/souls/{ident} ============

async fn handle_update(
    State(state): State<AppState>,
    Path(ident): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<Soul>, AppError> {
    let soul = require_soul(&state.pool, &ident).await?;
    check_owner(&soul, &req.editor, "edit")?;

    if let Some(ref content) = req.content {
        if content.trim().is_empty() {
            return Err(bad_request("content must not be empty"));
        }
        state
            .storage
            .put(&soul_key(&soul.slug), content.as_bytes())
            .await
            .map_err(classify_error)?;
    }

    let updated = registry::update_soul(&state.pool, &soul.slug, req.description, req.tags)
        .await
        .map_err(classify_error)?;
    Ok(Json(updated))
}

// ============ DELETE /api/souls/{ident} ============

#[derive(Deserialize)]
struct DeleteRequest {
    editor: String,
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(ident): Path<String>,
    Json(req): Json<DeleteRequest>,
) -> Result<StatusCode, AppError> {
    let soul = require_soul(&state.pool, &ident).await?;
    check_owner(&soul, &req.editor, "delete")?;

    state
        .storage
        .delete(&soul_key(&soul.slug))
        .await
        .map_err(classify_error)?;

    if let Some(ref image_url) = soul.image_url {
        if let Some(filename) = image_url.rsplit('/').next() {
            let key = format!("{}/{}", soul.slug, filename);
            state.storage.delete(&key).await.map_err(classify_error)?;
        }
    }

    registry::delete_soul(&state.pool, &soul.slug)
        .await
        .map_err(classify_error)?;

    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /api/souls/{ident}/rate ============

async fn handle_rate(
    State(state): State<AppState>,
    Path(ident): Path<String>,
    Json(req): Json<RateRequest>,
) -> Result<Json<crate::models::RatingSummary>, AppError> {
    let soul = require_soul(&state.pool, &ident).await?;

    let summary = registry::rate(&state.pool, &soul.slug, &req.rater, req.value)
        .await
        .map_err(classify_error)?;
    Ok(Json(summary))
}

// ============ Helpers ============

/// Existence is checked before any ownership or mutation logic.
async fn require_soul(pool: &SqlitePool, ident: &str) -> Result<Soul, AppError> {
    registry::find_soul(pool, ident)
        .await
        .map_err(classify_error)?
        .ok_or_else(|| not_found(format!("soul not found: {}", ident)))
}

fn check_owner(soul: &Soul, editor: &str, verb: &str) -> Result<(), AppError> {
    if soul.owner != editor {
        return Err(forbidden(format!(
            "only the owner may {} soul '{}'",
            verb, soul.label
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_message_shapes_to_statuses() {
        let cases = [
            ("soul not found: x", StatusCode::NOT_FOUND),
            ("only the owner may edit soul 'x'", StatusCode::FORBIDDEN),
            ("name must not be empty", StatusCode::BAD_REQUEST),
            (
                "rating must be an integer between 1 and 5 (got 9)",
                StatusCode::BAD_REQUEST,
            ),
            ("unknown sort mode: 'zzz'", StatusCode::BAD_REQUEST),
            (
                "storage PUT failed (HTTP 503) for key 'k': busy",
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (msg, status) in cases {
            let err = classify_error(anyhow::anyhow!("{}", msg));
            assert_eq!(err.status, status, "for message: {}", msg);
        }
    }

    #[test]
    fn image_filenames_follow_content_type() {
        assert_eq!(image_filename("image/png"), "image.png");
        assert_eq!(image_filename("image/jpeg"), "image.jpg");
        assert_eq!(image_filename("application/octet-stream"), "image.bin");
    }
}
