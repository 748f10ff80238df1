use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_core::db::SqliteStore;
use tally_core::sync::{RecordKind, Versioned};
use tally_core::RecordId;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::authorize;
use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: SqliteStore,
}

impl AppState {
    pub const fn new(config: Arc<AppConfig>, store: SqliteStore) -> Self {
        Self { config, store }
    }
}

pub fn app_router(state: AppState) -> Router {
    let record_routes = Router::new()
        .route("/records/{kind}", get(list_records))
        .route("/records/{kind}/{id}", put(put_record))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", record_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(request.headers(), state.config.token.as_deref())?;
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct ParentQuery {
    parent: Option<String>,
}

impl ParentQuery {
    fn parent_id(&self) -> Result<Option<RecordId>, AppError> {
        self.parent
            .as_deref()
            .map(str::trim)
            .filter(|parent| !parent.is_empty())
            .map(parse_id)
            .transpose()
    }
}

async fn list_records(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<ParentQuery>,
) -> Result<Json<Vec<Versioned<Value>>>, AppError> {
    let kind = parse_kind(&kind)?;
    let parent = query.parent_id()?;
    let records = state.store.load_raw(kind, parent.as_ref()).await?;
    tracing::debug!(%kind, parent = ?parent, count = records.len(), "Served records");
    Ok(Json(records))
}

async fn put_record(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Query(query): Query<ParentQuery>,
    Json(record): Json<Versioned<Value>>,
) -> Result<StatusCode, AppError> {
    let kind = parse_kind(&kind)?;
    let id = parse_id(&id)?;
    if record.id != id {
        return Err(AppError::bad_request(format!(
            "body id {} does not match path id {id}",
            record.id
        )));
    }
    if record.version == 0 {
        return Err(AppError::bad_request("record version must be at least 1"));
    }

    let parent = query.parent_id()?;
    state.store.upsert_raw(kind, parent.as_ref(), &record).await?;
    tracing::info!(
        %kind,
        %id,
        version = record.version,
        deleted = record.deleted,
        replica = record.last_modified_by.as_ref().map_or("unknown", |replica| replica.as_str()),
        "Stored record"
    );
    Ok(StatusCode::NO_CONTENT)
}

fn parse_kind(raw: &str) -> Result<RecordKind, AppError> {
    raw.parse::<RecordKind>().map_err(AppError::NotFound)
}

fn parse_id(raw: &str) -> Result<RecordId, AppError> {
    raw.parse::<RecordId>()
        .map_err(|error| AppError::bad_request(format!("invalid record id '{raw}': {error}")))
}
