use std::hash::{Hash, Hasher};
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use stride_core::db::{Database, LibsqlSyncRepository, SyncHistoryRepository};
use stride_core::models::{CallerMetadata, SyncHistoryEntry, SyncRequest};
use stride_core::sync::{EngineOptions, SyncEngine};

use crate::auth::{extract_bearer_token, AuthenticatedUser, TokenVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot};

const SYNC_ID_HEADER: HeaderName = HeaderName::from_static("x-sync-id");

const DEFAULT_HISTORY_LIMIT: u32 = 20;
const MAX_HISTORY_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    db: Arc<Database>,
    engine: Arc<SyncEngine>,
    token_verifier: Arc<TokenVerifier>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, db: Arc<Database>) -> Self {
        let engine = SyncEngine::new(db.clone()).with_options(EngineOptions {
            duplicate_tolerance: config.duplicate_tolerance,
            idempotency_ttl: config.idempotency_ttl,
            max_batch_size: config.sync_max_batch_size,
        });

        Self {
            token_verifier: Arc::new(TokenVerifier::new(&config)),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            engine: Arc::new(engine),
            db,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync", post(submit_sync))
        .route("/sync/history", get(sync_history))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
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
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.token_verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn submit_sync(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    Json(request): Json<SyncRequest>,
) -> Result<Response, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncSubmit, &user.user_id)
        .await?;

    let meta = caller_metadata(&headers);
    let receipt = state.engine.process(&user.user_id, &request, &meta).await?;

    tracing::info!(
        endpoint = "sync_submit",
        user = user_fingerprint(&user.user_id),
        sync_id = %receipt.sync_id,
        replayed = receipt.replayed,
        "Handled sync submission"
    );

    // The engine hands back pre-serialized bytes so replays stay identical
    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        receipt.body,
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&receipt.sync_id) {
        response.headers_mut().insert(SYNC_ID_HEADER, value);
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    entries: Vec<SyncHistoryEntry>,
}

async fn sync_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncHistory, &user.user_id)
        .await?;

    let limit = clamp_history_limit(query.limit);
    let repo = LibsqlSyncRepository::new(state.db.connection());
    let entries = repo.list_recent(&user.user_id, limit).await?;
    Ok(Json(HistoryResponse { entries }))
}

fn clamp_history_limit(requested: Option<u32>) -> usize {
    requested
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT) as usize
}

fn caller_metadata(headers: &HeaderMap) -> CallerMetadata {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    // First hop of X-Forwarded-For is the original client
    let client_addr = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    CallerMetadata {
        user_agent,
        client_addr,
    }
}

fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}
