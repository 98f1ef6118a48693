//! Management REST surface: token CRUD, session listing and termination
//!
//! Thin input validation and pass-through to the store and ledger. Gated by
//! an optional API key; never applied to the decision endpoint.

use crate::auth::sessions::{Session, SessionFilter};
use crate::auth::tokens::{generate_token_value, TokenRecord, TokenStatus};
use crate::server::routes::AppState;
use crate::storage::{NewToken, StorageError, TokenFilter, TokenPatch};
use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Build the `/api` sub-router.
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/tokens", post(create_token).get(list_tokens))
        .route("/tokens/{id}", get(get_token).patch(update_token).delete(delete_token))
        .route("/sessions", get(list_sessions))
        .route("/sessions/user/{user_id}", get(user_sessions))
        .route("/sessions/{session_id}", delete(terminate_session))
        .route("/sessions/cleanup", post(cleanup_sessions))
        .layer(middleware::from_fn_with_state(state, require_api_key))
}

/// Reject requests without the configured API key. A missing configuration
/// leaves the surface open (deployments behind their own gateway).
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(key) = &state.api_key {
        let presented = request
            .headers()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok());
        if !presented.is_some_and(|p| key.matches(p)) {
            warn!("management request with invalid or missing API key");
            return error(StatusCode::UNAUTHORIZED, "Invalid or missing API key");
        }
    }
    next.run(request).await
}

fn error(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "detail": detail.into() }))).into_response()
}

fn storage_error(e: StorageError) -> Response {
    match e {
        StorageError::Conflict(msg) => error(StatusCode::BAD_REQUEST, msg),
        StorageError::NotFound(msg) => error(StatusCode::NOT_FOUND, msg),
        other => {
            warn!(error = %other, "management storage call failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "storage error")
        }
    }
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TokenCreate {
    /// Token value; generated when omitted.
    pub token: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub status: Option<TokenStatus>,
    pub max_sessions: Option<u32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub allowed_streams: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct TokenUpdate {
    pub status: Option<TokenStatus>,
    pub max_sessions: Option<u32>,
    pub valid_until: Option<DateTime<Utc>>,
    pub allowed_ips: Option<Vec<String>>,
    pub allowed_streams: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub id: i64,
    pub token: String,
    pub user_id: String,
    pub status: TokenStatus,
    pub max_sessions: Option<u32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub allowed_ips: Vec<String>,
    pub allowed_streams: Vec<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TokenRecord> for TokenResponse {
    fn from(t: TokenRecord) -> Self {
        Self {
            id: t.id,
            token: t.value,
            user_id: t.user_id,
            status: t.status,
            max_sessions: t.max_sessions,
            valid_from: t.valid_from,
            valid_until: t.valid_until,
            allowed_ips: t.allowed_ips,
            allowed_streams: t.allowed_streams,
            metadata: t.metadata,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

async fn create_token(
    State(state): State<AppState>,
    Json(body): Json<TokenCreate>,
) -> Response {
    if body.user_id.is_empty() {
        return error(StatusCode::BAD_REQUEST, "user_id must not be empty");
    }

    let new = NewToken {
        value: body.token.unwrap_or_else(generate_token_value),
        user_id: body.user_id,
        status: body.status.unwrap_or(TokenStatus::Active),
        max_sessions: body.max_sessions,
        valid_from: body.valid_from,
        valid_until: body.valid_until,
        allowed_ips: body.allowed_ips,
        allowed_streams: body.allowed_streams,
        metadata: body.metadata.unwrap_or_else(|| serde_json::json!({})),
    };

    match state.store.create(new).await {
        Ok(record) => {
            info!(token_id = record.id, user_id = %record.user_id, "token created");
            (StatusCode::CREATED, Json(TokenResponse::from(record))).into_response()
        }
        Err(e) => storage_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct ListTokensParams {
    status: Option<String>,
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

async fn list_tokens(
    State(state): State<AppState>,
    Query(params): Query<ListTokensParams>,
) -> Response {
    let status = match params.status.as_deref().map(TokenStatus::parse).transpose() {
        Ok(status) => status,
        Err(e) => return error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let filter = TokenFilter {
        status,
        skip: params.skip,
        limit: params.limit,
    };

    match state.store.list(&filter).await {
        Ok(records) => {
            let body: Vec<TokenResponse> = records.into_iter().map(Into::into).collect();
            Json(body).into_response()
        }
        Err(e) => storage_error(e),
    }
}

async fn get_token(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_by_id(id).await {
        Ok(Some(record)) => Json(TokenResponse::from(record)).into_response(),
        Ok(None) => error(StatusCode::NOT_FOUND, "Token not found"),
        Err(e) => storage_error(e),
    }
}

async fn update_token(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<TokenUpdate>,
) -> Response {
    let patch = TokenPatch {
        status: body.status,
        max_sessions: body.max_sessions.map(Some),
        valid_until: body.valid_until.map(Some),
        allowed_ips: body.allowed_ips,
        allowed_streams: body.allowed_streams,
        metadata: body.metadata,
    };

    match state.store.update(id, patch).await {
        Ok(Some(record)) => {
            info!(token_id = record.id, "token updated");
            Json(TokenResponse::from(record)).into_response()
        }
        Ok(None) => error(StatusCode::NOT_FOUND, "Token not found"),
        Err(e) => storage_error(e),
    }
}

async fn delete_token(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.delete(id).await {
        Ok(true) => {
            info!(token_id = id, "token deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => error(StatusCode::NOT_FOUND, "Token not found"),
        Err(e) => storage_error(e),
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Session as exposed over the management surface.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub token: String,
    pub user_id: String,
    pub stream_name: String,
    pub client_ip: String,
    pub protocol: String,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<Session> for SessionView {
    fn from(s: Session) -> Self {
        Self {
            session_id: s.id,
            token: s.token,
            user_id: s.user_id,
            stream_name: s.stream,
            client_ip: s.client_ip,
            protocol: s.protocol,
            started_at: s.started_at,
            last_seen_at: s.last_seen_at,
            expires_at: s.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListSessionsParams {
    user_id: Option<String>,
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_session_limit")]
    limit: usize,
}

fn default_session_limit() -> usize {
    100
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<ListSessionsParams>,
) -> Json<Vec<SessionView>> {
    let filter = SessionFilter {
        user_id: params.user_id,
        ..Default::default()
    };
    let sessions = state.engine.ledger().list_live(&filter, Utc::now());
    Json(
        sessions
            .into_iter()
            .skip(params.skip)
            .take(params.limit.clamp(1, 1000))
            .map(Into::into)
            .collect(),
    )
}

async fn user_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<Vec<SessionView>> {
    let filter = SessionFilter {
        user_id: Some(user_id),
        ..Default::default()
    };
    let sessions = state.engine.ledger().list_live(&filter, Utc::now());
    Json(sessions.into_iter().map(Into::into).collect())
}

async fn terminate_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if state.engine.ledger().release(&session_id) {
        info!(session_id = %session_id, "session terminated");
        StatusCode::NO_CONTENT.into_response()
    } else {
        error(StatusCode::NOT_FOUND, "Session not found")
    }
}

async fn cleanup_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleaned = state.engine.ledger().sweep_expired(Utc::now());
    info!(cleaned, "manual session cleanup");
    Json(serde_json::json!({ "cleaned": cleaned }))
}
