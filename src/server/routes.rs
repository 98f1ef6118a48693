//! Router assembly and the decision endpoint

use crate::auth::{ApiKey, AuthEngine, AuthRequest, Denial, DenyReason, Verdict};
use crate::storage::TokenStore;
use axum::{
    extract::{Query, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AuthEngine>,
    pub store: Arc<dyn TokenStore>,
    pub api_key: Option<ApiKey>,
}

/// Assemble the full router: public decision + health endpoints, and the
/// management surface nested under `/api`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/auth", get(authorize).post(authorize))
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api", super::management::routes(state.clone()))
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "streamgate",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Query parameters the streaming server sends on its auth callback.
#[derive(Debug, Deserialize)]
pub struct AuthParams {
    /// Stream name
    name: String,
    /// Client IP address
    ip: String,
    /// Authorization token
    token: String,
    /// Protocol tag (hls, rtmp, dash, ...)
    #[serde(default = "default_proto")]
    proto: String,
}

fn default_proto() -> String {
    "unknown".to_string()
}

/// 403 body for denied requests.
#[derive(Debug, Serialize)]
struct DeniedBody {
    error: &'static str,
    reason: DenyReason,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

impl From<Denial> for DeniedBody {
    fn from(d: Denial) -> Self {
        Self {
            error: "access_denied",
            reason: d.reason,
            message: d.message,
            user_id: d.user_id,
        }
    }
}

/// The decision endpoint. Accepts GET and POST with identical query
/// parameters; deliberately unauthenticated (the caller cannot present
/// credentials of its own).
async fn authorize(State(state): State<AppState>, Query(params): Query<AuthParams>) -> Response {
    let req = AuthRequest::new(params.token, params.ip, params.name, params.proto);
    let verdict = state.engine.authorize(&req, Utc::now()).await;

    match verdict {
        Verdict::Allow(a) => {
            info!(user_id = %a.user_id, stream = %req.stream, "access granted");

            let mut response = StatusCode::OK.into_response();
            let max_sessions = a.max_sessions.to_string();
            let auth_duration = a.auth_duration_secs.to_string();
            let headers = response.headers_mut();
            for (name, value) in [
                ("x-userid", a.user_id.as_str()),
                ("x-max-sessions", max_sessions.as_str()),
                ("x-authduration", auth_duration.as_str()),
            ] {
                match HeaderValue::from_str(value) {
                    Ok(v) => {
                        headers.insert(HeaderName::from_static(name), v);
                    }
                    Err(_) => warn!(header = name, "unrepresentable header value dropped"),
                }
            }
            response
        }
        Verdict::Deny(denial) => {
            warn!(
                reason = %denial.reason,
                stream = %req.stream,
                ip = %req.client_ip,
                "access denied"
            );
            (StatusCode::FORBIDDEN, Json(DeniedBody::from(denial))).into_response()
        }
    }
}
