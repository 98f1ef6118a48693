//! HTTP surface
//!
//! Two faces on one listener: the public decision endpoint the streaming
//! server calls, and the API-key-gated management REST surface.

mod management;
mod routes;

pub use management::{SessionView, TokenCreate, TokenResponse, TokenUpdate};
pub use routes::{build_router, AppState};

use crate::auth::{ApiKey, AuthEngine};
use crate::storage::TokenStore;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Server configuration
#[derive(Debug, Clone)]
pub struct GateServerConfig {
    pub bind_addr: SocketAddr,
    /// Management API key; `None` leaves the management surface open.
    pub api_key: Option<String>,
}

/// The HTTP server wrapping the decision engine.
pub struct GateServer {
    config: GateServerConfig,
    state: AppState,
}

impl GateServer {
    pub fn new(
        config: GateServerConfig,
        engine: Arc<AuthEngine>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let state = AppState {
            engine,
            store,
            api_key: config.api_key.clone().map(ApiKey::new),
        };
        Self { config, state }
    }

    /// Bind and serve until the task is cancelled or the listener fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let app = build_router(self.state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind_addr))?;
        info!(addr = %self.config.bind_addr, "Streamgate HTTP server listening");

        axum::serve(listener, app).await?;

        Ok(())
    }
}
