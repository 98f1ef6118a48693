//! Storage backends for Streamgate
//!
//! - Postgres: durable storage for tokens and the access log
//! - Memory: map-backed store for tests and storage-less runs

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresStore};

use crate::auth::recorder::AccessLogEntry;
use crate::auth::tokens::{TokenRecord, TokenStatus};
pub use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Storage errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Input for creating a token.
#[derive(Debug, Clone)]
pub struct NewToken {
    /// Explicit token value; generated by the caller when absent upstream.
    pub value: String,
    pub user_id: String,
    pub status: TokenStatus,
    pub max_sessions: Option<u32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub allowed_ips: Vec<String>,
    pub allowed_streams: Vec<String>,
    pub metadata: serde_json::Value,
}

/// Partial update for a token; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TokenPatch {
    pub status: Option<TokenStatus>,
    pub max_sessions: Option<Option<u32>>,
    pub valid_until: Option<Option<DateTime<Utc>>>,
    pub allowed_ips: Option<Vec<String>>,
    pub allowed_streams: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

impl TokenPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.max_sessions.is_none()
            && self.valid_until.is_none()
            && self.allowed_ips.is_none()
            && self.allowed_streams.is_none()
            && self.metadata.is_none()
    }
}

/// Listing filter for the management surface.
#[derive(Debug, Clone)]
pub struct TokenFilter {
    pub status: Option<TokenStatus>,
    pub skip: i64,
    pub limit: i64,
}

impl Default for TokenFilter {
    fn default() -> Self {
        Self {
            status: None,
            skip: 0,
            limit: 100,
        }
    }
}

/// Trait for durable token storage.
///
/// The decision engine only ever reads (`get_by_value`); the management
/// surface and CLI own the writes.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Look up a token by its opaque value.
    async fn get_by_value(&self, value: &str) -> Result<Option<TokenRecord>, StorageError>;

    /// Look up a token by storage id.
    async fn get_by_id(&self, id: i64) -> Result<Option<TokenRecord>, StorageError>;

    /// Create a token. Fails with `Conflict` on a duplicate value.
    async fn create(&self, new: NewToken) -> Result<TokenRecord, StorageError>;

    /// Apply a partial update. Returns the updated record, or `None` if the
    /// id does not exist.
    async fn update(&self, id: i64, patch: TokenPatch) -> Result<Option<TokenRecord>, StorageError>;

    /// Delete a token. Returns whether it existed.
    async fn delete(&self, id: i64) -> Result<bool, StorageError>;

    /// List tokens, newest first.
    async fn list(&self, filter: &TokenFilter) -> Result<Vec<TokenRecord>, StorageError>;
}

/// Trait for the append-only access log sink.
#[async_trait]
pub trait AccessLog: Send + Sync {
    async fn record(&self, entry: &AccessLogEntry) -> Result<(), StorageError>;
}
