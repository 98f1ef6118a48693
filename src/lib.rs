//! Streamgate - token authorization backend for media streaming servers
//!
//! Sits behind a streaming server's auth callback: every playback request is
//! forwarded here as (token, client IP, stream, protocol) and answered with an
//! allow/deny verdict plus per-decision limits. Tokens live in durable
//! storage; live sessions are tracked in an in-memory ledger with per-token
//! admission caps enforced atomically.

pub mod auth;
pub mod config;
pub mod server;
pub mod storage;

pub use auth::{AccessRecorder, AuthEngine, AuthRequest, DenyReason, SessionLedger, Verdict};
pub use config::AuthConfig;
pub use server::GateServer;
