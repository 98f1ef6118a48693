//! Core configuration for the authorization engine and sweeper

use std::time::Duration;

/// Tunables consumed by the decision engine, ledger, and sweeper.
///
/// All durations are plain values so the engine stays a pure function of its
/// inputs; binaries fill this from CLI args / environment.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// How long an admitted session stays valid without a re-check.
    /// Returned to the caller as `X-AuthDuration`.
    pub auth_duration: Duration,

    /// Session cap applied when a token does not carry its own
    /// `max_sessions`. 0 means unlimited.
    pub default_max_sessions: u32,

    /// Interval between expiry sweeps. Independent of `auth_duration`.
    pub sweep_interval: Duration,

    /// When false the access recorder becomes a no-op.
    pub access_log_enabled: bool,

    /// Upper bound on any single storage call made while deciding. Must sit
    /// well under the caller's own timeout (~3s for Flussonic-style servers)
    /// so a slow store turns into a fast deny instead of a caller-side
    /// failure.
    pub store_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_duration: Duration::from_secs(180),
            default_max_sessions: 1,
            sweep_interval: Duration::from_secs(60),
            access_log_enabled: true,
            store_timeout: Duration::from_secs(2),
        }
    }
}

impl AuthConfig {
    /// Auth duration in whole seconds, as sent on the wire.
    pub fn auth_duration_secs(&self) -> u64 {
        self.auth_duration.as_secs()
    }
}
