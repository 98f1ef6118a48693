//! Token records and access policy
//!
//! A token is an opaque string a streaming client presents with every
//! request. The record behind it carries the access policy: lifecycle
//! status, validity window, IP/stream whitelists, and the concurrent
//! session cap.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenParseError {
    #[error("unknown token status: {0}")]
    UnknownStatus(String),
}

/// Explicit lifecycle flag, independent of the time-based validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Suspended,
    Expired,
}

impl TokenStatus {
    pub fn parse(s: &str) -> Result<Self, TokenParseError> {
        match s {
            "active" => Ok(TokenStatus::Active),
            "suspended" => Ok(TokenStatus::Suspended),
            "expired" => Ok(TokenStatus::Expired),
            other => Err(TokenParseError::UnknownStatus(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Suspended => "suspended",
            TokenStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored token with its access policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Storage-assigned id, used by the management surface.
    pub id: i64,
    /// The opaque token string, unique, primary lookup key.
    pub value: String,
    /// Returned to the caller as `X-UserId` on success.
    pub user_id: String,
    pub status: TokenStatus,
    /// Validity window; `None` means unbounded on that side.
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    /// Concurrent session cap. `None` = use the configured default,
    /// `Some(0)` = explicitly unlimited.
    pub max_sessions: Option<u32>,
    /// IP whitelist; empty = unrestricted.
    pub allowed_ips: Vec<String>,
    /// Stream-name whitelist; empty = unrestricted.
    pub allowed_streams: Vec<String>,
    /// Opaque key/value bag, not interpreted here.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Effective session cap given the configured default. 0 = unlimited.
    pub fn effective_max_sessions(&self, default: u32) -> u32 {
        self.max_sessions.unwrap_or(default)
    }

    /// Whether `now` falls inside the validity window.
    /// Returns the side that fails, if any.
    pub fn check_window(&self, now: DateTime<Utc>) -> WindowCheck {
        if let Some(from) = self.valid_from {
            if now < from {
                return WindowCheck::NotYetValid;
            }
        }
        if let Some(until) = self.valid_until {
            if now > until {
                return WindowCheck::TimeExpired;
            }
        }
        WindowCheck::Inside
    }

    /// Whitelist membership: empty list means unrestricted.
    pub fn ip_allowed(&self, client_ip: &str) -> bool {
        self.allowed_ips.is_empty() || self.allowed_ips.iter().any(|ip| ip == client_ip)
    }

    pub fn stream_allowed(&self, stream: &str) -> bool {
        self.allowed_streams.is_empty() || self.allowed_streams.iter().any(|s| s == stream)
    }
}

/// Outcome of a validity-window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCheck {
    Inside,
    NotYetValid,
    TimeExpired,
}

/// Generate a random token value (for `token create` without an explicit
/// value): 24 random bytes, base64url.
pub fn generate_token_value() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; 24];
    rng.fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// API key gating the management surface.
///
/// Never applied to the decision endpoint, which must stay publicly
/// reachable.
#[derive(Clone)]
pub struct ApiKey {
    key: String,
}

impl ApiKey {
    pub fn new(key: String) -> Self {
        Self { key }
    }

    pub fn matches(&self, presented: &str) -> bool {
        // Constant-time comparison to prevent timing attacks
        if presented.len() != self.key.len() {
            return false;
        }

        let mut result = 0u8;
        for (a, b) in presented.bytes().zip(self.key.bytes()) {
            result |= a ^ b;
        }
        result == 0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> TokenRecord {
        let now = Utc::now();
        TokenRecord {
            id: 1,
            value: "tok-1".to_string(),
            user_id: "user-1".to_string(),
            status: TokenStatus::Active,
            valid_from: None,
            valid_until: None,
            max_sessions: None,
            allowed_ips: Vec::new(),
            allowed_streams: Vec::new(),
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_roundtrip() {
        for s in ["active", "suspended", "expired"] {
            assert_eq!(TokenStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(TokenStatus::parse("revoked").is_err());
    }

    #[test]
    fn test_window_unbounded() {
        let rec = record();
        assert_eq!(rec.check_window(Utc::now()), WindowCheck::Inside);
    }

    #[test]
    fn test_window_bounds() {
        let now = Utc::now();
        let mut rec = record();
        rec.valid_from = Some(now + Duration::hours(1));
        assert_eq!(rec.check_window(now), WindowCheck::NotYetValid);

        rec.valid_from = None;
        rec.valid_until = Some(now - Duration::hours(1));
        assert_eq!(rec.check_window(now), WindowCheck::TimeExpired);

        rec.valid_from = Some(now - Duration::hours(2));
        rec.valid_until = Some(now + Duration::hours(2));
        assert_eq!(rec.check_window(now), WindowCheck::Inside);
    }

    #[test]
    fn test_empty_whitelists_unrestricted() {
        let rec = record();
        assert!(rec.ip_allowed("10.0.0.1"));
        assert!(rec.stream_allowed("any-stream"));
    }

    #[test]
    fn test_whitelist_membership() {
        let mut rec = record();
        rec.allowed_ips = vec!["10.0.0.1".to_string()];
        rec.allowed_streams = vec!["s1".to_string(), "s2".to_string()];

        assert!(rec.ip_allowed("10.0.0.1"));
        assert!(!rec.ip_allowed("10.0.0.2"));
        assert!(rec.stream_allowed("s2"));
        assert!(!rec.stream_allowed("s3"));
    }

    #[test]
    fn test_effective_cap() {
        let mut rec = record();
        assert_eq!(rec.effective_max_sessions(1), 1);
        rec.max_sessions = Some(5);
        assert_eq!(rec.effective_max_sessions(1), 5);
        rec.max_sessions = Some(0); // explicit unlimited
        assert_eq!(rec.effective_max_sessions(1), 0);
    }

    #[test]
    fn test_generated_values_unique() {
        let a = generate_token_value();
        let b = generate_token_value();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32); // 24 bytes base64url, no padding
    }

    #[test]
    fn test_api_key() {
        let key = ApiKey::new("management-secret".to_string());
        assert!(key.matches("management-secret"));
        assert!(!key.matches("wrong"));
        assert!(!key.matches("management-secret-extra"));
    }
}
