//! Request descriptor and verdicts
//!
//! The engine is a function over an immutable request descriptor; the
//! verdict carries everything the HTTP layer needs to answer the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One inbound authorization request, as forwarded by the streaming server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub token: String,
    pub client_ip: String,
    pub stream: String,
    pub protocol: String,
}

impl AuthRequest {
    pub fn new(
        token: impl Into<String>,
        client_ip: impl Into<String>,
        stream: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            client_ip: client_ip.into(),
            stream: stream.into(),
            protocol: protocol.into(),
        }
    }
}

/// Why a request was denied. The exhaustive taxonomy for the decision
/// endpoint; wire codes are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    TokenNotFound,
    TokenSuspended,
    TokenExpired,
    TokenNotYetValid,
    TokenTimeExpired,
    IpNotAllowed,
    StreamNotAllowed,
    SessionLimitExceeded,
    InternalError,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::TokenNotFound => "token_not_found",
            DenyReason::TokenSuspended => "token_suspended",
            DenyReason::TokenExpired => "token_expired",
            DenyReason::TokenNotYetValid => "token_not_yet_valid",
            DenyReason::TokenTimeExpired => "token_time_expired",
            DenyReason::IpNotAllowed => "ip_not_allowed",
            DenyReason::StreamNotAllowed => "stream_not_allowed",
            DenyReason::SessionLimitExceeded => "session_limit_exceeded",
            DenyReason::InternalError => "internal_error",
        }
    }

    /// Human-readable message for the 403 body.
    pub fn message(&self, req: &AuthRequest) -> String {
        match self {
            DenyReason::TokenNotFound => "Invalid or unknown token".to_string(),
            DenyReason::TokenSuspended => "Token has been suspended".to_string(),
            DenyReason::TokenExpired => "Token has expired".to_string(),
            DenyReason::TokenNotYetValid => "Token is not yet valid".to_string(),
            DenyReason::TokenTimeExpired => "Token validity period has ended".to_string(),
            DenyReason::IpNotAllowed => {
                format!("IP address {} is not authorized for this token", req.client_ip)
            }
            DenyReason::StreamNotAllowed => {
                format!("Stream '{}' is not authorized for this token", req.stream)
            }
            DenyReason::SessionLimitExceeded => {
                "Maximum concurrent sessions limit reached".to_string()
            }
            DenyReason::InternalError => "Authorization temporarily unavailable".to_string(),
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything the caller gets on an allowed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowance {
    pub user_id: String,
    /// Effective cap for this token, 0 = unlimited. Sent as
    /// `X-Max-Sessions`.
    pub max_sessions: u32,
    /// Lease length in seconds. Sent as `X-AuthDuration`.
    pub auth_duration_secs: u64,
    pub session_id: String,
}

/// Everything the caller gets on a denied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub reason: DenyReason,
    pub message: String,
    /// Present when the token resolved before the failing check.
    pub user_id: Option<String>,
}

/// The outcome of one authorization evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow(Allowance),
    Deny(Denial),
}

impl Verdict {
    pub fn deny(reason: DenyReason, req: &AuthRequest, user_id: Option<String>) -> Self {
        Verdict::Deny(Denial {
            reason,
            message: reason.message(req),
            user_id,
        })
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow(_))
    }

    /// Wire result tag for the access log.
    pub fn result_str(&self) -> &'static str {
        match self {
            Verdict::Allow(_) => "allowed",
            Verdict::Deny(_) => "denied",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> AuthRequest {
        AuthRequest::new("tok", "10.0.0.2", "s1", "hls")
    }

    #[test]
    fn test_reason_codes_stable() {
        assert_eq!(DenyReason::TokenNotFound.as_str(), "token_not_found");
        assert_eq!(DenyReason::SessionLimitExceeded.as_str(), "session_limit_exceeded");
        assert_eq!(DenyReason::TokenTimeExpired.as_str(), "token_time_expired");
        assert_eq!(DenyReason::InternalError.as_str(), "internal_error");
    }

    #[test]
    fn test_messages_carry_request_detail() {
        let r = req();
        assert!(DenyReason::IpNotAllowed.message(&r).contains("10.0.0.2"));
        assert!(DenyReason::StreamNotAllowed.message(&r).contains("s1"));
    }

    #[test]
    fn test_deny_constructor() {
        let r = req();
        let v = Verdict::deny(DenyReason::TokenSuspended, &r, Some("u1".to_string()));
        assert!(!v.is_allowed());
        assert_eq!(v.result_str(), "denied");
        match v {
            Verdict::Deny(d) => {
                assert_eq!(d.reason, DenyReason::TokenSuspended);
                assert_eq!(d.user_id.as_deref(), Some("u1"));
            }
            Verdict::Allow(_) => unreachable!(),
        }
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&DenyReason::IpNotAllowed).unwrap();
        assert_eq!(json, r#""ip_not_allowed""#);
    }
}
