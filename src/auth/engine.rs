//! Decision engine
//!
//! The ordered check pipeline behind the `/auth` endpoint. Checks run in a
//! fixed order and the first failure decides the denial reason; the final
//! check is the ledger's atomic refresh-or-admit. Storage lookups are
//! bounded by a timeout and fail closed: a slow or broken store denies with
//! `internal_error` rather than granting or hanging past the caller's
//! deadline.

use crate::auth::recorder::{AccessLogEntry, AccessRecorder};
use crate::auth::request::{Allowance, AuthRequest, DenyReason, Verdict};
use crate::auth::sessions::{Admission, SessionCandidate, SessionLedger};
use crate::auth::tokens::{TokenRecord, TokenStatus, WindowCheck};
use crate::config::AuthConfig;
use crate::storage::TokenStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Evaluates authorization requests against token policy and the session
/// ledger.
pub struct AuthEngine {
    store: Arc<dyn TokenStore>,
    ledger: Arc<SessionLedger>,
    recorder: AccessRecorder,
    config: AuthConfig,
}

impl AuthEngine {
    pub fn new(
        store: Arc<dyn TokenStore>,
        ledger: Arc<SessionLedger>,
        recorder: AccessRecorder,
        config: AuthConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            recorder,
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<SessionLedger> {
        &self.ledger
    }

    /// Evaluate one request. Exactly one access-log entry is recorded per
    /// call, whatever the outcome.
    pub async fn authorize(&self, req: &AuthRequest, now: DateTime<Utc>) -> Verdict {
        let (verdict, note) = self.evaluate(req, now).await;

        self.recorder.record(AccessLogEntry {
            timestamp: now,
            token: req.token.clone(),
            user_id: match &verdict {
                Verdict::Allow(a) => Some(a.user_id.clone()),
                Verdict::Deny(d) => d.user_id.clone(),
            },
            stream: req.stream.clone(),
            client_ip: req.client_ip.clone(),
            protocol: req.protocol.clone(),
            result: verdict.result_str(),
            reason: note,
        });

        verdict
    }

    async fn evaluate(&self, req: &AuthRequest, now: DateTime<Utc>) -> (Verdict, String) {
        // 1. Token lookup, bounded. Fail closed on error or timeout.
        let lookup =
            tokio::time::timeout(self.config.store_timeout, self.store.get_by_value(&req.token))
                .await;

        let token = match lookup {
            Ok(Ok(token)) => token,
            Ok(Err(e)) => {
                warn!(error = %e, "token lookup failed, denying");
                return self.denied(DenyReason::InternalError, req, None);
            }
            Err(_) => {
                warn!(timeout = ?self.config.store_timeout, "token lookup timed out, denying");
                return self.denied(DenyReason::InternalError, req, None);
            }
        };

        let Some(token) = token else {
            return self.denied(DenyReason::TokenNotFound, req, None);
        };

        // 2. Lifecycle status.
        match token.status {
            TokenStatus::Active => {}
            TokenStatus::Suspended => {
                return self.denied(DenyReason::TokenSuspended, req, Some(&token));
            }
            TokenStatus::Expired => {
                return self.denied(DenyReason::TokenExpired, req, Some(&token));
            }
        }

        // 3. Validity window.
        match token.check_window(now) {
            WindowCheck::Inside => {}
            WindowCheck::NotYetValid => {
                return self.denied(DenyReason::TokenNotYetValid, req, Some(&token));
            }
            WindowCheck::TimeExpired => {
                return self.denied(DenyReason::TokenTimeExpired, req, Some(&token));
            }
        }

        // 4. IP whitelist.
        if !token.ip_allowed(&req.client_ip) {
            return self.denied(DenyReason::IpNotAllowed, req, Some(&token));
        }

        // 5. Stream whitelist.
        if !token.stream_allowed(&req.stream) {
            return self.denied(DenyReason::StreamNotAllowed, req, Some(&token));
        }

        // 6. Atomic session admission.
        let cap = token.effective_max_sessions(self.config.default_max_sessions);
        let candidate = SessionCandidate {
            token: token.value.clone(),
            user_id: token.user_id.clone(),
            stream: req.stream.clone(),
            client_ip: req.client_ip.clone(),
            protocol: req.protocol.clone(),
        };

        match self.ledger.admit(&candidate, cap, self.config.auth_duration, now) {
            Admission::Refreshed(session) => {
                debug!(session_id = %session.id, user_id = %token.user_id, "session refreshed");
                (self.allowed(&token, cap, session.id), "session_refresh".to_string())
            }
            Admission::Admitted(session) => {
                debug!(session_id = %session.id, user_id = %token.user_id, "session admitted");
                (self.allowed(&token, cap, session.id), "new_session".to_string())
            }
            Admission::AtCapacity { active } => {
                debug!(user_id = %token.user_id, active, cap, "session limit reached");
                self.denied(DenyReason::SessionLimitExceeded, req, Some(&token))
            }
        }
    }

    fn allowed(&self, token: &TokenRecord, cap: u32, session_id: String) -> Verdict {
        Verdict::Allow(Allowance {
            user_id: token.user_id.clone(),
            max_sessions: cap,
            auth_duration_secs: self.config.auth_duration_secs(),
            session_id,
        })
    }

    fn denied(
        &self,
        reason: DenyReason,
        req: &AuthRequest,
        token: Option<&TokenRecord>,
    ) -> (Verdict, String) {
        (
            Verdict::deny(reason, req, token.map(|t| t.user_id.clone())),
            reason.as_str().to_string(),
        )
    }
}
