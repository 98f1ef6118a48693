//! Session ledger
//!
//! Tracks every currently admitted session, keyed by owning token. The one
//! hard requirement here is that "count live sessions, then admit" is a
//! single indivisible step per token: two racing requests for a token with
//! one free slot must never both get in. The ledger leans on the sharded
//! map's exclusive entry access for that - all mutation for a token happens
//! under its entry guard, so admissions for the same token serialize while
//! distinct tokens proceed on independent shards.
//!
//! Sessions expire by lease: a repeat request extends `expires_at`, the
//! sweeper removes whatever lapsed. Expired entries are also pruned lazily
//! on admission so a freed slot is reusable immediately, not only after the
//! next sweep tick.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// One admitted, currently-live authorization grant.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub token: String,
    pub user_id: String,
    pub stream: String,
    pub client_ip: String,
    pub protocol: String,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Derive the session id for a request tuple.
///
/// Deterministic, so the same client re-checking the same stream maps onto
/// its existing session (a refresh, not a second slot). Fields are
/// length-framed before hashing so adjacent fields cannot collide by
/// concatenation.
pub fn session_id(token: &str, client_ip: &str, stream: &str, protocol: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [token, client_ip, stream, protocol] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Identity of a session candidate, before admission.
#[derive(Debug, Clone)]
pub struct SessionCandidate {
    pub token: String,
    pub user_id: String,
    pub stream: String,
    pub client_ip: String,
    pub protocol: String,
}

impl SessionCandidate {
    pub fn id(&self) -> String {
        session_id(&self.token, &self.client_ip, &self.stream, &self.protocol)
    }
}

/// Outcome of the compound refresh-or-admit operation.
#[derive(Debug, Clone)]
pub enum Admission {
    /// An existing live session matched; its lease was extended.
    Refreshed(Session),
    /// A new session was admitted under the cap.
    Admitted(Session),
    /// The token is at capacity; nothing was changed.
    AtCapacity { active: usize },
}

/// Filter for `list_live`.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub user_id: Option<String>,
    pub token: Option<String>,
}

/// In-memory ledger of live sessions, one entry per token value.
#[derive(Default)]
pub struct SessionLedger {
    tokens: DashMap<String, Vec<Session>>,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
        }
    }

    /// The compound operation: refresh a matching live session, or admit a
    /// new one if the live count is below `cap`, or report at-capacity.
    ///
    /// `cap` of 0 means unlimited. Runs entirely under the token's entry
    /// guard; there is no await point and no separate count-then-insert.
    pub fn admit(
        &self,
        candidate: &SessionCandidate,
        cap: u32,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Admission {
        let id = candidate.id();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());

        let mut entry = self.tokens.entry(candidate.token.clone()).or_default();

        // Expired slots free capacity immediately, not on the next sweep.
        entry.retain(|s| s.is_live(now));

        if let Some(existing) = entry.iter_mut().find(|s| s.id == id) {
            existing.last_seen_at = now;
            existing.expires_at = expires_at;
            return Admission::Refreshed(existing.clone());
        }

        if cap != 0 && entry.len() >= cap as usize {
            return Admission::AtCapacity { active: entry.len() };
        }

        let session = Session {
            id,
            token: candidate.token.clone(),
            user_id: candidate.user_id.clone(),
            stream: candidate.stream.clone(),
            client_ip: candidate.client_ip.clone(),
            protocol: candidate.protocol.clone(),
            started_at: now,
            last_seen_at: now,
            expires_at,
        };
        entry.push(session.clone());
        Admission::Admitted(session)
    }

    /// Drop a session by id. Idempotent: releasing an unknown or already
    /// expired session is a no-op. Returns whether anything was removed.
    pub fn release(&self, session_id: &str) -> bool {
        let mut removed = false;
        for mut entry in self.tokens.iter_mut() {
            let before = entry.len();
            entry.retain(|s| s.id != session_id);
            if entry.len() != before {
                removed = true;
                break;
            }
        }
        removed
    }

    /// Count sessions for a token that are still inside their lease.
    pub fn count_live(&self, token: &str, now: DateTime<Utc>) -> usize {
        self.tokens
            .get(token)
            .map(|e| e.iter().filter(|s| s.is_live(now)).count())
            .unwrap_or(0)
    }

    /// Snapshot live sessions for the management surface.
    pub fn list_live(&self, filter: &SessionFilter, now: DateTime<Utc>) -> Vec<Session> {
        let mut out: Vec<Session> = self
            .tokens
            .iter()
            .flat_map(|entry| {
                entry
                    .iter()
                    .filter(|s| s.is_live(now))
                    .filter(|s| {
                        filter
                            .user_id
                            .as_deref()
                            .is_none_or(|u| s.user_id == u)
                    })
                    .filter(|s| filter.token.as_deref().is_none_or(|t| s.token == t))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out
    }

    /// Find one live session by id.
    pub fn get(&self, session_id: &str, now: DateTime<Utc>) -> Option<Session> {
        self.tokens.iter().find_map(|entry| {
            entry
                .iter()
                .find(|s| s.id == session_id && s.is_live(now))
                .cloned()
        })
    }

    /// Remove every session whose lease has elapsed. Returns the number
    /// removed. Empty per-token entries are dropped with them.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.tokens.retain(|_, sessions| {
            let before = sessions.len();
            sessions.retain(|s| s.is_live(now));
            removed += before - sessions.len();
            !sessions.is_empty()
        });
        removed
    }

    /// Number of token entries currently tracked, including ones whose
    /// sessions have all expired but not yet been swept.
    pub fn tracked_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Total live sessions across all tokens.
    pub fn len_live(&self, now: DateTime<Utc>) -> usize {
        self.tokens
            .iter()
            .map(|e| e.iter().filter(|s| s.is_live(now)).count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(180);

    fn candidate(token: &str, ip: &str, stream: &str) -> SessionCandidate {
        SessionCandidate {
            token: token.to_string(),
            user_id: format!("user-{token}"),
            stream: stream.to_string(),
            client_ip: ip.to_string(),
            protocol: "hls".to_string(),
        }
    }

    #[test]
    fn test_session_id_deterministic() {
        let a = session_id("tok", "10.0.0.1", "s1", "hls");
        let b = session_id("tok", "10.0.0.1", "s1", "hls");
        assert_eq!(a, b);
        assert_ne!(a, session_id("tok", "10.0.0.1", "s1", "rtmp"));
        assert_ne!(a, session_id("tok", "10.0.0.1", "s2", "hls"));
    }

    #[test]
    fn test_session_id_field_boundaries() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = session_id("ab", "c", "s", "p");
        let b = session_id("a", "bc", "s", "p");
        assert_ne!(a, b);
    }

    #[test]
    fn test_admit_then_refresh_keeps_count() {
        let ledger = SessionLedger::new();
        let now = Utc::now();
        let cand = candidate("tok", "10.0.0.1", "s1");

        assert!(matches!(ledger.admit(&cand, 2, TTL, now), Admission::Admitted(_)));
        assert_eq!(ledger.count_live("tok", now), 1);

        let later = now + chrono::Duration::seconds(30);
        match ledger.admit(&cand, 2, TTL, later) {
            Admission::Refreshed(s) => {
                assert_eq!(s.started_at, now); // preserved
                assert_eq!(s.last_seen_at, later);
                assert_eq!(s.expires_at, later + chrono::Duration::seconds(180));
            }
            other => panic!("expected refresh, got {other:?}"),
        }
        assert_eq!(ledger.count_live("tok", later), 1);
    }

    #[test]
    fn test_cap_enforced() {
        let ledger = SessionLedger::new();
        let now = Utc::now();

        assert!(matches!(
            ledger.admit(&candidate("tok", "10.0.0.1", "s1"), 2, TTL, now),
            Admission::Admitted(_)
        ));
        assert!(matches!(
            ledger.admit(&candidate("tok", "10.0.0.1", "s2"), 2, TTL, now),
            Admission::Admitted(_)
        ));
        match ledger.admit(&candidate("tok", "10.0.0.1", "s3"), 2, TTL, now) {
            Admission::AtCapacity { active } => assert_eq!(active, 2),
            other => panic!("expected at-capacity, got {other:?}"),
        }
    }

    #[test]
    fn test_cap_zero_unlimited() {
        let ledger = SessionLedger::new();
        let now = Utc::now();
        for i in 0..50 {
            let cand = candidate("tok", "10.0.0.1", &format!("s{i}"));
            assert!(matches!(ledger.admit(&cand, 0, TTL, now), Admission::Admitted(_)));
        }
        assert_eq!(ledger.count_live("tok", now), 50);
    }

    #[test]
    fn test_expired_slot_freed_on_admit() {
        let ledger = SessionLedger::new();
        let now = Utc::now();

        ledger.admit(&candidate("tok", "10.0.0.1", "s1"), 1, TTL, now);

        // Past the lease, a different stream takes the only slot.
        let later = now + chrono::Duration::seconds(181);
        assert!(matches!(
            ledger.admit(&candidate("tok", "10.0.0.1", "s2"), 1, TTL, later),
            Admission::Admitted(_)
        ));
        assert_eq!(ledger.count_live("tok", later), 1);
    }

    #[test]
    fn test_release_idempotent() {
        let ledger = SessionLedger::new();
        let now = Utc::now();
        let cand = candidate("tok", "10.0.0.1", "s1");
        let id = cand.id();

        ledger.admit(&cand, 1, TTL, now);
        assert!(ledger.release(&id));
        assert!(!ledger.release(&id));
        assert!(!ledger.release("no-such-session"));
        assert_eq!(ledger.count_live("tok", now), 0);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let ledger = SessionLedger::new();
        let now = Utc::now();

        ledger.admit(&candidate("a", "10.0.0.1", "s1"), 0, Duration::from_secs(10), now);
        ledger.admit(&candidate("b", "10.0.0.1", "s1"), 0, Duration::from_secs(300), now);

        let later = now + chrono::Duration::seconds(60);
        assert_eq!(ledger.sweep_expired(later), 1);
        assert_eq!(ledger.count_live("a", later), 0);
        assert_eq!(ledger.count_live("b", later), 1);

        // Second sweep finds nothing
        assert_eq!(ledger.sweep_expired(later), 0);
    }

    #[test]
    fn test_list_live_filters() {
        let ledger = SessionLedger::new();
        let now = Utc::now();

        ledger.admit(&candidate("a", "10.0.0.1", "s1"), 0, TTL, now);
        ledger.admit(&candidate("a", "10.0.0.1", "s2"), 0, TTL, now);
        ledger.admit(&candidate("b", "10.0.0.2", "s1"), 0, TTL, now);

        assert_eq!(ledger.list_live(&SessionFilter::default(), now).len(), 3);

        let by_user = SessionFilter {
            user_id: Some("user-a".to_string()),
            ..Default::default()
        };
        assert_eq!(ledger.list_live(&by_user, now).len(), 2);

        let by_token = SessionFilter {
            token: Some("b".to_string()),
            ..Default::default()
        };
        let listed = ledger.list_live(&by_token, now);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].client_ip, "10.0.0.2");
    }

    #[test]
    fn test_get_by_id() {
        let ledger = SessionLedger::new();
        let now = Utc::now();
        let cand = candidate("tok", "10.0.0.1", "s1");
        ledger.admit(&cand, 1, TTL, now);

        assert!(ledger.get(&cand.id(), now).is_some());
        assert!(ledger.get(&cand.id(), now + chrono::Duration::seconds(200)).is_none());
        assert!(ledger.get("missing", now).is_none());
    }
}
