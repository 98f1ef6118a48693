//! Integration tests for the authorization pipeline
//!
//! Drives the decision engine end-to-end over the in-memory store: check
//! ordering, whitelists, session caps, refresh semantics, sweep behavior,
//! and access-log accounting.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use streamgate::auth::{
    AccessRecorder, AuthEngine, AuthRequest, DenyReason, SessionLedger, TokenStatus, Verdict,
};
use streamgate::config::AuthConfig;
use streamgate::storage::{MemoryStore, NewToken, TokenStore};

fn token(value: &str, user_id: &str) -> NewToken {
    NewToken {
        value: value.to_string(),
        user_id: user_id.to_string(),
        status: TokenStatus::Active,
        max_sessions: None,
        valid_from: None,
        valid_until: None,
        allowed_ips: Vec::new(),
        allowed_streams: Vec::new(),
        metadata: serde_json::json!({}),
    }
}

async fn engine_with(tokens: Vec<NewToken>) -> (Arc<AuthEngine>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    for t in tokens {
        store.create(t).await.unwrap();
    }
    let engine = AuthEngine::new(
        store.clone(),
        Arc::new(SessionLedger::new()),
        AccessRecorder::disabled(),
        AuthConfig::default(),
    );
    (Arc::new(engine), store)
}

fn reason_of(verdict: &Verdict) -> Option<DenyReason> {
    match verdict {
        Verdict::Allow(_) => None,
        Verdict::Deny(d) => Some(d.reason),
    }
}

#[tokio::test]
async fn test_whitelisted_token_full_scenario() {
    // Token T1: cap 2, single allowed IP.
    let mut t1 = token("T1", "alice");
    t1.max_sessions = Some(2);
    t1.allowed_ips = vec!["10.0.0.1".to_string()];
    let (engine, _) = engine_with(vec![t1]).await;
    let now = Utc::now();

    // Wrong IP is rejected outright.
    let v = engine
        .authorize(&AuthRequest::new("T1", "10.0.0.2", "s1", "hls"), now)
        .await;
    assert_eq!(reason_of(&v), Some(DenyReason::IpNotAllowed));

    // First stream takes slot one.
    let v = engine
        .authorize(&AuthRequest::new("T1", "10.0.0.1", "s1", "hls"), now)
        .await;
    assert!(v.is_allowed());
    assert_eq!(engine.ledger().count_live("T1", now), 1);

    // Identical request is a refresh, not a second slot.
    let v = engine
        .authorize(&AuthRequest::new("T1", "10.0.0.1", "s1", "hls"), now)
        .await;
    assert!(v.is_allowed());
    assert_eq!(engine.ledger().count_live("T1", now), 1);

    // Second stream takes slot two.
    let v = engine
        .authorize(&AuthRequest::new("T1", "10.0.0.1", "s2", "hls"), now)
        .await;
    assert!(v.is_allowed());
    assert_eq!(engine.ledger().count_live("T1", now), 2);

    // Third stream is over the cap.
    let v = engine
        .authorize(&AuthRequest::new("T1", "10.0.0.1", "s3", "hls"), now)
        .await;
    assert_eq!(reason_of(&v), Some(DenyReason::SessionLimitExceeded));
    assert_eq!(engine.ledger().count_live("T1", now), 2);
}

#[tokio::test]
async fn test_past_validity_denies_everything() {
    // Token T2: valid_until in the past wins over every other field.
    let mut t2 = token("T2", "bob");
    t2.valid_until = Some(Utc::now() - ChronoDuration::hours(1));
    t2.max_sessions = Some(100);
    t2.allowed_ips = vec!["10.0.0.1".to_string()];
    let (engine, _) = engine_with(vec![t2]).await;

    for (ip, stream) in [("10.0.0.1", "s1"), ("10.0.0.9", "s2"), ("10.0.0.1", "s3")] {
        let v = engine
            .authorize(&AuthRequest::new("T2", ip, stream, "hls"), Utc::now())
            .await;
        assert_eq!(reason_of(&v), Some(DenyReason::TokenTimeExpired));
    }
}

#[tokio::test]
async fn test_check_order_status_before_whitelist() {
    let mut t = token("T3", "carol");
    t.status = TokenStatus::Suspended;
    t.allowed_ips = vec!["10.0.0.1".to_string()];
    let (engine, _) = engine_with(vec![t]).await;

    // Both the status and the IP whitelist fail; the status check is
    // earlier in the pipeline and must decide the reason.
    let v = engine
        .authorize(&AuthRequest::new("T3", "10.0.0.99", "s1", "hls"), Utc::now())
        .await;
    assert_eq!(reason_of(&v), Some(DenyReason::TokenSuspended));
}

#[tokio::test]
async fn test_protocol_distinguishes_sessions() {
    let mut t = token("T4", "dave");
    t.max_sessions = Some(2);
    let (engine, _) = engine_with(vec![t]).await;
    let now = Utc::now();

    // Same stream over two protocols = two distinct sessions.
    assert!(engine
        .authorize(&AuthRequest::new("T4", "10.0.0.1", "s1", "hls"), now)
        .await
        .is_allowed());
    assert!(engine
        .authorize(&AuthRequest::new("T4", "10.0.0.1", "s1", "rtmp"), now)
        .await
        .is_allowed());
    assert_eq!(engine.ledger().count_live("T4", now), 2);

    let v = engine
        .authorize(&AuthRequest::new("T4", "10.0.0.1", "s1", "dash"), now)
        .await;
    assert_eq!(reason_of(&v), Some(DenyReason::SessionLimitExceeded));
}

#[tokio::test]
async fn test_swept_slot_becomes_available() {
    let mut t = token("T5", "erin");
    t.max_sessions = Some(1);
    let store = Arc::new(MemoryStore::new());
    store.create(t).await.unwrap();

    // Short lease so the session expires quickly.
    let config = AuthConfig {
        auth_duration: Duration::from_millis(20),
        ..AuthConfig::default()
    };
    let ledger = Arc::new(SessionLedger::new());
    let engine = AuthEngine::new(
        store,
        ledger.clone(),
        AccessRecorder::disabled(),
        config,
    );

    let now = Utc::now();
    assert!(engine
        .authorize(&AuthRequest::new("T5", "10.0.0.1", "s1", "hls"), now)
        .await
        .is_allowed());

    // Lease elapsed: a sweep removes the session and frees the slot.
    let later = now + ChronoDuration::milliseconds(50);
    assert_eq!(ledger.sweep_expired(later), 1);
    assert_eq!(ledger.count_live("T5", later), 0);

    assert!(engine
        .authorize(&AuthRequest::new("T5", "10.0.0.1", "s2", "hls"), later)
        .await
        .is_allowed());
    assert_eq!(ledger.count_live("T5", later), 1);
}

#[tokio::test]
async fn test_terminate_then_sweep_is_harmless() {
    let (engine, _) = engine_with(vec![token("T6", "fred")]).await;
    let now = Utc::now();

    let v = engine
        .authorize(&AuthRequest::new("T6", "10.0.0.1", "s1", "hls"), now)
        .await;
    let session_id = match v {
        Verdict::Allow(a) => a.session_id,
        Verdict::Deny(d) => panic!("denied: {:?}", d.reason),
    };

    // Explicit terminate, then a sweep, then another terminate: the later
    // two must be no-ops.
    assert!(engine.ledger().release(&session_id));
    assert_eq!(engine.ledger().sweep_expired(now + ChronoDuration::hours(1)), 0);
    assert!(!engine.ledger().release(&session_id));
}

#[tokio::test]
async fn test_every_decision_writes_one_log_entry() {
    let store = Arc::new(MemoryStore::new());
    let mut t = token("T7", "gail");
    t.max_sessions = Some(1);
    store.create(t).await.unwrap();

    let (recorder, task) = AccessRecorder::spawn(store.clone());
    let engine = AuthEngine::new(
        store.clone(),
        Arc::new(SessionLedger::new()),
        recorder,
        AuthConfig::default(),
    );

    let now = Utc::now();
    // allow (new), allow (refresh), deny (cap), deny (unknown token)
    engine.authorize(&AuthRequest::new("T7", "10.0.0.1", "s1", "hls"), now).await;
    engine.authorize(&AuthRequest::new("T7", "10.0.0.1", "s1", "hls"), now).await;
    engine.authorize(&AuthRequest::new("T7", "10.0.0.1", "s2", "hls"), now).await;
    engine.authorize(&AuthRequest::new("nope", "10.0.0.1", "s1", "hls"), now).await;

    // Dropping the engine closes the recorder channel; the writer drains.
    drop(engine);
    task.await.unwrap();

    let entries = store.access_entries();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0].result, "allowed");
    assert_eq!(entries[0].reason, "new_session");
    assert_eq!(entries[1].reason, "session_refresh");
    assert_eq!(entries[2].result, "denied");
    assert_eq!(entries[2].reason, "session_limit_exceeded");
    assert_eq!(entries[3].reason, "token_not_found");
    assert!(entries[3].user_id.is_none());
    assert_eq!(entries[0].user_id.as_deref(), Some("gail"));
}

#[tokio::test]
async fn test_stream_whitelist_reason() {
    let mut t = token("T8", "hank");
    t.allowed_streams = vec!["allowed-stream".to_string()];
    let (engine, _) = engine_with(vec![t]).await;

    let v = engine
        .authorize(&AuthRequest::new("T8", "10.0.0.1", "other", "hls"), Utc::now())
        .await;
    assert_eq!(reason_of(&v), Some(DenyReason::StreamNotAllowed));

    let v = engine
        .authorize(
            &AuthRequest::new("T8", "10.0.0.1", "allowed-stream", "hls"),
            Utc::now(),
        )
        .await;
    assert!(v.is_allowed());
}

#[tokio::test]
async fn test_deny_reports_user_once_token_resolved() {
    let mut t = token("T9", "iris");
    t.status = TokenStatus::Expired;
    let (engine, _) = engine_with(vec![t]).await;

    let v = engine
        .authorize(&AuthRequest::new("T9", "10.0.0.1", "s1", "hls"), Utc::now())
        .await;
    match v {
        Verdict::Deny(d) => {
            assert_eq!(d.reason, DenyReason::TokenExpired);
            assert_eq!(d.user_id.as_deref(), Some("iris"));
        }
        Verdict::Allow(_) => panic!("expired token allowed"),
    }
}
