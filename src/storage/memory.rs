//! In-memory storage backend
//!
//! Backs tests and storage-less (`--memory`) runs. Implements the same
//! traits as the Postgres store; also carries small fault-injection knobs
//! so engine tests can exercise the fail-closed paths.

use crate::auth::recorder::AccessLogEntry;
use crate::auth::tokens::{TokenRecord, TokenStatus};
use crate::storage::{
    AccessLog, NewToken, StorageError, TokenFilter, TokenPatch, TokenStore,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

/// Map-backed token store and access log.
#[derive(Default)]
pub struct MemoryStore {
    tokens: DashMap<i64, TokenRecord>,
    /// token value -> id
    by_value: DashMap<String, i64>,
    log: Mutex<Vec<AccessLogEntry>>,
    next_id: AtomicI64,
    fail_reads: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    /// Make every read fail with a database error (fail-closed testing).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delay every read (slow-store testing).
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = Some(delay);
    }

    /// Recorded access-log entries, oldest first.
    pub fn access_entries(&self) -> Vec<AccessLogEntry> {
        self.log.lock().clone()
    }

    async fn read_gate(&self) -> Result<(), StorageError> {
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Database("injected read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn get_by_value(&self, value: &str) -> Result<Option<TokenRecord>, StorageError> {
        self.read_gate().await?;
        Ok(self
            .by_value
            .get(value)
            .and_then(|id| self.tokens.get(&id).map(|t| t.clone())))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<TokenRecord>, StorageError> {
        self.read_gate().await?;
        Ok(self.tokens.get(&id).map(|t| t.clone()))
    }

    async fn create(&self, new: NewToken) -> Result<TokenRecord, StorageError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let record = TokenRecord {
            id,
            value: new.value,
            user_id: new.user_id,
            status: new.status,
            valid_from: new.valid_from,
            valid_until: new.valid_until,
            max_sessions: new.max_sessions,
            allowed_ips: new.allowed_ips,
            allowed_streams: new.allowed_streams,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };

        // entry() holds the shard guard, making value-uniqueness atomic.
        match self.by_value.entry(record.value.clone()) {
            Entry::Occupied(_) => Err(StorageError::Conflict(format!(
                "token value already exists: {}",
                record.value
            ))),
            Entry::Vacant(slot) => {
                slot.insert(id);
                self.tokens.insert(id, record.clone());
                Ok(record)
            }
        }
    }

    async fn update(
        &self,
        id: i64,
        patch: TokenPatch,
    ) -> Result<Option<TokenRecord>, StorageError> {
        let Some(mut record) = self.tokens.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(max_sessions) = patch.max_sessions {
            record.max_sessions = max_sessions;
        }
        if let Some(valid_until) = patch.valid_until {
            record.valid_until = valid_until;
        }
        if let Some(ips) = patch.allowed_ips {
            record.allowed_ips = ips;
        }
        if let Some(streams) = patch.allowed_streams {
            record.allowed_streams = streams;
        }
        if let Some(metadata) = patch.metadata {
            record.metadata = metadata;
        }
        record.updated_at = Utc::now();

        Ok(Some(record.clone()))
    }

    async fn delete(&self, id: i64) -> Result<bool, StorageError> {
        if let Some((_, record)) = self.tokens.remove(&id) {
            self.by_value.remove(&record.value);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn list(&self, filter: &TokenFilter) -> Result<Vec<TokenRecord>, StorageError> {
        let mut records: Vec<TokenRecord> = self
            .tokens
            .iter()
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .map(|t| t.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let skip = filter.skip.max(0) as usize;
        let limit = filter.limit.clamp(1, 1000) as usize;
        Ok(records.into_iter().skip(skip).take(limit).collect())
    }
}

#[async_trait]
impl AccessLog for MemoryStore {
    async fn record(&self, entry: &AccessLogEntry) -> Result<(), StorageError> {
        self.log.lock().push(entry.clone());
        Ok(())
    }
}
