//! Access recorder
//!
//! Every decision produces exactly one audit entry. Writes must never slow
//! down or fail the decision path, so entries go through a bounded channel
//! into a background writer; a full buffer or a failed storage write is
//! logged and dropped.

use crate::storage::AccessLog;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Immutable audit record for one authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AccessLogEntry {
    pub timestamp: DateTime<Utc>,
    pub token: String,
    pub user_id: Option<String>,
    pub stream: String,
    pub client_ip: String,
    pub protocol: String,
    /// "allowed" or "denied"
    pub result: &'static str,
    /// Denial reason code, or an allow annotation ("new_session",
    /// "session_refresh").
    pub reason: String,
}

/// Fire-and-forget audit sink.
///
/// Cloneable handle; the writer task lives as long as any handle does.
#[derive(Clone)]
pub struct AccessRecorder {
    tx: Option<mpsc::Sender<AccessLogEntry>>,
}

impl AccessRecorder {
    /// Channel capacity before entries are dropped.
    const BUFFER: usize = 1024;

    /// Spawn the writer task. Returns the recorder handle and the task
    /// handle (aborted or joined at shutdown by the owner).
    pub fn spawn(sink: Arc<dyn AccessLog>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AccessLogEntry>(Self::BUFFER);

        let task = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = sink.record(&entry).await {
                    // Swallowed: audit loss is preferable to blocking or
                    // failing the decision path.
                    warn!(error = %e, "access log write failed, entry dropped");
                }
            }
            debug!("access recorder drained");
        });

        (Self { tx: Some(tx) }, task)
    }

    /// A recorder that discards everything (access logging disabled).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Enqueue one entry. Non-blocking; drops on a full buffer.
    pub fn record(&self, entry: AccessLogEntry) {
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.try_send(entry) {
            warn!(error = %e, "access log buffer full, entry dropped");
        }
    }
}
