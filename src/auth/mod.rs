//! Authorization core: token policy, decision engine, session ledger,
//! expiry sweeper, and the access recorder.

pub mod engine;
pub mod recorder;
pub mod request;
pub mod sessions;
pub mod sweeper;
pub mod tokens;

pub use engine::AuthEngine;
pub use recorder::{AccessLogEntry, AccessRecorder};
pub use request::{Allowance, AuthRequest, Denial, DenyReason, Verdict};
pub use sessions::{Admission, Session, SessionCandidate, SessionFilter, SessionLedger};
pub use sweeper::spawn_sweeper;
pub use tokens::{generate_token_value, ApiKey, TokenRecord, TokenStatus};
