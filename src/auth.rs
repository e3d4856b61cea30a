//! Login decisions and the credential audit trail.
//!
//! The gate is deliberately permissive: any attempt for `root` succeeds whatever
//! the credential, so that attackers reach the fake shell. Every attempt is
//! recorded with the raw credential the client sent.

use std::{fmt, net::SocketAddr, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// The only account the gate lets in.
pub const HONEYPOT_USER: &str = "root";

/// Method name used by clients probing which methods the server supports.
pub const NONE_METHOD: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted,
    Rejected,
}

impl AuthOutcome {
    pub fn is_accepted(self) -> bool {
        matches!(self, AuthOutcome::Accepted)
    }
}

impl fmt::Display for AuthOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthOutcome::Accepted => f.write_str("accepted"),
            AuthOutcome::Rejected => f.write_str("rejected"),
        }
    }
}

/// One authentication attempt, exactly as the client presented it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub peer: Option<SocketAddr>,
    pub username: String,
    /// Password for password logins, otherwise a method-specific description.
    pub credential: String,
    pub method: &'static str,
    pub outcome: AuthOutcome,
    pub at: DateTime<Utc>,
}

/// Append-only destination for audit records.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

/// Writes audit records into the tracing stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        let peer = display_addr(record.peer);
        match record.outcome {
            AuthOutcome::Accepted => info!(
                peer = %peer,
                user = %record.username,
                method = record.method,
                credential = %record.credential,
                at = %record.at.to_rfc3339(),
                "login successful"
            ),
            AuthOutcome::Rejected => warn!(
                peer = %peer,
                user = %record.username,
                method = record.method,
                credential = %record.credential,
                at = %record.at.to_rfc3339(),
                "login rejected"
            ),
        }
    }
}

/// Decides every login attempt and keeps the audit trail.
#[derive(Clone)]
pub struct AuthGate {
    sink: Arc<dyn AuditSink>,
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

impl AuthGate {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Password decision: accepts `root` regardless of `password`.
    pub fn authenticate(&self, peer: Option<SocketAddr>, username: &str, password: &str) -> bool {
        let outcome = if username == HONEYPOT_USER {
            AuthOutcome::Accepted
        } else {
            AuthOutcome::Rejected
        };
        self.sink.record(&AuditRecord {
            peer,
            username: username.to_string(),
            credential: password.to_string(),
            method: "password",
            outcome,
            at: Utc::now(),
        });
        outcome.is_accepted()
    }

    /// Record an attempt with a method the gate never accepts (public key and friends).
    pub fn reject_method(&self, peer: Option<SocketAddr>, username: &str, method: &'static str, credential: String) {
        self.sink.record(&AuditRecord {
            peer,
            username: username.to_string(),
            credential,
            method,
            outcome: AuthOutcome::Rejected,
            at: Utc::now(),
        });
    }
}

/// Transport-level hook run after every method attempt.
///
/// Silent for the `none` probe and for successful attempts, which the gate has
/// already recorded. Returns whether a line was written.
pub fn log_auth_outcome(peer: Option<SocketAddr>, method: &str, err: Option<&str>) -> bool {
    let Some(err) = err else {
        return false;
    };
    if method == NONE_METHOD {
        return false;
    }
    warn!(peer = %display_addr(peer), method, error = err, "authentication method failed");
    true
}

/// Display helper used for tracing; keeps logging concise when the socket address is unavailable.
pub fn display_addr(addr: Option<SocketAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_else(|| "<unknown>".into())
}
