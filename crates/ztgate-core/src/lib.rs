//! ztgate protocol logic.
//!
//! Components are built around two injected seams: a [`Store`] for state and
//! an [`AuditLog`] for the decision trail. Every authentication decision —
//! positive or negative — is audited; external callers get coarse outcomes
//! (granted / denied) while the audit trail carries the precise reason.
//!
//! [`Store`]: ztgate_storage::Store
//! [`AuditLog`]: ztgate_audit::AuditLog

pub mod admin;
pub mod gate;
pub mod invites;
pub mod leaks;
pub mod sessions;

pub use admin::{
    AdminChallengeAuth, AdminDenyReason, AuthOutcome, Challenge, ChallengeStore,
    MemoryChallengeStore, OperatorSession,
};
pub use gate::{Access, ZeroTrustGate};
pub use invites::{DeliveryTokens, InviteError, InviteRegistry, InviteVerification, TokenRedemption};
pub use leaks::{Canary, LeakTracker};
pub use sessions::{EstablishOutcome, SessionManager};

use ztgate_audit::{AuditEvent, AuditLog};

/// Client connection attributes as observed by the caller's edge.
#[derive(Clone, Debug)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// Why an invite or session request was denied.
///
/// Callers surface this coarsely; the audit trail holds the detail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    SignatureInvalid,
    InviteNotFound,
    InviteInactive,
    InviteExpired,
    InviteNotUsed,
    IpMismatch,
    SessionNotFound,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenyReason::SignatureInvalid => "signature invalid",
            DenyReason::InviteNotFound => "invite not found",
            DenyReason::InviteInactive => "invite inactive",
            DenyReason::InviteExpired => "invite expired",
            DenyReason::InviteNotUsed => "invite not used",
            DenyReason::IpMismatch => "ip mismatch",
            DenyReason::SessionNotFound => "session not found",
        };
        write!(f, "{}", s)
    }
}

/// Record an audit event without letting a logging failure fail the
/// operation being audited.
pub(crate) async fn record(audit: &dyn AuditLog, event: AuditEvent) {
    let event_type = event.event_type;
    if let Err(e) = audit.record(event).await {
        tracing::warn!(%event_type, error = %e, "failed to record audit event");
    }
}

/// First 16 chars, for log lines that must not carry full secrets.
///
/// Char-boundary safe: presented values are attacker-controlled and not
/// guaranteed to be hex.
pub(crate) fn prefix(s: &str) -> &str {
    match s.char_indices().nth(16) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
