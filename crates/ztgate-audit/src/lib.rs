//! Audit logging abstraction for ztgate.
//!
//! This crate defines the `AuditLog` trait for persisting audit events and
//! the exhaustive taxonomy of security decisions the system records. Every
//! authentication decision, positive or negative, maps to exactly one event.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for an audit log entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditLogId(pub Uuid);

impl AuditLogId {
    /// Generate a new audit log ID using UUID v7 (time-ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AuditLogId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditLogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AuditLogId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The auditable security decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Invite lifecycle
    InviteGenerated,
    InviteVerified,
    InviteNotFound,
    InviteExpired,
    InviteInactive,
    InviteNotUsed,
    SignatureVerificationFailed,
    InviteMarkedUsed,
    InviteAlreadyUsed,

    // Sessions
    SessionCreated,
    SessionResumed,
    SessionNotFound,

    // IP bindings
    IpBindingCreated,
    IpMismatch,
    IpMismatchSession,

    // Operator auth
    AdminChallengeIssued,
    AdminAuthSuccess,
    AdminAuthFailed,

    // Leak tracking
    LeakTrackRecorded,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditEventType::InviteGenerated => "invite_generated",
            AuditEventType::InviteVerified => "invite_verified",
            AuditEventType::InviteNotFound => "invite_not_found",
            AuditEventType::InviteExpired => "invite_expired",
            AuditEventType::InviteInactive => "invite_inactive",
            AuditEventType::InviteNotUsed => "invite_not_used",
            AuditEventType::SignatureVerificationFailed => "signature_verification_failed",
            AuditEventType::InviteMarkedUsed => "invite_marked_used",
            AuditEventType::InviteAlreadyUsed => "invite_already_used",
            AuditEventType::SessionCreated => "session_created",
            AuditEventType::SessionResumed => "session_resumed",
            AuditEventType::SessionNotFound => "session_not_found",
            AuditEventType::IpBindingCreated => "ip_binding_created",
            AuditEventType::IpMismatch => "ip_mismatch",
            AuditEventType::IpMismatchSession => "ip_mismatch_session",
            AuditEventType::AdminChallengeIssued => "admin_challenge_issued",
            AuditEventType::AdminAuthSuccess => "admin_auth_success",
            AuditEventType::AdminAuthFailed => "admin_auth_failed",
            AuditEventType::LeakTrackRecorded => "leak_track_recorded",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invite_generated" => Ok(AuditEventType::InviteGenerated),
            "invite_verified" => Ok(AuditEventType::InviteVerified),
            "invite_not_found" => Ok(AuditEventType::InviteNotFound),
            "invite_expired" => Ok(AuditEventType::InviteExpired),
            "invite_inactive" => Ok(AuditEventType::InviteInactive),
            "invite_not_used" => Ok(AuditEventType::InviteNotUsed),
            "signature_verification_failed" => Ok(AuditEventType::SignatureVerificationFailed),
            "invite_marked_used" => Ok(AuditEventType::InviteMarkedUsed),
            "invite_already_used" => Ok(AuditEventType::InviteAlreadyUsed),
            "session_created" => Ok(AuditEventType::SessionCreated),
            "session_resumed" => Ok(AuditEventType::SessionResumed),
            "session_not_found" => Ok(AuditEventType::SessionNotFound),
            "ip_binding_created" => Ok(AuditEventType::IpBindingCreated),
            "ip_mismatch" => Ok(AuditEventType::IpMismatch),
            "ip_mismatch_session" => Ok(AuditEventType::IpMismatchSession),
            "admin_challenge_issued" => Ok(AuditEventType::AdminChallengeIssued),
            "admin_auth_success" => Ok(AuditEventType::AdminAuthSuccess),
            "admin_auth_failed" => Ok(AuditEventType::AdminAuthFailed),
            "leak_track_recorded" => Ok(AuditEventType::LeakTrackRecorded),
            _ => Err(format!("Unknown audit event type: {}", s)),
        }
    }
}

/// An audit log entry.
///
/// `details` is a bounded string-to-string map rather than open JSON, so every
/// recorded key is deterministic and queryable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique identifier for this audit entry
    pub id: AuditLogId,
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
    /// The decision
    pub event_type: AuditEventType,
    /// Invite context (if applicable)
    pub invite_hash: Option<String>,
    /// Session context (if applicable)
    pub session_fingerprint: Option<String>,
    /// Client IP address (if available)
    pub ip_address: Option<String>,
    /// Client user agent (if available)
    pub user_agent: Option<String>,
    /// Additional key/value context (e.g., bound_ip vs request_ip on a mismatch)
    pub details: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Create a new audit event builder
    pub fn builder(event_type: AuditEventType) -> AuditEventBuilder {
        AuditEventBuilder::new(event_type)
    }
}

/// Builder for constructing audit events
pub struct AuditEventBuilder {
    event_type: AuditEventType,
    invite_hash: Option<String>,
    session_fingerprint: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    details: BTreeMap<String, String>,
}

impl AuditEventBuilder {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            invite_hash: None,
            session_fingerprint: None,
            ip_address: None,
            user_agent: None,
            details: BTreeMap::new(),
        }
    }

    pub fn invite_hash(mut self, invite_hash: impl Into<String>) -> Self {
        self.invite_hash = Some(invite_hash.into());
        self
    }

    pub fn session_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.session_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> AuditEvent {
        AuditEvent {
            id: AuditLogId::new(),
            timestamp: Utc::now(),
            event_type: self.event_type,
            invite_hash: self.invite_hash,
            session_fingerprint: self.session_fingerprint,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            details: self.details,
        }
    }
}

/// Filter for querying audit logs
#[derive(Clone, Debug, Default)]
pub struct AuditLogFilter {
    /// Filter by event type
    pub event_type: Option<AuditEventType>,
    /// Filter by invite hash
    pub invite_hash: Option<String>,
    /// Filter by session fingerprint
    pub session_fingerprint: Option<String>,
    /// Filter by start timestamp (inclusive)
    pub from: Option<DateTime<Utc>>,
    /// Filter by end timestamp (exclusive)
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of results to return
    pub limit: Option<u32>,
    /// Number of results to skip (for pagination)
    pub offset: Option<u32>,
}

impl AuditLogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: AuditEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn invite_hash(mut self, invite_hash: impl Into<String>) -> Self {
        self.invite_hash = Some(invite_hash.into());
        self
    }

    pub fn session_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.session_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Error type for audit log operations
#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("database error: {0}")]
    Database(String),

    #[error("audit log not found: {0}")]
    NotFound(AuditLogId),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Trait for audit log persistence.
///
/// The log is append-only: there is no update or delete surface. Failures to
/// record events should be logged but must not fail the operation being
/// audited.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Record an audit event.
    async fn record(&self, event: AuditEvent) -> Result<(), AuditLogError>;

    /// Query audit logs with optional filters, ordered by timestamp descending.
    async fn query(&self, filter: AuditLogFilter) -> Result<Vec<AuditEvent>, AuditLogError>;

    /// Get a specific audit log entry by ID.
    async fn get(&self, id: AuditLogId) -> Result<AuditEvent, AuditLogError>;

    /// Count audit logs matching the filter criteria.
    async fn count(&self, filter: AuditLogFilter) -> Result<u64, AuditLogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_display() {
        assert_eq!(AuditEventType::InviteVerified.to_string(), "invite_verified");
        assert_eq!(
            AuditEventType::SignatureVerificationFailed.to_string(),
            "signature_verification_failed"
        );
        assert_eq!(
            AuditEventType::IpMismatchSession.to_string(),
            "ip_mismatch_session"
        );
    }

    #[test]
    fn event_type_parse() {
        assert_eq!(
            "session_created".parse::<AuditEventType>().unwrap(),
            AuditEventType::SessionCreated
        );
        assert!("no_such_event".parse::<AuditEventType>().is_err());
    }

    #[test]
    fn event_type_all_variants_roundtrip() {
        let types = vec![
            AuditEventType::InviteGenerated,
            AuditEventType::InviteVerified,
            AuditEventType::InviteNotFound,
            AuditEventType::InviteExpired,
            AuditEventType::InviteInactive,
            AuditEventType::InviteNotUsed,
            AuditEventType::SignatureVerificationFailed,
            AuditEventType::InviteMarkedUsed,
            AuditEventType::InviteAlreadyUsed,
            AuditEventType::SessionCreated,
            AuditEventType::SessionResumed,
            AuditEventType::SessionNotFound,
            AuditEventType::IpBindingCreated,
            AuditEventType::IpMismatch,
            AuditEventType::IpMismatchSession,
            AuditEventType::AdminChallengeIssued,
            AuditEventType::AdminAuthSuccess,
            AuditEventType::AdminAuthFailed,
            AuditEventType::LeakTrackRecorded,
        ];

        for t in types {
            let display = t.to_string();
            let parsed: AuditEventType = display.parse().unwrap();
            assert_eq!(t, parsed, "Roundtrip failed for {:?}", t);
        }
    }

    #[test]
    fn event_builder() {
        let event = AuditEvent::builder(AuditEventType::IpMismatch)
            .invite_hash("abc123")
            .ip_address("203.0.113.7")
            .user_agent("curl/8")
            .detail("bound_ip", "198.51.100.1")
            .detail("request_ip", "203.0.113.7")
            .build();

        assert_eq!(event.event_type, AuditEventType::IpMismatch);
        assert_eq!(event.invite_hash.as_deref(), Some("abc123"));
        assert_eq!(event.session_fingerprint, None);
        assert_eq!(event.details.get("bound_ip").unwrap(), "198.51.100.1");
        assert_eq!(event.details.len(), 2);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = AuditEvent::builder(AuditEventType::SessionCreated)
            .invite_hash("h")
            .session_fingerprint("fp")
            .detail("k", "v")
            .build();

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"session_created\""));

        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, event.event_type);
        assert_eq!(back.details, event.details);
    }

    #[test]
    fn details_serialize_deterministically() {
        let event = AuditEvent::builder(AuditEventType::AdminAuthFailed)
            .detail("b", "2")
            .detail("a", "1")
            .build();

        let json = serde_json::to_string(&event.details).unwrap();
        assert_eq!(json, r#"{"a":"1","b":"2"}"#);
    }

    #[test]
    fn filter_builder() {
        let from = Utc::now();
        let filter = AuditLogFilter::new()
            .event_type(AuditEventType::IpMismatch)
            .invite_hash("h")
            .from(from)
            .limit(50)
            .offset(10);

        assert_eq!(filter.event_type, Some(AuditEventType::IpMismatch));
        assert_eq!(filter.invite_hash.as_deref(), Some("h"));
        assert_eq!(filter.from, Some(from));
        assert_eq!(filter.limit, Some(50));
        assert_eq!(filter.offset, Some(10));
        assert!(filter.to.is_none());
    }

    #[test]
    fn audit_log_id_is_v7() {
        let id = AuditLogId::new();
        assert_eq!(id.0.get_version_num(), 7);
    }

    #[test]
    fn audit_log_id_display_parse() {
        let id = AuditLogId::new();
        let parsed: AuditLogId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<AuditLogId>().is_err());
    }

    #[test]
    fn error_display() {
        let err = AuditLogError::Database("connection failed".to_string());
        assert!(err.to_string().contains("database error"));

        let err = AuditLogError::NotFound(AuditLogId::new());
        assert!(err.to_string().contains("not found"));
    }
}
