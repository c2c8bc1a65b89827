//! The storage trait `ztgate-core` depends on.

use thiserror::Error;

use crate::types::*;

/// Uniform error type for all storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("conflict")]
    Conflict,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Storage operations for invites, sessions, bindings, operator keys, and
/// leak tracking.
///
/// Single-use transitions (`mark_invite_used`, `consume_invite_token`) must be
/// atomic compare-and-swap operations: under N concurrent callers exactly one
/// observes the transition.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // ───────────────────────────────── Invites ─────────────────────────────────

    /// Create an invite (fails with `AlreadyExists` on a duplicate hash).
    async fn create_invite(&self, params: &CreateInviteParams) -> Result<Invite, StoreError>;

    /// Get invite by its hash.
    async fn get_invite_by_hash(&self, invite_hash: &str) -> Result<Invite, StoreError>;

    /// List all invites, newest first.
    async fn list_invites(&self) -> Result<Vec<Invite>, StoreError>;

    /// Atomically flip `used` from false to true.
    ///
    /// Returns `Ok(true)` if this call performed the transition, `Ok(false)`
    /// if the invite was already used, `NotFound` if no such invite exists.
    async fn mark_invite_used(&self, invite_hash: &str) -> Result<bool, StoreError>;

    /// Activate or deactivate an invite (revocation keeps the row).
    async fn set_invite_active(&self, invite_hash: &str, active: bool) -> Result<(), StoreError>;

    // ───────────────────────────── One-time tokens ─────────────────────────────

    /// Create a one-time delivery token for an invite.
    async fn create_invite_token(
        &self,
        params: &CreateInviteTokenParams,
    ) -> Result<InviteToken, StoreError>;

    /// Get a token row regardless of its used/expired state.
    async fn get_invite_token(&self, token: &str) -> Result<InviteToken, StoreError>;

    /// Atomically flip a token's `used` from false to true.
    ///
    /// Same contract as [`Store::mark_invite_used`].
    async fn consume_invite_token(&self, token: &str) -> Result<bool, StoreError>;

    // ───────────────────────────────── Sessions ────────────────────────────────

    /// Create a session (fails with `AlreadyExists` on a duplicate fingerprint).
    async fn create_session(&self, params: &CreateSessionParams) -> Result<Session, StoreError>;

    /// Get session by fingerprint.
    async fn get_session_by_fingerprint(&self, fingerprint: &str) -> Result<Session, StoreError>;

    /// Update a session's `last_seen` to now.
    async fn touch_session(&self, fingerprint: &str) -> Result<(), StoreError>;

    /// Deactivate a session (row is retained for the audit trail).
    async fn end_session(&self, fingerprint: &str) -> Result<(), StoreError>;

    /// List sessions, optionally scoped to one invite, newest first.
    async fn list_sessions(&self, invite_hash: Option<&str>) -> Result<Vec<Session>, StoreError>;

    // ──────────────────────────────── IP bindings ──────────────────────────────

    /// Bind an invite to an IP if no binding exists yet, and return the
    /// winning binding either way. Concurrent first-uses converge on one row.
    async fn bind_ip(&self, invite_hash: &str, ip: &str) -> Result<IpBinding, StoreError>;

    /// Get the binding for an invite.
    async fn get_ip_binding(&self, invite_hash: &str) -> Result<IpBinding, StoreError>;

    /// Remove a binding (operator recovery for a legitimately moved recipient).
    async fn clear_ip_binding(&self, invite_hash: &str) -> Result<(), StoreError>;

    // ──────────────────────────────── Admin keys ───────────────────────────────

    /// Register an operator public key.
    async fn add_admin_key(&self, params: &CreateAdminKeyParams) -> Result<AdminKey, StoreError>;

    /// Look up an operator key by its public key.
    async fn get_admin_key(&self, public_key: &str) -> Result<AdminKey, StoreError>;

    /// List all operator keys.
    async fn list_admin_keys(&self) -> Result<Vec<AdminKey>, StoreError>;

    /// Activate or deactivate an operator key.
    async fn set_admin_key_active(&self, public_key: &str, active: bool)
        -> Result<(), StoreError>;

    // ─────────────────────────────── Leak tracking ─────────────────────────────

    /// Record a canary hit.
    async fn record_leak_track(
        &self,
        params: &CreateLeakTrackParams,
    ) -> Result<LeakTrack, StoreError>;

    /// All hits carrying one canary signature, newest first.
    async fn list_leak_tracks_by_signature(
        &self,
        signature: &str,
    ) -> Result<Vec<LeakTrack>, StoreError>;

    /// Most recent hits across all canaries.
    async fn list_leak_tracks(&self, limit: u32) -> Result<Vec<LeakTrack>, StoreError>;
}
