//! Session establishment: the single authoritative entry point that takes a
//! verified invite presentation to a live session.

use std::sync::Arc;

use chrono::Utc;
use ztgate_audit::{AuditEvent, AuditEventType, AuditLog};
use ztgate_storage::{CreateSessionParams, Session, Store, StoreError};

use crate::{record, ClientInfo, DenyReason};

/// Outcome of a session establishment attempt.
#[derive(Debug)]
pub enum EstablishOutcome {
    /// A new session was created for this client.
    Created(Session),
    /// An existing active session for the same invite and client was resumed.
    Resumed(Session),
    Denied(DenyReason),
}

impl EstablishOutcome {
    pub fn session(&self) -> Option<&Session> {
        match self {
            EstablishOutcome::Created(s) | EstablishOutcome::Resumed(s) => Some(s),
            EstablishOutcome::Denied(_) => None,
        }
    }
}

/// Establishes sessions from signed invites.
///
/// The decision order is fixed: signature, invite status, IP binding, then
/// session creation. Once the binding and signature checks pass the attempt
/// succeeds; the invite's `used` flag is flipped afterwards and is
/// informational only.
pub struct SessionManager {
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditLog>,
    /// Issuer public key (hex) that invite signatures are checked against.
    public_key: String,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>, audit: Arc<dyn AuditLog>, public_key: String) -> Self {
        Self {
            store,
            audit,
            public_key,
        }
    }

    pub async fn establish(
        &self,
        invite_hash: &str,
        signature: &str,
        client: &ClientInfo,
    ) -> Result<EstablishOutcome, StoreError> {
        // 1. signature over the invite hash
        if !ztgate_crypto::verify(invite_hash, signature, &self.public_key) {
            self.deny(
                AuditEventType::SignatureVerificationFailed,
                invite_hash,
                client,
            )
            .await;
            return Ok(EstablishOutcome::Denied(DenyReason::SignatureInvalid));
        }

        // 2. invite status
        let invite = match self.store.get_invite_by_hash(invite_hash).await {
            Ok(invite) => invite,
            Err(StoreError::NotFound) => {
                self.deny(AuditEventType::InviteNotFound, invite_hash, client)
                    .await;
                return Ok(EstablishOutcome::Denied(DenyReason::InviteNotFound));
            }
            Err(e) => return Err(e),
        };

        if !invite.is_active {
            self.deny(AuditEventType::InviteInactive, invite_hash, client)
                .await;
            return Ok(EstablishOutcome::Denied(DenyReason::InviteInactive));
        }

        if let Some(expires_at) = invite.expires_at {
            if expires_at < Utc::now() {
                self.deny(AuditEventType::InviteExpired, invite_hash, client)
                    .await;
                return Ok(EstablishOutcome::Denied(DenyReason::InviteExpired));
            }
        }

        // 3. IP binding: first use binds, later uses must match
        match self.store.get_ip_binding(invite_hash).await {
            Ok(binding) => {
                if binding.bound_ip != client.ip {
                    record(
                        self.audit.as_ref(),
                        AuditEvent::builder(AuditEventType::IpMismatch)
                            .invite_hash(invite_hash)
                            .ip_address(&client.ip)
                            .user_agent(&client.user_agent)
                            .detail("bound_ip", &binding.bound_ip)
                            .detail("request_ip", &client.ip)
                            .build(),
                    )
                    .await;
                    return Ok(EstablishOutcome::Denied(DenyReason::IpMismatch));
                }
            }
            Err(StoreError::NotFound) => {
                let binding = self.store.bind_ip(invite_hash, &client.ip).await?;
                if binding.bound_ip != client.ip {
                    // lost the first-use race to a different origin
                    record(
                        self.audit.as_ref(),
                        AuditEvent::builder(AuditEventType::IpMismatch)
                            .invite_hash(invite_hash)
                            .ip_address(&client.ip)
                            .user_agent(&client.user_agent)
                            .detail("bound_ip", &binding.bound_ip)
                            .detail("request_ip", &client.ip)
                            .build(),
                    )
                    .await;
                    return Ok(EstablishOutcome::Denied(DenyReason::IpMismatch));
                }
                record(
                    self.audit.as_ref(),
                    AuditEvent::builder(AuditEventType::IpBindingCreated)
                        .invite_hash(invite_hash)
                        .ip_address(&client.ip)
                        .user_agent(&client.user_agent)
                        .detail("bound_ip", &binding.bound_ip)
                        .build(),
                )
                .await;
            }
            Err(e) => return Err(e),
        }

        // 4. resume an active session for this invite + client, else create
        let existing = self
            .store
            .list_sessions(Some(invite_hash))
            .await?
            .into_iter()
            .find(|s| s.is_active && s.ip_address == client.ip && s.user_agent == client.user_agent);

        let outcome = match existing {
            Some(session) => {
                self.store.touch_session(&session.fingerprint).await?;
                record(
                    self.audit.as_ref(),
                    AuditEvent::builder(AuditEventType::SessionResumed)
                        .invite_hash(invite_hash)
                        .session_fingerprint(&session.fingerprint)
                        .ip_address(&client.ip)
                        .user_agent(&client.user_agent)
                        .build(),
                )
                .await;
                EstablishOutcome::Resumed(session)
            }
            None => {
                let fingerprint = ztgate_crypto::session_fingerprint(
                    &client.ip,
                    &client.user_agent,
                    invite_hash,
                    Utc::now().timestamp_millis(),
                );
                let session = match self
                    .store
                    .create_session(&CreateSessionParams {
                        invite_hash: invite_hash.to_string(),
                        fingerprint: fingerprint.clone(),
                        ip_address: client.ip.clone(),
                        user_agent: client.user_agent.clone(),
                    })
                    .await
                {
                    Ok(session) => session,
                    // same client raced itself within one millisecond
                    Err(StoreError::AlreadyExists) => {
                        self.store.touch_session(&fingerprint).await?;
                        self.store.get_session_by_fingerprint(&fingerprint).await?
                    }
                    Err(e) => return Err(e),
                };
                record(
                    self.audit.as_ref(),
                    AuditEvent::builder(AuditEventType::SessionCreated)
                        .invite_hash(invite_hash)
                        .session_fingerprint(&session.fingerprint)
                        .ip_address(&client.ip)
                        .user_agent(&client.user_agent)
                        .build(),
                )
                .await;
                tracing::info!(
                    session = crate::prefix(&session.fingerprint),
                    "session created"
                );
                EstablishOutcome::Created(session)
            }
        };

        // 5. informational mark-used; never gates the outcome above
        let session_fingerprint = outcome
            .session()
            .map(|s| s.fingerprint.clone())
            .unwrap_or_default();
        let flipped = self.store.mark_invite_used(invite_hash).await?;
        let event_type = if flipped {
            AuditEventType::InviteMarkedUsed
        } else {
            AuditEventType::InviteAlreadyUsed
        };
        record(
            self.audit.as_ref(),
            AuditEvent::builder(event_type)
                .invite_hash(invite_hash)
                .session_fingerprint(session_fingerprint)
                .ip_address(&client.ip)
                .user_agent(&client.user_agent)
                .build(),
        )
        .await;

        Ok(outcome)
    }

    pub async fn end(&self, fingerprint: &str) -> Result<(), StoreError> {
        self.store.end_session(fingerprint).await
    }

    pub async fn list(&self, invite_hash: Option<&str>) -> Result<Vec<Session>, StoreError> {
        self.store.list_sessions(invite_hash).await
    }

    async fn deny(&self, event_type: AuditEventType, invite_hash: &str, client: &ClientInfo) {
        record(
            self.audit.as_ref(),
            AuditEvent::builder(event_type)
                .invite_hash(invite_hash)
                .ip_address(&client.ip)
                .user_agent(&client.user_agent)
                .build(),
        )
        .await;
    }
}
