//! Per-request authorization: every request re-proves itself.

use std::sync::Arc;

use chrono::Utc;
use ztgate_audit::{AuditEvent, AuditEventType, AuditLog};
use ztgate_storage::{Session, Store, StoreError};

use crate::{record, ClientInfo, DenyReason};

/// Authorization decision for a single request.
#[derive(Debug)]
pub enum Access {
    Granted(Session),
    Denied(DenyReason),
}

impl Access {
    pub fn is_granted(&self) -> bool {
        matches!(self, Access::Granted(_))
    }
}

/// Checks a presented (fingerprint, signature) pair on every request.
///
/// Nothing is trusted from the previous request: the session must exist and
/// be active, the signature over the fingerprint must verify, the backing
/// invite must still be live, and the IP binding is rechecked.
pub struct ZeroTrustGate {
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditLog>,
    /// Issuer public key (hex) that fingerprint signatures are checked against.
    public_key: String,
}

impl ZeroTrustGate {
    pub fn new(store: Arc<dyn Store>, audit: Arc<dyn AuditLog>, public_key: String) -> Self {
        Self {
            store,
            audit,
            public_key,
        }
    }

    pub async fn authorize(
        &self,
        fingerprint: &str,
        signature: &str,
        client: &ClientInfo,
    ) -> Result<Access, StoreError> {
        let session = match self.store.get_session_by_fingerprint(fingerprint).await {
            Ok(session) => session,
            Err(StoreError::NotFound) => {
                record(
                    self.audit.as_ref(),
                    AuditEvent::builder(AuditEventType::SessionNotFound)
                        .session_fingerprint(fingerprint)
                        .ip_address(&client.ip)
                        .user_agent(&client.user_agent)
                        .build(),
                )
                .await;
                return Ok(Access::Denied(DenyReason::SessionNotFound));
            }
            Err(e) => return Err(e),
        };

        if !session.is_active {
            record(
                self.audit.as_ref(),
                AuditEvent::builder(AuditEventType::SessionNotFound)
                    .session_fingerprint(fingerprint)
                    .ip_address(&client.ip)
                    .user_agent(&client.user_agent)
                    .detail("reason", "session_ended")
                    .build(),
            )
            .await;
            return Ok(Access::Denied(DenyReason::SessionNotFound));
        }

        if !ztgate_crypto::verify(fingerprint, signature, &self.public_key) {
            record(
                self.audit.as_ref(),
                AuditEvent::builder(AuditEventType::SignatureVerificationFailed)
                    .invite_hash(&session.invite_hash)
                    .session_fingerprint(fingerprint)
                    .ip_address(&client.ip)
                    .user_agent(&client.user_agent)
                    .build(),
            )
            .await;
            return Ok(Access::Denied(DenyReason::SignatureInvalid));
        }

        // the backing invite must still be live
        let invite = match self.store.get_invite_by_hash(&session.invite_hash).await {
            Ok(invite) => invite,
            Err(StoreError::NotFound) => {
                record(
                    self.audit.as_ref(),
                    AuditEvent::builder(AuditEventType::InviteNotFound)
                        .invite_hash(&session.invite_hash)
                        .session_fingerprint(fingerprint)
                        .ip_address(&client.ip)
                        .user_agent(&client.user_agent)
                        .build(),
                )
                .await;
                return Ok(Access::Denied(DenyReason::InviteNotFound));
            }
            Err(e) => return Err(e),
        };

        if !invite.is_active {
            record(
                self.audit.as_ref(),
                AuditEvent::builder(AuditEventType::InviteInactive)
                    .invite_hash(&session.invite_hash)
                    .session_fingerprint(fingerprint)
                    .ip_address(&client.ip)
                    .user_agent(&client.user_agent)
                    .build(),
            )
            .await;
            return Ok(Access::Denied(DenyReason::InviteInactive));
        }

        if let Some(expires_at) = invite.expires_at {
            if expires_at < Utc::now() {
                record(
                    self.audit.as_ref(),
                    AuditEvent::builder(AuditEventType::InviteExpired)
                        .invite_hash(&session.invite_hash)
                        .session_fingerprint(fingerprint)
                        .ip_address(&client.ip)
                        .user_agent(&client.user_agent)
                        .build(),
                )
                .await;
                return Ok(Access::Denied(DenyReason::InviteExpired));
            }
        }

        // establishment flips `used`; a session whose invite never was is forged
        if !invite.used {
            record(
                self.audit.as_ref(),
                AuditEvent::builder(AuditEventType::InviteNotUsed)
                    .invite_hash(&session.invite_hash)
                    .session_fingerprint(fingerprint)
                    .ip_address(&client.ip)
                    .user_agent(&client.user_agent)
                    .build(),
            )
            .await;
            return Ok(Access::Denied(DenyReason::InviteNotUsed));
        }

        // binding recheck on every request, not just at establishment
        match self.store.get_ip_binding(&session.invite_hash).await {
            Ok(binding) => {
                if binding.bound_ip != client.ip {
                    record(
                        self.audit.as_ref(),
                        AuditEvent::builder(AuditEventType::IpMismatchSession)
                            .invite_hash(&session.invite_hash)
                            .session_fingerprint(fingerprint)
                            .ip_address(&client.ip)
                            .user_agent(&client.user_agent)
                            .detail("bound_ip", &binding.bound_ip)
                            .detail("request_ip", &client.ip)
                            .build(),
                    )
                    .await;
                    return Ok(Access::Denied(DenyReason::IpMismatch));
                }
            }
            Err(StoreError::NotFound) => {
                // binding was cleared by an operator; this request re-binds
                let binding = self.store.bind_ip(&session.invite_hash, &client.ip).await?;
                record(
                    self.audit.as_ref(),
                    AuditEvent::builder(AuditEventType::IpBindingCreated)
                        .invite_hash(&session.invite_hash)
                        .session_fingerprint(fingerprint)
                        .ip_address(&client.ip)
                        .user_agent(&client.user_agent)
                        .detail("bound_ip", &binding.bound_ip)
                        .build(),
                )
                .await;
                if binding.bound_ip != client.ip {
                    return Ok(Access::Denied(DenyReason::IpMismatch));
                }
            }
            Err(e) => return Err(e),
        }

        self.store.touch_session(fingerprint).await?;
        Ok(Access::Granted(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ztgate_audit::AuditLogFilter;
    use ztgate_crypto::Keypair;
    use ztgate_store_sqlite::SqliteStore;

    struct Fixture {
        store: Arc<SqliteStore>,
        gate: ZeroTrustGate,
        keypair: Keypair,
        fingerprint: String,
        invite_hash: String,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let keypair = Keypair::generate();

        let registry = crate::invites::InviteRegistry::new(
            store.clone(),
            store.clone(),
            Keypair::from_secret_bytes(&keypair.secret_key_bytes()),
        );
        let invite = registry
            .create("alice@example.com", Some(Duration::hours(24)))
            .await
            .unwrap();

        let manager = crate::sessions::SessionManager::new(
            store.clone(),
            store.clone(),
            keypair.public_key_hex(),
        );
        let outcome = manager
            .establish(&invite.invite_hash, &invite.signature, &alice())
            .await
            .unwrap();
        let fingerprint = outcome.session().unwrap().fingerprint.clone();

        let gate = ZeroTrustGate::new(store.clone(), store.clone(), keypair.public_key_hex());
        Fixture {
            store,
            gate,
            keypair,
            fingerprint,
            invite_hash: invite.invite_hash,
        }
    }

    fn alice() -> ClientInfo {
        ClientInfo::new("203.0.113.10", "alice-browser")
    }

    #[tokio::test]
    async fn valid_request_is_granted_and_touched() {
        let f = fixture().await;
        let sig = f.keypair.sign(&f.fingerprint);

        let before = f
            .store
            .get_session_by_fingerprint(&f.fingerprint)
            .await
            .unwrap();
        let access = f.gate.authorize(&f.fingerprint, &sig, &alice()).await.unwrap();
        assert!(access.is_granted());

        let after = f
            .store
            .get_session_by_fingerprint(&f.fingerprint)
            .await
            .unwrap();
        assert!(after.last_seen >= before.last_seen);
    }

    #[tokio::test]
    async fn unknown_fingerprint_is_denied() {
        let f = fixture().await;
        let sig = f.keypair.sign("other");

        let access = f.gate.authorize("other", &sig, &alice()).await.unwrap();
        assert!(matches!(access, Access::Denied(DenyReason::SessionNotFound)));
    }

    #[tokio::test]
    async fn bad_signature_is_denied() {
        let f = fixture().await;

        let access = f
            .gate
            .authorize(&f.fingerprint, "deadbeef", &alice())
            .await
            .unwrap();
        assert!(matches!(
            access,
            Access::Denied(DenyReason::SignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn ip_change_mid_session_is_denied() {
        let f = fixture().await;
        let sig = f.keypair.sign(&f.fingerprint);

        let hijacker = ClientInfo::new("198.51.100.99", "alice-browser");
        let access = f
            .gate
            .authorize(&f.fingerprint, &sig, &hijacker)
            .await
            .unwrap();
        assert!(matches!(access, Access::Denied(DenyReason::IpMismatch)));

        use ztgate_audit::AuditLog;
        let events = f
            .store
            .query(AuditLogFilter::new().event_type(AuditEventType::IpMismatchSession))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].session_fingerprint.as_deref(),
            Some(f.fingerprint.as_str())
        );
    }

    #[tokio::test]
    async fn revoked_invite_kills_live_session() {
        let f = fixture().await;
        let sig = f.keypair.sign(&f.fingerprint);

        f.store.set_invite_active(&f.invite_hash, false).await.unwrap();

        let access = f.gate.authorize(&f.fingerprint, &sig, &alice()).await.unwrap();
        assert!(matches!(access, Access::Denied(DenyReason::InviteInactive)));
    }

    #[tokio::test]
    async fn session_for_unused_invite_is_denied() {
        let f = fixture().await;

        // a session row planted against an invite that never went through
        // establishment (its used flag was never flipped)
        let registry = crate::invites::InviteRegistry::new(
            f.store.clone(),
            f.store.clone(),
            Keypair::from_secret_bytes(&f.keypair.secret_key_bytes()),
        );
        let invite = registry.create("bob@example.com", None).await.unwrap();
        f.store
            .create_session(&ztgate_storage::CreateSessionParams {
                invite_hash: invite.invite_hash.clone(),
                fingerprint: "planted-fp".to_string(),
                ip_address: "203.0.113.10".to_string(),
                user_agent: "alice-browser".to_string(),
            })
            .await
            .unwrap();

        let sig = f.keypair.sign("planted-fp");
        let access = f.gate.authorize("planted-fp", &sig, &alice()).await.unwrap();
        assert!(matches!(access, Access::Denied(DenyReason::InviteNotUsed)));

        use ztgate_audit::AuditLog;
        let n = f
            .store
            .count(AuditLogFilter::new().event_type(AuditEventType::InviteNotUsed))
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn ended_session_is_denied() {
        let f = fixture().await;
        let sig = f.keypair.sign(&f.fingerprint);

        f.store.end_session(&f.fingerprint).await.unwrap();

        let access = f.gate.authorize(&f.fingerprint, &sig, &alice()).await.unwrap();
        assert!(matches!(access, Access::Denied(DenyReason::SessionNotFound)));
    }
}
