//! Invite issuance, verification, and one-time delivery tokens.

use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use ztgate_audit::{AuditEvent, AuditEventType, AuditLog};
use ztgate_crypto::Keypair;
use ztgate_storage::{
    CreateInviteParams, CreateInviteTokenParams, Invite, InviteToken, Store, StoreError,
};

use crate::{record, ClientInfo, DenyReason};

/// Default lifetime of a one-time delivery token.
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 10;

#[derive(Debug, Error)]
pub enum InviteError {
    #[error("invalid email address")]
    InvalidEmail,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of verifying a presented invite.
#[derive(Debug)]
pub enum InviteVerification {
    Verified(Invite),
    Denied(DenyReason),
}

/// Outcome of redeeming a one-time token.
#[derive(Debug)]
pub enum TokenRedemption {
    /// The token was live; it is now consumed and the invite is revealed.
    Redeemed(Invite),
    /// Token exists but was consumed or expired; the payload is never re-revealed.
    Gone,
    /// No such token.
    NotFound,
}

/// Issues and verifies signed invites.
///
/// The registry owns the issuer keypair: invite hashes are signed at creation
/// and presented signatures are checked against the issuer public key, never
/// against the stored copy.
pub struct InviteRegistry {
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditLog>,
    keypair: Keypair,
    public_key: String,
}

impl InviteRegistry {
    pub fn new(store: Arc<dyn Store>, audit: Arc<dyn AuditLog>, keypair: Keypair) -> Self {
        let public_key = keypair.public_key_hex();
        Self {
            store,
            audit,
            keypair,
            public_key,
        }
    }

    /// Hex-encoded issuer public key (what verifiers need).
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Create a signed invite for `email`. `ttl` of `None` means no expiry.
    pub async fn create(&self, email: &str, ttl: Option<Duration>) -> Result<Invite, InviteError> {
        if email.is_empty() || !email.contains('@') {
            return Err(InviteError::InvalidEmail);
        }

        let now = Utc::now();
        let nonce = ztgate_crypto::generate_nonce(32);
        let invite_hash = ztgate_crypto::invite_hash(email, now.timestamp_millis(), &nonce);
        let signature = self.keypair.sign(&invite_hash);

        let invite = self
            .store
            .create_invite(&CreateInviteParams {
                email: email.to_string(),
                invite_hash: invite_hash.clone(),
                signature,
                nonce,
                expires_at: ttl.map(|d| now + d),
            })
            .await?;

        record(
            self.audit.as_ref(),
            AuditEvent::builder(AuditEventType::InviteGenerated)
                .invite_hash(&invite.invite_hash)
                .detail("email", email)
                .build(),
        )
        .await;

        tracing::info!(invite = crate::prefix(&invite.invite_hash), "invite created");
        Ok(invite)
    }

    /// Verify a presented (invite_hash, signature) pair.
    ///
    /// Each denial path is audited with its own event; the returned reason is
    /// the only thing a caller should surface.
    pub async fn verify(
        &self,
        invite_hash: &str,
        signature: &str,
        client: &ClientInfo,
    ) -> Result<InviteVerification, StoreError> {
        let deny = |event_type: AuditEventType, reason: DenyReason| {
            let event = AuditEvent::builder(event_type)
                .invite_hash(invite_hash)
                .ip_address(&client.ip)
                .user_agent(&client.user_agent)
                .build();
            (event, reason)
        };

        let invite = match self.store.get_invite_by_hash(invite_hash).await {
            Ok(invite) => invite,
            Err(StoreError::NotFound) => {
                let (event, reason) =
                    deny(AuditEventType::InviteNotFound, DenyReason::InviteNotFound);
                record(self.audit.as_ref(), event).await;
                return Ok(InviteVerification::Denied(reason));
            }
            Err(e) => return Err(e),
        };

        if !invite.is_active {
            let (event, reason) = deny(AuditEventType::InviteInactive, DenyReason::InviteInactive);
            record(self.audit.as_ref(), event).await;
            return Ok(InviteVerification::Denied(reason));
        }

        if let Some(expires_at) = invite.expires_at {
            if expires_at < Utc::now() {
                let (event, reason) =
                    deny(AuditEventType::InviteExpired, DenyReason::InviteExpired);
                record(self.audit.as_ref(), event).await;
                return Ok(InviteVerification::Denied(reason));
            }
        }

        if !ztgate_crypto::verify(invite_hash, signature, &self.public_key) {
            let (event, reason) = deny(
                AuditEventType::SignatureVerificationFailed,
                DenyReason::SignatureInvalid,
            );
            record(self.audit.as_ref(), event).await;
            return Ok(InviteVerification::Denied(reason));
        }

        record(
            self.audit.as_ref(),
            AuditEvent::builder(AuditEventType::InviteVerified)
                .invite_hash(invite_hash)
                .ip_address(&client.ip)
                .user_agent(&client.user_agent)
                .build(),
        )
        .await;

        Ok(InviteVerification::Verified(invite))
    }

    /// Flip the informational `used` flag; audited either way.
    pub async fn mark_used(&self, invite_hash: &str, client: &ClientInfo) -> Result<bool, StoreError> {
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
                .ip_address(&client.ip)
                .user_agent(&client.user_agent)
                .build(),
        )
        .await;
        Ok(flipped)
    }

    /// Deactivate an invite; the row (and its audit trail) is retained.
    pub async fn revoke(&self, invite_hash: &str) -> Result<(), StoreError> {
        self.store.set_invite_active(invite_hash, false).await
    }

    pub async fn list(&self) -> Result<Vec<Invite>, StoreError> {
        self.store.list_invites().await
    }
}

/// One-time delivery tokens pointing at invites.
///
/// Token operations never sign or verify anything, so holders of this handle
/// do not need the issuer secret.
pub struct DeliveryTokens {
    store: Arc<dyn Store>,
}

impl DeliveryTokens {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Issue a one-time delivery token for an existing invite.
    pub async fn issue(&self, invite_hash: &str, ttl: Duration) -> Result<InviteToken, StoreError> {
        // confirm the invite exists before minting a pointer to it
        self.store.get_invite_by_hash(invite_hash).await?;

        self.store
            .create_invite_token(&CreateInviteTokenParams {
                token: ztgate_crypto::generate_nonce(32),
                invite_hash: invite_hash.to_string(),
                expires_at: Utc::now() + ttl,
            })
            .await
    }

    /// Redeem a one-time token, atomically consuming it.
    ///
    /// A used or expired token is [`TokenRedemption::Gone`], distinct from an
    /// unknown one; neither reveals the invite payload.
    pub async fn redeem(&self, token: &str) -> Result<TokenRedemption, StoreError> {
        let row = match self.store.get_invite_token(token).await {
            Ok(row) => row,
            Err(StoreError::NotFound) => return Ok(TokenRedemption::NotFound),
            Err(e) => return Err(e),
        };

        if row.used || row.expires_at < Utc::now() {
            return Ok(TokenRedemption::Gone);
        }

        // CAS; a racing redeemer may have won between the read and here
        if !self.store.consume_invite_token(token).await? {
            return Ok(TokenRedemption::Gone);
        }

        let invite = self.store.get_invite_by_hash(&row.invite_hash).await?;
        Ok(TokenRedemption::Redeemed(invite))
    }
}
