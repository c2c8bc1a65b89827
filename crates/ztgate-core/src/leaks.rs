//! Canary issuance and leak tracking.
//!
//! Each protected resource served to a session gets a canary signature
//! derived from the session fingerprint. A later hit carrying that signature
//! from a different client ties the leaked copy back to its original session.

use std::sync::Arc;

use chrono::Utc;
use ztgate_audit::{AuditEvent, AuditEventType, AuditLog};
use ztgate_storage::{CreateLeakTrackParams, LeakTrack, Store, StoreError};

use crate::{prefix, record, ClientInfo};

/// A canary minted for one (session, resource) access.
#[derive(Clone, Debug)]
pub struct Canary {
    pub signature: String,
    pub resource: String,
    pub issued_at_ms: i64,
}

/// Mints canaries and records hits against them.
pub struct LeakTracker {
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditLog>,
}

impl LeakTracker {
    pub fn new(store: Arc<dyn Store>, audit: Arc<dyn AuditLog>) -> Self {
        Self { store, audit }
    }

    /// Mint a canary for a resource served to the session with `fingerprint`.
    ///
    /// The signature is deterministic over (fingerprint, resource, issue
    /// time), so re-serving the same resource later yields a distinct canary.
    pub fn issue_canary(&self, fingerprint: &str, resource: &str) -> Canary {
        let issued_at_ms = Utc::now().timestamp_millis();
        Canary {
            signature: ztgate_crypto::canary_signature(fingerprint, resource, issued_at_ms),
            resource: resource.to_string(),
            issued_at_ms,
        }
    }

    /// Record an observed canary hit.
    ///
    /// `fingerprint` is the session the canary was originally minted for;
    /// `client` is whoever just presented it.
    pub async fn record_hit(
        &self,
        fingerprint: &str,
        resource: &str,
        signature: &str,
        client: &ClientInfo,
    ) -> Result<LeakTrack, StoreError> {
        let track = self
            .store
            .record_leak_track(&CreateLeakTrackParams {
                fingerprint: fingerprint.to_string(),
                resource: resource.to_string(),
                signature: signature.to_string(),
                ip_address: client.ip.clone(),
                user_agent: client.user_agent.clone(),
            })
            .await?;

        record(
            self.audit.as_ref(),
            AuditEvent::builder(AuditEventType::LeakTrackRecorded)
                .session_fingerprint(fingerprint)
                .ip_address(&client.ip)
                .user_agent(&client.user_agent)
                .detail("resource", resource)
                .detail("signature_prefix", prefix(signature))
                .build(),
        )
        .await;
        tracing::info!(
            signature = prefix(signature),
            resource,
            "canary hit recorded"
        );
        Ok(track)
    }

    /// Every hit that presented one canary signature, newest first.
    pub async fn hits_for_signature(&self, signature: &str) -> Result<Vec<LeakTrack>, StoreError> {
        self.store.list_leak_tracks_by_signature(signature).await
    }

    /// Most recent hits across all canaries.
    pub async fn recent(&self, limit: u32) -> Result<Vec<LeakTrack>, StoreError> {
        self.store.list_leak_tracks(limit).await
    }
}
