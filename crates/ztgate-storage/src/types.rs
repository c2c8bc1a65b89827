//! Records, parameters, and strongly-typed identifiers.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Invite identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InviteId(pub Uuid);

/// Session identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

/// Admin key identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AdminKeyId(pub Uuid);

/// Leak-track identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LeakTrackId(pub Uuid);

/// Invite record.
///
/// `invite_hash` is the lookup key everywhere; the row ID exists for listing
/// and foreign references only.
#[derive(Clone, Debug)]
pub struct Invite {
    pub id: InviteId,
    pub email: String,
    pub invite_hash: String,
    /// Issuer signature over `invite_hash` (hex).
    pub signature: String,
    pub nonce: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>, // None = never expires
    pub is_active: bool,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

/// Parameters for creating an invite
#[derive(Clone, Debug)]
pub struct CreateInviteParams {
    pub email: String,
    pub invite_hash: String,
    pub signature: String,
    pub nonce: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One-time delivery token pointing at an invite.
#[derive(Clone, Debug)]
pub struct InviteToken {
    pub token: String,
    pub invite_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

/// Parameters for creating a one-time invite token
#[derive(Clone, Debug)]
pub struct CreateInviteTokenParams {
    pub token: String,
    pub invite_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Session record.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,
    pub invite_hash: String,
    /// Server-derived fingerprint (unique per session).
    pub fingerprint: String,
    pub ip_address: String,
    pub user_agent: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
}

/// Parameters for creating a session
#[derive(Clone, Debug)]
pub struct CreateSessionParams {
    pub invite_hash: String,
    pub fingerprint: String,
    pub ip_address: String,
    pub user_agent: String,
}

/// First-use IP binding for an invite (one row per invite).
#[derive(Clone, Debug)]
pub struct IpBinding {
    pub invite_hash: String,
    pub bound_ip: String,
    pub bound_at: DateTime<Utc>,
}

/// Allow-listed operator key.
#[derive(Clone, Debug)]
pub struct AdminKey {
    pub id: AdminKeyId,
    /// Hex-encoded Ed25519 public key (unique).
    pub public_key: String,
    pub name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Parameters for registering an admin key
#[derive(Clone, Debug)]
pub struct CreateAdminKeyParams {
    pub public_key: String,
    pub name: Option<String>,
}

/// Canary hit record for leak tracking.
#[derive(Clone, Debug)]
pub struct LeakTrack {
    pub id: LeakTrackId,
    pub fingerprint: String,
    pub resource: String,
    pub signature: String,
    pub ip_address: String,
    pub user_agent: String,
    pub accessed_at: DateTime<Utc>,
}

/// Parameters for recording a canary hit
#[derive(Clone, Debug)]
pub struct CreateLeakTrackParams {
    pub fingerprint: String,
    pub resource: String,
    pub signature: String,
    pub ip_address: String,
    pub user_agent: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_ids_equality_and_hash() {
        use std::collections::HashSet;

        let uuid = Uuid::new_v4();
        assert_eq!(InviteId(uuid), InviteId(uuid));
        assert_ne!(InviteId(uuid), InviteId(Uuid::new_v4()));

        let mut set = HashSet::new();
        set.insert(SessionId(uuid));
        assert!(set.contains(&SessionId(uuid)));
    }

    #[test]
    fn typed_ids_inner_access() {
        let uuid = Uuid::new_v4();
        assert_eq!(InviteId(uuid).0, uuid);
        assert_eq!(SessionId(uuid).0, uuid);
        assert_eq!(AdminKeyId(uuid).0, uuid);
        assert_eq!(LeakTrackId(uuid).0, uuid);
    }
}
