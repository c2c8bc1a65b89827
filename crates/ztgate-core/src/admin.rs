//! Operator authentication: nonce challenge/response against an allow-list
//! of registered operator keys.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use ztgate_audit::{AuditEvent, AuditEventType, AuditLog};
use ztgate_storage::{Store, StoreError};

use crate::{prefix, record, ClientInfo};

pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::minutes(5);
pub const DEFAULT_SESSION_TTL: Duration = Duration::minutes(60);

/// A one-shot nonce an operator must sign to prove key possession.
#[derive(Clone, Debug)]
pub struct Challenge {
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
}

/// Short-lived bearer token minted on successful operator auth.
#[derive(Clone, Debug)]
pub struct OperatorSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdminDenyReason {
    /// Nonce unknown, already consumed, or past its TTL.
    ChallengeInvalid,
    /// Key not registered, or registered but revoked.
    KeyNotAuthorized,
    SignatureInvalid,
}

impl std::fmt::Display for AdminDenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AdminDenyReason::ChallengeInvalid => "challenge_invalid",
            AdminDenyReason::KeyNotAuthorized => "key_not_authorized",
            AdminDenyReason::SignatureInvalid => "signature_invalid",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug)]
pub enum AuthOutcome {
    Granted(OperatorSession),
    Denied(AdminDenyReason),
}

/// Storage seam for outstanding challenges.
///
/// `consume` must be atomic: concurrent calls with the same nonce yield the
/// challenge to at most one caller.
#[async_trait::async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn put(&self, challenge: Challenge) -> Result<(), StoreError>;

    /// Remove and return the challenge for `nonce`, if present.
    async fn consume(&self, nonce: &str) -> Result<Option<Challenge>, StoreError>;

    /// Drop every challenge that expired before `now`.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<(), StoreError>;
}

/// In-process challenge store. Challenges are single-use and short-lived, so
/// a mutexed map is enough for a single instance.
#[derive(Default)]
pub struct MemoryChallengeStore {
    inner: Mutex<HashMap<String, Challenge>>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn put(&self, challenge: Challenge) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        inner.insert(challenge.nonce.clone(), challenge);
        Ok(())
    }

    async fn consume(&self, nonce: &str) -> Result<Option<Challenge>, StoreError> {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        Ok(inner.remove(nonce))
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        inner.retain(|_, c| c.expires_at >= now);
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Backend("challenge store mutex poisoned".into())
}

/// Challenge/response authentication for operators.
///
/// An operator requests a challenge, signs the nonce with their private key,
/// and presents (public key, nonce, signature). The key must be on the
/// registered allow-list and active. Success mints a bearer token with an
/// absolute expiry.
pub struct AdminChallengeAuth {
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditLog>,
    challenges: Arc<dyn ChallengeStore>,
    operator_tokens: Mutex<HashMap<String, DateTime<Utc>>>,
    challenge_ttl: Duration,
    session_ttl: Duration,
}

impl AdminChallengeAuth {
    pub fn new(
        store: Arc<dyn Store>,
        audit: Arc<dyn AuditLog>,
        challenges: Arc<dyn ChallengeStore>,
    ) -> Self {
        Self {
            store,
            audit,
            challenges,
            operator_tokens: Mutex::new(HashMap::new()),
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_ttls(mut self, challenge_ttl: Duration, session_ttl: Duration) -> Self {
        self.challenge_ttl = challenge_ttl;
        self.session_ttl = session_ttl;
        self
    }

    pub async fn issue_challenge(&self, client: &ClientInfo) -> Result<Challenge, StoreError> {
        let now = Utc::now();
        self.challenges.sweep(now).await?;

        let challenge = Challenge {
            nonce: ztgate_crypto::generate_admin_challenge(),
            expires_at: now + self.challenge_ttl,
        };
        self.challenges.put(challenge.clone()).await?;

        record(
            self.audit.as_ref(),
            AuditEvent::builder(AuditEventType::AdminChallengeIssued)
                .ip_address(&client.ip)
                .user_agent(&client.user_agent)
                .detail("nonce_prefix", prefix(&challenge.nonce))
                .build(),
        )
        .await;
        Ok(challenge)
    }

    pub async fn verify(
        &self,
        public_key: &str,
        nonce: &str,
        signature: &str,
        client: &ClientInfo,
    ) -> Result<AuthOutcome, StoreError> {
        let now = Utc::now();

        // consume before sweeping so an expired nonce is still distinguishable
        // from one that never existed
        let challenge = match self.challenges.consume(nonce).await? {
            Some(c) if c.expires_at >= now => c,
            Some(_) => {
                self.challenges.sweep(now).await?;
                return Ok(self
                    .deny(
                        AdminDenyReason::ChallengeInvalid,
                        "challenge_expired",
                        public_key,
                        client,
                    )
                    .await);
            }
            None => {
                self.challenges.sweep(now).await?;
                return Ok(self
                    .deny(
                        AdminDenyReason::ChallengeInvalid,
                        "challenge_not_found",
                        public_key,
                        client,
                    )
                    .await);
            }
        };
        self.challenges.sweep(now).await?;

        let key = match self.store.get_admin_key(public_key).await {
            Ok(key) => key,
            Err(StoreError::NotFound) => {
                return Ok(self
                    .deny(
                        AdminDenyReason::KeyNotAuthorized,
                        "key_not_registered",
                        public_key,
                        client,
                    )
                    .await);
            }
            Err(e) => return Err(e),
        };
        if !key.is_active {
            return Ok(self
                .deny(
                    AdminDenyReason::KeyNotAuthorized,
                    "key_revoked",
                    public_key,
                    client,
                )
                .await);
        }

        if !ztgate_crypto::verify(&challenge.nonce, signature, public_key) {
            return Ok(self
                .deny(
                    AdminDenyReason::SignatureInvalid,
                    "signature_invalid",
                    public_key,
                    client,
                )
                .await);
        }

        let session = OperatorSession {
            token: ztgate_crypto::generate_nonce(32),
            expires_at: now + self.session_ttl,
        };
        self.operator_tokens
            .lock()
            .map_err(poisoned)?
            .insert(session.token.clone(), session.expires_at);

        record(
            self.audit.as_ref(),
            AuditEvent::builder(AuditEventType::AdminAuthSuccess)
                .ip_address(&client.ip)
                .user_agent(&client.user_agent)
                .detail("key_prefix", prefix(public_key))
                .build(),
        )
        .await;
        tracing::info!(key = prefix(public_key), "operator authenticated");
        Ok(AuthOutcome::Granted(session))
    }

    /// Check an operator bearer token. Every expired token is dropped on each
    /// call, not just the one being looked up.
    pub fn verify_operator_token(&self, token: &str) -> bool {
        let now = Utc::now();
        let mut tokens = match self.operator_tokens.lock() {
            Ok(tokens) => tokens,
            Err(_) => return false,
        };
        tokens.retain(|_, expires_at| *expires_at >= now);
        tokens.contains_key(token)
    }

    async fn deny(
        &self,
        reason: AdminDenyReason,
        audit_reason: &str,
        public_key: &str,
        client: &ClientInfo,
    ) -> AuthOutcome {
        record(
            self.audit.as_ref(),
            AuditEvent::builder(AuditEventType::AdminAuthFailed)
                .ip_address(&client.ip)
                .user_agent(&client.user_agent)
                .detail("reason", audit_reason)
                .detail("key_prefix", prefix(public_key))
                .build(),
        )
        .await;
        AuthOutcome::Denied(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ztgate_audit::AuditLogFilter;
    use ztgate_crypto::Keypair;
    use ztgate_storage::CreateAdminKeyParams;
    use ztgate_store_sqlite::SqliteStore;

    struct Fixture {
        store: Arc<SqliteStore>,
        auth: AdminChallengeAuth,
        keypair: Keypair,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let keypair = Keypair::generate();
        store
            .add_admin_key(&CreateAdminKeyParams {
                public_key: keypair.public_key_hex(),
                name: Some("ops".into()),
            })
            .await
            .unwrap();
        let auth = AdminChallengeAuth::new(
            store.clone(),
            store.clone(),
            Arc::new(MemoryChallengeStore::new()),
        );
        Fixture {
            store,
            auth,
            keypair,
        }
    }

    fn operator() -> ClientInfo {
        ClientInfo::new("192.0.2.1", "ops-cli")
    }

    #[tokio::test]
    async fn challenge_round_trip_grants_operator_session() {
        let f = fixture().await;

        let challenge = f.auth.issue_challenge(&operator()).await.unwrap();
        assert_eq!(challenge.nonce.len(), 128);

        let sig = f.keypair.sign(&challenge.nonce);
        let outcome = f
            .auth
            .verify(&f.keypair.public_key_hex(), &challenge.nonce, &sig, &operator())
            .await
            .unwrap();
        let session = match outcome {
            AuthOutcome::Granted(s) => s,
            other => panic!("expected grant, got {:?}", other),
        };
        assert!(f.auth.verify_operator_token(&session.token));

        use ztgate_audit::AuditLog;
        let events = f
            .store
            .query(AuditLogFilter::new().event_type(AuditEventType::AdminAuthSuccess))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn challenge_is_single_use() {
        let f = fixture().await;
        let challenge = f.auth.issue_challenge(&operator()).await.unwrap();
        let sig = f.keypair.sign(&challenge.nonce);
        let pk = f.keypair.public_key_hex();

        let first = f
            .auth
            .verify(&pk, &challenge.nonce, &sig, &operator())
            .await
            .unwrap();
        assert!(matches!(first, AuthOutcome::Granted(_)));

        let second = f
            .auth
            .verify(&pk, &challenge.nonce, &sig, &operator())
            .await
            .unwrap();
        assert!(matches!(
            second,
            AuthOutcome::Denied(AdminDenyReason::ChallengeInvalid)
        ));
    }

    #[tokio::test]
    async fn unknown_nonce_is_denied_as_not_found() {
        let f = fixture().await;
        let sig = f.keypair.sign("no-such-nonce");

        let outcome = f
            .auth
            .verify(&f.keypair.public_key_hex(), "no-such-nonce", &sig, &operator())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AuthOutcome::Denied(AdminDenyReason::ChallengeInvalid)
        ));

        use ztgate_audit::AuditLog;
        let events = f
            .store
            .query(AuditLogFilter::new().event_type(AuditEventType::AdminAuthFailed))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].details.get("reason").unwrap(),
            "challenge_not_found"
        );
    }

    #[tokio::test]
    async fn expired_challenge_is_denied_as_expired() {
        let f = fixture().await;
        let auth = AdminChallengeAuth::new(
            f.store.clone(),
            f.store.clone(),
            Arc::new(MemoryChallengeStore::new()),
        )
        .with_ttls(Duration::milliseconds(-1), DEFAULT_SESSION_TTL);

        let challenge = auth.issue_challenge(&operator()).await.unwrap();
        let sig = f.keypair.sign(&challenge.nonce);
        let outcome = auth
            .verify(&f.keypair.public_key_hex(), &challenge.nonce, &sig, &operator())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AuthOutcome::Denied(AdminDenyReason::ChallengeInvalid)
        ));

        use ztgate_audit::AuditLog;
        let events = f
            .store
            .query(AuditLogFilter::new().event_type(AuditEventType::AdminAuthFailed))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].details.get("reason").unwrap(), "challenge_expired");
    }

    #[tokio::test]
    async fn multibyte_public_key_is_denied_not_panicked() {
        let f = fixture().await;

        // byte 16 of this key falls inside a multi-byte character
        let key = format!("{}é-key", "a".repeat(15));
        let outcome = f
            .auth
            .verify(&key, "no-such-nonce", "sig", &operator())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AuthOutcome::Denied(AdminDenyReason::ChallengeInvalid)
        ));
    }

    #[tokio::test]
    async fn unregistered_key_is_denied() {
        let f = fixture().await;
        let rogue = Keypair::generate();

        let challenge = f.auth.issue_challenge(&operator()).await.unwrap();
        let sig = rogue.sign(&challenge.nonce);
        let outcome = f
            .auth
            .verify(&rogue.public_key_hex(), &challenge.nonce, &sig, &operator())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AuthOutcome::Denied(AdminDenyReason::KeyNotAuthorized)
        ));
    }

    #[tokio::test]
    async fn revoked_key_is_denied() {
        let f = fixture().await;
        f.store
            .set_admin_key_active(&f.keypair.public_key_hex(), false)
            .await
            .unwrap();

        let challenge = f.auth.issue_challenge(&operator()).await.unwrap();
        let sig = f.keypair.sign(&challenge.nonce);
        let outcome = f
            .auth
            .verify(&f.keypair.public_key_hex(), &challenge.nonce, &sig, &operator())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AuthOutcome::Denied(AdminDenyReason::KeyNotAuthorized)
        ));
    }

    #[tokio::test]
    async fn wrong_signature_is_denied_and_audited() {
        let f = fixture().await;
        let challenge = f.auth.issue_challenge(&operator()).await.unwrap();

        let outcome = f
            .auth
            .verify(
                &f.keypair.public_key_hex(),
                &challenge.nonce,
                "deadbeef",
                &operator(),
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            AuthOutcome::Denied(AdminDenyReason::SignatureInvalid)
        ));

        use ztgate_audit::AuditLog;
        let events = f
            .store
            .query(AuditLogFilter::new().event_type(AuditEventType::AdminAuthFailed))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].details.get("reason").unwrap(), "signature_invalid");
    }

    #[tokio::test]
    async fn operator_token_expires() {
        let f = fixture().await;
        let auth = AdminChallengeAuth::new(
            f.store.clone(),
            f.store.clone(),
            Arc::new(MemoryChallengeStore::new()),
        )
        .with_ttls(DEFAULT_CHALLENGE_TTL, Duration::milliseconds(-1));

        let challenge = auth.issue_challenge(&operator()).await.unwrap();
        let sig = f.keypair.sign(&challenge.nonce);
        let session = match auth
            .verify(&f.keypair.public_key_hex(), &challenge.nonce, &sig, &operator())
            .await
            .unwrap()
        {
            AuthOutcome::Granted(s) => s,
            other => panic!("expected grant, got {:?}", other),
        };
        assert!(!auth.verify_operator_token(&session.token));
        assert!(!auth.verify_operator_token("never-issued"));
    }

    #[tokio::test]
    async fn sweep_drops_expired_challenges() {
        let store = MemoryChallengeStore::new();
        let now = Utc::now();
        store
            .put(Challenge {
                nonce: "old".into(),
                expires_at: now - Duration::minutes(1),
            })
            .await
            .unwrap();
        store
            .put(Challenge {
                nonce: "fresh".into(),
                expires_at: now + Duration::minutes(1),
            })
            .await
            .unwrap();

        store.sweep(now).await.unwrap();
        assert!(store.consume("old").await.unwrap().is_none());
        assert!(store.consume("fresh").await.unwrap().is_some());
    }
}
