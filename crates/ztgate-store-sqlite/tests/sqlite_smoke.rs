use chrono::{Duration, Utc};
use ztgate_audit::{AuditEvent, AuditEventType, AuditLog, AuditLogFilter};
use ztgate_storage::{CreateInviteParams, CreateSessionParams, Store};
use ztgate_store_sqlite::SqliteStore;

#[tokio::test]
async fn end_to_end_smoke() {
    let store = SqliteStore::open_in_memory().await.unwrap();

    let invite = store
        .create_invite(&CreateInviteParams {
            email: "alice@example.com".to_string(),
            invite_hash: "hash-1".to_string(),
            signature: "sig-1".to_string(),
            nonce: "nonce-1".to_string(),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        })
        .await
        .unwrap();
    assert_eq!(invite.email, "alice@example.com");

    let binding = store.bind_ip("hash-1", "198.51.100.7").await.unwrap();
    assert_eq!(binding.bound_ip, "198.51.100.7");

    let session = store
        .create_session(&CreateSessionParams {
            invite_hash: "hash-1".to_string(),
            fingerprint: "fp-1".to_string(),
            ip_address: "198.51.100.7".to_string(),
            user_agent: "smoke".to_string(),
        })
        .await
        .unwrap();
    assert!(session.is_active);

    store
        .record(
            AuditEvent::builder(AuditEventType::SessionCreated)
                .invite_hash("hash-1")
                .session_fingerprint("fp-1")
                .ip_address("198.51.100.7")
                .build(),
        )
        .await
        .unwrap();

    let events = store
        .query(AuditLogFilter::new().invite_hash("hash-1"))
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, AuditEventType::SessionCreated);
}
