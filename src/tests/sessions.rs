use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::helpers::{init_tracing, test_keys, HookedStore};
use crate::db::{MemoryStore, StoreError, TtlStore};
use crate::models::session::SessionRecord;
use crate::services::session_service::{SessionError, SessionService};

fn registry(store: &MemoryStore) -> SessionService {
    init_tracing();
    SessionService::new(Arc::new(store.clone()), test_keys())
}

fn session(session_id: &str, user_id: i64, expires_in: chrono::Duration) -> SessionRecord {
    let now = Utc::now();
    SessionRecord {
        session_id: session_id.to_string(),
        user_id,
        email: "user@example.com".to_string(),
        role: "user".to_string(),
        ip: "10.0.0.1".to_string(),
        user_agent: "Mozilla/5.0".to_string(),
        created_at: now,
        expires_at: now + expires_in,
    }
}

#[tokio::test]
async fn test_create_then_get_returns_identical_record() {
    let store = MemoryStore::new();
    let sessions = registry(&store);
    let record = session("s-1", 1, chrono::Duration::hours(1));

    sessions.create(&record).await.unwrap();

    assert_eq!(sessions.get("s-1").await.unwrap(), record);
    assert!(sessions.exists("s-1").await.unwrap());

    let members = store.set_members(&test_keys().user_sessions(1)).await.unwrap();
    assert_eq!(members, vec!["s-1".to_string()]);
}

#[tokio::test]
async fn test_create_rejects_past_or_zero_expiry() {
    let store = MemoryStore::new();
    let sessions = registry(&store);

    let past = session("s-1", 1, chrono::Duration::seconds(-5));
    assert!(matches!(
        sessions.create(&past).await,
        Err(SessionError::Validation(_))
    ));

    let mut zero = session("s-2", 1, chrono::Duration::hours(1));
    zero.expires_at = DateTime::<Utc>::default();
    assert!(matches!(
        sessions.create(&zero).await,
        Err(SessionError::Validation(_))
    ));

    assert_eq!(store.len().await, 0);
}

#[tokio::test]
async fn test_create_rejects_missing_ids() {
    let store = MemoryStore::new();
    let sessions = registry(&store);

    let no_session = session("", 1, chrono::Duration::hours(1));
    assert!(matches!(
        sessions.create(&no_session).await,
        Err(SessionError::Validation(_))
    ));

    let no_user = session("s-1", 0, chrono::Duration::hours(1));
    assert!(matches!(
        sessions.create(&no_user).await,
        Err(SessionError::Validation(_))
    ));
}

#[tokio::test]
async fn test_get_missing_session_is_not_found() {
    let store = MemoryStore::new();
    let sessions = registry(&store);

    assert!(matches!(
        sessions.get("nope").await,
        Err(SessionError::NotFound)
    ));
    assert!(!sessions.exists("nope").await.unwrap());
}

#[tokio::test]
async fn test_revoke_is_idempotent_and_updates_user_set() {
    let store = MemoryStore::new();
    let sessions = registry(&store);

    sessions
        .create(&session("s-1", 1, chrono::Duration::hours(1)))
        .await
        .unwrap();
    sessions
        .create(&session("s-2", 1, chrono::Duration::hours(1)))
        .await
        .unwrap();

    sessions.revoke("s-1").await.unwrap();
    sessions.revoke("s-1").await.unwrap();
    sessions.revoke("never-existed").await.unwrap();

    assert!(!sessions.exists("s-1").await.unwrap());
    let remaining: Vec<String> = sessions
        .list_by_user(1)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert_eq!(remaining, vec!["s-2".to_string()]);
}

#[tokio::test]
async fn test_revoke_all_removes_every_session_of_user_only() {
    let store = MemoryStore::new();
    let sessions = registry(&store);

    for id in ["a", "b", "c"] {
        sessions
            .create(&session(id, 1, chrono::Duration::hours(1)))
            .await
            .unwrap();
    }
    sessions
        .create(&session("other", 2, chrono::Duration::hours(1)))
        .await
        .unwrap();

    sessions.revoke_all(1).await.unwrap();

    assert!(sessions.list_by_user(1).await.unwrap().is_empty());
    for id in ["a", "b", "c"] {
        assert!(!sessions.exists(id).await.unwrap());
    }
    assert!(store
        .set_members(&test_keys().user_sessions(1))
        .await
        .unwrap()
        .is_empty());
    assert!(sessions.exists("other").await.unwrap());

    // nothing left to revoke
    sessions.revoke_all(1).await.unwrap();
}

#[tokio::test]
async fn test_list_by_user_is_oldest_first() {
    let store = MemoryStore::new();
    let sessions = registry(&store);

    let mut older = session("older", 1, chrono::Duration::hours(1));
    older.created_at = Utc::now() - chrono::Duration::minutes(10);
    let newer = session("newer", 1, chrono::Duration::hours(1));

    sessions.create(&newer).await.unwrap();
    sessions.create(&older).await.unwrap();

    let ids: Vec<String> = sessions
        .list_by_user(1)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert_eq!(ids, vec!["older".to_string(), "newer".to_string()]);
}

#[tokio::test]
async fn test_list_by_user_skips_expired_records() {
    let store = MemoryStore::new();
    let sessions = registry(&store);

    sessions
        .create(&session("short", 1, chrono::Duration::milliseconds(200)))
        .await
        .unwrap();
    sessions
        .create(&session("long", 1, chrono::Duration::hours(1)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let listed = sessions.list_by_user(1).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_id, "long");

    // the stale id was pruned from the user's set
    let members = store.set_members(&test_keys().user_sessions(1)).await.unwrap();
    assert_eq!(members, vec!["long".to_string()]);
}

#[tokio::test]
async fn test_failed_set_membership_leaves_no_orphan_record() {
    init_tracing();
    let store = MemoryStore::new();
    let hooked = HookedStore::new(store.clone());
    hooked.fail_set_add();
    let sessions = SessionService::new(hooked, test_keys());

    let result = sessions
        .create(&session("s-1", 1, chrono::Duration::hours(1)))
        .await;

    assert!(matches!(
        result,
        Err(SessionError::Store(StoreError::Unavailable(_)))
    ));
    assert!(!sessions.exists("s-1").await.unwrap());
    assert_eq!(store.len().await, 0);
}
