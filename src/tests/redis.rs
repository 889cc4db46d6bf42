use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::helpers::init_tracing;
use crate::db::{Keys, RedisStore, Swap, TtlStore};
use crate::models::refresh_token::NewRefreshToken;
use crate::services::refresh_service::{LedgerError, RefreshTokenService};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Run with a local Redis: `cargo test -- --ignored`
#[tokio::test]
#[ignore]
async fn test_redis_store_round_trip() {
    init_tracing();
    let store = RedisStore::connect(&redis_url(), Duration::from_millis(500))
        .await
        .expect("redis reachable");
    let key = format!("it:{}", Uuid::new_v4());

    store.set_ex(&key, "v1", Duration::from_secs(30)).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("v1"));
    assert!(store.exists(&key).await.unwrap());

    assert_eq!(store.compare_and_swap(&key, "v1", "v2").await.unwrap(), Swap::Swapped);
    assert_eq!(store.compare_and_swap(&key, "v1", "v3").await.unwrap(), Swap::Changed);
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("v2"));
    assert_eq!(
        store
            .compare_and_swap(&format!("{key}:missing"), "v", "w")
            .await
            .unwrap(),
        Swap::Missing
    );

    let set = format!("{key}:set");
    store.set_add(&set, "a", Duration::from_secs(30)).await.unwrap();
    store.set_add(&set, "b", Duration::from_secs(1)).await.unwrap();
    store.set_remove(&set, "a").await.unwrap();
    assert_eq!(store.set_members(&set).await.unwrap(), vec!["b".to_string()]);

    store.delete(&[key.clone(), set.clone()]).await.unwrap();
    assert!(store.get(&key).await.unwrap().is_none());
    assert!(store.set_members(&set).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_replay_detection_against_redis() {
    init_tracing();
    let store = RedisStore::connect(&redis_url(), Duration::from_millis(500))
        .await
        .expect("redis reachable");
    let ledger = RefreshTokenService::new(
        Arc::new(store),
        Keys::new(format!("it-{}", Uuid::new_v4())),
        Duration::from_secs(60),
    );

    let (t1, _) = ledger
        .generate(NewRefreshToken {
            user_id: 1,
            session_id: "s-1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    ledger.mark_used(&t1).await.unwrap();

    assert!(matches!(
        ledger.validate(&t1).await,
        Err(LedgerError::ReplayDetected { .. })
    ));
    assert!(matches!(
        ledger.validate(&t1).await,
        Err(LedgerError::InvalidOrExpired)
    ));
}

#[tokio::test]
#[ignore]
async fn test_unreachable_redis_is_an_error() {
    init_tracing();
    let result = RedisStore::connect("redis://127.0.0.1:1", Duration::from_millis(200)).await;
    assert!(result.is_err());
}
