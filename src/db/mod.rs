use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

pub mod keys;
pub mod memory;
pub mod redis;

pub use keys::Keys;
pub use memory::MemoryStore;
pub use redis::RedisStore;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out")]
    Timeout,

    #[error("stored value could not be (de)serialized: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result of [`TtlStore::compare_and_swap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Swap {
    Swapped,
    /// Someone else wrote the key first; nothing was written.
    Changed,
    Missing,
}

/// Shared key/value store with per-key expiry.
///
/// Every component that keeps security state (blacklist, refresh ledger,
/// session registry) goes through this trait, so the process itself holds no
/// revocation state of its own.
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value and TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically replaces the value at `key` with `value`, keeping its TTL,
    /// only if the current value is exactly `expected`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<Swap, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Adds `member` to the set at `key`. The set TTL is extended to `ttl`
    /// if that is longer than what remains, never shortened.
    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

pub async fn create_db_pool(db_url: &str) -> Result<SqlitePool, sqlx::Error> {
    info!(url = %db_url, "Connecting to user database");

    let pool = SqlitePoolOptions::new().connect(db_url).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
