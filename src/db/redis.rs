use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use tracing::{error, info, instrument};

use super::{StoreError, Swap, TtlStore};

// Adds a member and only ever extends the set's TTL.
const SET_ADD_EXTEND_TTL: &str = r"
redis.call('SADD', KEYS[1], ARGV[1])
local ttl = redis.call('TTL', KEYS[1])
if ttl < tonumber(ARGV[2]) then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 1
";

// Replaces the value only if it still equals ARGV[1]; the TTL is kept.
const COMPARE_AND_SWAP: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
    return -1
end
if current ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
return 1
";

#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    timeout: Duration,
}

impl RedisStore {
    #[instrument]
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, RedisError> {
        info!(url = %redis_url, "Initializing Redis connection");

        let client = Client::open(redis_url).map_err(|e| {
            error!(error = %e, "Failed to create Redis client");
            e
        })?;
        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!(error = %e, "Failed to open Redis connection");
            e
        })?;

        info!("Redis connection established");
        Ok(Self { manager, timeout })
    }

    /// Runs one store call under the configured deadline.
    async fn bounded<T, F>(&self, op: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(op, error = %e, "Redis command failed");
                Err(StoreError::Unavailable(e.to_string()))
            }
            Err(_) => {
                error!(op, timeout_ms = self.timeout.as_millis() as u64, "Redis command timed out");
                Err(StoreError::Timeout)
            }
        }
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    // Redis rejects a zero expiry; round partial seconds up.
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl TtlStore for RedisStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut con = self.manager.clone();
        self.bounded("set_ex", con.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)))
            .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<Swap, StoreError> {
        let mut con = self.manager.clone();
        let script = Script::new(COMPARE_AND_SWAP);
        let reply: i64 = self
            .bounded(
                "compare_and_swap",
                script
                    .key(key)
                    .arg(expected)
                    .arg(value)
                    .invoke_async::<_, i64>(&mut con),
            )
            .await?;
        Ok(match reply {
            1 => Swap::Swapped,
            0 => Swap::Changed,
            _ => Swap::Missing,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.manager.clone();
        self.bounded("get", con.get::<_, Option<String>>(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut con = self.manager.clone();
        self.bounded("exists", con.exists::<_, bool>(key)).await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut con = self.manager.clone();
        self.bounded("delete", con.del::<_, ()>(keys)).await
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut con = self.manager.clone();
        let script = Script::new(SET_ADD_EXTEND_TTL);
        self.bounded(
            "set_add",
            script
                .key(key)
                .arg(member)
                .arg(ttl_secs(ttl))
                .invoke_async::<_, i64>(&mut con),
        )
        .await
        .map(|_| ())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut con = self.manager.clone();
        self.bounded("set_remove", con.srem::<_, _, ()>(key, member))
            .await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut con = self.manager.clone();
        self.bounded("set_members", con.smembers::<_, Vec<String>>(key))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_rounds_up_partial_seconds() {
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
        assert_eq!(ttl_secs(Duration::from_millis(1)), 1);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }
}
