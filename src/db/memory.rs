use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{StoreError, Swap, TtlStore};

#[derive(Debug)]
enum Value {
    Text(String),
    Set(HashSet<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local `TtlStore`.
///
/// Expired entries are dropped lazily on access, which mirrors what a caller
/// observes from Redis. Used by the test suite and for single-node development.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys. Handy for asserting that nothing was written.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.is_live(now));
        entries.len()
    }
}

#[async_trait]
impl TtlStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<Swap, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => match &mut entry.value {
                Value::Text(current) if current.as_str() == expected => {
                    *current = value.to_string();
                    Ok(Swap::Swapped)
                }
                Value::Text(_) => Ok(Swap::Changed),
                Value::Set(_) => Err(StoreError::Serialization(format!(
                    "key {key} holds a set, not a string"
                ))),
            },
            _ => Ok(Swap::Missing),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let value = match entries.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::Text(text) => Some(text.clone()),
                Value::Set(_) => {
                    return Err(StoreError::Serialization(format!(
                        "key {key} holds a set, not a string"
                    )));
                }
            },
            _ => None,
        };
        if value.is_none() {
            entries.remove(key);
        }
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries.get(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let wanted = now + ttl;
        let mut entries = self.entries.lock().await;

        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if !entry.is_live(now) {
                    entry.value = Value::Set(HashSet::new());
                    entry.expires_at = wanted;
                }
            })
            .or_insert_with(|| Entry {
                value: Value::Set(HashSet::new()),
                expires_at: wanted,
            });

        match &mut entry.value {
            Value::Set(members) => {
                members.insert(member.to_string());
            }
            Value::Text(_) => {
                return Err(StoreError::Serialization(format!(
                    "key {key} holds a string, not a set"
                )));
            }
        }
        if entry.expires_at < wanted {
            entry.expires_at = wanted;
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let now_empty = match entries.get_mut(key) {
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => {
                members.remove(member);
                members.is_empty()
            }
            _ => false,
        };
        // Redis drops empty sets
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::Set(members) => Ok(members.iter().cloned().collect()),
                Value::Text(_) => Err(StoreError::Serialization(format!(
                    "key {key} holds a string, not a set"
                ))),
            },
            _ => Ok(Vec::new()),
        }
    }
}
