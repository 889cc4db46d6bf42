use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::db::{Keys, StoreError, TtlStore};

#[derive(Debug, Clone, Error)]
pub enum BlacklistError {
    #[error("token id must not be empty")]
    EmptyJti,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Revoked token ids, each kept until the token would have expired anyway.
///
/// Only the existence of the key matters; the stored value is the expiry
/// timestamp and is there for whoever is reading the store by hand.
#[derive(Clone)]
pub struct BlacklistService {
    store: Arc<dyn TtlStore>,
    keys: Keys,
}

impl BlacklistService {
    pub fn new(store: Arc<dyn TtlStore>, keys: Keys) -> Self {
        Self { store, keys }
    }

    #[instrument(skip(self))]
    pub async fn add(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), BlacklistError> {
        if jti.is_empty() {
            return Err(BlacklistError::EmptyJti);
        }

        let remaining = expires_at - Utc::now();
        let Ok(ttl) = remaining.to_std() else {
            debug!("Token already expired, nothing to blacklist");
            return Ok(());
        };
        if ttl.is_zero() {
            return Ok(());
        }

        let marker = expires_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        self.store
            .set_ex(&self.keys.blacklist(jti), &marker, ttl)
            .await?;

        info!(ttl_secs = ttl.as_secs(), "Token blacklisted");
        Ok(())
    }

    pub async fn is_revoked(&self, jti: &str) -> Result<bool, BlacklistError> {
        if jti.is_empty() {
            return Err(BlacklistError::EmptyJti);
        }
        Ok(self.store.exists(&self.keys.blacklist(jti)).await?)
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, jti: &str) -> Result<(), BlacklistError> {
        if jti.is_empty() {
            return Err(BlacklistError::EmptyJti);
        }
        self.store.delete(&[self.keys.blacklist(jti)]).await?;
        info!("Token removed from blacklist");
        Ok(())
    }
}
