//! Opaque refresh tokens, rotation families, and replay detection.
//!
//! A refresh token is 256 random bits handed to the client once. The store
//! only ever sees its SHA-256. Every rotation consumes the presented token and
//! mints a child in the same family; presenting a consumed token again kills
//! the whole family.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::{Keys, StoreError, Swap, TtlStore};
use crate::models::refresh_token::{NewRefreshToken, RefreshTokenRecord};

/// Size of a raw refresh token in bytes (256 bits of entropy).
pub const REFRESH_TOKEN_BYTES: usize = 32;

const MARK_USED_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("refresh token is invalid or expired")]
    InvalidOrExpired,

    #[error("refresh token reuse detected")]
    ReplayDetected {
        user_id: i64,
        session_id: String,
        family_id: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    fn replay(record: RefreshTokenRecord) -> Self {
        LedgerError::ReplayDetected {
            user_id: record.user_id,
            session_id: record.session_id,
            family_id: record.family_id,
        }
    }
}

/// Fresh URL-safe token from the OS CSPRNG.
pub fn generate_secure_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex SHA-256 of the raw token; this is the ledger key.
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

#[derive(Clone)]
pub struct RefreshTokenService {
    store: Arc<dyn TtlStore>,
    keys: Keys,
    ttl: Duration,
}

impl RefreshTokenService {
    pub fn new(store: Arc<dyn TtlStore>, keys: Keys, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a new active token. An empty `family_id` starts a new family;
    /// a missing or empty `parent_hash` marks the family root.
    ///
    /// Returns the raw token (for the client) and the stored record.
    #[instrument(skip(self, new), fields(user_id = new.user_id, session_id = %new.session_id))]
    pub async fn generate(
        &self,
        new: NewRefreshToken,
    ) -> Result<(String, RefreshTokenRecord), LedgerError> {
        let raw = generate_secure_token();
        let token_hash = hash_token(&raw);
        let issued_at = Utc::now();
        let lifetime = chrono::Duration::from_std(self.ttl)
            .map_err(|e| StoreError::Serialization(format!("refresh ttl out of range: {e}")))?;

        let family_id = if new.family_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            new.family_id
        };

        let record = RefreshTokenRecord {
            token_hash: token_hash.clone(),
            user_id: new.user_id,
            session_id: new.session_id,
            family_id,
            parent_hash: new.parent_hash.filter(|hash| !hash.is_empty()),
            ip: new.ip,
            user_agent: new.user_agent,
            issued_at,
            expires_at: issued_at + lifetime,
            used: false,
        };

        // Family membership first, so a record never exists outside its family.
        self.store
            .set_add(&self.keys.family(&record.family_id), &token_hash, self.ttl)
            .await?;
        let json = serde_json::to_string(&record).map_err(StoreError::from)?;
        self.store
            .set_ex(&self.keys.refresh(&token_hash), &json, self.ttl)
            .await?;

        debug!(
            family_id = %record.family_id,
            token = short(&token_hash),
            root = record.is_root(),
            "Refresh token minted"
        );
        Ok((raw, record))
    }

    /// Look up a presented token.
    ///
    /// A token that was already used is a replay: its whole family is revoked
    /// before `ReplayDetected` is returned.
    #[instrument(skip_all)]
    pub async fn validate(&self, raw: &str) -> Result<RefreshTokenRecord, LedgerError> {
        let record = self
            .find(raw)
            .await?
            .ok_or(LedgerError::InvalidOrExpired)?;

        if record.is_expired() {
            return Err(LedgerError::InvalidOrExpired);
        }

        if record.used {
            warn!(
                user_id = record.user_id,
                session_id = %record.session_id,
                family_id = %record.family_id,
                token = short(&record.token_hash),
                "Refresh token replay detected, revoking family"
            );
            self.revoke_family(&record.family_id).await?;
            return Err(LedgerError::replay(record));
        }

        Ok(record)
    }

    /// Consume a token. Must run after the successor is minted and before it
    /// is handed out.
    ///
    /// The `used` flip is a compare-and-swap on the stored record, so of two
    /// concurrent consumers exactly one wins. The loser sees the token as
    /// used, which is a replay.
    #[instrument(skip_all)]
    pub async fn mark_used(&self, raw: &str) -> Result<(), LedgerError> {
        if raw.is_empty() {
            return Err(LedgerError::InvalidOrExpired);
        }
        let key = self.keys.refresh(&hash_token(raw));

        for _ in 0..MARK_USED_ATTEMPTS {
            let current = self
                .store
                .get(&key)
                .await?
                .ok_or(LedgerError::InvalidOrExpired)?;
            let mut record: RefreshTokenRecord =
                serde_json::from_str(&current).map_err(StoreError::from)?;

            if record.used {
                warn!(
                    family_id = %record.family_id,
                    token = short(&record.token_hash),
                    "Refresh token consumed twice, revoking family"
                );
                self.revoke_family(&record.family_id).await?;
                return Err(LedgerError::replay(record));
            }

            record.used = true;
            let updated = serde_json::to_string(&record).map_err(StoreError::from)?;
            match self.store.compare_and_swap(&key, &current, &updated).await? {
                Swap::Swapped => {
                    debug!(family_id = %record.family_id, token = short(&record.token_hash), "Refresh token consumed");
                    return Ok(());
                }
                Swap::Missing => return Err(LedgerError::InvalidOrExpired),
                Swap::Changed => {
                    debug!(token = short(&record.token_hash), "Record changed underneath us, re-reading");
                }
            }
        }

        Err(LedgerError::InvalidOrExpired)
    }

    /// Delete every token in a family. Idempotent.
    #[instrument(skip(self))]
    pub async fn revoke_family(&self, family_id: &str) -> Result<(), LedgerError> {
        let family_key = self.keys.family(family_id);
        let members = self.store.set_members(&family_key).await?;

        let mut doomed: Vec<String> = members.iter().map(|hash| self.keys.refresh(hash)).collect();
        doomed.push(family_key);
        self.store.delete(&doomed).await?;

        info!(tokens = members.len(), "Refresh token family revoked");
        Ok(())
    }

    /// Delete one token and leave the rest of its family alone.
    #[instrument(skip_all)]
    pub async fn revoke_token(&self, raw: &str) -> Result<(), LedgerError> {
        let token_hash = hash_token(raw);
        let record = self.find(raw).await?;

        self.store.delete(&[self.keys.refresh(&token_hash)]).await?;
        if let Some(record) = record {
            self.store
                .set_remove(&self.keys.family(&record.family_id), &token_hash)
                .await?;
            info!(family_id = %record.family_id, token = short(&token_hash), "Refresh token revoked");
        }
        Ok(())
    }

    /// Read a record without any side effects.
    pub async fn find(&self, raw: &str) -> Result<Option<RefreshTokenRecord>, LedgerError> {
        if raw.is_empty() {
            return Ok(None);
        }
        let Some(json) = self.store.get(&self.keys.refresh(&hash_token(raw))).await? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&json).map_err(StoreError::from)?;
        Ok(Some(record))
    }

    /// True when the stored and current client differ in IP or user agent.
    /// A value that is empty on either side never counts as a difference.
    ///
    /// Advisory only; the caller picks the response.
    pub fn detect_anomalies(record: &RefreshTokenRecord, current_ip: &str, current_ua: &str) -> bool {
        let differs = |stored: &str, current: &str| {
            !stored.is_empty() && !current.is_empty() && stored != current
        };
        differs(&record.ip, current_ip) || differs(&record.user_agent, current_ua)
    }
}
