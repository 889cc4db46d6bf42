use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ledger entry for one opaque refresh token.
///
/// Stored under the SHA-256 of the raw token; the raw value itself is never
/// persisted. `used` only ever flips from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub user_id: i64,
    pub session_id: String,
    pub family_id: String,
    /// Hash of the token this one was rotated from; `None` for a family root.
    pub parent_hash: Option<String>,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub user_agent: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    pub fn is_root(&self) -> bool {
        self.parent_hash.is_none()
    }
}

/// Inputs for minting a refresh token.
#[derive(Debug, Clone, Default)]
pub struct NewRefreshToken {
    pub user_id: i64,
    pub session_id: String,
    pub family_id: String,
    pub parent_hash: Option<String>,
    pub ip: String,
    pub user_agent: String,
}
