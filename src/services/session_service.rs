use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::db::{Keys, StoreError, TtlStore};
use crate::models::session::SessionRecord;

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("invalid session: {0}")]
    Validation(String),

    #[error("session not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Active logins per user, one record per device.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn TtlStore>,
    keys: Keys,
}

impl SessionService {
    pub fn new(store: Arc<dyn TtlStore>, keys: Keys) -> Self {
        Self { store, keys }
    }

    #[instrument(skip(self, session), fields(session_id = %session.session_id, user_id = session.user_id))]
    pub async fn create(&self, session: &SessionRecord) -> Result<(), SessionError> {
        if session.session_id.is_empty() {
            return Err(SessionError::Validation("session id is required".into()));
        }
        if session.user_id == 0 {
            return Err(SessionError::Validation("user id is required".into()));
        }
        let ttl = (session.expires_at - Utc::now())
            .to_std()
            .ok()
            .filter(|ttl| !ttl.is_zero())
            .ok_or_else(|| SessionError::Validation("expiry must be in the future".into()))?;

        let json = serde_json::to_string(session).map_err(StoreError::from)?;
        // Set membership first, so revoke_all can always find the record.
        self.store
            .set_add(
                &self.keys.user_sessions(session.user_id),
                &session.session_id,
                ttl,
            )
            .await?;
        self.store
            .set_ex(&self.keys.session(&session.session_id), &json, ttl)
            .await?;

        info!("Session created");
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<SessionRecord, SessionError> {
        let json = self
            .store
            .get(&self.keys.session(session_id))
            .await?
            .ok_or(SessionError::NotFound)?;
        Ok(serde_json::from_str(&json).map_err(StoreError::from)?)
    }

    pub async fn exists(&self, session_id: &str) -> Result<bool, SessionError> {
        Ok(self.store.exists(&self.keys.session(session_id)).await?)
    }

    /// Idempotent: revoking a missing session is not an error.
    #[instrument(skip(self))]
    pub async fn revoke(&self, session_id: &str) -> Result<(), SessionError> {
        let session = match self.get(session_id).await {
            Ok(session) => session,
            Err(SessionError::NotFound) => {
                debug!("Session already gone");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        self.store.delete(&[self.keys.session(session_id)]).await?;
        self.store
            .set_remove(&self.keys.user_sessions(session.user_id), session_id)
            .await?;

        info!(user_id = session.user_id, "Session revoked");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn revoke_all(&self, user_id: i64) -> Result<(), SessionError> {
        let set_key = self.keys.user_sessions(user_id);
        let session_ids = self.store.set_members(&set_key).await?;

        let mut doomed: Vec<String> = session_ids
            .iter()
            .map(|session_id| self.keys.session(session_id))
            .collect();
        doomed.push(set_key);
        self.store.delete(&doomed).await?;

        info!(sessions = session_ids.len(), "All sessions revoked");
        Ok(())
    }

    /// Live sessions of a user, oldest first. Ids whose record already
    /// expired are skipped and pruned from the user's set.
    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<SessionRecord>, SessionError> {
        let set_key = self.keys.user_sessions(user_id);
        let session_ids = self.store.set_members(&set_key).await?;

        let mut sessions = Vec::with_capacity(session_ids.len());
        for session_id in session_ids {
            match self.get(&session_id).await {
                Ok(session) => sessions.push(session),
                Err(SessionError::NotFound) => {
                    debug!(session_id = %session_id, "Skipping expired session");
                    self.store.set_remove(&set_key, &session_id).await?;
                }
                Err(e) => return Err(e),
            }
        }

        sessions.sort_by_key(|session| session.created_at);
        Ok(sessions)
    }
}
