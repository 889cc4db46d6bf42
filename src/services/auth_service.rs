use bcrypt::{hash, verify};
use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::auth::Identity;
use crate::models::jwt::{Subject, TokenKind, TokenPair};
use crate::models::refresh_token::NewRefreshToken;
use crate::models::session::SessionRecord;
use crate::models::user::{Role, User};
use crate::services::blacklist_service::{BlacklistError, BlacklistService};
use crate::services::jwt_service::{JwtService, TokenError};
use crate::services::refresh_service::{hash_token, LedgerError, RefreshTokenService};
use crate::services::session_service::{SessionError, SessionService};
use crate::utils::client::ClientInfo;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("email already registered")]
    EmailTaken,

    #[error("{0}")]
    Validation(String),

    #[error("session has been revoked")]
    SessionRevoked,

    #[error("not allowed")]
    Forbidden,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("password hashing failed: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Blacklist(#[from] BlacklistError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::SessionRevoked => ApiError::Unauthenticated,
            AuthError::EmailTaken | AuthError::Validation(_) => ApiError::BadRequest(err.to_string()),
            AuthError::Forbidden => ApiError::Forbidden,
            AuthError::Ledger(LedgerError::InvalidOrExpired) => ApiError::Unauthenticated,
            AuthError::Ledger(LedgerError::ReplayDetected { .. }) => ApiError::ReplayDetected,
            AuthError::Session(SessionError::NotFound) => ApiError::Unauthenticated,
            AuthError::Token(
                TokenError::InvalidSignature
                | TokenError::Expired
                | TokenError::NotYetValid
                | TokenError::MalformedToken
                | TokenError::InvalidIssuer,
            ) => ApiError::Unauthenticated,
            other => ApiError::internal(other),
        }
    }
}

/// Result of a refresh-token exchange.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub tokens: TokenPair,
    /// The presenting client differs from the one the token was issued to.
    pub anomaly: bool,
}

/// Login, refresh rotation and logout on top of the signer, ledger,
/// session registry and blacklist.
#[derive(Clone)]
pub struct AuthService {
    pool: SqlitePool,
    jwt: JwtService,
    refresh_tokens: RefreshTokenService,
    sessions: SessionService,
    blacklist: BlacklistService,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(
        pool: SqlitePool,
        jwt: JwtService,
        refresh_tokens: RefreshTokenService,
        sessions: SessionService,
        blacklist: BlacklistService,
        bcrypt_cost: u32,
    ) -> Self {
        Self {
            pool,
            jwt,
            refresh_tokens,
            sessions,
            blacklist,
            bcrypt_cost,
        }
    }

    #[instrument(skip(self, password))]
    pub async fn register(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(AuthError::Validation("a valid email is required".into()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if User::find_by_email(&self.pool, &email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let password_hash = hash(password, self.bcrypt_cost)?;
        let user = match User::create(&self.pool, &email, &password_hash, Role::User).await {
            Ok(user) => user,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(AuthError::EmailTaken);
            }
            Err(e) => return Err(e.into()),
        };

        info!(user_id = user.id, "User registered");
        Ok(user)
    }

    /// Check credentials and open a new session with a fresh token family.
    #[instrument(skip(self, password, client), fields(ip = %client.ip))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<TokenPair, AuthError> {
        let user = User::find_by_email(&self.pool, &email.trim().to_lowercase())
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify(password, &user.password_hash)? {
            warn!(user_id = user.id, "Login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        let session_ttl = chrono::Duration::from_std(self.refresh_tokens.ttl())
            .map_err(|e| AuthError::Validation(format!("refresh ttl out of range: {e}")))?;
        let session = SessionRecord {
            session_id: Uuid::new_v4().to_string(),
            user_id: user.id,
            email: user.email.clone(),
            role: user.role.clone(),
            ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            created_at: now,
            expires_at: now + session_ttl,
        };
        self.sessions.create(&session).await?;

        let (refresh_token, record) = self
            .refresh_tokens
            .generate(NewRefreshToken {
                user_id: user.id,
                session_id: session.session_id.clone(),
                family_id: String::new(),
                parent_hash: None,
                ip: client.ip.clone(),
                user_agent: client.user_agent.clone(),
            })
            .await?;

        let tokens = self.token_pair(&session, refresh_token)?;
        info!(
            user_id = user.id,
            session_id = %session.session_id,
            family_id = %record.family_id,
            "User logged in"
        );
        Ok(tokens)
    }

    /// Exchange a refresh token for a new access/refresh pair.
    ///
    /// Replaying a consumed token revokes its family and the session it
    /// belongs to. A client mismatch is logged and reported but not acted on.
    #[instrument(skip(self, raw, client), fields(ip = %client.ip))]
    pub async fn refresh(&self, raw: &str, client: &ClientInfo) -> Result<RefreshOutcome, AuthError> {
        let record = match self.refresh_tokens.validate(raw).await {
            Ok(record) => record,
            Err(e @ LedgerError::ReplayDetected { .. }) => {
                self.abort_session(&e).await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let anomaly =
            RefreshTokenService::detect_anomalies(&record, &client.ip, &client.user_agent);
        if anomaly {
            warn!(
                user_id = record.user_id,
                session_id = %record.session_id,
                stored_ip = %record.ip,
                current_ip = %client.ip,
                "Refresh token presented from a different client"
            );
        }

        let session = match self.sessions.get(&record.session_id).await {
            Ok(session) => session,
            Err(SessionError::NotFound) => {
                warn!(session_id = %record.session_id, "Refresh against a revoked session");
                self.refresh_tokens.revoke_family(&record.family_id).await?;
                return Err(AuthError::SessionRevoked);
            }
            Err(e) => return Err(e.into()),
        };

        let (refresh_token, _) = self
            .refresh_tokens
            .generate(NewRefreshToken {
                user_id: record.user_id,
                session_id: record.session_id.clone(),
                family_id: record.family_id.clone(),
                parent_hash: Some(hash_token(raw)),
                ip: client.ip.clone(),
                user_agent: client.user_agent.clone(),
            })
            .await?;

        if let Err(e) = self.refresh_tokens.mark_used(raw).await {
            if matches!(e, LedgerError::ReplayDetected { .. }) {
                // the family revoke already took the child with it
                self.abort_session(&e).await;
            } else {
                self.discard_child(&refresh_token).await;
            }
            return Err(e.into());
        }

        let tokens = self.token_pair(&session, refresh_token)?;
        info!(
            user_id = record.user_id,
            session_id = %record.session_id,
            family_id = %record.family_id,
            "Refresh token rotated"
        );
        Ok(RefreshOutcome { tokens, anomaly })
    }

    /// End the caller's current session. A presented refresh token takes its
    /// family down with it.
    #[instrument(skip(self, identity, refresh_token), fields(user_id = identity.user_id))]
    pub async fn logout(
        &self,
        identity: &Identity,
        refresh_token: Option<&str>,
    ) -> Result<(), AuthError> {
        self.blacklist
            .add(&identity.jti, identity.expires_at)
            .await?;
        self.sessions
            .revoke(&identity.session_id.to_string())
            .await?;

        if let Some(raw) = refresh_token {
            if let Some(record) = self.refresh_tokens.find(raw).await? {
                if record.user_id == identity.user_id {
                    self.refresh_tokens.revoke_family(&record.family_id).await?;
                } else {
                    warn!(
                        owner = record.user_id,
                        "Logout presented a refresh token owned by another user"
                    );
                }
            }
        }

        info!(session_id = %identity.session_id, "User logged out");
        Ok(())
    }

    /// End every session of the caller. Refresh chains die with them because
    /// rotation requires a live session.
    #[instrument(skip(self, identity), fields(user_id = identity.user_id))]
    pub async fn logout_all(&self, identity: &Identity) -> Result<(), AuthError> {
        self.blacklist
            .add(&identity.jti, identity.expires_at)
            .await?;
        self.sessions.revoke_all(identity.user_id).await?;

        info!("User logged out everywhere");
        Ok(())
    }

    pub async fn list_sessions(&self, identity: &Identity) -> Result<Vec<SessionRecord>, AuthError> {
        Ok(self.sessions.list_by_user(identity.user_id).await?)
    }

    /// Revoke one session. Users may revoke their own; admins any.
    #[instrument(skip(self, identity), fields(user_id = identity.user_id))]
    pub async fn revoke_session(&self, identity: &Identity, session_id: &str) -> Result<(), AuthError> {
        let session = match self.sessions.get(session_id).await {
            Ok(session) => session,
            Err(SessionError::NotFound) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if session.user_id != identity.user_id && !identity.is_admin() {
            warn!(owner = session.user_id, "Attempt to revoke someone else's session");
            return Err(AuthError::Forbidden);
        }

        self.sessions.revoke(session_id).await?;
        Ok(())
    }

    /// Admin: log a user out of every device.
    #[instrument(skip(self, identity), fields(admin_id = identity.user_id))]
    pub async fn revoke_user_sessions(&self, identity: &Identity, user_id: i64) -> Result<(), AuthError> {
        if !identity.is_admin() {
            return Err(AuthError::Forbidden);
        }
        self.sessions.revoke_all(user_id).await?;
        info!(target_user = user_id, "Sessions revoked by admin");
        Ok(())
    }

    /// Admin: lift a blacklist entry.
    #[instrument(skip(self, identity), fields(admin_id = identity.user_id))]
    pub async fn unrevoke_token(&self, identity: &Identity, jti: &str) -> Result<(), AuthError> {
        if !identity.is_admin() {
            return Err(AuthError::Forbidden);
        }
        self.blacklist.remove(jti).await?;
        Ok(())
    }

    /* ---------- PRIVATE HELPERS ---------- */

    fn token_pair(&self, session: &SessionRecord, refresh_token: String) -> Result<TokenPair, AuthError> {
        let subject = Subject {
            user_id: session.user_id,
            email: session.email.clone(),
            role: session.role.clone(),
            session_id: session.session_id.clone(),
        };
        let (access_token, _) = self.jwt.issue(TokenKind::Access, &subject)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.jwt.access_ttl().as_secs() as i64,
            session_id: session.session_id.clone(),
        })
    }

    /// Drop a successor that will never reach the client.
    async fn discard_child(&self, raw: &str) {
        if let Err(e) = self.refresh_tokens.revoke_token(raw).await {
            error!(error = %e, "Failed to discard unissued refresh token");
        }
    }

    async fn abort_session(&self, replay: &LedgerError) {
        let LedgerError::ReplayDetected {
            user_id,
            session_id,
            family_id,
        } = replay
        else {
            return;
        };

        warn!(
            user_id,
            session_id = %session_id,
            family_id = %family_id,
            "Security event: refresh token replay, revoking session"
        );
        if let Err(e) = self.sessions.revoke(session_id).await {
            error!(session_id = %session_id, error = %e, "Failed to revoke session after replay");
        }
    }
}
