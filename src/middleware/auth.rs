//! Authentication gate for protected routes.
//!
//! Every request goes through the same ordered checks:
//!
//! 1. bearer credential from the `Authorization` header
//! 2. `jti` read without any cryptography
//! 3. blacklist lookup (store failure rejects the request)
//! 4. signature, `exp`, `nbf`, issuer
//! 5. token kind must be `access`
//! 6. identity claims parsed into typed values
//! 7. [`Identity`] inserted into the request extensions
//!
//! The blacklist check runs before signature verification so that a flood of
//! known-bad tokens costs a key lookup each, not an RSA verify.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Extensions, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use http::header::AUTHORIZATION;
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{
        jwt::{Claims, TokenKind},
        user::Role,
    },
    services::{
        blacklist_service::{BlacklistError, BlacklistService},
        jwt_service::{JwtService, TokenError},
    },
    AppState,
};

/// Token capabilities the gate needs.
pub trait TokenVerifier: Send + Sync {
    fn extract_id(&self, token: &str) -> Result<String, TokenError>;
    fn validate(&self, token: &str) -> Result<Claims, TokenError>;
}

#[async_trait]
pub trait RevocationChecker: Send + Sync {
    async fn is_revoked(&self, jti: &str) -> Result<bool, BlacklistError>;
}

impl TokenVerifier for JwtService {
    fn extract_id(&self, token: &str) -> Result<String, TokenError> {
        JwtService::extract_id(self, token)
    }

    fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        JwtService::validate(self, token)
    }
}

#[async_trait]
impl RevocationChecker for BlacklistService {
    async fn is_revoked(&self, jti: &str) -> Result<bool, BlacklistError> {
        BlacklistService::is_revoked(self, jti).await
    }
}

/// Caller identity established by the gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
    pub session_id: Uuid,
    /// Id of the access token that authenticated this request.
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    fn from_claims(claims: Claims) -> Option<Self> {
        let user_id: i64 = claims.user_id.parse().ok()?;
        if claims.sub != claims.user_id {
            return None;
        }
        Some(Self {
            user_id,
            role: claims.role.parse().ok()?,
            session_id: claims.session_id.parse().ok()?,
            expires_at: DateTime::from_timestamp(claims.exp, 0)?,
            email: claims.email,
            jti: claims.jti,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Clone)]
pub struct AuthGate {
    verifier: Arc<dyn TokenVerifier>,
    revocations: Arc<dyn RevocationChecker>,
}

impl AuthGate {
    pub fn new(verifier: Arc<dyn TokenVerifier>, revocations: Arc<dyn RevocationChecker>) -> Self {
        Self {
            verifier,
            revocations,
        }
    }

    /// Authenticate a request on a route that requires it.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, ApiError> {
        let token = bearer_token(headers).ok_or(ApiError::Unauthenticated)?;
        self.verify(token).await
    }

    /// Like [`AuthGate::authenticate`], but a missing or unusable credential
    /// yields `None`. A store failure is still an error.
    pub async fn authenticate_optional(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<Identity>, ApiError> {
        let Some(token) = bearer_token(headers) else {
            return Ok(None);
        };
        match self.verify(token).await {
            Ok(identity) => Ok(Some(identity)),
            Err(ApiError::Unauthenticated) => {
                debug!("Ignoring unusable credential on optional route");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn verify(&self, token: &str) -> Result<Identity, ApiError> {
        let jti = self.verifier.extract_id(token).map_err(|e| {
            debug!(error = %e, "Could not read token id");
            ApiError::Unauthenticated
        })?;

        match self.revocations.is_revoked(&jti).await {
            Ok(false) => {}
            Ok(true) => {
                warn!(jti = %jti, "Rejected revoked token");
                return Err(ApiError::Unauthenticated);
            }
            Err(e) => {
                error!(jti = %jti, "Revocation check failed, rejecting request");
                return Err(ApiError::internal(e));
            }
        }

        let claims = self.verifier.validate(token).map_err(|e| {
            debug!(jti = %jti, error = %e, "Token validation failed");
            ApiError::Unauthenticated
        })?;

        if claims.token_type != TokenKind::Access {
            warn!(jti = %jti, kind = %claims.token_type, "Rejected non-access token");
            return Err(ApiError::Unauthenticated);
        }

        Identity::from_claims(claims).ok_or_else(|| {
            warn!(jti = %jti, "Token carries malformed identity claims");
            ApiError::Unauthenticated
        })
    }
}

/// The credential from `Authorization: Bearer <token>`, if well formed.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = state.gate.authenticate(request.headers()).await?;

    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

pub async fn optional_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(identity) = state.gate.authenticate_optional(request.headers()).await? {
        request.extensions_mut().insert(identity);
    }

    Ok(next.run(request).await)
}

pub fn get_user_id(extensions: &Extensions) -> Option<i64> {
    extensions.get::<Identity>().map(|identity| identity.user_id)
}

pub fn get_role(extensions: &Extensions) -> Option<Role> {
    extensions.get::<Identity>().map(|identity| identity.role)
}

pub fn get_session_id(extensions: &Extensions) -> Option<Uuid> {
    extensions.get::<Identity>().map(|identity| identity.session_id)
}

/// Extracting `Identity` on a route without the gate is a wiring bug, so it
/// fails as `Internal` rather than `Unauthenticated`.
#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| ApiError::internal("identity requested on a route without require_auth"))
    }
}

/// Identity on routes behind [`optional_auth`].
#[derive(Debug, Clone)]
pub struct MaybeIdentity(pub Option<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeIdentity(parts.extensions.get::<Identity>().cloned()))
    }
}
