// src/services/jwt_service.rs
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, decode_header, encode, errors::Error as JwtError, errors::ErrorKind, Algorithm,
    DecodingKey, EncodingKey, Header, Validation,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::jwt::{Claims, Subject, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("token is not valid yet")]
    NotYetValid,

    #[error("malformed token")]
    MalformedToken,

    #[error("token issued by an unexpected issuer")]
    InvalidIssuer,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

fn map_jwt_error(err: JwtError) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::ImmatureSignature => TokenError::NotYetValid,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::InvalidSignature,
        ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
        _ => TokenError::MalformedToken,
    }
}

/// Key id derived from the public key PEM: first 16 hex chars of its SHA-256.
pub fn key_id(public_pem: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(public_pem));
    digest[..16].to_string()
}

#[derive(Clone)]
struct VerificationKey {
    kid: String,
    key: DecodingKey,
    /// End of the rotation grace window; `None` for the active key.
    not_after: Option<DateTime<Utc>>,
}

impl VerificationKey {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.not_after.map_or(true, |limit| now < limit)
    }
}

#[derive(Debug, Clone)]
pub struct SignerSettings {
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub leeway: Duration,
}

impl From<&JwtConfig> for SignerSettings {
    fn from(config: &JwtConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
            leeway: config.leeway,
        }
    }
}

/// Issues and verifies RS256-signed tokens.
///
/// One private key signs. Verification accepts the matching public key plus
/// any previous keys that are still inside their grace window, so tokens
/// signed just before a key rotation keep working until they expire.
#[derive(Clone)]
pub struct JwtService {
    enc_key: EncodingKey,
    active_kid: String,
    verification_keys: Arc<Vec<VerificationKey>>,
    settings: SignerSettings,
}

#[derive(Deserialize)]
struct TokenId {
    #[serde(default)]
    jti: String,
}

impl JwtService {
    pub fn new(
        settings: SignerSettings,
        private_pem: &[u8],
        public_pem: &[u8],
    ) -> Result<Self, TokenError> {
        let enc_key = EncodingKey::from_rsa_pem(private_pem)
            .map_err(|e| TokenError::InvalidKey(format!("private key: {e}")))?;
        let dec_key = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| TokenError::InvalidKey(format!("public key: {e}")))?;
        let active_kid = key_id(public_pem);

        Ok(Self {
            enc_key,
            active_kid: active_kid.clone(),
            verification_keys: Arc::new(vec![VerificationKey {
                kid: active_kid,
                key: dec_key,
                not_after: None,
            }]),
            settings,
        })
    }

    /// Keep accepting tokens signed by a retired key until `not_after`.
    pub fn with_previous_key(
        mut self,
        public_pem: &[u8],
        not_after: DateTime<Utc>,
    ) -> Result<Self, TokenError> {
        let key = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| TokenError::InvalidKey(format!("previous public key: {e}")))?;

        let mut keys = self.verification_keys.as_ref().clone();
        keys.push(VerificationKey {
            kid: key_id(public_pem),
            key,
            not_after: Some(not_after),
        });
        self.verification_keys = Arc::new(keys);
        Ok(self)
    }

    pub fn from_config(config: &JwtConfig) -> Result<Self, TokenError> {
        let read = |path: &std::path::Path| {
            std::fs::read(path)
                .map_err(|e| TokenError::InvalidKey(format!("{}: {e}", path.display())))
        };

        let private_pem = read(&config.private_key_path)?;
        let public_pem = read(&config.public_key_path)?;
        let mut service = Self::new(config.into(), &private_pem, &public_pem)?;

        if let Some(path) = &config.previous_public_key_path {
            let grace = chrono::Duration::from_std(config.previous_key_grace)
                .map_err(|e| TokenError::InvalidKey(format!("grace period: {e}")))?;
            service = service.with_previous_key(&read(path)?, Utc::now() + grace)?;
        }

        Ok(service)
    }

    pub fn access_ttl(&self) -> Duration {
        self.settings.access_ttl
    }

    pub fn active_kid(&self) -> &str {
        &self.active_kid
    }

    /* ---------- PUBLIC API ---------- */

    /// Sign a fresh token of `kind` for `subject`. Every call gets a new `jti`.
    #[instrument(skip(self, subject), fields(user_id = subject.user_id, kind = %kind))]
    pub fn issue(&self, kind: TokenKind, subject: &Subject) -> Result<(String, Claims), TokenError> {
        let ttl = match kind {
            TokenKind::Access => self.settings.access_ttl,
            TokenKind::Refresh => self.settings.refresh_ttl,
        };
        let now = Utc::now().timestamp();
        let user_id = subject.user_id.to_string();

        let claims = Claims {
            user_id: user_id.clone(),
            email: subject.email.clone(),
            role: subject.role.clone(),
            session_id: subject.session_id.clone(),
            token_type: kind,
            iss: self.settings.issuer.clone(),
            sub: user_id,
            exp: now + ttl.as_secs() as i64,
            iat: now,
            nbf: now,
            jti: Uuid::new_v4().to_string(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.active_kid.clone());

        let token = encode(&header, &claims, &self.enc_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;
        Ok((token, claims))
    }

    /// Verify signature, `exp`, `nbf` and issuer, and return the claims.
    /// The token kind is not checked here.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|_| TokenError::MalformedToken)?;
        if header.alg != Algorithm::RS256 {
            return Err(TokenError::InvalidSignature);
        }

        let now = Utc::now();
        let live: Vec<&VerificationKey> = self
            .verification_keys
            .iter()
            .filter(|key| key.is_live(now))
            .collect();

        let by_kid: Vec<&VerificationKey> = match header.kid.as_deref() {
            Some(kid) => live.iter().copied().filter(|key| key.kid == kid).collect(),
            None => Vec::new(),
        };
        let candidates = if by_kid.is_empty() { live } else { by_kid };

        let validation = self.validation();
        for candidate in candidates {
            match decode::<Claims>(token, &candidate.key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => {
                    debug!(kid = %candidate.kid, "Signature did not verify against key");
                }
                Err(e) => return Err(map_jwt_error(e)),
            }
        }

        Err(TokenError::InvalidSignature)
    }

    /// Read the `jti` without verifying anything. Only good for cheap lookups
    /// such as the blacklist check that runs before `validate`.
    pub fn extract_id(&self, token: &str) -> Result<String, TokenError> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::MalformedToken);
        };
        if header.is_empty() || signature.is_empty() {
            return Err(TokenError::MalformedToken);
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::MalformedToken)?;
        let id: TokenId = serde_json::from_slice(&bytes).map_err(|_| TokenError::MalformedToken)?;

        if id.jti.is_empty() {
            return Err(TokenError::MalformedToken);
        }
        Ok(id.jti)
    }

    /* ---------- PRIVATE HELPERS ---------- */

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.algorithms = vec![Algorithm::RS256];
        validation.leeway = self.settings.leeway.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_issuer(&[&self.settings.issuer]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
        validation
    }
}
