use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenv::dotenv;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    /// Public key of the previous signing key, still accepted during rotation.
    pub previous_public_key_path: Option<PathBuf>,
    pub previous_key_grace: Duration,
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub leeway: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub key_prefix: String,
    pub listen_addr: SocketAddr,
    pub store_timeout: Duration,
    pub bcrypt_cost: u32,
    pub jwt: JwtConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let jwt = JwtConfig {
            private_key_path: required("JWT_PRIVATE_KEY_PATH")?.into(),
            public_key_path: required("JWT_PUBLIC_KEY_PATH")?.into(),
            previous_public_key_path: env::var("JWT_PREVIOUS_PUBLIC_KEY_PATH")
                .ok()
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            previous_key_grace: Duration::from_secs(
                parsed("JWT_PREVIOUS_KEY_GRACE_HOURS", 24u64)? * 3600,
            ),
            issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "gallery-api".to_string()),
            access_ttl: Duration::from_secs(parsed("ACCESS_TOKEN_TTL_MINUTES", 15u64)? * 60),
            refresh_ttl: Duration::from_secs(parsed("REFRESH_TOKEN_TTL_DAYS", 7u64)? * 86_400),
            leeway: Duration::from_secs(parsed("JWT_LEEWAY_SECONDS", 30u64)?),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:gallery.db?mode=rwc".to_string()),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            key_prefix: env::var("KEY_PREFIX").unwrap_or_else(|_| "gallery".to_string()),
            listen_addr: parsed("LISTEN_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            store_timeout: Duration::from_millis(parsed("STORE_TIMEOUT_MS", 500u64)?),
            bcrypt_cost: parsed("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            jwt,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        _ => Ok(default),
    }
}
