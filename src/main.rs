use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use sqlx::SqlitePool;
use tower_cookies::CookieManagerLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod db;
mod error;
mod middleware;
mod models;
mod services;
mod utils;
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::db::{Keys, RedisStore, TtlStore};
use crate::middleware::auth::{optional_auth, require_auth, AuthGate};
use crate::services::{
    auth_service::AuthService, blacklist_service::BlacklistService, jwt_service::JwtService,
    refresh_service::RefreshTokenService, session_service::SessionService,
};

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub gate: AuthGate,
    pub refresh_ttl: Duration,
}

impl AppState {
    /// Wire every component onto one shared store.
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn TtlStore>,
        keys: Keys,
        jwt: JwtService,
        refresh_ttl: Duration,
        bcrypt_cost: u32,
    ) -> Self {
        let blacklist = BlacklistService::new(store.clone(), keys.clone());
        let refresh_tokens = RefreshTokenService::new(store.clone(), keys.clone(), refresh_ttl);
        let sessions = SessionService::new(store, keys);
        let gate = AuthGate::new(Arc::new(jwt.clone()), Arc::new(blacklist.clone()));
        let auth = AuthService::new(pool, jwt, refresh_tokens, sessions, blacklist, bcrypt_cost);

        Self {
            auth,
            gate,
            refresh_ttl,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    // Create a CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/me", get(api::user::get_current_user))
        .route("/logout", post(api::auth::logout))
        .route("/logout-all", post(api::auth::logout_all))
        .route("/sessions", get(api::session::list_sessions))
        .route("/sessions/:id", delete(api::session::revoke_session))
        .route(
            "/admin/users/:id/sessions",
            delete(api::admin::revoke_user_sessions),
        )
        .route("/admin/blacklist/:jti", delete(api::admin::unrevoke_token))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let public = Router::new()
        .route("/", get(api::user::hello))
        .route_layer(from_fn_with_state(state.clone(), optional_auth))
        .route("/register", post(api::auth::register))
        .route("/login", post(api::auth::login))
        .route("/refresh", post(api::auth::refresh));

    public
        .merge(protected)
        .layer(CookieManagerLayer::new())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().expect("Invalid configuration");

    let pool = db::create_db_pool(&config.database_url)
        .await
        .expect("Failed to open user database");
    let store = RedisStore::connect(&config.redis_url, config.store_timeout)
        .await
        .expect("Failed to connect to Redis");
    let jwt = JwtService::from_config(&config.jwt).expect("Failed to load signing keys");
    tracing::info!(kid = %jwt.active_kid(), "Signing key loaded");

    let state = AppState::new(
        pool,
        Arc::new(store),
        Keys::new(config.key_prefix.clone()),
        jwt,
        config.jwt.refresh_ttl,
        config.bcrypt_cost,
    );
    let app = create_router(state);

    // run it with hyper
    let addr: SocketAddr = config.listen_addr;
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listen address");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
