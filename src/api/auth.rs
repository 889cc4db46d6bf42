use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::{
    error::ApiError,
    middleware::auth::Identity,
    models::jwt::TokenPair,
    utils::{client::ClientInfo, cookies::CookieManager},
    AppState,
};

#[derive(Deserialize)]
pub struct RegisterRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    id: i64,
    email: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize, Default)]
pub struct RefreshRequest {
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    #[serde(flatten)]
    tokens: TokenPair,
    anomaly: bool,
}

#[derive(Serialize)]
pub struct MessageResponse {
    message: &'static str,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let user = state.auth.register(&payload.email, &payload.password).await?;

    Ok(Json(RegisterResponse {
        id: user.id,
        email: user.email,
    }))
}

pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let tokens = state
        .auth
        .login(&payload.email, &payload.password, &client)
        .await?;

    CookieManager::set_refresh_token(&cookies, &tokens.refresh_token, state.refresh_ttl);
    Ok(Json(tokens))
}

/// Accepts the refresh token from the JSON body or the refresh cookie.
pub async fn refresh(
    State(state): State<AppState>,
    client: ClientInfo,
    cookies: Cookies,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let presented = payload
        .and_then(|Json(body)| body.refresh_token)
        .filter(|token| !token.is_empty())
        .or_else(|| CookieManager::refresh_token(&cookies))
        .ok_or(ApiError::Unauthenticated)?;

    let outcome = match state.auth.refresh(&presented, &client).await {
        Ok(outcome) => outcome,
        Err(e) => {
            CookieManager::clear_refresh_token(&cookies);
            return Err(e.into());
        }
    };

    CookieManager::set_refresh_token(&cookies, &outcome.tokens.refresh_token, state.refresh_ttl);
    Ok(Json(RefreshResponse {
        tokens: outcome.tokens,
        anomaly: outcome.anomaly,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    identity: Identity,
    cookies: Cookies,
    payload: Option<Json<RefreshRequest>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let refresh_token = payload
        .and_then(|Json(body)| body.refresh_token)
        .or_else(|| CookieManager::refresh_token(&cookies));

    state
        .auth
        .logout(&identity, refresh_token.as_deref())
        .await?;

    CookieManager::clear_refresh_token(&cookies);
    Ok(Json(MessageResponse {
        message: "Logged out",
    }))
}

pub async fn logout_all(
    State(state): State<AppState>,
    identity: Identity,
    cookies: Cookies,
) -> Result<Json<MessageResponse>, ApiError> {
    state.auth.logout_all(&identity).await?;

    CookieManager::clear_refresh_token(&cookies);
    Ok(Json(MessageResponse {
        message: "Logged out from all devices",
    }))
}
