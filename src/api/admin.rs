use axum::{
    extract::{Path, State},
    http::StatusCode,
};

use crate::{error::ApiError, middleware::auth::Identity, AppState};

pub async fn revoke_user_sessions(
    State(state): State<AppState>,
    identity: Identity,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.auth.revoke_user_sessions(&identity, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unrevoke_token(
    State(state): State<AppState>,
    identity: Identity,
    Path(jti): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.auth.unrevoke_token(&identity, &jti).await?;
    Ok(StatusCode::NO_CONTENT)
}
