use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{error::ApiError, middleware::auth::Identity, models::session::SessionRecord, AppState};

#[derive(Serialize)]
pub struct SessionResponse {
    session_id: String,
    ip: String,
    user_agent: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    current: bool,
}

impl SessionResponse {
    fn from_record(record: SessionRecord, identity: &Identity) -> Self {
        Self {
            current: record.session_id == identity.session_id.to_string(),
            session_id: record.session_id,
            ip: record.ip,
            user_agent: record.user_agent,
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

pub async fn list_sessions(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    let sessions = state.auth.list_sessions(&identity).await?;

    Ok(Json(
        sessions
            .into_iter()
            .map(|record| SessionResponse::from_record(record, &identity))
            .collect(),
    ))
}

pub async fn revoke_session(
    State(state): State<AppState>,
    identity: Identity,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.auth.revoke_session(&identity, &session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
