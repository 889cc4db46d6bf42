use axum::Json;
use serde::Serialize;

use crate::middleware::auth::{Identity, MaybeIdentity};

#[derive(Serialize)]
pub struct GreetingResponse {
    message: String,
}

pub async fn hello(MaybeIdentity(identity): MaybeIdentity) -> Json<GreetingResponse> {
    let message = match identity {
        Some(identity) => format!("Hello, {}!", identity.email),
        None => "Hello, World!".to_string(),
    };
    Json(GreetingResponse { message })
}

pub async fn get_current_user(identity: Identity) -> Json<Identity> {
    Json(identity)
}
