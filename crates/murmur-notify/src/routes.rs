use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::State,
    middleware,
    routing::{get, patch},
};

use murmur_api::error::ApiError;
use murmur_api::extract::ApiJson;
use murmur_api::middleware::{AuthUser, require_auth};
use murmur_crypto::TokenValidator;
use murmur_types::api::StatusResponse;
use murmur_types::events::NotificationFeed;
use murmur_types::models::MuteSetting;

use crate::service::NotificationService;

pub fn router(service: Arc<NotificationService>, validator: Arc<TokenValidator>) -> Router {
    Router::new()
        .route("/v1/notifications", get(feed))
        .route("/v1/notifications/chats/mute", patch(set_mute))
        .layer(middleware::from_fn_with_state(validator, require_auth))
        .with_state(service)
}

async fn feed(
    State(service): State<Arc<NotificationService>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<NotificationFeed>, ApiError> {
    Ok(Json(service.feed(&user_id).await?))
}

async fn set_mute(
    State(service): State<Arc<NotificationService>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ApiJson(setting): ApiJson<MuteSetting>,
) -> Result<Json<StatusResponse>, ApiError> {
    let message = if setting.mute { "chat muted" } else { "chat unmuted" };
    service.set_mute(&user_id, setting).await?;
    Ok(Json(StatusResponse {
        message: message.to_string(),
    }))
}
