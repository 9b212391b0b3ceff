use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::State,
    middleware,
    routing::{get, patch, post},
};
use tracing::debug;

use murmur_chat::aggregator::profile_ids;
use murmur_crypto::TokenValidator;
use murmur_types::api::{MessengerInit, StatusResponse};
use murmur_types::models::{BlockChat, ChatRole, PinnedChatUpdate};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::middleware::{AuthUser, require_auth};
use crate::state::ChatState;

/// Authenticated chat routes under `/v1/chat`.
pub fn router(state: ChatState, validator: Arc<TokenValidator>) -> Router {
    Router::new()
        .route("/v1/chat/initialization", get(initialization))
        .route("/v1/chat/pinned", patch(update_pinned))
        .route("/v1/chat/role", post(set_role))
        .route("/v1/chat/block", post(set_block))
        .layer(middleware::from_fn_with_state(validator, require_auth))
        .with_state(state)
}

pub async fn initialization(
    State(state): State<ChatState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<MessengerInit>, ApiError> {
    let (chats, pinned_chats) = tokio::try_join!(
        state.aggregator.hydrate_user_chats(&user_id),
        state.aggregator.hydrate_pinned_chats(&user_id),
    )?;

    let ids = profile_ids(chats.iter().chain(pinned_chats.iter().map(|p| &p.chat)));
    let users_profile = if ids.is_empty() {
        Vec::new()
    } else {
        state.profiles.brief_infos(&user_id, &ids).await?
    };

    debug!(
        "Initialized {} with {} chats, {} pinned, {} profiles",
        user_id,
        chats.len(),
        pinned_chats.len(),
        users_profile.len()
    );
    Ok(Json(MessengerInit {
        chats,
        pinned_chats,
        users_profile,
    }))
}

pub async fn update_pinned(
    State(state): State<ChatState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ApiJson(req): ApiJson<PinnedChatUpdate>,
) -> Result<Json<StatusResponse>, ApiError> {
    acting_as(&user_id, &req.pinned_chat.user_id)?;
    state.settings.update_pinned_chat(&req).await?;
    Ok(ok("pinned chat updated"))
}

pub async fn set_role(
    State(state): State<ChatState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ApiJson(req): ApiJson<ChatRole>,
) -> Result<Json<StatusResponse>, ApiError> {
    acting_as(&user_id, &req.granter_id)?;
    state.settings.set_role(&req).await?;
    Ok(ok("role updated"))
}

pub async fn set_block(
    State(state): State<ChatState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ApiJson(req): ApiJson<BlockChat>,
) -> Result<Json<StatusResponse>, ApiError> {
    acting_as(&user_id, &req.user_id)?;
    state.settings.set_block(&req).await?;
    Ok(ok(if req.blocked { "chat blocked" } else { "chat unblocked" }))
}

fn acting_as(authenticated: &str, claimed: &str) -> Result<(), ApiError> {
    if authenticated == claimed {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "user {} cannot act as {}",
            authenticated, claimed
        )))
    }
}

fn ok(message: &str) -> Json<StatusResponse> {
    Json(StatusResponse {
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use murmur_chat::{ChatAggregator, ChatSettings, ProfileClient};
    use murmur_db::repo::{ChatRepository, PinnedRepository};
    use murmur_db::{Database, Repositories};
    use murmur_types::Result;
    use murmur_types::api::Claims;
    use murmur_types::models::{ChatRecord, ChatType, UserBriefInfo};
    use tower::ServiceExt;

    use crate::state::ChatApiState;

    const SECRET: &str = "test-secret";

    struct EchoProfiles;

    #[async_trait]
    impl ProfileClient for EchoProfiles {
        async fn brief_info(&self, _sender_id: &str, recipient_id: &str) -> Result<UserBriefInfo> {
            Ok(profile(recipient_id))
        }

        async fn brief_infos(
            &self,
            _sender_id: &str,
            recipient_ids: &[String],
        ) -> Result<Vec<UserBriefInfo>> {
            Ok(recipient_ids.iter().map(|id| profile(id)).collect())
        }
    }

    fn profile(id: &str) -> UserBriefInfo {
        UserBriefInfo {
            user_id: id.to_string(),
            username: id.to_string(),
            name: id.to_uppercase(),
            avatar_url: None,
        }
    }

    fn token(sub: &str) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: 4_102_444_800,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    async fn app() -> (Router, Arc<Database>, i64) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let now = Utc::now();
        let chat = db
            .create_chat(&ChatRecord {
                chat_id: 0,
                creator_id: "alice".into(),
                name: "team".into(),
                description: None,
                chat_type: ChatType::Group,
                encrypted: false,
                avatar_url: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        db.add_participant(chat.chat_id, "alice").await.unwrap();
        db.add_participant(chat.chat_id, "bob").await.unwrap();

        let repos = Repositories::sqlite(db.clone());
        let state = Arc::new(ChatApiState {
            aggregator: ChatAggregator::new(repos.clone()),
            settings: ChatSettings::new(repos),
            profiles: Arc::new(EchoProfiles),
        });
        let validator = Arc::new(TokenValidator::new(SECRET));
        (router(state, validator), db, chat.chat_id)
    }

    fn request(method: &str, uri: &str, user: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let (app, _, _) = app().await;
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/v1/chat/initialization")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn initialization_returns_chats_and_profiles() {
        let (app, _, chat_id) = app().await;
        let resp = app
            .oneshot(request("GET", "/v1/chat/initialization", "alice", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json(resp).await;
        assert_eq!(body["chats"][0]["chat"]["chat_id"], chat_id);
        assert_eq!(body["pinned_chats"].as_array().unwrap().len(), 0);
        let users: Vec<&str> = body["users_profile"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["user_id"].as_str().unwrap())
            .collect();
        assert_eq!(users, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn pinning_for_another_user_is_forbidden() {
        let (app, db, chat_id) = app().await;
        let body = serde_json::json!({
            "pinned_chat": { "chat_id": chat_id, "user_id": "bob", "priority": 1 },
            "fix": true
        });
        let resp = app
            .oneshot(request("PATCH", "/v1/chat/pinned", "alice", Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(db.pinned_chats("bob", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pinning_own_chat_succeeds() {
        let (app, db, chat_id) = app().await;
        let body = serde_json::json!({
            "pinned_chat": { "chat_id": chat_id, "user_id": "alice", "priority": 2 },
            "fix": true
        });
        let resp = app
            .oneshot(request("PATCH", "/v1/chat/pinned", "alice", Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(db.pinned_chats("alice", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_a_json_error() {
        let (app, _, _) = app().await;
        let resp = app
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri("/v1/chat/pinned")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token("alice")))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json(resp).await;
        assert!(body["message"].as_str().unwrap().starts_with("invalid data"));
    }

    #[tokio::test]
    async fn mistyped_body_is_a_json_error() {
        let (app, _, _) = app().await;
        let body = serde_json::json!({ "chat_id": "seven", "user_id": "alice", "blocked": true });
        let resp = app
            .oneshot(request("POST", "/v1/chat/block", "alice", Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(json(resp).await["message"].is_string());
    }

    #[tokio::test]
    async fn blocking_unknown_chat_is_not_found() {
        let (app, _, _) = app().await;
        let body = serde_json::json!({ "chat_id": 999, "user_id": "alice", "blocked": true });
        let resp = app
            .oneshot(request("POST", "/v1/chat/block", "alice", Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(json(resp).await["message"].as_str().unwrap().starts_with("not found"));
    }

    #[tokio::test]
    async fn role_is_granted_by_the_caller() {
        let (app, db, chat_id) = app().await;
        let body = serde_json::json!({
            "chat_id": chat_id,
            "user_id": "bob",
            "granter_id": "alice",
            "role": "admin"
        });
        let resp = app
            .oneshot(request("POST", "/v1/chat/role", "alice", Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(db.roles(chat_id).await.unwrap()[0].role, "admin");
    }
}
