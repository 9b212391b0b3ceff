mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use murmur_api::chats;
use murmur_api::middleware::ws_token;
use murmur_api::state::ChatApiState;
use murmur_broker::{SqliteBroker, topology};
use murmur_chat::{ChatAggregator, ChatPipeline, ChatSettings, HttpProfileClient, ProfileClient};
use murmur_crypto::{MessageCipher, TokenValidator};
use murmur_db::{Database, Repositories};
use murmur_gateway::{DeliveryRouter, Gateway, PresenceRegistry, SqliteTtlStore, connection, ttl};

use crate::config::Config;

#[derive(Clone)]
struct WsState {
    gateway: Gateway,
    validator: Arc<TokenValidator>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Storage
    let db = Arc::new(Database::open(&config.db_path)?);
    let broker = SqliteBroker::open(&config.broker_path)?;
    topology::declare(&broker)?;
    let repos = Repositories::sqlite(db.clone());

    // Collaborators
    let cipher = Arc::new(MessageCipher::new(&config.message_key));
    let validator = Arc::new(TokenValidator::new(&config.jwt_secret));
    let profiles: Arc<dyn ProfileClient> = Arc::new(HttpProfileClient::new(&config.profile_url)?);

    // Presence
    let store = Arc::new(SqliteTtlStore::new(db.clone()));
    tokio::spawn(ttl::run_sweeper(store.clone(), config.sweep_interval));
    let presence = PresenceRegistry::new(store, config.presence_ttl);

    let router = Arc::new(DeliveryRouter::new(
        presence.clone(),
        cipher.clone(),
        profiles.clone(),
        Arc::new(broker),
    ));
    let gateway = Gateway::new(presence, ChatPipeline::new(repos.clone()), router, cipher);

    // Routes
    let chat_state = Arc::new(ChatApiState {
        aggregator: ChatAggregator::new(repos.clone()),
        settings: ChatSettings::new(repos),
        profiles,
    });

    let ws_route = Router::new()
        .route("/v1/ws", get(ws_upgrade))
        .with_state(WsState {
            gateway,
            validator: validator.clone(),
        });

    let app = Router::new()
        .merge(chats::router(chat_state, validator))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Murmur chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<WsState>,
    Query(query): Query<WsQuery>,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = ws_token(query.token, &jar) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let user_id = match state.validator.validate(&token) {
        Ok(user_id) => user_id,
        Err(e) => {
            debug!("WebSocket upgrade rejected: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.gateway, user_id))
}
