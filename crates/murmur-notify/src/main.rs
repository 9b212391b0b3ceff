mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use murmur_broker::{SqliteBroker, Subscriber, topology};
use murmur_crypto::TokenValidator;
use murmur_db::{Database, NotificationRepository};
use murmur_notify::{
    ChatCreatedHandler, Consumer, MessageSentHandler, NotificationService, routes,
};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let broker = SqliteBroker::open(&config.broker_path)?;
    topology::declare(&broker)?;

    let repo: Arc<dyn NotificationRepository> = db;
    let subscriber: Arc<dyn Subscriber> = Arc::new(broker);

    Consumer::new(
        topology::CHAT_EXCHANGE,
        topology::CHAT_CREATED_QUEUE,
        topology::CHAT_CREATED_KEY,
        Arc::new(ChatCreatedHandler::new(repo.clone())),
    )
    .spawn(subscriber.clone());

    Consumer::new(
        topology::MESSAGE_EXCHANGE,
        topology::MESSAGE_SEND_QUEUE,
        topology::MESSAGE_SEND_KEY,
        Arc::new(MessageSentHandler::new(repo.clone())),
    )
    .spawn(subscriber);

    let app = routes::router(
        Arc::new(NotificationService::new(repo)),
        Arc::new(TokenValidator::new(&config.jwt_secret)),
    )
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Murmur notification server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
