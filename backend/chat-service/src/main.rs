use actix_web::{web, App, HttpServer};
use chat_service::{
    config::{Config, StoreKind},
    error::AppError,
    logging,
    redis_client::RedisClient,
    repository::{
        ChatRepository, MemoryChatRepository, MemoryUserRepository, RedisChatRepository,
        RedisUserRepository, TailOptions, UserRepository,
    },
    routes,
    services::{MessageService, UserService},
    state::AppState,
    websocket::{ChatListener, Hub, HubConfig},
};
use crypto_core::jwt as core_jwt;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    let cfg = Arc::new(Config::from_env()?);
    logging::init_tracing(cfg.log_format);

    match &cfg.jwt_private_key_pem {
        Some(private_key) => core_jwt::initialize_jwt_keys(private_key, &cfg.jwt_public_key_pem),
        None => {
            tracing::warn!("no JWT private key configured: login is disabled");
            core_jwt::initialize_jwt_validation_only(&cfg.jwt_public_key_pem)
        }
    }
    .map_err(|e| AppError::StartServer(format!("Failed to initialize JWT keys: {e}")))?;

    let tail = TailOptions {
        block: cfg.tail_block,
        batch_size: cfg.tail_batch_size,
    };
    let (chat_repo, user_repo): (Arc<dyn ChatRepository>, Arc<dyn UserRepository>) =
        match cfg.store {
            StoreKind::Redis => {
                let redis = RedisClient::from_url(&cfg.redis_url)
                    .await
                    .map_err(|e| AppError::StartServer(format!("redis: {e}")))?;
                redis
                    .ping()
                    .await
                    .map_err(|e| AppError::StartServer(format!("redis ping: {e}")))?;
                let chat = RedisChatRepository::new(redis.clone(), tail)
                    .await
                    .map_err(|e| AppError::StartServer(format!("redis tail connection: {e}")))?;
                (Arc::new(chat), Arc::new(RedisUserRepository::new(redis)))
            }
            StoreKind::Memory => {
                tracing::warn!("using the in-memory store: messages and accounts are lost on exit");
                (
                    Arc::new(MemoryChatRepository::new(tail)),
                    Arc::new(MemoryUserRepository::new()),
                )
            }
        };

    let hub = Hub::spawn(HubConfig {
        mailbox_capacity: cfg.mailbox_capacity,
        ..HubConfig::default()
    });

    // Single consumer of the chat log for this process
    tokio::spawn(ChatListener::new(chat_repo.clone(), hub.clone()).run());

    let state = AppState::new(
        hub,
        Arc::new(MessageService::new(chat_repo, cfg.max_message_chars)),
        Arc::new(UserService::new(user_repo)),
        cfg.clone(),
    );

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, max_connections = cfg.max_connections, "starting chat-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(actix_middleware::MetricsMiddleware)
            .wrap(actix_middleware::Logging)
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure_routes)
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(format!("server: {e}")))
}
