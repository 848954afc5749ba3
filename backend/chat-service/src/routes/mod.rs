pub mod chat;
pub mod users;
pub mod wsroute;

use crate::error::AppError;
use crate::metrics::metrics_handler;
use actix_middleware::JwtAuthMiddleware;
use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse};

/// Malformed JSON bodies get the same `{"message"}` shape as every other error
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: JsonPayloadError, _req: &HttpRequest| {
        AppError::BadRequest(err.to_string()).into()
    })
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_handler))
        .service(
            web::scope("/api/user")
                .service(users::register)
                .service(users::login),
        )
        .service(
            web::scope("/api/chat")
                .wrap(JwtAuthMiddleware)
                .service(chat::send_chatroom)
                .service(chat::history)
                .service(chat::active_users)
                .service(wsroute::ws_handler),
        );
}
