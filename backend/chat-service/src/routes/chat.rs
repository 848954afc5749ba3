//! Authenticated chat endpoints. The WebSocket upgrade lives in `wsroute`.

use crate::{error::AppError, models::UserInfo, state::AppState};
use actix_middleware::AuthUser;
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ChatroomRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// POST /api/chat/chatroom
///
/// Appends only. Connected sessions see the message once the log consumer
/// picks it up, the same way WebSocket submissions are delivered.
#[post("/chatroom")]
pub async fn send_chatroom(
    state: web::Data<AppState>,
    user: AuthUser,
    body: web::Json<ChatroomRequest>,
) -> Result<HttpResponse, AppError> {
    let sender = UserInfo::from(user);
    state
        .messages
        .send_chatroom_message(&sender, &body.message)
        .await?;
    Ok(HttpResponse::Created().finish())
}

/// GET /api/chat/history?limit=
#[get("/history")]
pub async fn history(
    state: web::Data<AppState>,
    _user: AuthUser,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let max = state.config.session.history_limit;
    let limit = query.limit.unwrap_or(max).min(max);
    let messages = state.messages.recent_history(limit).await?;
    Ok(HttpResponse::Ok().json(messages))
}

/// GET /api/chat/users
#[get("/users")]
pub async fn active_users(
    state: web::Data<AppState>,
    _user: AuthUser,
) -> Result<HttpResponse, AppError> {
    let users = state.hub.active_users().await?;
    Ok(HttpResponse::Ok().json(users))
}
