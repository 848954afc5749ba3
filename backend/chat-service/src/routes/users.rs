use crate::{error::AppError, state::AppState};
use actix_web::{post, web, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

/// POST /api/user/register
#[post("/register")]
pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<Credentials>,
) -> Result<HttpResponse, AppError> {
    let user = state.users.register(&body.username, &body.password).await?;
    Ok(HttpResponse::Created().json(user))
}

/// POST /api/user/login
#[post("/login")]
pub async fn login(
    state: web::Data<AppState>,
    body: web::Json<Credentials>,
) -> Result<HttpResponse, AppError> {
    let token = state.users.login(&body.username, &body.password).await?;
    Ok(HttpResponse::Ok().json(LoginResponse { token }))
}
