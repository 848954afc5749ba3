use crate::repository::RepositoryError;
use crate::services::{ChatError, UserError};
use crate::websocket::HubError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of every error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

const INTERNAL_MESSAGE: &str = "Something went wrong";

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Too many connections")]
    TooManyConnections,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) => 400,
            AppError::Unauthorized(_) => 401,
            AppError::Conflict(_) => 409,
            AppError::TooManyConnections => 429,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Storage(_)
            | AppError::Internal => 500,
        }
    }

    /// What the client sees. Server-side details stay in the log.
    fn public_message(&self) -> String {
        if self.status_code() >= 500 {
            INTERNAL_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        if AppError::status_code(self) >= 500 {
            tracing::error!(error = %self, "request failed");
        }
        HttpResponse::build(ResponseError::status_code(self)).json(ErrorResponse {
            message: self.public_message(),
        })
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Validation(v) => AppError::BadRequest(v.to_string()),
            ChatError::Storage(s) => s.into(),
        }
    }
}

impl From<UserError> for AppError {
    fn from(e: UserError) -> Self {
        if e.is_validation() {
            return AppError::BadRequest(e.to_string());
        }
        match e {
            UserError::UsernameAlreadyExists => AppError::Conflict(e.to_string()),
            UserError::UserNotFound | UserError::InvalidCredentials => {
                AppError::Unauthorized(e.to_string())
            }
            UserError::Storage(s) => s.into(),
            other => {
                tracing::error!(error = %other, "user service failure");
                AppError::Internal
            }
        }
    }
}

impl From<HubError> for AppError {
    fn from(e: HubError) -> Self {
        tracing::error!(error = %e, "hub unavailable");
        AppError::Internal
    }
}
