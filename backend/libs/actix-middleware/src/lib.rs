//! # Actix Middleware Library
//!
//! Middleware shared by the chat HTTP services
//!
//! ## Modules
//! - `jwt_auth`: JWT authentication middleware and the `AuthUser` extractor
//! - `logging`: request/response access log
//! - `metrics`: Prometheus HTTP metrics

pub mod jwt_auth;
pub mod logging;
pub mod metrics;

pub use jwt_auth::{AuthError, AuthUser, JwtAuthMiddleware};
pub use logging::Logging;
pub use metrics::MetricsMiddleware;
