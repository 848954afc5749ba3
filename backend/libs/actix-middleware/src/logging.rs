//! Access log middleware
//!
//! Logs one line per request. Only the path is recorded: the query string can
//! carry a bearer token on WebSocket upgrades and never reaches the log.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::time::Instant;

/// Middleware that logs HTTP requests and responses
#[derive(Clone, Default)]
pub struct Logging;

impl<S, B> Transform<S, ServiceRequest> for Logging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = LoggingService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(LoggingService { service }))
    }
}

pub struct LoggingService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for LoggingService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.path().to_string();
        let upgrade = req.headers().contains_key("upgrade");

        tracing::debug!(method = %method, path = %path, upgrade, "HTTP request started");

        let fut = self.service.call(req);

        Box::pin(async move {
            let res = match fut.await {
                Ok(res) => res,
                Err(e) => {
                    tracing::warn!(method = %method, path = %path, error = %e, "HTTP request failed");
                    return Err(e);
                }
            };
            let status = res.status();
            let duration_ms = start.elapsed().as_millis() as u64;

            if status.is_server_error() {
                tracing::warn!(
                    method = %method,
                    path = %path,
                    status = status.as_u16(),
                    duration_ms,
                    "HTTP request completed with server error"
                );
            } else {
                tracing::info!(
                    method = %method,
                    path = %path,
                    status = status.as_u16(),
                    duration_ms,
                    "HTTP request completed"
                );
            }

            Ok(res)
        })
    }
}
