use actix_web::{http::header::CONTENT_TYPE, HttpResponse};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, TextEncoder};

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::with_opts(Opts::new(name, help))
        .unwrap_or_else(|e| panic!("failed to create {name}: {e}"));
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .unwrap_or_else(|e| panic!("failed to register {name}: {e}"));
    counter
}

pub static ACTIVE_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::with_opts(Opts::new(
        "chat_active_sessions",
        "Live WebSocket sessions registered in the hub",
    ))
    .expect("failed to create chat_active_sessions");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register chat_active_sessions");
    gauge
});

pub static SESSIONS_EVICTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "chat_sessions_evicted_total",
        "Sessions dropped because their mailbox was full or closed",
    )
});

pub static MESSAGES_APPENDED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "chat_messages_appended_total",
        "Messages appended to the chat log",
    )
});

pub static MESSAGES_BROADCAST_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "chat_messages_broadcast_total",
        "Chat envelopes handed to the hub by the log consumer",
    )
});

pub static TAIL_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "chat_tail_errors_total",
        "Failed tail reads against the chat log",
    )
});

pub static REJECTED_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "chat_rejected_connections_total",
        "WebSocket upgrades refused at the connection limit",
    )
});

/// `GET /metrics`
pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, encoder.format_type()))
        .body(buffer)
}
