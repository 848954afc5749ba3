use crate::config::LogFormat;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,actix_server=warn"));

    match format {
        LogFormat::Text => fmt().with_env_filter(env_filter).with_target(false).init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(false)
            .init(),
    }
}
