use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Per-connection timing and size limits
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Read deadline, refreshed only by pong receipt
    pub pong_wait: Duration,
    /// Upper bound on a single outbound write
    pub write_wait: Duration,
    pub max_frame_bytes: usize,
    pub history_limit: usize,
}

impl SessionConfig {
    /// Pings go out at 9/10 of the read deadline so one always lands in time
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_frame_bytes: 8192,
            history_limit: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub store: StoreKind,
    pub jwt_public_key_pem: String,
    pub jwt_private_key_pem: Option<String>,
    pub max_connections: usize,
    pub max_message_chars: usize,
    pub mailbox_capacity: usize,
    pub tail_block: Duration,
    pub tail_batch_size: usize,
    pub log_format: LogFormat,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_public_key_pem = pem_from(&lookup, "JWT_PUBLIC_KEY_PEM", "JWT_PUBLIC_KEY_FILE")?
            .ok_or_else(|| {
                AppError::Config("JWT_PUBLIC_KEY_PEM or JWT_PUBLIC_KEY_FILE missing".into())
            })?;
        let jwt_private_key_pem =
            pem_from(&lookup, "JWT_PRIVATE_KEY_PEM", "JWT_PRIVATE_KEY_FILE")?;

        let store = match lookup("CHAT_STORE").as_deref().map(str::trim) {
            None | Some("") | Some("redis") => StoreKind::Redis,
            Some("memory") => StoreKind::Memory,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "CHAT_STORE must be `redis` or `memory`, got `{other}`"
                )))
            }
        };

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "LOG_FORMAT must be `text` or `json`, got `{other}`"
                )))
            }
        };

        let session = SessionConfig {
            pong_wait: Duration::from_secs(parse_or(&lookup, "PONG_WAIT_SECS", 60u64)?),
            write_wait: Duration::from_secs(parse_or(&lookup, "WRITE_WAIT_SECS", 10u64)?),
            max_frame_bytes: parse_or(&lookup, "MAX_FRAME_BYTES", 8192usize)?,
            history_limit: parse_or(&lookup, "HISTORY_LIMIT", 50usize)?,
        };
        if session.pong_wait.is_zero() {
            return Err(AppError::Config("PONG_WAIT_SECS must be positive".into()));
        }

        let mailbox_capacity = parse_or(&lookup, "MAILBOX_CAPACITY", 256usize)?;
        if mailbox_capacity == 0 {
            return Err(AppError::Config("MAILBOX_CAPACITY must be positive".into()));
        }

        Ok(Self {
            port: parse_or(&lookup, "PORT", 8080u16)?,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".into()),
            store,
            jwt_public_key_pem,
            jwt_private_key_pem,
            max_connections: parse_or(&lookup, "MAX_CONNECTIONS", 1000usize)?,
            max_message_chars: parse_or(&lookup, "MAX_MESSAGE_CHARS", 1000usize)?,
            mailbox_capacity,
            tail_block: Duration::from_millis(parse_or(&lookup, "TAIL_BLOCK_MS", 5000u64)?),
            tail_batch_size: parse_or(&lookup, "TAIL_BATCH_SIZE", 100usize)?,
            log_format,
            session,
        })
    }
}

/// Unset or blank means default; anything unparsable is a startup error.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key}: invalid value `{raw}`: {e}"))),
        _ => Ok(default),
    }
}

/// Inline PEM wins over a file path
fn pem_from<F>(lookup: &F, pem_key: &str, file_key: &str) -> Result<Option<String>, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(pem) = lookup(pem_key).filter(|v| !v.trim().is_empty()) {
        // Single-line env values often carry literal "\n"
        return Ok(Some(pem.replace("\\n", "\n")));
    }
    match lookup(file_key).filter(|v| !v.trim().is_empty()) {
        Some(path) => std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| AppError::Config(format!("{file_key}: cannot read {path}: {e}"))),
        None => Ok(None),
    }
}
