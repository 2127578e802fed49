use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub backend_url: String,
    pub api_timeout: Duration,
    pub location_interval: Duration,
    pub try_period: Duration,
    pub reconnect_delay: Duration,
    pub store_path: String,
    pub command_queue_size: usize,
    pub event_buffer_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")),
            backend_url: env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            api_timeout: Duration::from_millis(parse_or_default("API_TIMEOUT_MS", 10_000)?),
            location_interval: Duration::from_secs(non_zero(
                "LOCATION_INTERVAL_SECS",
                parse_or_default("LOCATION_INTERVAL_SECS", 10)?,
            )?),
            try_period: Duration::from_secs(parse_or_default("TRY_PERIOD_SECS", 900)?),
            reconnect_delay: Duration::from_millis(parse_or_default("RECONNECT_DELAY_MS", 2_000)?),
            store_path: env::var("STORE_PATH").unwrap_or_else(|_| "rider-store.json".to_string()),
            command_queue_size: non_zero(
                "COMMAND_QUEUE_SIZE",
                parse_or_default("COMMAND_QUEUE_SIZE", 256)?,
            )?,
            event_buffer_size: non_zero(
                "EVENT_BUFFER_SIZE",
                parse_or_default("EVENT_BUFFER_SIZE", 256)?,
            )?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            backend_url: "http://localhost:8080".to_string(),
            api_timeout: Duration::from_millis(10_000),
            location_interval: Duration::from_secs(10),
            try_period: Duration::from_secs(900),
            reconnect_delay: Duration::from_millis(2_000),
            store_path: "rider-store.json".to_string(),
            command_queue_size: 256,
            event_buffer_size: 256,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

/// Intervals and channel capacities must be at least one.
fn non_zero<T>(key: &str, value: T) -> Result<T, AppError>
where
    T: PartialEq + Default,
{
    if value == T::default() {
        return Err(AppError::Internal(format!("{key} must be greater than zero")));
    }
    Ok(value)
}
