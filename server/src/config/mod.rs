use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::with_security_headers;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";
const DEFAULT_QR_TTL_SECS: i64 = 120;
const QR_TTL_RANGE: std::ops::RangeInclusive<i64> = 60..=120;
const DEFAULT_STORE_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_REVEAL_INTERVAL_SECS: u64 = 600;
const DEFAULT_REMINDER_INTERVAL_SECS: u64 = 1800;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("QR_TOKEN_TTL_SECS must be between 60 and 120, got {0}")]
    QrTtlOutOfRange(i64),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// `None` runs on the in-memory store.
    pub database_url: Option<String>,
    pub qr_token_secret: String,
    pub qr_token_ttl: chrono::Duration,
    pub auth_token_secret: String,
    pub scanner_bypass_device_ids: Vec<String>,
    pub cors_allowed_origins: Vec<String>,
    pub production: bool,
    pub store_max_attempts: u32,
    pub reveal_job_interval: Duration,
    pub reminder_job_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let bind_addr = parse_or(&get, "BIND_ADDR", DEFAULT_BIND_ADDR.parse().ok())?;
        let qr_ttl_secs: i64 = parse_or(&get, "QR_TOKEN_TTL_SECS", Some(DEFAULT_QR_TTL_SECS))?;
        if !QR_TTL_RANGE.contains(&qr_ttl_secs) {
            return Err(ConfigError::QrTtlOutOfRange(qr_ttl_secs));
        }
        let store_max_attempts: u32 =
            parse_or(&get, "STORE_MAX_ATTEMPTS", Some(DEFAULT_STORE_MAX_ATTEMPTS))?;
        if store_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "STORE_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }
        let reveal_secs: u64 =
            parse_or(&get, "REVEAL_JOB_INTERVAL_SECS", Some(DEFAULT_REVEAL_INTERVAL_SECS))?;
        let reminder_secs: u64 =
            parse_or(&get, "REMINDER_JOB_INTERVAL_SECS", Some(DEFAULT_REMINDER_INTERVAL_SECS))?;

        Ok(Self {
            bind_addr,
            database_url: get("DATABASE_URL"),
            qr_token_secret: required("QR_TOKEN_SECRET")?,
            qr_token_ttl: chrono::Duration::seconds(qr_ttl_secs),
            auth_token_secret: required("AUTH_TOKEN_SECRET")?,
            scanner_bypass_device_ids: split_list(get("SCANNER_BYPASS_DEVICE_IDS").as_deref().unwrap_or("")),
            cors_allowed_origins: split_list(
                get("CORS_ALLOWED_ORIGINS").as_deref().unwrap_or(DEFAULT_ALLOWED_ORIGINS),
            ),
            production: get("RUST_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production")),
            store_max_attempts,
            reveal_job_interval: Duration::from_secs(reveal_secs),
            reminder_job_interval: Duration::from_secs(reminder_secs),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: Option<T>) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => default.ok_or(ConfigError::Missing(key)),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
