//! Configuration management for memos.
//!
//! Loads configuration from environment variables (and a `.env` file when
//! present). Every value has a default so a bare `memos` binary starts with
//! a local SQLite database and upload directory under `./data`.

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

/// Fallback secret used when `SECRET_KEY` is unset.
pub const DEFAULT_SECRET_KEY: &str = "a-default-fallback-secret-key";

/// Default per-file upload ceiling (50 MiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Longest accepted session lifetime (10 years); larger values are clamped.
pub const MAX_SESSION_AGE_SECONDS: u64 = 10 * 365 * 86_400;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Initialize configuration (call once at startup)
pub fn init() -> &'static Config {
    config()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub memo: MemoConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub public_url: String,
    /// Upper bound on a whole request body (all multipart parts together).
    pub max_request_size: usize,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Key for signing session cookies.
    pub secret: String,
    pub max_age_seconds: u64,
    /// Lifetime used when the user ticks "remember me".
    pub remember_max_age_seconds: u64,
    pub secure_cookies: bool,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub upload_folder: String,
    pub max_upload_size: usize,
}

#[derive(Debug, Clone)]
pub struct MemoConfig {
    pub max_content_length: usize,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let public_url = env_or("PUBLIC_URL", "http://localhost:8999");

        let secret = match env::var("SECRET_KEY") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!("SECRET_KEY not set, falling back to the built-in default key");
                DEFAULT_SECRET_KEY.to_string()
            }
        };

        Self {
            server: ServerConfig {
                host: env_or("HOST", "0.0.0.0"),
                port: env_or("PORT", "8999").parse().unwrap_or(8999),
                public_url: public_url.clone(),
                max_request_size: env_parse("MAX_REQUEST_SIZE", 256 * 1024 * 1024),
                request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", 120)),
            },
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", "sqlite://./data/memos.db"),
            },
            session: SessionConfig {
                secret,
                max_age_seconds: session_age("SESSION_MAX_AGE", 86_400), // 1 day
                remember_max_age_seconds: session_age("SESSION_REMEMBER_MAX_AGE", 2_592_000), // 30 days
                secure_cookies: public_url.starts_with("https"),
            },
            storage: StorageConfig {
                upload_folder: env_or("UPLOAD_FOLDER", "./data/uploads"),
                max_upload_size: env_parse("MAX_UPLOAD_SIZE", DEFAULT_MAX_UPLOAD_SIZE),
            },
            memo: MemoConfig {
                max_content_length: env_parse("MEMO_MAX_LENGTH", 10_000),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Session lifetime in seconds, clamped to `MAX_SESSION_AGE_SECONDS`.
fn session_age(key: &str, default: u64) -> u64 {
    let seconds = env_parse(key, default);
    if seconds > MAX_SESSION_AGE_SECONDS {
        tracing::warn!(
            "{} of {}s is out of range, using {}s",
            key,
            seconds,
            MAX_SESSION_AGE_SECONDS
        );
        return MAX_SESSION_AGE_SECONDS;
    }
    seconds
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
