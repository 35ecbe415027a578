use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::SocketAddr;
use std::str::FromStr;
use url::Url;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub database_url: String,
    pub redis_url: String,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    pub session_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub api_key_encryption_key: [u8; 32],
    pub mux: MuxConfig,
    pub cloudinary: CloudinaryConfig,
    pub upload_max_bytes: usize,
    pub ingest_concurrency: usize,
    pub listing_cache_ttl_seconds: u64,
    pub event_buffer: usize,
}

#[derive(Clone, Debug)]
pub struct MuxConfig {
    pub api_base: String,
    pub token_id: Option<String>,
    pub token_secret: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_tolerance_seconds: i64,
    pub request_timeout_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct CloudinaryConfig {
    pub api_base: String,
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub upload_preset: Option<String>,
    pub request_timeout_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;

        let ingest_concurrency: usize = env_or_parse("INGEST_CONCURRENCY", "4")?;
        if ingest_concurrency == 0 {
            return Err(anyhow!("invalid INGEST_CONCURRENCY: must be at least 1"));
        }

        Ok(Self {
            http_addr,
            database_url: env_or_err("DATABASE_URL")?,
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1/"),
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            session_key: env_key_32("SESSION_KEY")?,
            access_ttl_minutes: env_or_parse("ACCESS_TTL_MINUTES", "60")?,
            api_key_encryption_key: env_key_32("API_KEY_ENCRYPTION_KEY")?,
            mux: MuxConfig {
                api_base: env_url("MUX_API_BASE", "https://api.mux.com")?,
                token_id: env_opt("MUX_TOKEN_ID"),
                token_secret: env_opt("MUX_TOKEN_SECRET"),
                webhook_secret: env_opt("MUX_WEBHOOK_SECRET"),
                webhook_tolerance_seconds: env_or_parse("MUX_WEBHOOK_TOLERANCE_SECONDS", "300")?,
                request_timeout_seconds: env_or_parse("MUX_REQUEST_TIMEOUT_SECONDS", "30")?,
            },
            cloudinary: CloudinaryConfig {
                api_base: env_url("CLOUDINARY_API_BASE", "https://api.cloudinary.com")?,
                cloud_name: env_opt("CLOUDINARY_CLOUD_NAME"),
                api_key: env_opt("CLOUDINARY_API_KEY"),
                api_secret: env_opt("CLOUDINARY_API_SECRET"),
                upload_preset: env_opt("CLOUDINARY_UPLOAD_PRESET"),
                request_timeout_seconds: env_or_parse("CLOUDINARY_REQUEST_TIMEOUT_SECONDS", "60")?,
            },
            upload_max_bytes: env_or_parse("UPLOAD_MAX_BYTES", "524288000")?,
            ingest_concurrency,
            listing_cache_ttl_seconds: env_or_parse("LISTING_CACHE_TTL_SECONDS", "300")?,
            event_buffer: env_or_parse("VIDEO_EVENT_BUFFER", "256")?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}

fn env_url(key: &str, default: &str) -> Result<String> {
    let value = env_or(key, default);
    parse_base_url(key, &value)
}

/// Host API bases must be absolute http(s) URLs.
fn parse_base_url(key: &str, value: &str) -> Result<String> {
    let url = Url::parse(value).map_err(|err| anyhow!("invalid {}: {}", key, err))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!("invalid {}: expected an http(s) URL", key));
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn env_key_32(key: &str) -> Result<[u8; 32]> {
    let value = env_or_err(key)?;
    decode_key_32(key, &value)
}

fn decode_key_32(key: &str, value: &str) -> Result<[u8; 32]> {
    let decoded = STANDARD
        .decode(value.as_bytes())
        .map_err(|err| anyhow!("invalid {}: {}", key, err))?;
    if decoded.len() != 32 {
        return Err(anyhow!("invalid {}: expected 32 bytes", key));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded);
    Ok(key_bytes)
}
