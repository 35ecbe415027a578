pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;
pub mod jobs;

use anyhow::Result;
use std::sync::Arc;

use crate::app::api_keys::ApiKeyCipher;
use crate::app::tag_cache::TagCache;
use crate::config::AppConfig;
use crate::infra::cloudinary::CloudinaryClient;
use crate::infra::events::EventHub;
use crate::infra::hosts::{ImageHost, VideoHost};
use crate::infra::mux::MuxClient;
use crate::infra::{cache::RedisCache, db::Db};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub cache: RedisCache,
    pub tags: TagCache,
    pub events: EventHub,
    pub image_host: Arc<dyn ImageHost>,
    pub video_host: Arc<dyn VideoHost>,
    pub api_key_cipher: ApiKeyCipher,
    pub session_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub mux_webhook_secret: Option<String>,
    pub mux_webhook_tolerance_seconds: i64,
    pub upload_max_bytes: usize,
    pub ingest_concurrency: usize,
}

impl AppState {
    pub fn from_config(config: &AppConfig, db: Db, cache: RedisCache) -> Result<Self> {
        let image_host: Arc<dyn ImageHost> = Arc::new(CloudinaryClient::new(&config.cloudinary)?);
        let video_host: Arc<dyn VideoHost> = Arc::new(MuxClient::new(&config.mux)?);

        Ok(Self {
            tags: TagCache::new(cache.clone(), config.listing_cache_ttl_seconds),
            events: EventHub::new(config.event_buffer),
            db,
            cache,
            image_host,
            video_host,
            api_key_cipher: ApiKeyCipher::new(&config.api_key_encryption_key),
            session_key: config.session_key,
            access_ttl_minutes: config.access_ttl_minutes,
            mux_webhook_secret: config.mux.webhook_secret.clone(),
            mux_webhook_tolerance_seconds: config.mux.webhook_tolerance_seconds,
            upload_max_bytes: config.upload_max_bytes,
            ingest_concurrency: config.ingest_concurrency,
        })
    }
}
