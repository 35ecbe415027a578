use anyhow::Result;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tracing::warn;
use uuid::Uuid;

use crate::infra::cache::RedisCache;

/// A group of cached reads that one write can invalidate at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTag {
    SpaceImages(Uuid),
    SpaceVideos(Uuid),
    SpaceMedia(Uuid),
    SpaceProjects(Uuid),
}

impl CacheTag {
    pub fn key(&self) -> String {
        let (name, space_id) = match self {
            Self::SpaceImages(id) => ("space-images", id),
            Self::SpaceVideos(id) => ("space-videos", id),
            Self::SpaceMedia(id) => ("space-media", id),
            Self::SpaceProjects(id) => ("space-projects", id),
        };
        format!("tag:{}:{}", name, space_id)
    }

    /// Tags touched when an image row is written.
    pub fn image_write(space_id: Uuid) -> [CacheTag; 2] {
        [Self::SpaceImages(space_id), Self::SpaceMedia(space_id)]
    }

    /// Tags touched when a video row is written. Projects embed their videos.
    pub fn video_write(space_id: Uuid) -> [CacheTag; 3] {
        [
            Self::SpaceVideos(space_id),
            Self::SpaceMedia(space_id),
            Self::SpaceProjects(space_id),
        ]
    }
}

/// Read-through cache whose entries are keyed by the current version of a
/// tag. Invalidating a tag bumps its version so every dependent entry misses
/// and ages out by TTL. Redis failures fall back to uncached loads.
#[derive(Clone)]
pub struct TagCache {
    cache: RedisCache,
    ttl_seconds: u64,
}

impl TagCache {
    pub fn new(cache: RedisCache, ttl_seconds: u64) -> Self {
        Self { cache, ttl_seconds }
    }

    pub async fn get_or_load<T, F, Fut>(&self, tag: CacheTag, variant: &str, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let entry_key = match self.version(tag).await {
            Some(version) => Some(entry_key(tag, version, variant)),
            None => None,
        };

        if let Some(key) = &entry_key {
            if let Ok(mut conn) = self.cache.connection().await {
                if let Ok(Some(payload)) = conn.get::<_, Option<String>>(key).await {
                    if let Ok(value) = serde_json::from_str::<T>(&payload) {
                        return Ok(value);
                    }
                }
            }
        }

        let value = load().await?;

        if let Some(key) = entry_key {
            if let Ok(mut conn) = self.cache.connection().await {
                if let Ok(payload) = serde_json::to_string(&value) {
                    if let Err(err) = conn
                        .set_ex::<_, _, ()>(&key, payload, self.ttl_seconds)
                        .await
                    {
                        warn!(error = ?err, tag = %tag.key(), "failed to write listing cache");
                    }
                }
            }
        }

        Ok(value)
    }

    pub async fn invalidate(&self, tags: &[CacheTag]) {
        let mut conn = match self.cache.connection().await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = ?err, "cache unavailable, skipping invalidation");
                return;
            }
        };

        for tag in tags {
            if let Err(err) = conn.incr::<_, _, i64>(tag.key(), 1).await {
                warn!(error = ?err, tag = %tag.key(), "failed to bump cache tag");
            }
        }
    }

    async fn version(&self, tag: CacheTag) -> Option<u64> {
        let mut conn = self.cache.connection().await.ok()?;
        match conn.get::<_, Option<u64>>(tag.key()).await {
            Ok(version) => Some(version.unwrap_or(0)),
            Err(err) => {
                warn!(error = ?err, tag = %tag.key(), "failed to read cache tag");
                None
            }
        }
    }
}

fn entry_key(tag: CacheTag, version: u64, variant: &str) -> String {
    format!("cache:{}:v{}:{}", tag.key(), version, variant)
}
