//! Feed cache: merged feed, dedup markers and in-flight markers
//!
//! Keys:
//! - `videos`: the merged live feed as a versioned [`CachedFeed`]
//! - `created-<streamId>`: set after a snapshot created a row; suppresses re-creation
//! - `fetching-videos-<slug>`: set while a talent backfill is running or was just done
//! - `videos-<slug>-<type>-<sort>[-<token>]`: cached per-talent listing pages
//!
//! Values are JSON. Redis is the production backend; the moka backend serves tests and
//! single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::model::VideoView;

pub const FEED_KEY: &str = "videos";

pub fn created_marker_key(stream_id: &str) -> String {
    format!("created-{}", stream_id)
}

pub fn fetching_marker_key(slug: &str) -> String {
    format!("fetching-videos-{}", slug)
}

pub fn talent_page_key(slug: &str, video_type: &str, sort: &str, token: Option<&str>) -> String {
    match token {
        Some(token) => format!("videos-{}-{}-{}-{}", slug, video_type, sort, token),
        None => format!("videos-{}-{}-{}", slug, video_type, sort),
    }
}

/// Error types for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Raw string key-value operations with per-key TTL
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Store `value` only if `key` is absent. Returns true when the value was stored.
    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Redis backend over a multiplexed connection manager
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        info!("Initializing Redis feed cache");

        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        let mut conn = manager.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;

        Ok(Self { manager })
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

#[derive(Clone)]
struct MemoryEntry {
    value: Arc<String>,
    ttl: Duration,
}

struct EntryExpiry;

impl moka::Expiry<String, MemoryEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MemoryEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &MemoryEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process backend with per-entry TTL
#[derive(Clone)]
pub struct MemoryBackend {
    entries: Cache<String, MemoryEntry>,
}

impl MemoryBackend {
    pub fn new(max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { entries }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .entries
            .get(key)
            .await
            .map(|entry| entry.value.as_ref().clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(
                key.to_string(),
                MemoryEntry {
                    value: Arc::new(value),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(async move {
                MemoryEntry {
                    value: Arc::new(value),
                    ttl,
                }
            })
            .await;
        Ok(entry.is_fresh())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.get(key).await.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}

/// Versioned snapshot of the merged live feed
///
/// Each write replaces the previous value wholesale with `version + 1`. Readers always
/// load the latest value; nothing holds a shared mutable reference to the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedFeed {
    pub version: u64,
    pub generated_at: Option<DateTime<Utc>>,
    pub entries: Vec<VideoView>,
}

impl CachedFeed {
    /// Index entries by stream id and by video id
    pub fn index(&self) -> FeedIndex<'_> {
        let mut by_stream = HashMap::new();
        let mut by_video = HashMap::new();
        for entry in &self.entries {
            if let Some(stream_id) = entry.stream_id.as_deref() {
                by_stream.entry(stream_id).or_insert(entry);
            }
            if let Some(video_id) = entry.video_id.as_deref() {
                by_video.entry(video_id).or_insert(entry);
            }
        }
        FeedIndex {
            by_stream,
            by_video,
        }
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|e| e.stream_id.clone())
            .collect()
    }
}

/// Lookup view over a [`CachedFeed`]
pub struct FeedIndex<'a> {
    by_stream: HashMap<&'a str, &'a VideoView>,
    by_video: HashMap<&'a str, &'a VideoView>,
}

impl<'a> FeedIndex<'a> {
    pub fn by_stream_id(&self, stream_id: &str) -> Option<&'a VideoView> {
        self.by_stream.get(stream_id).copied()
    }

    /// Match by stream id first, then by video id
    pub fn find(&self, stream_id: Option<&str>, video_id: Option<&str>) -> Option<&'a VideoView> {
        stream_id
            .and_then(|id| self.by_stream.get(id))
            .or_else(|| video_id.and_then(|id| self.by_video.get(id)))
            .copied()
    }
}

/// Typed cache facade used by the engine and read paths
#[derive(Clone)]
pub struct FeedCache {
    backend: Arc<dyn CacheBackend>,
}

impl FeedCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()))
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.backend.get(key).await? {
            Some(json) => {
                debug!(key = %key, "Cache hit");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => {
                debug!(key = %key, "Cache miss");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, value), fields(key = %key, ttl_secs = ttl.as_secs()))]
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(value)?;
        self.backend.set(key, json, ttl).await
    }

    pub async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.backend
            .set_if_absent(key, Utc::now().to_rfc3339(), ttl)
            .await
    }

    /// Set a marker whose only meaning is its presence
    pub async fn mark(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        self.backend.set(key, Utc::now().to_rfc3339(), ttl).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.exists(key).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.backend.delete(key).await
    }

    pub async fn load_feed(&self) -> Result<Option<CachedFeed>, CacheError> {
        self.get(FEED_KEY).await
    }

    /// Replace the merged feed with a new version
    pub async fn replace_feed(
        &self,
        entries: Vec<VideoView>,
        ttl: Duration,
    ) -> Result<CachedFeed, CacheError> {
        let previous_version = match self.load_feed().await {
            Ok(previous) => previous.map(|feed| feed.version).unwrap_or(0),
            Err(e) => {
                warn!("Previous feed unreadable, restarting version sequence: {}", e);
                0
            }
        };

        let feed = CachedFeed {
            version: previous_version + 1,
            generated_at: Some(Utc::now()),
            entries,
        };
        self.set(FEED_KEY, &feed, ttl).await?;

        debug!(
            version = feed.version,
            entries = feed.entries.len(),
            "Feed replaced"
        );
        Ok(feed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Platform, VideoStatus, VideoType};

    fn entry(stream_id: Option<&str>, video_id: Option<&str>) -> VideoView {
        VideoView {
            id: 1,
            platform: Platform::Youtube,
            video_id: video_id.map(str::to_string),
            stream_id: stream_id.map(str::to_string),
            title: "t".to_string(),
            thumbnail: None,
            datetime: None,
            views: 0,
            durations: 0,
            status: VideoStatus::Live,
            video_type: VideoType::Live,
            url: None,
            channel_username: None,
            talents: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_key_namespaces() {
        assert_eq!(created_marker_key("s1"), "created-s1");
        assert_eq!(fetching_marker_key("alice"), "fetching-videos-alice");
        assert_eq!(
            talent_page_key("alice", "LIVE", "new", None),
            "videos-alice-LIVE-new"
        );
        assert_eq!(
            talent_page_key("alice", "LIVE", "new", Some("abc")),
            "videos-alice-LIVE-new-abc"
        );
    }

    #[tokio::test]
    async fn test_memory_set_if_absent() {
        let cache = FeedCache::in_memory();
        assert!(cache.set_if_absent("k", Duration::from_secs(60)).await.unwrap());
        assert!(!cache.set_if_absent("k", Duration::from_secs(60)).await.unwrap());
        assert!(cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_entries_expire() {
        let cache = FeedCache::in_memory();
        cache.mark("short", Duration::from_millis(50)).await.unwrap();
        assert!(cache.exists("short").await.unwrap());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!cache.exists("short").await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_feed_bumps_version() {
        let cache = FeedCache::in_memory();
        let first = cache
            .replace_feed(vec![entry(Some("s1"), None)], Duration::from_secs(60))
            .await
            .unwrap();
        let second = cache
            .replace_feed(Vec::new(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert!(cache.load_feed().await.unwrap().unwrap().entries.is_empty());
    }

    #[test]
    fn test_feed_index_matches_stream_then_video() {
        let feed = CachedFeed {
            version: 1,
            generated_at: None,
            entries: vec![entry(Some("s1"), Some("v1")), entry(None, Some("v2"))],
        };
        let index = feed.index();

        assert!(index.find(Some("s1"), None).is_some());
        assert!(index.find(Some("missing"), Some("v2")).is_some());
        assert!(index.find(Some("missing"), None).is_none());
        assert!(index.by_stream_id("v2").is_none());
    }
}
