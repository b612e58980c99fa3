//! LiveFeed ingestion
//!
//! Pulls live-stream and video snapshots from YouTube and Twitch, reconciles them with
//! the durable catalog and the short-lived feed cache, and serves the merged feed and
//! cursor-paginated per-talent listings.

pub mod backfill;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod feed;
pub mod model;
pub mod pipeline;
pub mod providers;
pub mod queue;
pub mod reconcile;
pub mod sweep;
pub mod worker;

pub use backfill::ChannelBackfill;
pub use cache::{CacheBackend, CacheError, CachedFeed, FeedCache, MemoryBackend, RedisBackend};
pub use catalog::{
    CatalogRepository, InMemoryCatalogRepository, PostgresCatalogRepository, ResyncScope,
    VideoQuery,
};
pub use config::{IngestionConfig, StreamOutagePolicy};
pub use feed::{day_window, FeedService, TalentSort, VideoFilter};
pub use model::{
    Channel, NewVideo, Platform, ProfileImageSource, Talent, TalentRef, TalentStatus,
    TalentWithChannels, Video, VideoPatch, VideoRecord, VideoStatus, VideoType, VideoView,
};
pub use pipeline::{IngestionSchedule, Scheduler};
pub use providers::{
    ChannelInfo, Snapshot, StreamPlatformProvider, TwitchHelixProvider, UploadKind,
    VideoPlatformProvider, YoutubeDataProvider,
};
pub use queue::{
    JobContext, JobHandle, JobHandler, JobKind, JobQueue, JobState, Lane, Progress, QueueConfig,
    QueueError,
};
pub use reconcile::{FeedReconciler, PassReport, RefreshReport, StaleDataWarning};
pub use sweep::{StatusSweep, SweepReport};
pub use worker::IngestionWorker;

use livefeed_core::pagination::PaginationError;

/// Common error type for the ingestion pipeline
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("{platform} provider error: {message}")]
    Provider {
        platform: model::Platform,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict during upsert: {0}")]
    ConflictDuringUpsert(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    CacheError(#[from] cache::CacheError),

    #[error("Queue error: {0}")]
    QueueError(#[from] queue::QueueError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(#[from] PaginationError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestionError {
    pub fn provider(platform: model::Platform, message: impl std::fmt::Display) -> Self {
        Self::Provider {
            platform,
            message: message.to_string(),
        }
    }

    /// True when the database rejected a write on a unique constraint
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::DatabaseError(sqlx::Error::Database(db)) => db.is_unique_violation(),
            Self::ConflictDuringUpsert(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestionError>;
