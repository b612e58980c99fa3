//! Snapshot providers
//!
//! Every platform adapter normalizes its payloads into [`Snapshot`] before anything else
//! sees them, so the reconciliation engine never branches on provider-specific shapes.

pub mod paging;
pub mod twitch;
pub mod youtube;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::warn;

use crate::model::{NewVideo, Platform, VideoPatch, VideoStatus, VideoType};
use crate::Result;

pub use twitch::TwitchHelixProvider;
pub use youtube::YoutubeDataProvider;

/// Normalized point-in-time record of a video or stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub platform: Platform,
    pub video_id: Option<String>,
    pub stream_id: Option<String>,
    /// Platform channel id; `None` when the provider did not report it
    pub channel_id: Option<String>,
    pub title: String,
    pub thumbnail: Option<String>,
    pub datetime: Option<DateTime<Utc>>,
    pub views: i64,
    pub durations: i32,
    pub status: VideoStatus,
    pub video_type: VideoType,
}

impl Snapshot {
    /// Key used for dedup markers and feed matching
    pub fn identity_key(&self) -> Option<&str> {
        self.stream_id.as_deref().or(self.video_id.as_deref())
    }

    pub fn to_new_video(&self, channel_id: Option<i64>) -> NewVideo {
        NewVideo {
            platform: self.platform,
            video_id: self.video_id.clone(),
            stream_id: self.stream_id.clone(),
            title: self.title.clone(),
            thumbnail: self.thumbnail.clone(),
            datetime: self.datetime,
            views: self.views,
            durations: self.durations,
            status: self.status,
            video_type: self.video_type,
            channel_id,
        }
    }

    /// Fields a fresh snapshot refreshes on an existing row
    pub fn to_patch(&self) -> VideoPatch {
        VideoPatch {
            title: Some(self.title.clone()),
            thumbnail: self.thumbnail.clone(),
            datetime: self.datetime,
            views: Some(self.views),
            durations: (self.durations > 0).then_some(self.durations),
            status: Some(self.status),
        }
    }
}

/// Channel profile data used by the channel-info refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub platform: Platform,
    pub channel_id: String,
    pub name: Option<String>,
    pub username: Option<String>,
    pub followers: i64,
    pub profile_img_url: Option<String>,
}

/// Upload listing of a video-platform channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadKind {
    Videos,
    Live,
    Shorts,
}

impl UploadKind {
    pub fn video_type(&self) -> VideoType {
        match self {
            Self::Videos => VideoType::Uploaded,
            Self::Live => VideoType::Live,
            Self::Shorts => VideoType::Short,
        }
    }

    pub fn all() -> [UploadKind; 3] {
        [Self::Videos, Self::Live, Self::Shorts]
    }
}

/// Run independent listing calls and keep whatever succeeded
///
/// Each failed listing is logged and skipped. Only when every listing fails is the
/// last error returned.
pub async fn join_listings<T, I, Fut>(platform: Platform, calls: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let results = join_all(calls).await;
    let total = results.len();

    let mut items = Vec::new();
    let mut failed = 0usize;
    let mut last_error = None;
    for result in results {
        match result {
            Ok(batch) => items.extend(batch),
            Err(e) => {
                warn!(platform = %platform, "Listing skipped: {}", e);
                failed += 1;
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if failed == total => Err(e),
        _ => Ok(items),
    }
}

/// Video-based platform (YouTube)
#[async_trait]
pub trait VideoPlatformProvider: Send + Sync {
    /// Live, upcoming and same-day videos of the given channels
    async fn live_snapshot(&self, channel_ids: &[String]) -> Result<Vec<Snapshot>>;

    async fn channel_uploads(&self, channel_id: &str, kind: UploadKind) -> Result<Vec<Snapshot>>;

    /// Detail of a single video, including its channel id
    async fn video_detail(&self, video_id: &str) -> Result<Option<Snapshot>>;

    /// Authoritative lookup of at most 50 ids. Ids absent from the result no longer exist.
    async fn authoritative_batch(&self, video_ids: &[String]) -> Result<Vec<Snapshot>>;

    async fn channel_info(&self, channel_ids: &[String]) -> Result<Vec<ChannelInfo>>;
}

/// Stream-based platform (Twitch)
#[async_trait]
pub trait StreamPlatformProvider: Send + Sync {
    /// Streams currently live on the given channels
    async fn live_snapshot(&self, channel_ids: &[String]) -> Result<Vec<Snapshot>>;

    /// Archived broadcasts of a channel
    async fn channel_uploads(&self, channel_id: &str) -> Result<Vec<Snapshot>>;

    /// Profile data for at most 100 channels
    async fn channel_info(&self, channel_ids: &[String]) -> Result<Vec<ChannelInfo>>;
}
