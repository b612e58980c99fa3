//! Per-channel resync jobs

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{CachedFeed, FeedCache};
use crate::catalog::{CatalogRepository, ResyncScope};
use crate::model::{Channel, NewVideo, Platform, VideoStatus};
use crate::providers::{Snapshot, StreamPlatformProvider, UploadKind, VideoPlatformProvider};
use crate::queue::Progress;
use crate::{IngestionError, Result};

/// Rebuilds a channel's videos from the platform's upload listings
pub struct ChannelBackfill {
    catalog: Arc<dyn CatalogRepository>,
    cache: FeedCache,
    videos: Arc<dyn VideoPlatformProvider>,
    streams: Arc<dyn StreamPlatformProvider>,
}

impl ChannelBackfill {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        cache: FeedCache,
        videos: Arc<dyn VideoPlatformProvider>,
        streams: Arc<dyn StreamPlatformProvider>,
    ) -> Self {
        Self {
            catalog,
            cache,
            videos,
            streams,
        }
    }

    async fn channel(&self, platform: Platform, channel_id: &str) -> Result<Channel> {
        self.catalog
            .find_channel_by_external_id(platform, channel_id)
            .await?
            .ok_or_else(|| IngestionError::NotFound(format!("{} channel {}", platform, channel_id)))
    }

    /// Replace a video channel's rows with its regular, live and short uploads
    pub async fn resync_youtube_channel(
        &self,
        channel_id: &str,
        progress: &dyn Progress,
    ) -> Result<usize> {
        let channel = self.channel(Platform::Youtube, channel_id).await?;

        let mut snapshots = Vec::new();
        for kind in UploadKind::all() {
            snapshots.extend(self.videos.channel_uploads(channel_id, kind).await?);
            progress.tick();
        }

        let fresh = to_rows(snapshots, channel.id);
        let written = self
            .catalog
            .resync_channel(channel.id, ResyncScope::AllVideos, &fresh)
            .await?;

        info!("Resynced YouTube channel {}: {} videos", channel_id, written);
        Ok(written)
    }

    /// Replace a stream channel's archived rows, keeping the stream that is still live
    pub async fn resync_twitch_channel(
        &self,
        channel_id: &str,
        progress: &dyn Progress,
    ) -> Result<usize> {
        let channel = self.channel(Platform::Twitch, channel_id).await?;

        let mut snapshots = self.streams.channel_uploads(channel_id).await?;
        progress.tick();

        let feed = match self.cache.load_feed().await {
            Ok(feed) => feed.unwrap_or_default(),
            Err(e) => {
                warn!("Cached feed unreadable, archive statuses taken as is: {}", e);
                CachedFeed::default()
            }
        };
        mark_running_streams(&mut snapshots, &feed);

        let fresh = to_rows(snapshots, channel.id);
        let written = self
            .catalog
            .resync_channel(channel.id, ResyncScope::NonLiveVideos, &fresh)
            .await?;

        info!("Resynced Twitch channel {}: {} videos", channel_id, written);
        Ok(written)
    }
}

/// Archives of a stream that is LIVE in the feed stay LIVE with the live thumbnail
fn mark_running_streams(snapshots: &mut [Snapshot], feed: &CachedFeed) {
    let index = feed.index();
    for snapshot in snapshots.iter_mut() {
        let live = snapshot
            .stream_id
            .as_deref()
            .and_then(|id| index.by_stream_id(id))
            .filter(|entry| entry.status == VideoStatus::Live);

        if let Some(entry) = live {
            snapshot.status = VideoStatus::Live;
            if entry.thumbnail.is_some() {
                snapshot.thumbnail = entry.thumbnail.clone();
            }
        }
    }
}

fn to_rows(snapshots: Vec<Snapshot>, channel_id: i64) -> Vec<NewVideo> {
    let mut seen = HashSet::new();
    snapshots
        .into_iter()
        .filter(|s| s.identity_key().map_or(false, |key| seen.insert(key.to_string())))
        .map(|s| s.to_new_video(Some(channel_id)))
        .collect()
}
