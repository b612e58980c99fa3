//! Catalog Store access
//!
//! Durable Channel, Talent and Video rows. The PostgreSQL implementation backs the
//! service; the in-memory one drives tests and local runs without a database.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use livefeed_core::pagination::{CursorPredicate, SortSpec};

use crate::model::{
    Channel, NewVideo, Platform, TalentWithChannels, Video, VideoPatch, VideoRecord, VideoStatus,
    VideoType,
};
use crate::providers::ChannelInfo;
use crate::Result;

pub use memory::InMemoryCatalogRepository;
pub use postgres::PostgresCatalogRepository;

/// Rows written per statement group inside a resync transaction
pub const RESYNC_CHUNK_SIZE: usize = 100;

/// Which of a channel's videos a resync invalidates before inserting the fresh set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncScope {
    AllVideos,
    /// LIVE rows are left alone; their stream is still running
    NonLiveVideos,
}

/// Range query over videos
///
/// The datetime window, status and type filters form one group; rows whose stream id is in
/// `or_stream_ids` are admitted even when they fall outside that group. All other filters
/// apply to every row.
#[derive(Debug, Clone, Default)]
pub struct VideoQuery {
    pub row_ids: Option<Vec<i64>>,
    pub platform: Option<Platform>,
    pub channel_ids: Option<Vec<i64>>,
    pub datetime_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub datetime_to: Option<DateTime<Utc>>,
    /// Empty means any status
    pub statuses: Vec<VideoStatus>,
    /// Empty means any type
    pub types: Vec<VideoType>,
    pub or_stream_ids: Vec<String>,
    pub channel_required: bool,
    pub exclude_unavailable: bool,
    pub null_datetime: bool,
    pub updated_before: Option<DateTime<Utc>>,
    pub cursor: Option<CursorPredicate>,
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
}

impl VideoQuery {
    pub fn by_row_ids(ids: Vec<i64>) -> Self {
        Self {
            row_ids: Some(ids),
            ..Self::default()
        }
    }

    fn has_primary_group(&self) -> bool {
        self.datetime_from.is_some()
            || self.datetime_to.is_some()
            || !self.statuses.is_empty()
            || !self.types.is_empty()
    }

    fn in_primary_group(&self, video: &Video) -> bool {
        let in_window = match video.datetime {
            Some(dt) => {
                self.datetime_from.map_or(true, |from| dt >= from)
                    && self.datetime_to.map_or(true, |to| dt < to)
            }
            None => self.datetime_from.is_none() && self.datetime_to.is_none(),
        };

        in_window
            && (self.statuses.is_empty() || self.statuses.contains(&video.status))
            && (self.types.is_empty() || self.types.contains(&video.video_type))
    }

    /// Row filter shared by implementations that evaluate queries in process
    pub fn matches(&self, record: &VideoRecord) -> bool {
        let video = &record.video;

        if let Some(ids) = &self.row_ids {
            if !ids.contains(&video.id) {
                return false;
            }
        }
        if self.platform.map_or(false, |p| p != video.platform) {
            return false;
        }
        if let Some(channels) = &self.channel_ids {
            if !video.channel_id.map_or(false, |id| channels.contains(&id)) {
                return false;
            }
        }
        if self.channel_required && video.channel_id.is_none() {
            return false;
        }
        if self.exclude_unavailable && video.status == VideoStatus::Unavailable {
            return false;
        }
        if self.null_datetime && video.datetime.is_some() {
            return false;
        }
        if self.updated_before.map_or(false, |before| video.updated_at > before) {
            return false;
        }
        if let Some(cursor) = &self.cursor {
            if !cursor.admits_row(record) {
                return false;
            }
        }

        let by_stream = video
            .stream_id
            .as_ref()
            .map_or(false, |id| self.or_stream_ids.contains(id));

        if !self.has_primary_group() {
            return self.or_stream_ids.is_empty() || by_stream;
        }
        self.in_primary_group(video) || by_stream
    }
}

/// Catalog repository
///
/// Every mutation is issued by the reconciliation engine, the channel resync jobs or the
/// status sweep.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find_video_by_stream_id(&self, stream_id: &str) -> Result<Option<VideoRecord>>;

    /// Row matching either unique key. Stream id is checked first.
    async fn find_video_by_keys(
        &self,
        stream_id: Option<&str>,
        video_id: Option<&str>,
    ) -> Result<Option<Video>>;

    /// Insert, or update the row matching the stream id or video id.
    ///
    /// A unique-key race is retried as an update and surfaces as `ConflictDuringUpsert`
    /// only when the retry finds nothing to update.
    async fn upsert_video(&self, video: &NewVideo) -> Result<Video>;

    async fn update_video(&self, id: i64, patch: &VideoPatch) -> Result<()>;

    async fn update_status_by_ids(&self, ids: &[i64], status: VideoStatus) -> Result<u64>;

    /// Returns false when no row has that video id
    async fn update_by_video_id(&self, video_id: &str, patch: &VideoPatch) -> Result<bool>;

    async fn mark_unavailable_by_video_ids(&self, video_ids: &[String]) -> Result<u64>;

    /// Rows with their channel and owning talents, ordered by `query.sort` when given
    async fn query_videos(&self, query: &VideoQuery) -> Result<Vec<VideoRecord>>;

    async fn find_channel_by_external_id(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Option<Channel>>;

    async fn find_talent_by_slug(&self, slug: &str) -> Result<Option<TalentWithChannels>>;

    async fn list_channels(&self, platform: Platform) -> Result<Vec<Channel>>;

    /// Channels linked to a talent that is not delisted
    async fn list_tracked_channels(&self, platform: Platform) -> Result<Vec<Channel>>;

    /// Returns false when the channel is unknown
    async fn update_channel_info(&self, info: &ChannelInfo) -> Result<bool>;

    /// Invalidate the channel's videos per `scope` and upsert `videos`, atomically
    async fn resync_channel(
        &self,
        channel_id: i64,
        scope: ResyncScope,
        videos: &[NewVideo],
    ) -> Result<usize>;

    /// Mark RETIRED every talent whose retirement date is before `as_of`; returns their slugs
    async fn retire_talents(&self, as_of: NaiveDate) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: i64, status: VideoStatus, datetime: Option<DateTime<Utc>>) -> VideoRecord {
        VideoRecord {
            video: Video {
                id,
                platform: Platform::Youtube,
                video_id: Some(format!("v{}", id)),
                stream_id: Some(format!("v{}", id)),
                title: String::new(),
                thumbnail: None,
                datetime,
                views: 0,
                durations: 0,
                status,
                video_type: VideoType::Live,
                channel_id: Some(1),
                updated_at: Utc::now(),
            },
            channel: None,
            talents: Vec::new(),
        }
    }

    #[test]
    fn test_window_or_stream_ids() {
        let noon = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let query = VideoQuery {
            datetime_from: Some(noon - chrono::Duration::hours(1)),
            datetime_to: Some(noon + chrono::Duration::hours(1)),
            statuses: vec![VideoStatus::Upcoming],
            or_stream_ids: vec!["v3".to_string()],
            ..VideoQuery::default()
        };

        assert!(query.matches(&record(1, VideoStatus::Upcoming, Some(noon))));
        assert!(!query.matches(&record(2, VideoStatus::Finished, Some(noon))));
        assert!(query.matches(&record(3, VideoStatus::Finished, None)));
        assert!(!query.matches(&record(4, VideoStatus::Upcoming, None)));
    }

    #[test]
    fn test_window_end_is_exclusive() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let midnight = start + chrono::Duration::days(1);
        let query = VideoQuery {
            datetime_from: Some(start),
            datetime_to: Some(midnight),
            ..VideoQuery::default()
        };

        assert!(query.matches(&record(1, VideoStatus::Upcoming, Some(start))));
        assert!(!query.matches(&record(2, VideoStatus::Upcoming, Some(midnight))));
    }

    #[test]
    fn test_stream_ids_alone_restrict() {
        let query = VideoQuery {
            or_stream_ids: vec!["v1".to_string()],
            ..VideoQuery::default()
        };
        assert!(query.matches(&record(1, VideoStatus::Live, None)));
        assert!(!query.matches(&record(2, VideoStatus::Live, None)));
    }

    #[test]
    fn test_global_filters() {
        let query = VideoQuery {
            exclude_unavailable: true,
            null_datetime: true,
            ..VideoQuery::default()
        };
        assert!(query.matches(&record(1, VideoStatus::Upcoming, None)));
        assert!(!query.matches(&record(2, VideoStatus::Unavailable, None)));
        assert!(!query.matches(&record(3, VideoStatus::Upcoming, Some(Utc::now()))));
    }
}
