//! YouTube adapter over the YouTube Data API v3
//!
//! Uploads come from the channel's system playlists (`UU` all uploads, `UULF` videos,
//! `UULV` live archive, `UUSH` shorts), details from `videos.list`, and channel profile
//! data from `channels.list`. Every id-list call is limited to 50 ids.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, Offset, Utc};
use futures::future::try_join_all;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

use super::paging::{collect_bounded, pages, ContinuationPage, StopPolicy, StopReason};
use super::{join_listings, ChannelInfo, Snapshot, UploadKind, VideoPlatformProvider};
use crate::model::{Platform, VideoStatus, VideoType};
use crate::{IngestionError, Result};

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const MAX_IDS_PER_CALL: usize = 50;
/// Playlist page size when building the live snapshot
const LIVE_SNAPSHOT_PAGE_SIZE: usize = 10;
const LIVE_SNAPSHOT_MAX_PAGES: usize = 5;
const UPLOAD_MAX_PAGES: usize = 40;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    content_details: PlaylistItemDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemDetails {
    video_id: String,
    video_published_at: Option<DateTime<Utc>>,
}

impl PlaylistItemDetails {
    fn published_on(&self, day: NaiveDate, offset: FixedOffset) -> bool {
        self.video_published_at
            .map_or(false, |at| at.with_timezone(&offset).date_naive() == day)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiVideo {
    pub id: String,
    pub snippet: Option<ApiSnippet>,
    pub live_streaming_details: Option<ApiLiveDetails>,
    pub statistics: Option<ApiStatistics>,
    pub content_details: Option<ApiContentDetails>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSnippet {
    pub title: Option<String>,
    pub channel_id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub thumbnails: HashMap<String, ApiThumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiThumbnail {
    pub url: String,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLiveDetails {
    pub actual_start_time: Option<DateTime<Utc>>,
    pub scheduled_start_time: Option<DateTime<Utc>>,
    pub concurrent_viewers: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStatistics {
    pub view_count: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiContentDetails {
    pub duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChannel {
    id: String,
    snippet: Option<ApiChannelSnippet>,
    statistics: Option<ApiChannelStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiChannelSnippet {
    title: Option<String>,
    custom_url: Option<String>,
    #[serde(default)]
    thumbnails: HashMap<String, ApiThumbnail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiChannelStatistics {
    subscriber_count: Option<String>,
}

fn parse_count(raw: Option<&str>) -> i64 {
    raw.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0)
}

fn largest_thumbnail(thumbnails: &HashMap<String, ApiThumbnail>) -> Option<String> {
    thumbnails
        .values()
        .max_by_key(|t| t.height.unwrap_or(0))
        .map(|t| t.url.clone())
}

/// Parse an ISO 8601 duration such as `PT1H2M3S` into seconds
pub fn parse_iso_duration(raw: &str) -> Option<i32> {
    let rest = raw.strip_prefix('P')?;
    let (days, time) = match rest.split_once('T') {
        Some((days, time)) => (days, time),
        None => (rest, ""),
    };

    let mut total: i64 = 0;
    let mut number = String::new();
    for (part, is_time) in [(days, false), (time, true)] {
        for c in part.chars() {
            if c.is_ascii_digit() {
                number.push(c);
                continue;
            }
            let value: i64 = number.parse().ok()?;
            number.clear();
            let unit = match (c, is_time) {
                ('D', false) => 86_400,
                ('W', false) => 7 * 86_400,
                ('H', true) => 3_600,
                ('M', true) => 60,
                ('S', true) => 1,
                _ => return None,
            };
            total = value.checked_mul(unit).and_then(|secs| total.checked_add(secs))?;
        }
        if !number.is_empty() {
            return None;
        }
    }

    i32::try_from(total).ok()
}

/// Normalize a `videos.list` item
///
/// An actual start with concurrent viewers is LIVE and reports the viewer count as views;
/// an actual start without viewers has ended; a scheduled start alone is UPCOMING;
/// anything else is a finished upload dated by its publish time.
pub fn snapshot_from_api(video: &ApiVideo, type_hint: Option<VideoType>) -> Snapshot {
    let snippet = video.snippet.as_ref();
    let live = video.live_streaming_details.as_ref();

    let mut views = parse_count(
        video
            .statistics
            .as_ref()
            .and_then(|s| s.view_count.as_deref()),
    );
    let mut status = VideoStatus::Finished;
    let datetime;

    match live {
        Some(details) if details.actual_start_time.is_some() => {
            datetime = details.actual_start_time;
            if let Some(viewers) = details.concurrent_viewers.as_deref() {
                status = VideoStatus::Live;
                views = parse_count(Some(viewers));
            }
        }
        Some(details) if details.scheduled_start_time.is_some() => {
            datetime = details.scheduled_start_time;
            status = VideoStatus::Upcoming;
        }
        _ => {
            datetime = snippet.and_then(|s| s.published_at);
        }
    }

    let video_type = match type_hint {
        Some(hint) => hint,
        None if live.is_some() => VideoType::Live,
        None => VideoType::Uploaded,
    };

    Snapshot {
        platform: Platform::Youtube,
        video_id: Some(video.id.clone()),
        stream_id: Some(video.id.clone()),
        channel_id: snippet.and_then(|s| s.channel_id.clone()),
        title: snippet.and_then(|s| s.title.clone()).unwrap_or_default(),
        thumbnail: snippet.and_then(|s| largest_thumbnail(&s.thumbnails)),
        datetime,
        views,
        durations: video
            .content_details
            .as_ref()
            .and_then(|c| c.duration.as_deref())
            .and_then(parse_iso_duration)
            .unwrap_or(0),
        status,
        video_type,
    }
}

fn upload_playlist(channel_id: &str, kind: Option<UploadKind>) -> String {
    let suffix = channel_id.strip_prefix("UC").unwrap_or(channel_id);
    let prefix = match kind {
        None => "UU",
        Some(UploadKind::Videos) => "UULF",
        Some(UploadKind::Live) => "UULV",
        Some(UploadKind::Shorts) => "UUSH",
    };
    format!("{}{}", prefix, suffix)
}

/// YouTube Data API v3 provider
pub struct YoutubeDataProvider {
    client: Client,
    api_key: String,
    base_url: String,
    upload_item_cap: usize,
    local_offset: FixedOffset,
}

impl YoutubeDataProvider {
    /// Create a new provider
    ///
    /// # Arguments
    /// * `api_key` - YouTube Data API v3 key
    /// * `upload_item_cap` - Maximum items read from one upload playlist
    pub fn new(api_key: impl Into<String>, upload_item_cap: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IngestionError::provider(Platform::Youtube, e))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: API_BASE.to_string(),
            upload_item_cap,
            local_offset: Utc.fix(),
        })
    }

    /// Offset that decides which uploads count as published today
    pub fn with_local_offset(mut self, offset: FixedOffset) -> Self {
        self.local_offset = offset;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| IngestionError::provider(Platform::Youtube, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestionError::provider(
                Platform::Youtube,
                format!("{} returned {}", path, status),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| IngestionError::provider(Platform::Youtube, e))
    }

    async fn videos(&self, ids: &[String]) -> Result<Vec<ApiVideo>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let calls = ids.chunks(MAX_IDS_PER_CALL).map(|chunk| async move {
            let response: ListResponse<ApiVideo> = self
                .get_json(
                    "videos",
                    &[
                        (
                            "part",
                            "snippet,liveStreamingDetails,statistics,contentDetails".to_string(),
                        ),
                        ("id", chunk.join(",")),
                        ("maxResults", MAX_IDS_PER_CALL.to_string()),
                    ],
                )
                .await?;
            Ok::<_, IngestionError>(response.items)
        });

        Ok(try_join_all(calls).await?.into_iter().flatten().collect())
    }

    async fn playlist_page(
        &self,
        playlist_id: &str,
        page_size: usize,
        token: Option<String>,
    ) -> Result<ContinuationPage<PlaylistItemDetails>> {
        let mut query = vec![
            ("part", "contentDetails".to_string()),
            ("playlistId", playlist_id.to_string()),
            ("maxResults", page_size.min(MAX_IDS_PER_CALL).to_string()),
        ];
        if let Some(token) = token {
            query.push(("pageToken", token));
        }

        let response: ListResponse<PlaylistItem> = self.get_json("playlistItems", &query).await?;
        Ok(ContinuationPage {
            items: response
                .items
                .into_iter()
                .map(|item| item.content_details)
                .collect(),
            next: response.next_page_token,
        })
    }
}

#[async_trait]
impl VideoPlatformProvider for YoutubeDataProvider {
    #[instrument(skip(self, channel_ids), fields(channels = channel_ids.len()))]
    async fn live_snapshot(&self, channel_ids: &[String]) -> Result<Vec<Snapshot>> {
        let now = Utc::now();
        let recent_cutoff = now - ChronoDuration::days(1);
        let offset = self.local_offset;
        let today = now.with_timezone(&offset).date_naive();

        // Later pages are read only while the previous one still had uploads from today.
        // Upcoming streams keep the publish time of their creation, so every item of the
        // pages read is inspected regardless of when it was published.
        let published_today = move |item: &PlaylistItemDetails| item.published_on(today, offset);
        let policy = StopPolicy {
            max_items: LIVE_SNAPSHOT_PAGE_SIZE * LIVE_SNAPSHOT_MAX_PAGES,
            max_pages: LIVE_SNAPSHOT_MAX_PAGES,
            recent: Some(&published_today),
        };

        let listings = channel_ids.iter().map(|channel_id| {
            let policy = &policy;
            async move {
                let playlist = upload_playlist(channel_id, None);
                let stream = pages(None, |token| {
                    self.playlist_page(&playlist, LIVE_SNAPSHOT_PAGE_SIZE, token)
                });
                let collected = collect_bounded(stream, policy).await.map_err(|e| {
                    IngestionError::provider(Platform::Youtube, format!("{}: {}", channel_id, e))
                })?;
                Ok::<_, IngestionError>(collected.items)
            }
        });
        let ids: Vec<String> = join_listings(Platform::Youtube, listings)
            .await?
            .into_iter()
            .map(|item| item.video_id)
            .collect();

        let snapshots = self
            .videos(&ids)
            .await?
            .iter()
            .map(|video| snapshot_from_api(video, None))
            .filter(|s| {
                matches!(s.status, VideoStatus::Live | VideoStatus::Upcoming)
                    || s.datetime.map_or(false, |at| at >= recent_cutoff)
            })
            .collect::<Vec<_>>();

        debug!("YouTube live snapshot holds {} videos", snapshots.len());
        Ok(snapshots)
    }

    #[instrument(skip(self))]
    async fn channel_uploads(&self, channel_id: &str, kind: UploadKind) -> Result<Vec<Snapshot>> {
        let playlist = upload_playlist(channel_id, Some(kind));
        let stream = pages(None, |token| self.playlist_page(&playlist, MAX_IDS_PER_CALL, token));
        let policy = StopPolicy::capped(self.upload_item_cap).with_page_cap(UPLOAD_MAX_PAGES);
        let collected = collect_bounded(stream, &policy).await?;
        if collected.stop != StopReason::Exhausted {
            debug!(
                stop = ?collected.stop,
                resume_from = ?collected.resume_from,
                "Upload listing of {} truncated",
                channel_id
            );
        }

        let ids: Vec<String> = collected.items.into_iter().map(|i| i.video_id).collect();
        let snapshots = self
            .videos(&ids)
            .await?
            .iter()
            .map(|video| snapshot_from_api(video, Some(kind.video_type())))
            .collect();
        Ok(snapshots)
    }

    async fn video_detail(&self, video_id: &str) -> Result<Option<Snapshot>> {
        let videos = self.videos(&[video_id.to_string()]).await?;
        Ok(videos.first().map(|video| snapshot_from_api(video, None)))
    }

    async fn authoritative_batch(&self, video_ids: &[String]) -> Result<Vec<Snapshot>> {
        if video_ids.len() > MAX_IDS_PER_CALL {
            return Err(IngestionError::Internal(format!(
                "authoritative batch accepts at most {} ids, got {}",
                MAX_IDS_PER_CALL,
                video_ids.len()
            )));
        }

        Ok(self
            .videos(video_ids)
            .await?
            .iter()
            .map(|video| snapshot_from_api(video, None))
            .collect())
    }

    async fn channel_info(&self, channel_ids: &[String]) -> Result<Vec<ChannelInfo>> {
        let calls = channel_ids.chunks(MAX_IDS_PER_CALL).map(|chunk| async move {
            let response: ListResponse<ApiChannel> = self
                .get_json(
                    "channels",
                    &[
                        ("part", "snippet,statistics".to_string()),
                        ("id", chunk.join(",")),
                        ("maxResults", MAX_IDS_PER_CALL.to_string()),
                    ],
                )
                .await?;
            Ok::<_, IngestionError>(response.items)
        });

        let channels = try_join_all(calls).await?.into_iter().flatten();
        Ok(channels
            .map(|channel| ChannelInfo {
                platform: Platform::Youtube,
                name: channel.snippet.as_ref().and_then(|s| s.title.clone()),
                username: channel.snippet.as_ref().and_then(|s| s.custom_url.clone()),
                profile_img_url: channel
                    .snippet
                    .as_ref()
                    .and_then(|s| largest_thumbnail(&s.thumbnails)),
                followers: parse_count(
                    channel
                        .statistics
                        .as_ref()
                        .and_then(|s| s.subscriber_count.as_deref()),
                ),
                channel_id: channel.id,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api_video(value: serde_json::Value) -> ApiVideo {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_iso_duration() {
        assert_eq!(parse_iso_duration("PT1H2M3S"), Some(3723));
        assert_eq!(parse_iso_duration("PT45S"), Some(45));
        assert_eq!(parse_iso_duration("P1DT1S"), Some(86_401));
        assert_eq!(parse_iso_duration("P0D"), Some(0));
        assert_eq!(parse_iso_duration("1H"), None);
        assert_eq!(parse_iso_duration("PT5"), None);
        assert_eq!(parse_iso_duration("P9223372036854775807D"), None);
        assert_eq!(parse_iso_duration("PT9223372036854775807H1S"), None);
    }

    #[test]
    fn test_published_on_uses_local_day() {
        let offset = FixedOffset::east_opt(7 * 3600).unwrap();
        let item: PlaylistItemDetails = serde_json::from_value(json!({
            "videoId": "late",
            "videoPublishedAt": "2024-05-01T18:30:00Z"
        }))
        .unwrap();

        let local_day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert!(item.published_on(local_day, offset));
        assert!(!item.published_on(local_day, Utc.fix()));

        let undated: PlaylistItemDetails =
            serde_json::from_value(json!({"videoId": "private"})).unwrap();
        assert!(!undated.published_on(local_day, offset));
    }

    #[test]
    fn test_live_video_reports_concurrent_viewers() {
        let video = api_video(json!({
            "id": "abc",
            "snippet": {
                "title": "Live now",
                "channelId": "UC123",
                "publishedAt": "2024-05-01T10:00:00Z",
                "thumbnails": {
                    "default": {"url": "https://i.ytimg.com/small.jpg", "height": 90},
                    "maxres": {"url": "https://i.ytimg.com/max.jpg", "height": 720}
                }
            },
            "liveStreamingDetails": {
                "actualStartTime": "2024-05-01T12:00:00Z",
                "concurrentViewers": "1520"
            },
            "statistics": {"viewCount": "99"}
        }));

        let snapshot = snapshot_from_api(&video, None);
        assert_eq!(snapshot.status, VideoStatus::Live);
        assert_eq!(snapshot.views, 1520);
        assert_eq!(snapshot.video_type, VideoType::Live);
        assert_eq!(snapshot.channel_id.as_deref(), Some("UC123"));
        assert_eq!(snapshot.thumbnail.as_deref(), Some("https://i.ytimg.com/max.jpg"));
        assert_eq!(
            snapshot.datetime.unwrap().to_rfc3339(),
            "2024-05-01T12:00:00+00:00"
        );
    }

    #[test]
    fn test_scheduled_video_is_upcoming() {
        let video = api_video(json!({
            "id": "up",
            "snippet": {"title": "Soon", "publishedAt": "2024-05-01T10:00:00Z"},
            "liveStreamingDetails": {"scheduledStartTime": "2024-05-02T12:00:00Z"}
        }));

        let snapshot = snapshot_from_api(&video, None);
        assert_eq!(snapshot.status, VideoStatus::Upcoming);
        assert_eq!(
            snapshot.datetime.unwrap().to_rfc3339(),
            "2024-05-02T12:00:00+00:00"
        );
    }

    #[test]
    fn test_ended_stream_and_plain_upload_are_finished() {
        let ended = api_video(json!({
            "id": "ended",
            "liveStreamingDetails": {"actualStartTime": "2024-05-01T12:00:00Z"},
            "statistics": {"viewCount": "42"}
        }));
        let ended = snapshot_from_api(&ended, None);
        assert_eq!(ended.status, VideoStatus::Finished);
        assert_eq!(ended.views, 42);

        let upload = api_video(json!({
            "id": "short",
            "snippet": {"title": "clip", "publishedAt": "2024-05-01T10:00:00Z"},
            "contentDetails": {"duration": "PT59S"}
        }));
        let upload = snapshot_from_api(&upload, Some(VideoType::Short));
        assert_eq!(upload.status, VideoStatus::Finished);
        assert_eq!(upload.video_type, VideoType::Short);
        assert_eq!(upload.durations, 59);
    }

    #[test]
    fn test_upload_playlist_ids() {
        assert_eq!(upload_playlist("UCabc", None), "UUabc");
        assert_eq!(upload_playlist("UCabc", Some(UploadKind::Shorts)), "UUSHabc");
        assert_eq!(upload_playlist("UCabc", Some(UploadKind::Live)), "UULVabc");
    }
}
