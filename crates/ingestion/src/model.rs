//! Catalog entities and the merged feed entry served to readers

use chrono::{DateTime, NaiveDate, Utc};
use livefeed_core::pagination::SortKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::IngestionError;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = IngestionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(IngestionError::Internal(format!(
                        "unknown {} value '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

/// Content platform. YouTube is the video-based platform, Twitch the stream-based one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    Youtube,
    Twitch,
}

string_enum!(Platform { Youtube => "YOUTUBE", Twitch => "TWITCH" });

impl Platform {
    pub fn is_stream_based(&self) -> bool {
        matches!(self, Self::Twitch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VideoStatus {
    Upcoming,
    Live,
    Finished,
    Unavailable,
}

string_enum!(VideoStatus {
    Upcoming => "UPCOMING",
    Live => "LIVE",
    Finished => "FINISHED",
    Unavailable => "UNAVAILABLE",
});

impl VideoStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Upcoming => 0,
            Self::Live => 1,
            Self::Finished => 2,
            Self::Unavailable => 3,
        }
    }

    /// Whether `next` is reachable from `self` without fresh platform evidence.
    ///
    /// Forward moves along UPCOMING -> LIVE -> FINISHED and any move to UNAVAILABLE are
    /// allowed. Leaving UNAVAILABLE always needs a fresh snapshot.
    pub fn advances_to(self, next: VideoStatus) -> bool {
        if next == Self::Unavailable {
            return true;
        }
        self != Self::Unavailable && next.rank() >= self.rank()
    }

    /// Statuses visible on read paths
    pub fn visible() -> [VideoStatus; 3] {
        [Self::Finished, Self::Live, Self::Upcoming]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VideoType {
    Uploaded,
    Live,
    Short,
}

string_enum!(VideoType { Uploaded => "UPLOADED", Live => "LIVE", Short => "SHORT" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TalentStatus {
    Active,
    Retired,
    Delisted,
}

string_enum!(TalentStatus { Active => "ACTIVE", Retired => "RETIRED", Delisted => "DELISTED" });

/// Where a talent's profile picture comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProfileImageSource {
    Twitch,
    Youtube,
    Uploaded,
    None,
}

string_enum!(ProfileImageSource {
    Twitch => "TWITCH",
    Youtube => "YOUTUBE",
    Uploaded => "UPLOADED",
    None => "NONE",
});

impl ProfileImageSource {
    /// Pick the image URL this source points at
    pub fn pick(
        self,
        uploaded: Option<&str>,
        youtube: Option<&str>,
        twitch: Option<&str>,
    ) -> Option<String> {
        match self {
            Self::Twitch => twitch,
            Self::Youtube => youtube,
            Self::Uploaded => uploaded,
            Self::None => None,
        }
        .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub platform: Platform,
    /// Platform-side channel identifier
    pub channel_id: String,
    pub name: Option<String>,
    pub username: Option<String>,
    pub followers: i64,
    pub profile_img_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Talent {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub status: TalentStatus,
    pub profile_img_source: ProfileImageSource,
    pub uploaded_img_url: Option<String>,
    pub youtube_channel_id: Option<i64>,
    pub twitch_channel_id: Option<i64>,
    /// Local date after which the talent is considered retired
    pub retired_on: Option<NaiveDate>,
}

impl Talent {
    /// Resolve the profile image from the configured source
    pub fn image_url(
        &self,
        youtube: Option<&Channel>,
        twitch: Option<&Channel>,
    ) -> Option<String> {
        self.profile_img_source.pick(
            self.uploaded_img_url.as_deref(),
            youtube.and_then(|c| c.profile_img_url.as_deref()),
            twitch.and_then(|c| c.profile_img_url.as_deref()),
        )
    }

    pub fn channel_ids(&self) -> Vec<i64> {
        self.youtube_channel_id
            .into_iter()
            .chain(self.twitch_channel_id)
            .collect()
    }
}

/// A talent together with its linked channels
#[derive(Debug, Clone)]
pub struct TalentWithChannels {
    pub talent: Talent,
    pub youtube: Option<Channel>,
    pub twitch: Option<Channel>,
}

impl TalentWithChannels {
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.youtube.iter().chain(self.twitch.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub id: i64,
    pub platform: Platform,
    pub video_id: Option<String>,
    pub stream_id: Option<String>,
    pub title: String,
    pub thumbnail: Option<String>,
    pub datetime: Option<DateTime<Utc>>,
    pub views: i64,
    /// Duration in seconds
    pub durations: i32,
    pub status: VideoStatus,
    pub video_type: VideoType,
    pub channel_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// Values written when creating or fully refreshing a video row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVideo {
    pub platform: Platform,
    pub video_id: Option<String>,
    pub stream_id: Option<String>,
    pub title: String,
    pub thumbnail: Option<String>,
    pub datetime: Option<DateTime<Utc>>,
    pub views: i64,
    pub durations: i32,
    pub status: VideoStatus,
    pub video_type: VideoType,
    pub channel_id: Option<i64>,
}

/// Partial update of a video row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoPatch {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub datetime: Option<DateTime<Utc>>,
    pub views: Option<i64>,
    pub durations: Option<i32>,
    pub status: Option<VideoStatus>,
}

impl VideoPatch {
    pub fn status(status: VideoStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// True when applying the patch would change any column of `video`
    pub fn changes(&self, video: &Video) -> bool {
        self.title.as_ref().map_or(false, |t| *t != video.title)
            || self
                .thumbnail
                .as_ref()
                .map_or(false, |t| video.thumbnail.as_ref() != Some(t))
            || self.datetime.map_or(false, |d| video.datetime != Some(d))
            || self.views.map_or(false, |v| v != video.views)
            || self.durations.map_or(false, |d| d != video.durations)
            || self.status.map_or(false, |s| s != video.status)
    }

    pub fn apply(&self, video: &mut Video, now: DateTime<Utc>) {
        if let Some(title) = &self.title {
            video.title = title.clone();
        }
        if let Some(thumbnail) = &self.thumbnail {
            video.thumbnail = Some(thumbnail.clone());
        }
        if let Some(datetime) = self.datetime {
            video.datetime = Some(datetime);
        }
        if let Some(views) = self.views {
            video.views = views;
        }
        if let Some(durations) = self.durations {
            video.durations = durations;
        }
        if let Some(status) = self.status {
            video.status = status;
        }
        video.updated_at = now;
    }
}

/// Talent as shown next to a video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TalentRef {
    pub slug: String,
    pub name: String,
    pub status: TalentStatus,
    pub image_url: Option<String>,
}

/// A video row joined with its channel and the talents owning that channel
#[derive(Debug, Clone)]
pub struct VideoRecord {
    pub video: Video,
    pub channel: Option<Channel>,
    pub talents: Vec<TalentRef>,
}

/// Canonical watch URL for a video
pub fn watch_url(
    platform: Platform,
    video_type: VideoType,
    status: VideoStatus,
    video_id: Option<&str>,
    channel_username: Option<&str>,
) -> Option<String> {
    match platform {
        Platform::Twitch => match (status, video_id) {
            (VideoStatus::Finished, Some(id)) => {
                Some(format!("https://www.twitch.tv/videos/{}", id))
            }
            _ => channel_username.map(|user| format!("https://www.twitch.tv/{}", user)),
        },
        Platform::Youtube => video_id.map(|id| match video_type {
            VideoType::Short => format!("https://www.youtube.com/shorts/{}", id),
            _ => format!("https://www.youtube.com/watch?v={}", id),
        }),
    }
}

/// Feed entry served to readers and stored in the feed cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoView {
    pub id: i64,
    pub platform: Platform,
    pub video_id: Option<String>,
    pub stream_id: Option<String>,
    pub title: String,
    pub thumbnail: Option<String>,
    pub datetime: Option<DateTime<Utc>>,
    pub views: i64,
    pub durations: i32,
    pub status: VideoStatus,
    #[serde(rename = "type")]
    pub video_type: VideoType,
    pub url: Option<String>,
    pub channel_username: Option<String>,
    pub talents: Vec<TalentRef>,
    pub updated_at: DateTime<Utc>,
}

impl From<VideoRecord> for VideoView {
    fn from(record: VideoRecord) -> Self {
        let VideoRecord {
            video,
            channel,
            talents,
        } = record;
        let channel_username = channel.and_then(|c| c.username);

        let mut view = Self {
            id: video.id,
            platform: video.platform,
            video_id: video.video_id,
            stream_id: video.stream_id,
            title: video.title,
            thumbnail: video.thumbnail,
            datetime: video.datetime,
            views: video.views,
            durations: video.durations,
            status: video.status,
            video_type: video.video_type,
            url: None,
            channel_username,
            talents,
            updated_at: video.updated_at,
        };
        view.refresh_url();
        view
    }
}

impl VideoView {
    /// Identity used to match entries across the cache and the store
    pub fn identity_key(&self) -> Option<&str> {
        self.stream_id.as_deref().or(self.video_id.as_deref())
    }

    pub fn refresh_url(&mut self) {
        self.url = watch_url(
            self.platform,
            self.video_type,
            self.status,
            self.video_id.as_deref(),
            self.channel_username.as_deref(),
        );
    }

    /// Overlay the most recently merged cached values on a stored row.
    ///
    /// Cached status, views, thumbnail, title and duration win. A cached status never
    /// moves the stored status backwards.
    pub fn overlay(&mut self, cached: &VideoView) {
        if self.status.advances_to(cached.status) {
            self.status = cached.status;
        }
        self.views = cached.views;
        if cached.thumbnail.is_some() {
            self.thumbnail = cached.thumbnail.clone();
        }
        if !cached.title.is_empty() {
            self.title = cached.title.clone();
        }
        if cached.durations > 0 {
            self.durations = cached.durations;
        }
        self.refresh_url();
    }

    /// Merge used when rebuilding the live feed: like [`overlay`](Self::overlay) but the
    /// longest known duration is kept.
    pub fn merge_rebuilt(&mut self, cached: &VideoView) {
        let durations = self.durations.max(cached.durations);
        self.overlay(cached);
        self.durations = durations;
    }

    pub fn has_visible_talent(&self) -> bool {
        self.talents
            .iter()
            .any(|t| t.status != TalentStatus::Delisted)
    }
}

impl SortKey for VideoView {
    fn sort_id(&self) -> i64 {
        self.id
    }

    fn sort_datetime(&self) -> Option<DateTime<Utc>> {
        self.datetime
    }

    fn sort_views(&self) -> i64 {
        self.views
    }
}

impl SortKey for VideoRecord {
    fn sort_id(&self) -> i64 {
        self.video.id
    }

    fn sort_datetime(&self) -> Option<DateTime<Utc>> {
        self.video.datetime
    }

    fn sort_views(&self) -> i64 {
        self.video.views
    }
}
