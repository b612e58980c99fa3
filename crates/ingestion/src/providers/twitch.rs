//! Twitch adapter over the Helix API with an app access token

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::paging::{collect_bounded, pages, ContinuationPage, StopPolicy};
use super::{join_listings, ChannelInfo, Snapshot, StreamPlatformProvider};
use crate::model::{Platform, VideoStatus, VideoType};
use crate::{IngestionError, Result};

const API_BASE: &str = "https://api.twitch.tv/helix";
const AUTH_BASE: &str = "https://id.twitch.tv";
const MAX_IDS_PER_CALL: usize = 100;
const UPLOAD_MAX_PAGES: usize = 20;
/// Refresh the app token this long before Twitch says it expires
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct HelixResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<HelixPagination>,
}

#[derive(Debug, Deserialize)]
struct HelixPagination {
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FollowersResponse {
    total: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixStream {
    pub id: String,
    pub user_id: String,
    pub user_login: String,
    pub title: String,
    pub viewer_count: i64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelixVideo {
    pub id: String,
    pub stream_id: Option<String>,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub thumbnail_url: String,
    pub view_count: i64,
    pub duration: String,
}

#[derive(Debug, Clone, Deserialize)]
struct HelixUser {
    id: String,
    login: String,
    display_name: String,
    profile_image_url: Option<String>,
}

struct AppToken {
    access_token: String,
    expires_at: Instant,
}

/// Live preview URL of a channel
pub fn live_thumbnail(user_login: &str) -> String {
    format!(
        "https://static-cdn.jtvnw.net/previews-ttv/live_user_{}-1280x720.jpg",
        user_login
    )
}

/// Parse a Helix duration such as `3h8m33s` into seconds
pub fn parse_helix_duration(raw: &str) -> Option<i32> {
    let mut total: i64 = 0;
    let mut number = String::new();

    for c in raw.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let value: i64 = number.parse().ok()?;
        number.clear();
        total += match c {
            'h' => value * 3_600,
            'm' => value * 60,
            's' => value,
            _ => return None,
        };
    }

    if !number.is_empty() {
        return None;
    }
    i32::try_from(total).ok()
}

pub fn snapshot_from_stream(stream: &HelixStream) -> Snapshot {
    Snapshot {
        platform: Platform::Twitch,
        video_id: None,
        stream_id: Some(stream.id.clone()),
        channel_id: Some(stream.user_id.clone()),
        title: stream.title.clone(),
        thumbnail: Some(live_thumbnail(&stream.user_login)),
        datetime: Some(stream.started_at),
        views: stream.viewer_count,
        durations: 0,
        status: VideoStatus::Live,
        video_type: VideoType::Live,
    }
}

/// Normalize an archived video. Archives are FINISHED; the backfill job re-marks the
/// one that belongs to a stream still live in the feed.
pub fn snapshot_from_video(video: &HelixVideo) -> Snapshot {
    let stream_id = video.stream_id.clone().filter(|id| !id.is_empty());
    let thumbnail = Some(video.thumbnail_url.as_str())
        .filter(|url| !url.is_empty())
        .map(|url| url.replace("%{width}", "1280").replace("%{height}", "720"));

    Snapshot {
        platform: Platform::Twitch,
        video_id: Some(video.id.clone()),
        video_type: if stream_id.is_some() {
            VideoType::Live
        } else {
            VideoType::Uploaded
        },
        stream_id,
        channel_id: Some(video.user_id.clone()),
        title: video.title.clone(),
        thumbnail,
        datetime: Some(video.created_at),
        views: video.view_count,
        durations: parse_helix_duration(&video.duration).unwrap_or(0),
        status: VideoStatus::Finished,
    }
}

/// Twitch Helix provider
pub struct TwitchHelixProvider {
    client: Client,
    client_id: String,
    client_secret: String,
    api_base: String,
    auth_base: String,
    upload_item_cap: usize,
    token: RwLock<Option<AppToken>>,
}

impl TwitchHelixProvider {
    /// Create a new provider
    ///
    /// # Arguments
    /// * `client_id` - Twitch application client id
    /// * `client_secret` - Twitch application secret
    /// * `upload_item_cap` - Maximum archived videos read per channel
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        upload_item_cap: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IngestionError::provider(Platform::Twitch, e))?;

        Ok(Self {
            client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_base: API_BASE.to_string(),
            auth_base: AUTH_BASE.to_string(),
            upload_item_cap,
            token: RwLock::new(None),
        })
    }

    pub fn with_base_urls(
        mut self,
        api_base: impl Into<String>,
        auth_base: impl Into<String>,
    ) -> Self {
        self.api_base = api_base.into();
        self.auth_base = auth_base.into();
        self
    }

    async fn access_token(&self) -> Result<String> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut guard = self.token.write().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        info!("Requesting Twitch app access token");
        let response = self
            .client
            .post(format!("{}/oauth2/token", self.auth_base))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| IngestionError::provider(Platform::Twitch, e))?;

        if !response.status().is_success() {
            return Err(IngestionError::provider(
                Platform::Twitch,
                format!("token request returned {}", response.status()),
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| IngestionError::provider(Platform::Twitch, e))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let access_token = token.access_token.clone();
        *guard = Some(AppToken {
            access_token: token.access_token,
            expires_at: Instant::now() + lifetime,
        });

        Ok(access_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/{}", self.api_base, path))
            .query(query)
            .header("Client-Id", &self.client_id)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IngestionError::provider(Platform::Twitch, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("Twitch rejected the app token, it will be refreshed on the next call");
            *self.token.write().await = None;
        }
        if !status.is_success() {
            return Err(IngestionError::provider(
                Platform::Twitch,
                format!("{} returned {}", path, status),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| IngestionError::provider(Platform::Twitch, e))
    }

    async fn video_page(
        &self,
        channel_id: &str,
        cursor: Option<String>,
    ) -> Result<ContinuationPage<HelixVideo>> {
        let mut query = vec![
            ("user_id", channel_id.to_string()),
            ("type", "archive".to_string()),
            ("first", MAX_IDS_PER_CALL.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("after", cursor));
        }

        let response: HelixResponse<HelixVideo> = self.get_json("videos", &query).await?;
        let next = if response.data.is_empty() {
            None
        } else {
            response.pagination.and_then(|p| p.cursor)
        };
        Ok(ContinuationPage {
            items: response.data,
            next,
        })
    }

    async fn followers(&self, channel_id: &str) -> Result<i64> {
        let response: FollowersResponse = self
            .get_json(
                "channels/followers",
                &[
                    ("broadcaster_id", channel_id.to_string()),
                    ("first", "1".to_string()),
                ],
            )
            .await?;
        Ok(response.total)
    }
}

fn id_query(key: &'static str, ids: &[String]) -> Vec<(&'static str, String)> {
    ids.iter().map(|id| (key, id.clone())).collect()
}

#[async_trait]
impl StreamPlatformProvider for TwitchHelixProvider {
    #[instrument(skip(self, channel_ids), fields(channels = channel_ids.len()))]
    async fn live_snapshot(&self, channel_ids: &[String]) -> Result<Vec<Snapshot>> {
        let calls = channel_ids.chunks(MAX_IDS_PER_CALL).map(|chunk| async move {
            let mut query = id_query("user_id", chunk);
            query.push(("type", "live".to_string()));
            query.push(("first", MAX_IDS_PER_CALL.to_string()));
            let response: HelixResponse<HelixStream> = self.get_json("streams", &query).await?;
            Ok::<_, IngestionError>(response.data)
        });

        let snapshots: Vec<Snapshot> = join_listings(Platform::Twitch, calls)
            .await?
            .iter()
            .map(snapshot_from_stream)
            .collect();

        debug!("Twitch live snapshot holds {} streams", snapshots.len());
        Ok(snapshots)
    }

    #[instrument(skip(self))]
    async fn channel_uploads(&self, channel_id: &str) -> Result<Vec<Snapshot>> {
        let stream = pages(None, |cursor| self.video_page(channel_id, cursor));
        let policy = StopPolicy::capped(self.upload_item_cap).with_page_cap(UPLOAD_MAX_PAGES);
        let collected = collect_bounded(stream, &policy).await?;
        Ok(collected.items.iter().map(snapshot_from_video).collect())
    }

    async fn channel_info(&self, channel_ids: &[String]) -> Result<Vec<ChannelInfo>> {
        if channel_ids.len() > MAX_IDS_PER_CALL {
            return Err(IngestionError::Internal(format!(
                "channel info accepts at most {} ids, got {}",
                MAX_IDS_PER_CALL,
                channel_ids.len()
            )));
        }
        if channel_ids.is_empty() {
            return Ok(Vec::new());
        }

        let response: HelixResponse<HelixUser> =
            self.get_json("users", &id_query("id", channel_ids)).await?;

        let infos = response.data.into_iter().map(|user| async move {
            let followers = match self.followers(&user.id).await {
                Ok(total) => total,
                Err(e) => {
                    warn!("Follower count unavailable for {}: {}", user.id, e);
                    0
                }
            };
            Ok::<_, IngestionError>(ChannelInfo {
                platform: Platform::Twitch,
                channel_id: user.id,
                name: Some(user.display_name),
                username: Some(user.login),
                followers,
                profile_img_url: user.profile_image_url,
            })
        });

        try_join_all(infos).await
    }
}
