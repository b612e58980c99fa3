//! In-memory catalog repository for tests and local runs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{CatalogRepository, ResyncScope, VideoQuery};
use crate::model::{
    Channel, NewVideo, Platform, Talent, TalentRef, TalentStatus, TalentWithChannels, Video,
    VideoPatch, VideoRecord, VideoStatus,
};
use crate::providers::ChannelInfo;
use crate::{IngestionError, Result};

#[derive(Default)]
struct CatalogState {
    channels: BTreeMap<i64, Channel>,
    talents: BTreeMap<i64, Talent>,
    videos: BTreeMap<i64, Video>,
    next_id: i64,
}

impl CatalogState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn find_by_keys(&self, stream_id: Option<&str>, video_id: Option<&str>) -> Option<&Video> {
        stream_id
            .and_then(|id| {
                self.videos
                    .values()
                    .find(|v| v.stream_id.as_deref() == Some(id))
            })
            .or_else(|| {
                video_id.and_then(|id| {
                    self.videos
                        .values()
                        .find(|v| v.video_id.as_deref() == Some(id))
                })
            })
    }

    fn upsert(&mut self, new: &NewVideo, now: DateTime<Utc>) -> Video {
        let existing = self
            .find_by_keys(new.stream_id.as_deref(), new.video_id.as_deref())
            .map(|v| v.id);

        match existing.and_then(|id| self.videos.get_mut(&id)) {
            Some(video) => {
                video.platform = new.platform;
                if new.video_id.is_some() {
                    video.video_id = new.video_id.clone();
                }
                if new.stream_id.is_some() {
                    video.stream_id = new.stream_id.clone();
                }
                video.title = new.title.clone();
                if new.thumbnail.is_some() {
                    video.thumbnail = new.thumbnail.clone();
                }
                if new.datetime.is_some() {
                    video.datetime = new.datetime;
                }
                video.views = new.views;
                if new.durations > 0 {
                    video.durations = new.durations;
                }
                video.status = new.status;
                video.video_type = new.video_type;
                if new.channel_id.is_some() {
                    video.channel_id = new.channel_id;
                }
                video.updated_at = now;
                video.clone()
            }
            None => {
                let video = Video {
                    id: self.allocate_id(),
                    platform: new.platform,
                    video_id: new.video_id.clone(),
                    stream_id: new.stream_id.clone(),
                    title: new.title.clone(),
                    thumbnail: new.thumbnail.clone(),
                    datetime: new.datetime,
                    views: new.views,
                    durations: new.durations,
                    status: new.status,
                    video_type: new.video_type,
                    channel_id: new.channel_id,
                    updated_at: now,
                };
                self.videos.insert(video.id, video.clone());
                video
            }
        }
    }

    fn talent_ref(&self, talent: &Talent) -> TalentRef {
        let youtube = talent.youtube_channel_id.and_then(|id| self.channels.get(&id));
        let twitch = talent.twitch_channel_id.and_then(|id| self.channels.get(&id));

        TalentRef {
            slug: talent.slug.clone(),
            name: talent.name.clone(),
            status: talent.status,
            image_url: talent.image_url(youtube, twitch),
        }
    }

    fn record(&self, video: &Video) -> VideoRecord {
        let talents = match video.channel_id {
            Some(channel_id) => self
                .talents
                .values()
                .filter(|t| t.channel_ids().contains(&channel_id))
                .map(|t| self.talent_ref(t))
                .collect(),
            None => Vec::new(),
        };

        VideoRecord {
            video: video.clone(),
            channel: video.channel_id.and_then(|id| self.channels.get(&id).cloned()),
            talents,
        }
    }
}

/// Catalog held in process memory
#[derive(Default)]
pub struct InMemoryCatalogRepository {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel; the `id` field is assigned by the repository
    pub async fn insert_channel(&self, mut channel: Channel) -> Channel {
        let mut state = self.state.write().await;
        channel.id = state.allocate_id();
        state.channels.insert(channel.id, channel.clone());
        channel
    }

    /// Add a talent; the `id` field is assigned by the repository
    pub async fn insert_talent(&self, mut talent: Talent) -> Talent {
        let mut state = self.state.write().await;
        talent.id = state.allocate_id();
        state.talents.insert(talent.id, talent.clone());
        talent
    }

    pub async fn insert_video(&self, video: NewVideo) -> Video {
        self.state.write().await.upsert(&video, Utc::now())
    }

    /// Backdate a row's last update
    pub async fn set_updated_at(&self, id: i64, updated_at: DateTime<Utc>) {
        if let Some(video) = self.state.write().await.videos.get_mut(&id) {
            video.updated_at = updated_at;
        }
    }

    pub async fn videos(&self) -> Vec<Video> {
        self.state.read().await.videos.values().cloned().collect()
    }

    pub async fn talent(&self, slug: &str) -> Option<Talent> {
        self.state
            .read()
            .await
            .talents
            .values()
            .find(|t| t.slug == slug)
            .cloned()
    }

    pub async fn channel(&self, id: i64) -> Option<Channel> {
        self.state.read().await.channels.get(&id).cloned()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryCatalogRepository {
    async fn find_video_by_stream_id(&self, stream_id: &str) -> Result<Option<VideoRecord>> {
        let state = self.state.read().await;
        Ok(state
            .videos
            .values()
            .find(|v| v.stream_id.as_deref() == Some(stream_id))
            .map(|v| state.record(v)))
    }

    async fn find_video_by_keys(
        &self,
        stream_id: Option<&str>,
        video_id: Option<&str>,
    ) -> Result<Option<Video>> {
        Ok(self
            .state
            .read()
            .await
            .find_by_keys(stream_id, video_id)
            .cloned())
    }

    async fn upsert_video(&self, video: &NewVideo) -> Result<Video> {
        Ok(self.state.write().await.upsert(video, Utc::now()))
    }

    async fn update_video(&self, id: i64, patch: &VideoPatch) -> Result<()> {
        let mut state = self.state.write().await;
        let video = state
            .videos
            .get_mut(&id)
            .ok_or_else(|| IngestionError::NotFound(format!("video {}", id)))?;
        patch.apply(video, Utc::now());
        Ok(())
    }

    async fn update_status_by_ids(&self, ids: &[i64], status: VideoStatus) -> Result<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut updated = 0;
        for id in ids {
            if let Some(video) = state.videos.get_mut(id) {
                video.status = status;
                video.updated_at = now;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn update_by_video_id(&self, video_id: &str, patch: &VideoPatch) -> Result<bool> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        match state
            .videos
            .values_mut()
            .find(|v| v.video_id.as_deref() == Some(video_id))
        {
            Some(video) => {
                patch.apply(video, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_unavailable_by_video_ids(&self, video_ids: &[String]) -> Result<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut updated = 0;
        for video in state.videos.values_mut() {
            if video
                .video_id
                .as_ref()
                .map_or(false, |id| video_ids.contains(id))
            {
                video.status = VideoStatus::Unavailable;
                video.updated_at = now;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn query_videos(&self, query: &VideoQuery) -> Result<Vec<VideoRecord>> {
        let state = self.state.read().await;

        let mut records: Vec<VideoRecord> = state
            .videos
            .values()
            .map(|v| state.record(v))
            .filter(|r| query.matches(r))
            .collect();

        if let Some(spec) = query.sort {
            records.sort_by(|a, b| spec.compare(&spec.position_of(a), &spec.position_of(b)));
        }
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }

        Ok(records)
    }

    async fn find_channel_by_external_id(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Option<Channel>> {
        Ok(self
            .state
            .read()
            .await
            .channels
            .values()
            .find(|c| c.platform == platform && c.channel_id == channel_id)
            .cloned())
    }

    async fn find_talent_by_slug(&self, slug: &str) -> Result<Option<TalentWithChannels>> {
        let state = self.state.read().await;
        Ok(state
            .talents
            .values()
            .find(|t| t.slug == slug)
            .map(|talent| TalentWithChannels {
                talent: talent.clone(),
                youtube: talent
                    .youtube_channel_id
                    .and_then(|id| state.channels.get(&id).cloned()),
                twitch: talent
                    .twitch_channel_id
                    .and_then(|id| state.channels.get(&id).cloned()),
            }))
    }

    async fn list_channels(&self, platform: Platform) -> Result<Vec<Channel>> {
        Ok(self
            .state
            .read()
            .await
            .channels
            .values()
            .filter(|c| c.platform == platform)
            .cloned()
            .collect())
    }

    async fn list_tracked_channels(&self, platform: Platform) -> Result<Vec<Channel>> {
        let state = self.state.read().await;
        Ok(state
            .channels
            .values()
            .filter(|c| c.platform == platform)
            .filter(|c| {
                state.talents.values().any(|t| {
                    t.status != TalentStatus::Delisted && t.channel_ids().contains(&c.id)
                })
            })
            .cloned()
            .collect())
    }

    async fn update_channel_info(&self, info: &ChannelInfo) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(channel) = state
            .channels
            .values_mut()
            .find(|c| c.platform == info.platform && c.channel_id == info.channel_id)
        else {
            return Ok(false);
        };

        if info.name.is_some() {
            channel.name = info.name.clone();
        }
        if info.username.is_some() {
            channel.username = info.username.clone();
        }
        channel.followers = info.followers;
        if info.profile_img_url.is_some() {
            channel.profile_img_url = info.profile_img_url.clone();
        }
        Ok(true)
    }

    async fn resync_channel(
        &self,
        channel_id: i64,
        scope: ResyncScope,
        videos: &[NewVideo],
    ) -> Result<usize> {
        // The write guard spans both steps, so readers see either the old or the new set.
        let mut state = self.state.write().await;
        let now = Utc::now();

        for video in state.videos.values_mut() {
            let invalidate = video.channel_id == Some(channel_id)
                && (scope == ResyncScope::AllVideos || video.status != VideoStatus::Live);
            if invalidate {
                video.status = VideoStatus::Unavailable;
                video.updated_at = now;
            }
        }

        for video in videos {
            state.upsert(video, now);
        }
        Ok(videos.len())
    }

    async fn retire_talents(&self, as_of: NaiveDate) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        let mut retired = Vec::new();
        for talent in state.talents.values_mut() {
            let due = talent.retired_on.map_or(false, |date| date < as_of);
            if due && talent.status == TalentStatus::Active {
                talent.status = TalentStatus::Retired;
                retired.push(talent.slug.clone());
            }
        }
        Ok(retired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VideoType;

    fn new_video(stream_id: Option<&str>, video_id: Option<&str>) -> NewVideo {
        NewVideo {
            platform: Platform::Twitch,
            video_id: video_id.map(str::to_string),
            stream_id: stream_id.map(str::to_string),
            title: "title".to_string(),
            thumbnail: None,
            datetime: None,
            views: 1,
            durations: 0,
            status: VideoStatus::Live,
            video_type: VideoType::Live,
            channel_id: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_matches_either_key() {
        let repo = InMemoryCatalogRepository::new();
        let first = repo.upsert_video(&new_video(Some("s1"), None)).await.unwrap();

        let mut archived = new_video(Some("s1"), Some("v1"));
        archived.status = VideoStatus::Finished;
        let second = repo.upsert_video(&archived).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.video_id.as_deref(), Some("v1"));

        let third = repo.upsert_video(&new_video(None, Some("v1"))).await.unwrap();
        assert_eq!(third.id, first.id);
        assert_eq!(repo.videos().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let repo = InMemoryCatalogRepository::new();
        let err = repo
            .update_video(42, &VideoPatch::status(VideoStatus::Finished))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::NotFound(_)));
    }
}
