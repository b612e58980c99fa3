//! Shared fixtures and fake providers for the ingestion integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use livefeed_ingestion::{
    Channel, ChannelBackfill, ChannelInfo, FeedCache, FeedReconciler, FeedService,
    InMemoryCatalogRepository, IngestionConfig, IngestionError, IngestionWorker, JobQueue,
    NewVideo, Platform, ProfileImageSource, Result, Snapshot, StatusSweep,
    StreamPlatformProvider, Talent, TalentStatus, UploadKind, VideoPlatformProvider, VideoStatus,
    VideoType,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Video platform whose responses are set by the test
#[derive(Default)]
pub struct FakeVideoProvider {
    pub live: Mutex<Vec<Snapshot>>,
    pub fail_live: AtomicBool,
    pub uploads: Mutex<HashMap<(String, UploadKind), Vec<Snapshot>>>,
    pub details: Mutex<HashMap<String, Snapshot>>,
    /// Ids the authoritative lookup still knows
    pub authoritative: Mutex<HashMap<String, Snapshot>>,
    /// A page containing one of these ids fails as a whole
    pub failing_ids: Mutex<HashSet<String>>,
    pub channel_infos: Mutex<Vec<ChannelInfo>>,
    pub authoritative_calls: AtomicUsize,
    /// Detail lookups of these ids fail
    pub failing_details: Mutex<HashSet<String>>,
    pub detail_calls: AtomicUsize,
    detail_in_flight: AtomicUsize,
    pub max_detail_in_flight: AtomicUsize,
}

impl FakeVideoProvider {
    pub fn set_live(&self, snapshots: Vec<Snapshot>) {
        *self.live.lock().unwrap() = snapshots;
    }

    pub fn set_authoritative(&self, snapshots: Vec<Snapshot>) {
        *self.authoritative.lock().unwrap() = snapshots
            .into_iter()
            .filter_map(|s| s.video_id.clone().map(|id| (id, s)))
            .collect();
    }

    pub fn set_uploads(&self, channel_id: &str, kind: UploadKind, snapshots: Vec<Snapshot>) {
        self.uploads
            .lock()
            .unwrap()
            .insert((channel_id.to_string(), kind), snapshots);
    }
}

#[async_trait]
impl VideoPlatformProvider for FakeVideoProvider {
    async fn live_snapshot(&self, _channel_ids: &[String]) -> Result<Vec<Snapshot>> {
        if self.fail_live.load(Ordering::SeqCst) {
            return Err(IngestionError::provider(Platform::Youtube, "quota exceeded"));
        }
        Ok(self.live.lock().unwrap().clone())
    }

    async fn channel_uploads(&self, channel_id: &str, kind: UploadKind) -> Result<Vec<Snapshot>> {
        Ok(self
            .uploads
            .lock()
            .unwrap()
            .get(&(channel_id.to_string(), kind))
            .cloned()
            .unwrap_or_default())
    }

    async fn video_detail(&self, video_id: &str) -> Result<Option<Snapshot>> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.detail_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_detail_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.detail_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_details.lock().unwrap().contains(video_id) {
            return Err(IngestionError::provider(Platform::Youtube, "500 Internal Server Error"));
        }
        Ok(self.details.lock().unwrap().get(video_id).cloned())
    }

    async fn authoritative_batch(&self, video_ids: &[String]) -> Result<Vec<Snapshot>> {
        self.authoritative_calls.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing_ids.lock().unwrap();
        if video_ids.iter().any(|id| failing.contains(id)) {
            return Err(IngestionError::provider(Platform::Youtube, "backend error"));
        }

        let known = self.authoritative.lock().unwrap();
        Ok(video_ids
            .iter()
            .filter_map(|id| known.get(id).cloned())
            .collect())
    }

    async fn channel_info(&self, channel_ids: &[String]) -> Result<Vec<ChannelInfo>> {
        Ok(self
            .channel_infos
            .lock()
            .unwrap()
            .iter()
            .filter(|info| channel_ids.contains(&info.channel_id))
            .cloned()
            .collect())
    }
}

/// Stream platform whose responses are set by the test
#[derive(Default)]
pub struct FakeStreamProvider {
    pub live: Mutex<Vec<Snapshot>>,
    pub fail_live: AtomicBool,
    pub uploads: Mutex<HashMap<String, Vec<Snapshot>>>,
    pub channel_infos: Mutex<Vec<ChannelInfo>>,
    pub fail_channel_info: AtomicBool,
}

impl FakeStreamProvider {
    pub fn set_live(&self, snapshots: Vec<Snapshot>) {
        *self.live.lock().unwrap() = snapshots;
    }

    pub fn set_uploads(&self, channel_id: &str, snapshots: Vec<Snapshot>) {
        self.uploads
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), snapshots);
    }
}

#[async_trait]
impl StreamPlatformProvider for FakeStreamProvider {
    async fn live_snapshot(&self, _channel_ids: &[String]) -> Result<Vec<Snapshot>> {
        if self.fail_live.load(Ordering::SeqCst) {
            return Err(IngestionError::provider(Platform::Twitch, "503 Service Unavailable"));
        }
        Ok(self.live.lock().unwrap().clone())
    }

    async fn channel_uploads(&self, channel_id: &str) -> Result<Vec<Snapshot>> {
        Ok(self
            .uploads
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn channel_info(&self, channel_ids: &[String]) -> Result<Vec<ChannelInfo>> {
        if self.fail_channel_info.load(Ordering::SeqCst) {
            return Err(IngestionError::provider(Platform::Twitch, "timeout"));
        }
        Ok(self
            .channel_infos
            .lock()
            .unwrap()
            .iter()
            .filter(|info| channel_ids.contains(&info.channel_id))
            .cloned()
            .collect())
    }
}

pub fn channel(platform: Platform, channel_id: &str) -> Channel {
    Channel {
        id: 0,
        platform,
        channel_id: channel_id.to_string(),
        name: Some(format!("{} channel", channel_id)),
        username: Some(channel_id.to_lowercase()),
        followers: 0,
        profile_img_url: None,
    }
}

pub fn talent(slug: &str, youtube: Option<&Channel>, twitch: Option<&Channel>) -> Talent {
    Talent {
        id: 0,
        slug: slug.to_string(),
        name: slug.to_uppercase(),
        status: TalentStatus::Active,
        profile_img_source: ProfileImageSource::None,
        uploaded_img_url: None,
        youtube_channel_id: youtube.map(|c| c.id),
        twitch_channel_id: twitch.map(|c| c.id),
        retired_on: None,
    }
}

pub fn stream_snapshot(stream_id: &str, channel_id: &str, views: i64) -> Snapshot {
    Snapshot {
        platform: Platform::Twitch,
        video_id: None,
        stream_id: Some(stream_id.to_string()),
        channel_id: Some(channel_id.to_string()),
        title: format!("stream {}", stream_id),
        thumbnail: Some(format!("https://thumbs/{}.jpg", stream_id)),
        datetime: Some(Utc::now()),
        views,
        durations: 0,
        status: VideoStatus::Live,
        video_type: VideoType::Live,
    }
}

pub fn video_snapshot(video_id: &str, channel_id: &str, status: VideoStatus) -> Snapshot {
    Snapshot {
        platform: Platform::Youtube,
        video_id: Some(video_id.to_string()),
        stream_id: None,
        channel_id: Some(channel_id.to_string()),
        title: format!("video {}", video_id),
        thumbnail: Some(format!("https://thumbs/{}.jpg", video_id)),
        datetime: Some(Utc::now()),
        views: 100,
        durations: 0,
        status,
        video_type: VideoType::Live,
    }
}

pub fn new_video(
    snapshot: &Snapshot,
    channel_id: Option<i64>,
    datetime: DateTime<Utc>,
) -> NewVideo {
    let mut video = snapshot.to_new_video(channel_id);
    video.datetime = Some(datetime);
    video
}

/// In-memory catalog, moka-backed cache and fake providers with one tracked talent
pub struct Harness {
    pub catalog: Arc<InMemoryCatalogRepository>,
    pub cache: FeedCache,
    pub videos: Arc<FakeVideoProvider>,
    pub streams: Arc<FakeStreamProvider>,
    pub config: IngestionConfig,
    pub youtube_channel: Channel,
    pub twitch_channel: Channel,
    pub talent: Talent,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(IngestionConfig::default()).await
    }

    pub async fn with_config(config: IngestionConfig) -> Self {
        let catalog = Arc::new(InMemoryCatalogRepository::new());
        let youtube_channel = catalog
            .insert_channel(channel(Platform::Youtube, "UC_alice"))
            .await;
        let twitch_channel = catalog
            .insert_channel(channel(Platform::Twitch, "1001"))
            .await;
        let talent = catalog
            .insert_talent(talent("alice", Some(&youtube_channel), Some(&twitch_channel)))
            .await;

        Self {
            catalog,
            cache: FeedCache::in_memory(),
            videos: Arc::new(FakeVideoProvider::default()),
            streams: Arc::new(FakeStreamProvider::default()),
            config,
            youtube_channel,
            twitch_channel,
            talent,
        }
    }

    pub fn reconciler(&self) -> FeedReconciler {
        FeedReconciler::new(
            self.catalog.clone(),
            self.cache.clone(),
            self.videos.clone(),
            self.streams.clone(),
            self.config.clone(),
        )
    }

    pub fn feed_service(&self, queue: JobQueue) -> FeedService {
        FeedService::new(
            self.catalog.clone(),
            self.cache.clone(),
            queue,
            self.config.clone(),
        )
    }

    pub fn backfill(&self) -> ChannelBackfill {
        ChannelBackfill::new(
            self.catalog.clone(),
            self.cache.clone(),
            self.videos.clone(),
            self.streams.clone(),
        )
    }

    pub fn sweep(&self) -> StatusSweep {
        StatusSweep::new(
            self.catalog.clone(),
            self.videos.clone(),
            self.streams.clone(),
            self.config.clone(),
        )
    }

    /// Queue driven by the real worker, and a read service enqueueing on it
    pub async fn start_worker(&self) -> (JobQueue, Arc<FeedService>) {
        let queue = JobQueue::new(self.config.queue.clone());
        let feed = Arc::new(self.feed_service(queue.clone()));
        let worker = IngestionWorker::new(
            Arc::new(self.reconciler()),
            feed.clone(),
            Arc::new(self.backfill()),
            Arc::new(self.sweep()),
        );
        queue
            .start(Arc::new(worker))
            .await
            .expect("queue started twice");
        (queue, feed)
    }

    pub async fn video_by_key(&self, key: &str) -> livefeed_ingestion::Video {
        self.catalog
            .videos()
            .await
            .into_iter()
            .find(|v| v.stream_id.as_deref() == Some(key) || v.video_id.as_deref() == Some(key))
            .unwrap_or_else(|| panic!("no video row for {}", key))
    }
}
