//! Read paths over the catalog, overlaid with the cached feed
//!
//! Reads never fail because ingestion is degraded: cache errors count as misses and a
//! failed backfill only means the stored rows are served as they are.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, TimeZone, Utc};
use futures::future::join_all;
use livefeed_core::pagination::{decode_cursor, Page, SortSpec};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{fetching_marker_key, talent_page_key, CachedFeed, FeedCache};
use crate::catalog::{CatalogRepository, VideoQuery};
use crate::config::IngestionConfig;
use crate::model::{TalentStatus, VideoStatus, VideoType, VideoView};
use crate::queue::{JobKind, JobQueue};
use crate::{IngestionError, Result};

/// Ordering of a talent's video listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalentSort {
    New,
    Old,
    Views,
}

impl TalentSort {
    pub fn spec(&self) -> SortSpec {
        match self {
            Self::New => SortSpec::newest_first(),
            Self::Old => SortSpec::oldest_first(),
            Self::Views => SortSpec::views_desc(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Old => "old",
            Self::Views => "views",
        }
    }
}

impl FromStr for TalentSort {
    type Err = IngestionError;

    /// Unknown values sort by views
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "new" => Self::New,
            "old" => Self::Old,
            _ => Self::Views,
        })
    }
}

/// UTC bounds of a calendar day in the given timezone, end exclusive
pub fn day_window(day: NaiveDate, offset: FixedOffset) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let midnight = day.and_hms_opt(0, 0, 0)?;
    let start = offset
        .from_local_datetime(&midnight)
        .single()?
        .with_timezone(&Utc);
    Some((start, start + ChronoDuration::days(1)))
}

/// Filter for [`FeedService::get_videos`]
#[derive(Debug, Clone, Default)]
pub struct VideoFilter {
    /// Empty means any visible status
    pub statuses: Vec<VideoStatus>,
    /// Empty means any type
    pub types: Vec<VideoType>,
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub order: Option<SortSpec>,
}

impl VideoFilter {
    /// Streams live right now, most viewed first
    pub fn live() -> Self {
        Self {
            statuses: vec![VideoStatus::Live],
            order: Some(SortSpec::views_desc()),
            ..Self::default()
        }
    }

    /// Upcoming streams, soonest first
    pub fn upcoming(day: Option<NaiveDate>, offset: FixedOffset) -> Self {
        Self {
            statuses: vec![VideoStatus::Upcoming],
            window: day.and_then(|d| day_window(d, offset)),
            order: Some(SortSpec::oldest_first()),
            ..Self::default()
        }
    }

    /// Finished streams and uploads, most viewed first
    pub fn finished(day: Option<NaiveDate>, offset: FixedOffset) -> Self {
        Self {
            statuses: vec![VideoStatus::Finished],
            types: vec![VideoType::Live, VideoType::Uploaded],
            window: day.and_then(|d| day_window(d, offset)),
            order: Some(SortSpec::views_desc()),
        }
    }

    /// Finished shorts, newest first
    pub fn shorts(day: Option<NaiveDate>, offset: FixedOffset) -> Self {
        Self {
            statuses: vec![VideoStatus::Finished],
            types: vec![VideoType::Short],
            window: day.and_then(|d| day_window(d, offset)),
            order: Some(SortSpec::newest_first()),
        }
    }

    fn admits(&self, view: &VideoView) -> bool {
        let status_ok = if self.statuses.is_empty() {
            view.status != VideoStatus::Unavailable
        } else {
            self.statuses.contains(&view.status)
        };
        status_ok && (self.types.is_empty() || self.types.contains(&view.video_type))
    }

    fn in_window(&self, view: &VideoView) -> bool {
        match (self.window, view.datetime) {
            (None, _) => true,
            (Some((from, to)), Some(dt)) => dt >= from && dt < to,
            (Some(_), None) => false,
        }
    }
}

/// Drop delisted talents; `None` when no talent is left
fn with_visible_talents(mut view: VideoView) -> Option<VideoView> {
    view.talents.retain(|t| t.status != TalentStatus::Delisted);
    view.has_visible_talent().then_some(view)
}

/// Read service
pub struct FeedService {
    catalog: Arc<dyn CatalogRepository>,
    cache: FeedCache,
    queue: JobQueue,
    config: IngestionConfig,
}

impl FeedService {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        cache: FeedCache,
        queue: JobQueue,
        config: IngestionConfig,
    ) -> Self {
        Self {
            catalog,
            cache,
            queue,
            config,
        }
    }

    async fn cached_feed(&self) -> Option<CachedFeed> {
        match self.cache.load_feed().await {
            Ok(feed) => feed,
            Err(e) => {
                warn!("Cached feed unreadable, treating as a miss: {}", e);
                None
            }
        }
    }

    /// The merged feed, rebuilt from the catalog when absent or when `force` is set
    pub async fn live_feed(&self, force: bool) -> Result<Vec<VideoView>> {
        let previous = self.cached_feed().await;
        if !force {
            if let Some(feed) = &previous {
                return Ok(feed.entries.clone());
            }
        }

        let now = Utc::now();
        let window = self.config.feed_window_chrono();
        let query = VideoQuery {
            datetime_from: Some(now - window),
            datetime_to: Some(now + window),
            exclude_unavailable: true,
            channel_required: true,
            sort: Some(SortSpec::newest_first()),
            ..VideoQuery::default()
        };
        let records = self.catalog.query_videos(&query).await?;

        let previous = previous.unwrap_or_default();
        let index = previous.index();
        let entries: Vec<VideoView> = records
            .into_iter()
            .map(|record| {
                let mut view = VideoView::from(record);
                if let Some(cached) =
                    index.find(view.stream_id.as_deref(), view.video_id.as_deref())
                {
                    view.merge_rebuilt(cached);
                }
                view
            })
            .collect();

        match self
            .cache
            .replace_feed(entries.clone(), self.config.rebuilt_feed_ttl)
            .await
        {
            Ok(feed) => debug!("Feed rebuilt as v{} with {} entries", feed.version, entries.len()),
            Err(e) => warn!("Rebuilt feed not cached: {}", e),
        }

        Ok(entries)
    }

    /// Videos matching `filter`
    ///
    /// Without a window the cached feed answers alone. With a window the catalog is queried
    /// for rows in the window plus rows of streams in the cached feed, then overlaid.
    pub async fn get_videos(&self, filter: &VideoFilter) -> Result<Vec<VideoView>> {
        let feed = self.live_feed(false).await?;

        let mut views: Vec<VideoView> = match filter.window {
            None => feed.iter().filter(|v| filter.admits(v)).cloned().collect(),
            Some((from, to)) => {
                let or_stream_ids = feed
                    .iter()
                    .filter(|v| filter.admits(v) && filter.in_window(v))
                    .filter_map(|v| v.stream_id.clone())
                    .collect();

                let query = VideoQuery {
                    datetime_from: Some(from),
                    datetime_to: Some(to),
                    statuses: filter.statuses.clone(),
                    types: filter.types.clone(),
                    or_stream_ids,
                    ..VideoQuery::default()
                };

                let cached = CachedFeed {
                    entries: feed,
                    ..CachedFeed::default()
                };
                let index = cached.index();

                self.catalog
                    .query_videos(&query)
                    .await?
                    .into_iter()
                    .map(|record| {
                        let mut view = VideoView::from(record);
                        let cached = view
                            .stream_id
                            .as_deref()
                            .and_then(|id| index.by_stream_id(id));
                        if let Some(entry) = cached {
                            view.overlay(entry);
                        }
                        view
                    })
                    .filter(|v| filter.admits(v))
                    .collect()
            }
        };

        views = views.into_iter().filter_map(with_visible_talents).collect();

        if let Some(order) = filter.order {
            views.sort_by(|a, b| order.compare(&order.position_of(a), &order.position_of(b)));
        }
        Ok(views)
    }

    /// One page of a talent's videos of `video_type`
    pub async fn get_videos_by_talent(
        &self,
        slug: &str,
        video_type: VideoType,
        sort: TalentSort,
        token: Option<&str>,
    ) -> Result<Page<VideoView>> {
        let page_key = talent_page_key(slug, video_type.as_str(), sort.as_str(), token);
        match self.cache.get::<Page<VideoView>>(&page_key).await {
            Ok(Some(page)) => return Ok(page),
            Ok(None) => {}
            Err(e) => warn!("Cached page {} unreadable: {}", page_key, e),
        }

        let spec = sort.spec();
        let cursor = token.map(decode_cursor).transpose()?;
        if let Some(cursor) = &cursor {
            cursor.ensure_spec(spec)?;
        }

        let talent = self.catalog.find_talent_by_slug(slug).await?;
        let channel_ids: Vec<i64> = talent
            .as_ref()
            .map(|t| t.channels().map(|c| c.id).collect())
            .unwrap_or_default();

        if channel_ids.is_empty() {
            debug!("Talent {} unknown or without channels", slug);
            if let Err(e) = self
                .cache
                .mark(&fetching_marker_key(slug), self.config.inflight_marker_ttl)
                .await
            {
                warn!("Failed to set fetching marker for {}: {}", slug, e);
            }
            return Ok(Page::default());
        }

        if let Err(e) = self.fetch_videos_by_talent(slug).await {
            warn!("Backfill for {} failed, serving stored videos: {}", slug, e);
        }

        let query = VideoQuery {
            channel_ids: Some(channel_ids),
            statuses: VideoStatus::visible().to_vec(),
            types: vec![video_type],
            cursor,
            sort: Some(spec),
            limit: Some(self.config.page_size),
            ..VideoQuery::default()
        };
        let records = self.catalog.query_videos(&query).await?;

        let feed = self.cached_feed().await.unwrap_or_default();
        let index = feed.index();
        let page = Page::from_rows(records, spec, self.config.page_size).map(|record| {
            let mut view = VideoView::from(record);
            let cached = view
                .stream_id
                .as_deref()
                .and_then(|id| index.by_stream_id(id));
            if let Some(cached) = cached {
                view.overlay(cached);
            }
            view
        });

        let ttl = if token.is_some() {
            self.config.later_page_ttl
        } else {
            self.config.first_page_ttl
        };
        if let Err(e) = self.cache.set(&page_key, &page, ttl).await {
            warn!("Failed to cache page {}: {}", page_key, e);
        }

        Ok(page)
    }

    pub async fn get_video_by_stream_id(&self, stream_id: &str) -> Result<Option<VideoView>> {
        let Some(record) = self.catalog.find_video_by_stream_id(stream_id).await? else {
            return Ok(None);
        };

        let mut view = VideoView::from(record);
        view.talents.retain(|t| t.status != TalentStatus::Delisted);

        if let Some(feed) = self.cached_feed().await {
            if let Some(cached) = feed.index().by_stream_id(stream_id) {
                view.overlay(cached);
            }
        }
        Ok(Some(view))
    }

    /// Resync the talent's channels unless another caller already claimed the work
    ///
    /// The claimer enqueues one job per linked channel and waits for them. Everyone else
    /// waits for whatever is still in flight for those channels.
    pub async fn fetch_videos_by_talent(&self, slug: &str) -> Result<()> {
        let Some(talent) = self.catalog.find_talent_by_slug(slug).await? else {
            return Err(IngestionError::NotFound(format!("talent {}", slug)));
        };

        let jobs: Vec<JobKind> = talent
            .youtube
            .iter()
            .map(|c| JobKind::FetchYoutubeChannel {
                channel_id: c.channel_id.clone(),
            })
            .chain(talent.twitch.iter().map(|c| JobKind::FetchTwitchChannel {
                channel_id: c.channel_id.clone(),
            }))
            .collect();

        let claimed = match self
            .cache
            .set_if_absent(&fetching_marker_key(slug), self.config.inflight_marker_ttl)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!("Fetching marker for {} unavailable: {}", slug, e);
                false
            }
        };

        let results = if claimed {
            info!("Fetching videos of {} from {} channels", slug, jobs.len());
            let mut handles = Vec::with_capacity(jobs.len());
            for job in jobs {
                handles.push(self.queue.enqueue(job).await);
            }
            join_all(handles.iter().map(|h| h.finished())).await
        } else {
            let keys: Vec<String> = jobs.iter().map(JobKind::key).collect();
            join_all(keys.iter().map(|key| self.queue.await_if_in_flight(key))).await
        };

        for result in results {
            result?;
        }
        Ok(())
    }
}
