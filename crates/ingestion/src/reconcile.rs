//! Reconciliation engine
//!
//! One pass pulls the live snapshots of both platforms, merges them into the catalog in
//! bounded concurrent batches, demotes ended streams, re-verifies stale video rows through
//! the authoritative lookup and finally replaces the cached feed with the merged result.

use chrono::Utc;
use futures::future::join_all;
use livefeed_core::pagination::SortSpec;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::{created_marker_key, CachedFeed, FeedCache};
use crate::catalog::{CatalogRepository, VideoQuery};
use crate::config::{IngestionConfig, StreamOutagePolicy};
use crate::model::{Platform, VideoStatus, VideoView};
use crate::providers::{Snapshot, StreamPlatformProvider, VideoPlatformProvider};
use crate::queue::Progress;
use crate::Result;

/// Authoritative recheck found a record gone; the row was downgraded to UNAVAILABLE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleDataWarning {
    pub platform: Platform,
    pub video_id: String,
}

impl fmt::Display for StaleDataWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} video {} is no longer returned by the platform",
            self.platform, self.video_id
        )
    }
}

/// Result of an authoritative refresh over a set of video ids
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub unavailable: usize,
    pub failed_pages: usize,
    pub warnings: Vec<StaleDataWarning>,
}

impl RefreshReport {
    fn absorb(&mut self, other: RefreshReport) {
        self.refreshed += other.refreshed;
        self.unavailable += other.unavailable;
        self.failed_pages += other.failed_pages;
        self.warnings.extend(other.warnings);
    }
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub snapshots: usize,
    pub created: usize,
    pub updated: usize,
    /// Skipped because a dedup marker was set
    pub suppressed: usize,
    /// Snapshot-level failures, logged and skipped
    pub failed: usize,
    pub demoted: usize,
    pub stale: RefreshReport,
    pub feed_version: u64,
    /// Rows created LIVE during this pass
    pub newly_discovered: Vec<VideoView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Unchanged(i64),
    Updated(i64),
    Created { id: i64, live: bool },
    Suppressed,
    NoIdentity,
}

/// Merges provider snapshots with the catalog and the cached feed
pub struct FeedReconciler {
    catalog: Arc<dyn CatalogRepository>,
    cache: FeedCache,
    videos: Arc<dyn VideoPlatformProvider>,
    streams: Arc<dyn StreamPlatformProvider>,
    config: IngestionConfig,
}

impl FeedReconciler {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        cache: FeedCache,
        videos: Arc<dyn VideoPlatformProvider>,
        streams: Arc<dyn StreamPlatformProvider>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            catalog,
            cache,
            videos,
            streams,
            config,
        }
    }

    /// Run one reconciliation pass
    ///
    /// A provider failure while fetching the live snapshots ends the pass with an error and
    /// leaves the cached feed as it was. Catalog writes made before a later failure stay.
    pub async fn run_feed_pass(&self, progress: &dyn Progress) -> Result<PassReport> {
        let started = Instant::now();
        let previous = self.load_previous_feed().await;

        let youtube_channels = self.tracked_channel_ids(Platform::Youtube).await?;
        let twitch_channels = self.tracked_channel_ids(Platform::Twitch).await?;

        let youtube = self
            .videos
            .live_snapshot(&youtube_channels)
            .await
            .map_err(|e| {
                error!("Video platform snapshot failed, pass aborted: {}", e);
                e
            })?;

        let twitch = match self.streams.live_snapshot(&twitch_channels).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                error!("Stream platform snapshot failed, pass aborted: {}", e);
                self.apply_outage_policy().await;
                return Err(e);
            }
        };
        progress.tick();

        let fresh = unique_snapshots(youtube.into_iter().chain(twitch));
        let mut report = PassReport {
            snapshots: fresh.len(),
            ..PassReport::default()
        };

        let mut touched: Vec<i64> = Vec::with_capacity(fresh.len());
        let mut discovered: Vec<i64> = Vec::new();

        for batch in fresh.chunks(self.config.batch_size.max(1)) {
            let outcomes = join_all(batch.iter().map(|s| self.reconcile_snapshot(s))).await;

            for (snapshot, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(Outcome::Unchanged(id)) => touched.push(id),
                    Ok(Outcome::Updated(id)) => {
                        report.updated += 1;
                        touched.push(id);
                    }
                    Ok(Outcome::Created { id, live }) => {
                        report.created += 1;
                        touched.push(id);
                        if live {
                            discovered.push(id);
                        }
                    }
                    Ok(Outcome::Suppressed) => report.suppressed += 1,
                    Ok(Outcome::NoIdentity) => {
                        report.failed += 1;
                        warn!("Skipping {} snapshot without identity", snapshot.platform);
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            "Skipping {} snapshot {:?}: {}",
                            snapshot.platform,
                            snapshot.identity_key(),
                            e
                        );
                    }
                }
            }
            progress.tick();
        }

        let fresh_streams: HashSet<&str> = fresh
            .iter()
            .filter(|s| s.platform == Platform::Twitch)
            .filter_map(|s| s.stream_id.as_deref())
            .collect();
        let demoted = self.demote_ended_streams(&fresh_streams).await?;
        report.demoted = demoted.len();
        // Ended streams stay in the feed this pass, now FINISHED
        touched.extend(demoted);

        let fresh_videos: HashSet<&str> = fresh
            .iter()
            .filter(|s| s.platform == Platform::Youtube)
            .filter_map(|s| s.video_id.as_deref())
            .collect();
        let carried: Vec<i64> = previous
            .entries
            .iter()
            .filter(|e| e.platform == Platform::Youtube)
            .filter(|e| {
                e.video_id
                    .as_deref()
                    .map_or(false, |id| !fresh_videos.contains(id))
            })
            .map(|e| e.id)
            .collect();
        report.stale = self.sweep_stale(&carried, progress).await?;

        let entries = self
            .merge_feed(&previous, &touched, &carried, &discovered, &mut report)
            .await?;
        let feed = self.cache.replace_feed(entries, self.config.feed_ttl).await?;
        report.feed_version = feed.version;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            snapshots = report.snapshots,
            created = report.created,
            updated = report.updated,
            suppressed = report.suppressed,
            failed = report.failed,
            demoted = report.demoted,
            unavailable = report.stale.unavailable,
            "Feed pass finished: feed v{} with {} entries",
            feed.version,
            feed.entries.len()
        );
        Ok(report)
    }

    /// Refresh up to the configured number of video rows that have no datetime
    pub async fn refresh_missing_datetimes(
        &self,
        progress: &dyn Progress,
    ) -> Result<RefreshReport> {
        let query = VideoQuery {
            platform: Some(Platform::Youtube),
            null_datetime: true,
            exclude_unavailable: true,
            limit: Some(self.config.datetime_backfill_limit),
            ..VideoQuery::default()
        };
        let ids = video_ids(&self.catalog.query_videos(&query).await?);
        debug!("{} videos without datetime", ids.len());
        Ok(self.authoritative_refresh(&ids, progress).await)
    }

    /// Refresh every UPCOMING or LIVE video row that has no datetime
    pub async fn refresh_upcoming_without_datetime(
        &self,
        progress: &dyn Progress,
    ) -> Result<RefreshReport> {
        let query = VideoQuery {
            platform: Some(Platform::Youtube),
            null_datetime: true,
            statuses: vec![VideoStatus::Upcoming, VideoStatus::Live],
            ..VideoQuery::default()
        };
        let ids = video_ids(&self.catalog.query_videos(&query).await?);
        debug!("{} upcoming or live videos without datetime", ids.len());
        Ok(self.authoritative_refresh(&ids, progress).await)
    }

    /// Re-verify video ids through the authoritative lookup in pages
    ///
    /// Present ids are refreshed, missing ids become UNAVAILABLE. A failing page is logged
    /// and the remaining pages still run.
    pub async fn authoritative_refresh(
        &self,
        video_ids: &[String],
        progress: &dyn Progress,
    ) -> RefreshReport {
        let mut report = RefreshReport::default();

        for page in video_ids.chunks(self.config.authoritative_page_size.max(1)) {
            match self.refresh_page(page).await {
                Ok(outcome) => report.absorb(outcome),
                Err(e) => {
                    report.failed_pages += 1;
                    warn!("Authoritative refresh of {} ids failed: {}", page.len(), e);
                }
            }
            progress.tick();
        }

        report
    }

    async fn refresh_page(&self, page: &[String]) -> Result<RefreshReport> {
        let found = self.videos.authoritative_batch(page).await?;

        let mut report = RefreshReport::default();
        let mut present = HashSet::new();
        for snapshot in &found {
            let Some(video_id) = snapshot.video_id.as_deref() else {
                continue;
            };
            present.insert(video_id.to_string());
            if self
                .catalog
                .update_by_video_id(video_id, &snapshot.to_patch())
                .await?
            {
                report.refreshed += 1;
            }
        }

        let missing: Vec<String> = page
            .iter()
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(report);
        }

        report.unavailable = self.catalog.mark_unavailable_by_video_ids(&missing).await? as usize;
        for video_id in missing {
            let warning = StaleDataWarning {
                platform: Platform::Youtube,
                video_id,
            };
            warn!("{}", warning);
            report.warnings.push(warning);
        }

        Ok(report)
    }

    async fn reconcile_snapshot(&self, snapshot: &Snapshot) -> Result<Outcome> {
        let Some(key) = snapshot.identity_key() else {
            return Ok(Outcome::NoIdentity);
        };

        let existing = self
            .catalog
            .find_video_by_keys(snapshot.stream_id.as_deref(), snapshot.video_id.as_deref())
            .await?;

        if let Some(row) = existing {
            let patch = snapshot.to_patch();
            if !patch.changes(&row) {
                return Ok(Outcome::Unchanged(row.id));
            }
            self.catalog.update_video(row.id, &patch).await?;
            return Ok(Outcome::Updated(row.id));
        }

        let marker = created_marker_key(key);
        match self.cache.exists(&marker).await {
            Ok(true) => {
                debug!("Creation of {} suppressed by dedup marker", key);
                return Ok(Outcome::Suppressed);
            }
            Ok(false) => {}
            Err(e) => warn!("Dedup marker for {} unreadable: {}", key, e),
        }

        let channel_id = self.resolve_channel(snapshot).await?;
        let row = self
            .catalog
            .upsert_video(&snapshot.to_new_video(channel_id))
            .await?;

        if let Err(e) = self.cache.mark(&marker, self.config.dedup_marker_ttl).await {
            warn!("Failed to set dedup marker for {}: {}", key, e);
        }

        debug!("Created {} video {} ({})", row.platform, key, row.status);
        Ok(Outcome::Created {
            id: row.id,
            live: row.status == VideoStatus::Live,
        })
    }

    /// Catalog channel of a snapshot, looking up the video when the snapshot omits it
    async fn resolve_channel(&self, snapshot: &Snapshot) -> Result<Option<i64>> {
        let external = match (&snapshot.channel_id, snapshot.platform) {
            (Some(id), _) => Some(id.clone()),
            (None, Platform::Youtube) => match snapshot.video_id.as_deref() {
                Some(video_id) => self
                    .videos
                    .video_detail(video_id)
                    .await?
                    .and_then(|detail| detail.channel_id),
                None => None,
            },
            (None, Platform::Twitch) => None,
        };

        let Some(external) = external else {
            return Ok(None);
        };

        Ok(self
            .catalog
            .find_channel_by_external_id(snapshot.platform, &external)
            .await?
            .map(|channel| channel.id))
    }

    /// Demote LIVE stream rows absent from the snapshot; returns the demoted row ids
    async fn demote_ended_streams(&self, fresh_streams: &HashSet<&str>) -> Result<Vec<i64>> {
        let query = VideoQuery {
            platform: Some(Platform::Twitch),
            statuses: vec![VideoStatus::Live],
            ..VideoQuery::default()
        };

        let ended: Vec<i64> = self
            .catalog
            .query_videos(&query)
            .await?
            .iter()
            .filter(|r| {
                r.video
                    .stream_id
                    .as_deref()
                    .map_or(true, |id| !fresh_streams.contains(id))
            })
            .map(|r| r.video.id)
            .collect();

        if ended.is_empty() {
            return Ok(ended);
        }

        let demoted = self
            .catalog
            .update_status_by_ids(&ended, VideoStatus::Finished)
            .await?;
        info!("Demoted {} ended streams to FINISHED", demoted);
        Ok(ended)
    }

    async fn apply_outage_policy(&self) {
        let StreamOutagePolicy::DemoteAfter(after) = self.config.stream_outage_policy else {
            return;
        };

        let Ok(after) = chrono::Duration::from_std(after) else {
            warn!("Stream outage threshold out of range, nothing demoted");
            return;
        };

        let query = VideoQuery {
            platform: Some(Platform::Twitch),
            statuses: vec![VideoStatus::Live],
            updated_before: Some(Utc::now() - after),
            ..VideoQuery::default()
        };

        let result = match self.catalog.query_videos(&query).await {
            Ok(rows) => {
                let ids: Vec<i64> = rows.iter().map(|r| r.video.id).collect();
                self.catalog
                    .update_status_by_ids(&ids, VideoStatus::Finished)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(0) => {}
            Ok(demoted) => warn!(
                "Stream platform unavailable, demoted {} streams not refreshed for {}s",
                demoted,
                after.num_seconds()
            ),
            Err(e) => error!("Outage demotion failed: {}", e),
        }
    }

    /// Re-verify carried-over feed rows that have not been refreshed recently
    async fn sweep_stale(&self, carried: &[i64], progress: &dyn Progress) -> Result<RefreshReport> {
        if carried.is_empty() {
            return Ok(RefreshReport::default());
        }

        let query = VideoQuery {
            row_ids: Some(carried.to_vec()),
            platform: Some(Platform::Youtube),
            exclude_unavailable: true,
            updated_before: Some(Utc::now() - self.config.staleness_threshold_chrono()),
            ..VideoQuery::default()
        };
        let ids = video_ids(&self.catalog.query_videos(&query).await?);
        if ids.is_empty() {
            return Ok(RefreshReport::default());
        }

        debug!("Re-verifying {} stale videos", ids.len());
        Ok(self.authoritative_refresh(&ids, progress).await)
    }

    /// Build the next feed from the rows touched by this pass and the carried-over entries
    async fn merge_feed(
        &self,
        previous: &CachedFeed,
        touched: &[i64],
        carried: &[i64],
        discovered: &[i64],
        report: &mut PassReport,
    ) -> Result<Vec<VideoView>> {
        let mut ids: Vec<i64> = touched.iter().chain(carried).copied().collect();
        ids.sort_unstable();
        ids.dedup();

        let query = VideoQuery {
            row_ids: Some(ids),
            exclude_unavailable: true,
            sort: Some(SortSpec::newest_first()),
            ..VideoQuery::default()
        };
        let records = self.catalog.query_videos(&query).await?;

        let fresh: HashSet<i64> = touched.iter().copied().collect();
        let discovered: HashSet<i64> = discovered.iter().copied().collect();
        let previous_by_id: HashMap<i64, &VideoView> =
            previous.entries.iter().map(|e| (e.id, e)).collect();

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(records.len());

        for record in records {
            let id = record.video.id;
            let mut view = VideoView::from(record);

            // Carried entries keep their cached values unless the row changed since.
            if !fresh.contains(&id) {
                if let Some(cached) = previous_by_id.get(&id) {
                    if cached.updated_at >= view.updated_at {
                        view.overlay(cached);
                    }
                }
            }

            let identity = view.identity_key().map(str::to_string);
            if let Some(identity) = identity {
                if !seen.insert(identity) {
                    continue;
                }
            }

            if discovered.contains(&id) {
                report.newly_discovered.push(view.clone());
            }
            entries.push(view);
        }

        Ok(entries)
    }

    async fn load_previous_feed(&self) -> CachedFeed {
        match self.cache.load_feed().await {
            Ok(feed) => feed.unwrap_or_default(),
            Err(e) => {
                warn!("Cached feed unreadable, reconciling against an empty feed: {}", e);
                CachedFeed::default()
            }
        }
    }

    async fn tracked_channel_ids(&self, platform: Platform) -> Result<Vec<String>> {
        Ok(self
            .catalog
            .list_tracked_channels(platform)
            .await?
            .into_iter()
            .map(|c| c.channel_id)
            .collect())
    }
}

fn video_ids(records: &[crate::model::VideoRecord]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.video.video_id.clone())
        .collect()
}

/// Drop snapshots whose identity already appeared earlier in the sequence
fn unique_snapshots(snapshots: impl Iterator<Item = Snapshot>) -> Vec<Snapshot> {
    let mut seen = HashSet::new();
    snapshots
        .filter(|s| match s.identity_key() {
            Some(key) => seen.insert(key.to_string()),
            None => true,
        })
        .collect()
}
