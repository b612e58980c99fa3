//! Job handler wiring queue jobs to the ingestion components

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backfill::ChannelBackfill;
use crate::feed::FeedService;
use crate::model::Platform;
use crate::queue::{JobContext, JobHandler, JobKind};
use crate::reconcile::FeedReconciler;
use crate::sweep::StatusSweep;
use crate::Result;

pub struct IngestionWorker {
    reconciler: Arc<FeedReconciler>,
    feed: Arc<FeedService>,
    backfill: Arc<ChannelBackfill>,
    sweep: Arc<StatusSweep>,
}

impl IngestionWorker {
    pub fn new(
        reconciler: Arc<FeedReconciler>,
        feed: Arc<FeedService>,
        backfill: Arc<ChannelBackfill>,
        sweep: Arc<StatusSweep>,
    ) -> Self {
        Self {
            reconciler,
            feed,
            backfill,
            sweep,
        }
    }
}

#[async_trait]
impl JobHandler for IngestionWorker {
    async fn handle(&self, kind: &JobKind, ctx: &JobContext) -> Result<()> {
        debug!("Running job {} ({}), attempt {}", ctx.key, ctx.job_id, ctx.attempt);

        match kind {
            JobKind::Feed => {
                let report = self.reconciler.run_feed_pass(ctx).await?;
                info!(
                    snapshots = report.snapshots,
                    failed = report.failed,
                    "Feed pass published v{}",
                    report.feed_version
                );
            }
            JobKind::FetchVideo => {
                let entries = self.feed.live_feed(true).await?;
                debug!("Live feed rebuilt with {} entries", entries.len());
            }
            JobKind::YoutubeDatetime => {
                let report = self.reconciler.refresh_missing_datetimes(ctx).await?;
                debug!("Datetime backfill refreshed {} rows", report.refreshed);
            }
            JobKind::YoutubeUpcoming => {
                let report = self.reconciler.refresh_upcoming_without_datetime(ctx).await?;
                debug!("Upcoming backfill refreshed {} rows", report.refreshed);
            }
            JobKind::StreamChannelInfo => {
                self.sweep.refresh_channel_info(Platform::Twitch, ctx).await?;
            }
            JobKind::DailySweep => {
                self.sweep.run_daily(ctx).await?;
            }
            JobKind::FetchYoutubeChannel { channel_id } => {
                self.backfill.resync_youtube_channel(channel_id, ctx).await?;
            }
            JobKind::FetchTwitchChannel { channel_id } => {
                self.backfill.resync_twitch_channel(channel_id, ctx).await?;
            }
        }

        Ok(())
    }
}
