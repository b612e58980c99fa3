//! Periodic scheduling of ingestion jobs
//!
//! The scheduler only enqueues; the queue deduplicates by key, so a tick that lands while
//! the previous run of the same job is still going joins that run instead of stacking.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::queue::{JobKind, JobQueue};
use crate::Result;

/// Ingestion schedule configuration
#[derive(Debug, Clone)]
pub struct IngestionSchedule {
    /// Reconciliation pass (60 seconds)
    pub feed: Duration,
    /// Live feed rebuild (5 seconds)
    pub fetch_video: Duration,
    /// Missing-datetime backfill (10 seconds)
    pub youtube_datetime: Duration,
    /// Upcoming-without-datetime backfill (1 hour)
    pub youtube_upcoming: Duration,
    /// Stream channel profile refresh (1 hour)
    pub stream_channel_info: Duration,
    /// Local time of the daily sweep
    pub daily_at: NaiveTime,
}

impl Default for IngestionSchedule {
    fn default() -> Self {
        Self {
            feed: Duration::from_secs(60),
            fetch_video: Duration::from_secs(5),
            youtube_datetime: Duration::from_secs(10),
            youtube_upcoming: Duration::from_secs(3600),
            stream_channel_info: Duration::from_secs(3600),
            daily_at: NaiveTime::from_hms_opt(0, 1, 0).unwrap_or_default(),
        }
    }
}

/// Time left until the next occurrence of `at` in the `offset` timezone
pub fn until_next_daily(now: DateTime<Utc>, at: NaiveTime, offset: FixedOffset) -> Duration {
    let local = now.with_timezone(&offset);
    let today = local.date_naive().and_time(at);
    let mut next = today - ChronoDuration::seconds(i64::from(offset.local_minus_utc()));
    if next <= now.naive_utc() {
        next += ChronoDuration::days(1);
    }
    (next - now.naive_utc()).to_std().unwrap_or(Duration::ZERO)
}

/// Enqueues periodic jobs on the schedule
pub struct Scheduler {
    queue: JobQueue,
    schedule: IngestionSchedule,
    offset: FixedOffset,
}

impl Scheduler {
    pub fn new(queue: JobQueue, schedule: IngestionSchedule, offset: FixedOffset) -> Self {
        Self {
            queue,
            schedule,
            offset,
        }
    }

    /// Run all schedules until one of them stops
    pub async fn start(&self) -> Result<()> {
        info!("Starting ingestion schedule");

        let feed = self.spawn_every(self.schedule.feed, JobKind::Feed);
        let fetch_video = self.spawn_every(self.schedule.fetch_video, JobKind::FetchVideo);
        let datetime = self.spawn_every(self.schedule.youtube_datetime, JobKind::YoutubeDatetime);
        let upcoming = self.spawn_every(self.schedule.youtube_upcoming, JobKind::YoutubeUpcoming);
        let channel_info =
            self.spawn_every(self.schedule.stream_channel_info, JobKind::StreamChannelInfo);
        let daily = self.spawn_daily_sweep();

        tokio::select! {
            result = feed => error!("Feed schedule terminated: {:?}", result),
            result = fetch_video => error!("Feed rebuild schedule terminated: {:?}", result),
            result = datetime => error!("Datetime backfill schedule terminated: {:?}", result),
            result = upcoming => error!("Upcoming backfill schedule terminated: {:?}", result),
            result = channel_info => error!("Channel info schedule terminated: {:?}", result),
            result = daily => error!("Daily sweep schedule terminated: {:?}", result),
        }

        Ok(())
    }

    fn spawn_every(&self, period: Duration, kind: JobKind) -> JoinHandle<()> {
        let queue = self.queue.clone();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let handle = queue.enqueue(kind.clone()).await;
                debug!("Enqueued {} as {}", handle.key, handle.id);
            }
        })
    }

    fn spawn_daily_sweep(&self) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let at = self.schedule.daily_at;
        let offset = self.offset;

        tokio::spawn(async move {
            loop {
                let wait = until_next_daily(Utc::now(), at, offset);
                debug!("Next daily sweep in {}s", wait.as_secs());
                sleep(wait).await;
                queue.enqueue(JobKind::DailySweep).await;
                // Clear the minute so the next computation targets tomorrow
                sleep(Duration::from_secs(1)).await;
            }
        })
    }
}
