//! Ingestion configuration loaded from `LIVEFEED_` environment variables

use chrono::{FixedOffset, Offset, Utc};
use livefeed_core::config::{parse_env_var, ConfigLoader};
use livefeed_core::LiveFeedError;
use std::time::Duration;

use crate::queue::QueueConfig;

/// What to do with LIVE stream rows while the stream platform's live snapshot fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutagePolicy {
    /// Leave rows untouched until a snapshot succeeds again
    LeaveAsIs,
    /// Demote LIVE rows not refreshed for longer than the duration to FINISHED
    DemoteAfter(Duration),
}

/// Tunables for the reconciliation engine, read paths and backfills
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Snapshots reconciled concurrently per batch
    pub batch_size: usize,
    /// Ids per authoritative lookup
    pub authoritative_page_size: usize,
    /// Minimum age before an absent video row is re-verified
    pub staleness_threshold: Duration,
    /// TTL of the feed written by a reconciliation pass
    pub feed_ttl: Duration,
    /// TTL of a feed rebuilt from the catalog
    pub rebuilt_feed_ttl: Duration,
    pub dedup_marker_ttl: Duration,
    pub inflight_marker_ttl: Duration,
    /// Half-width of the datetime window the live feed is rebuilt from
    pub feed_window: Duration,
    pub page_size: usize,
    pub first_page_ttl: Duration,
    pub later_page_ttl: Duration,
    /// Offset of the timezone used for day boundaries, in seconds east of UTC
    pub utc_offset_secs: i32,
    /// Rows refreshed per `yt-dt` run
    pub datetime_backfill_limit: usize,
    /// Maximum items pulled per upload playlist during a channel resync
    pub upload_item_cap: usize,
    pub stream_outage_policy: StreamOutagePolicy,
    pub queue: QueueConfig,
    pub youtube_api_key: Option<String>,
    pub twitch_client_id: Option<String>,
    pub twitch_client_secret: Option<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            authoritative_page_size: 50,
            staleness_threshold: Duration::from_secs(15 * 60),
            feed_ttl: Duration::from_millis(9_000_000),
            rebuilt_feed_ttl: Duration::from_millis(600_000),
            dedup_marker_ttl: Duration::from_secs(24 * 3600),
            inflight_marker_ttl: Duration::from_secs(3600),
            feed_window: Duration::from_secs(24 * 3600),
            page_size: livefeed_core::DEFAULT_PAGE_SIZE,
            first_page_ttl: Duration::from_secs(60),
            later_page_ttl: Duration::from_secs(3600),
            utc_offset_secs: 7 * 3600,
            datetime_backfill_limit: 50,
            upload_item_cap: 500,
            stream_outage_policy: StreamOutagePolicy::LeaveAsIs,
            queue: QueueConfig::default(),
            youtube_api_key: None,
            twitch_client_id: None,
            twitch_client_secret: None,
        }
    }
}

impl IngestionConfig {
    /// Timezone used for day boundaries
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_secs)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn feed_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.feed_window).unwrap_or_else(|_| chrono::Duration::days(1))
    }

    pub fn staleness_threshold_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.staleness_threshold)
            .unwrap_or_else(|_| chrono::Duration::minutes(15))
    }
}

fn secs(key: &str, default: Duration) -> Result<Duration, LiveFeedError> {
    parse_env_var(key, default.as_secs()).map(Duration::from_secs)
}

impl ConfigLoader for IngestionConfig {
    fn from_env() -> Result<Self, LiveFeedError> {
        let d = IngestionConfig::default();

        let stream_outage_policy =
            match std::env::var("LIVEFEED_STREAM_OUTAGE_DEMOTE_AFTER_SECS") {
                Ok(raw) => {
                    let secs = raw.parse::<u64>().map_err(|e| {
                        LiveFeedError::config(
                            format!("Invalid stream outage threshold: {}", e),
                            "LIVEFEED_STREAM_OUTAGE_DEMOTE_AFTER_SECS",
                        )
                    })?;
                    StreamOutagePolicy::DemoteAfter(Duration::from_secs(secs))
                }
                Err(_) => StreamOutagePolicy::LeaveAsIs,
            };

        let queue = QueueConfig {
            stall_window: secs("LIVEFEED_QUEUE_STALL_WINDOW_SECS", d.queue.stall_window)?,
            max_stalled: parse_env_var("LIVEFEED_QUEUE_MAX_STALLED", d.queue.max_stalled)?,
            max_retries: parse_env_var("LIVEFEED_QUEUE_MAX_RETRIES", d.queue.max_retries)?,
        };

        Ok(Self {
            batch_size: parse_env_var("LIVEFEED_BATCH_SIZE", d.batch_size)?,
            authoritative_page_size: parse_env_var(
                "LIVEFEED_AUTHORITATIVE_PAGE_SIZE",
                d.authoritative_page_size,
            )?,
            staleness_threshold: secs("LIVEFEED_STALENESS_THRESHOLD_SECS", d.staleness_threshold)?,
            feed_ttl: secs("LIVEFEED_FEED_TTL_SECS", d.feed_ttl)?,
            rebuilt_feed_ttl: secs("LIVEFEED_REBUILT_FEED_TTL_SECS", d.rebuilt_feed_ttl)?,
            dedup_marker_ttl: secs("LIVEFEED_DEDUP_MARKER_TTL_SECS", d.dedup_marker_ttl)?,
            inflight_marker_ttl: secs("LIVEFEED_INFLIGHT_MARKER_TTL_SECS", d.inflight_marker_ttl)?,
            feed_window: secs("LIVEFEED_FEED_WINDOW_SECS", d.feed_window)?,
            page_size: parse_env_var("LIVEFEED_PAGE_SIZE", d.page_size)?,
            first_page_ttl: secs("LIVEFEED_FIRST_PAGE_TTL_SECS", d.first_page_ttl)?,
            later_page_ttl: secs("LIVEFEED_LATER_PAGE_TTL_SECS", d.later_page_ttl)?,
            utc_offset_secs: parse_env_var("LIVEFEED_UTC_OFFSET_SECS", d.utc_offset_secs)?,
            datetime_backfill_limit: parse_env_var(
                "LIVEFEED_DATETIME_BACKFILL_LIMIT",
                d.datetime_backfill_limit,
            )?,
            upload_item_cap: parse_env_var("LIVEFEED_UPLOAD_ITEM_CAP", d.upload_item_cap)?,
            stream_outage_policy,
            queue,
            youtube_api_key: std::env::var("LIVEFEED_YOUTUBE_API_KEY").ok(),
            twitch_client_id: std::env::var("LIVEFEED_TWITCH_CLIENT_ID").ok(),
            twitch_client_secret: std::env::var("LIVEFEED_TWITCH_CLIENT_SECRET").ok(),
        })
    }

    fn validate(&self) -> Result<(), LiveFeedError> {
        if self.batch_size == 0 || self.batch_size > 100 {
            return Err(LiveFeedError::config(
                "batch_size must be between 1 and 100",
                "LIVEFEED_BATCH_SIZE",
            ));
        }

        if self.authoritative_page_size == 0 || self.authoritative_page_size > 50 {
            return Err(LiveFeedError::config(
                "authoritative_page_size must be between 1 and 50",
                "LIVEFEED_AUTHORITATIVE_PAGE_SIZE",
            ));
        }

        if self.page_size == 0 {
            return Err(LiveFeedError::config(
                "page_size must be greater than 0",
                "LIVEFEED_PAGE_SIZE",
            ));
        }

        if FixedOffset::east_opt(self.utc_offset_secs).is_none() {
            return Err(LiveFeedError::config(
                format!("utc offset {} is out of range", self.utc_offset_secs),
                "LIVEFEED_UTC_OFFSET_SECS",
            ));
        }

        if self.queue.stall_window.is_zero() {
            return Err(LiveFeedError::config(
                "stall window must be greater than 0",
                "LIVEFEED_QUEUE_STALL_WINDOW_SECS",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = IngestionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.feed_ttl, Duration::from_secs(150 * 60));
        assert_eq!(config.page_size, 30);
        assert_eq!(config.local_offset().local_minus_utc(), 7 * 3600);
        assert_eq!(config.stream_outage_policy, StreamOutagePolicy::LeaveAsIs);
    }

    #[test]
    fn test_batch_size_bounded() {
        let config = IngestionConfig {
            batch_size: 500,
            ..IngestionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_authoritative_page_bounded() {
        let config = IngestionConfig {
            authoritative_page_size: 51,
            ..IngestionConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
