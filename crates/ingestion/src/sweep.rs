//! Daily talent status sweep and channel profile refresh

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::CatalogRepository;
use crate::config::IngestionConfig;
use crate::model::Platform;
use crate::providers::{ChannelInfo, StreamPlatformProvider, VideoPlatformProvider};
use crate::queue::Progress;
use crate::Result;

const YOUTUBE_CHANNEL_PAGE: usize = 50;
const TWITCH_CHANNEL_PAGE: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub retired: Vec<String>,
    pub channels_updated: usize,
    pub failed_pages: usize,
}

pub struct StatusSweep {
    catalog: Arc<dyn CatalogRepository>,
    videos: Arc<dyn VideoPlatformProvider>,
    streams: Arc<dyn StreamPlatformProvider>,
    config: IngestionConfig,
}

impl StatusSweep {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        videos: Arc<dyn VideoPlatformProvider>,
        streams: Arc<dyn StreamPlatformProvider>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            catalog,
            videos,
            streams,
            config,
        }
    }

    /// Retire talents whose retirement day has ended locally, then refresh YouTube channels
    pub async fn run_daily(&self, progress: &dyn Progress) -> Result<SweepReport> {
        let today = Utc::now().with_timezone(&self.config.local_offset()).date_naive();

        let retired = self.catalog.retire_talents(today).await?;
        if !retired.is_empty() {
            info!("Retired {} talents: {}", retired.len(), retired.join(", "));
        }
        progress.tick();

        let mut report = self.refresh_channel_info(Platform::Youtube, progress).await?;
        report.retired = retired;
        Ok(report)
    }

    /// Pull display name, username, followers and profile image for every channel of `platform`
    pub async fn refresh_channel_info(
        &self,
        platform: Platform,
        progress: &dyn Progress,
    ) -> Result<SweepReport> {
        let channels = self.catalog.list_channels(platform).await?;
        let page_size = match platform {
            Platform::Youtube => YOUTUBE_CHANNEL_PAGE,
            Platform::Twitch => TWITCH_CHANNEL_PAGE,
        };

        let mut report = SweepReport::default();
        for page in channels.chunks(page_size) {
            let ids: Vec<String> = page.iter().map(|c| c.channel_id.clone()).collect();

            let infos: Vec<ChannelInfo> = match platform {
                Platform::Youtube => self.videos.channel_info(&ids).await,
                Platform::Twitch => self.streams.channel_info(&ids).await,
            }
            .unwrap_or_else(|e| {
                warn!("Channel info page of {} {} channels failed: {}", ids.len(), platform, e);
                report.failed_pages += 1;
                Vec::new()
            });

            for info in &infos {
                match self.catalog.update_channel_info(info).await {
                    Ok(true) => report.channels_updated += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Failed to update channel {}: {}", info.channel_id, e),
                }
            }
            progress.tick();
        }

        info!(
            "Refreshed {} of {} {} channels",
            report.channels_updated,
            channels.len(),
            platform
        );
        Ok(report)
    }
}
