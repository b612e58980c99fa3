//! Daily talent sweep and channel-info refresh

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{channel, talent, Harness};
use livefeed_ingestion::{ChannelInfo, Platform, TalentStatus};
use std::sync::atomic::Ordering;

fn info(platform: Platform, channel_id: &str, followers: i64) -> ChannelInfo {
    ChannelInfo {
        platform,
        channel_id: channel_id.to_string(),
        name: Some(format!("{} renamed", channel_id)),
        username: Some(format!("{}_user", channel_id)),
        followers,
        profile_img_url: Some(format!("https://img/{}.png", channel_id)),
    }
}

#[tokio::test]
async fn test_daily_sweep_retires_past_dates_and_refreshes_channels() {
    let h = Harness::new().await;
    let today = Utc::now()
        .with_timezone(&h.config.local_offset())
        .date_naive();

    let mut gone = talent("gone", None, None);
    gone.retired_on = Some(today - ChronoDuration::days(1));
    h.catalog.insert_talent(gone).await;

    let mut last_day = talent("last-day", None, None);
    last_day.retired_on = Some(today);
    h.catalog.insert_talent(last_day).await;

    let mut hidden = talent("hidden", None, None);
    hidden.status = TalentStatus::Delisted;
    hidden.retired_on = Some(today - ChronoDuration::days(30));
    h.catalog.insert_talent(hidden).await;

    h.videos
        .channel_infos
        .lock()
        .unwrap()
        .push(info(Platform::Youtube, "UC_alice", 1234));

    let report = h.sweep().run_daily(&()).await.unwrap();

    assert_eq!(report.retired, vec!["gone".to_string()]);
    assert_eq!(report.channels_updated, 1);
    assert_eq!(
        h.catalog.talent("gone").await.unwrap().status,
        TalentStatus::Retired
    );
    assert_eq!(
        h.catalog.talent("last-day").await.unwrap().status,
        TalentStatus::Active
    );
    assert_eq!(
        h.catalog.talent("hidden").await.unwrap().status,
        TalentStatus::Delisted
    );

    let refreshed = h.catalog.channel(h.youtube_channel.id).await.unwrap();
    assert_eq!(refreshed.followers, 1234);
    assert_eq!(refreshed.username.as_deref(), Some("UC_alice_user"));
    assert_eq!(
        refreshed.profile_img_url.as_deref(),
        Some("https://img/UC_alice.png")
    );
}

#[tokio::test]
async fn test_stream_channel_refresh_pages_by_hundred() {
    let h = Harness::new().await;
    for i in 0..150 {
        h.catalog
            .insert_channel(channel(Platform::Twitch, &format!("{}", 5000 + i)))
            .await;
    }
    h.streams.channel_infos.lock().unwrap().extend(
        (0..150).map(|i| info(Platform::Twitch, &format!("{}", 5000 + i), i)),
    );

    let report = h
        .sweep()
        .refresh_channel_info(Platform::Twitch, &())
        .await
        .unwrap();

    assert_eq!(report.channels_updated, 150);
    assert_eq!(report.failed_pages, 0);
}

#[tokio::test]
async fn test_failed_channel_page_is_counted_not_fatal() {
    let h = Harness::new().await;
    h.streams.fail_channel_info.store(true, Ordering::SeqCst);

    let report = h
        .sweep()
        .refresh_channel_info(Platform::Twitch, &())
        .await
        .unwrap();

    assert_eq!(report.failed_pages, 1);
    assert_eq!(report.channels_updated, 0);
    assert_eq!(
        h.catalog.channel(h.twitch_channel.id).await.unwrap().followers,
        0
    );
}
