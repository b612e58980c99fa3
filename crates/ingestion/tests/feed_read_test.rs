//! Read paths: live feed rebuild, filtered listings, talent pages and backfill trigger

mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::{channel, new_video, stream_snapshot, talent, video_snapshot, Harness};
use livefeed_ingestion::cache::fetching_marker_key;
use livefeed_ingestion::{
    day_window, IngestionError, JobContext, JobHandler, JobKind, JobQueue, Platform, QueueConfig,
    Result, TalentSort, TalentStatus, UploadKind, VideoFilter, VideoStatus, VideoType,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn test_live_feed_is_rebuilt_from_recent_rows() {
    let h = Harness::new().await;
    let (_queue, feed) = h.start_worker().await;
    let now = Utc::now();

    h.catalog
        .insert_video(new_video(
            &stream_snapshot("recent", "1001", 10),
            Some(h.twitch_channel.id),
            now - ChronoDuration::hours(2),
        ))
        .await;
    h.catalog
        .insert_video(new_video(
            &video_snapshot("old", "UC_alice", VideoStatus::Finished),
            Some(h.youtube_channel.id),
            now - ChronoDuration::days(3),
        ))
        .await;
    h.catalog
        .insert_video(new_video(
            &video_snapshot("gone", "UC_alice", VideoStatus::Unavailable),
            Some(h.youtube_channel.id),
            now,
        ))
        .await;
    h.catalog
        .insert_video(new_video(&stream_snapshot("orphan", "9999", 10), None, now))
        .await;

    let entries = feed.live_feed(false).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].stream_id.as_deref(), Some("recent"));
    assert_eq!(entries[0].url.as_deref(), Some("https://www.twitch.tv/1001"));

    let cached = h.cache.load_feed().await.unwrap().unwrap();
    assert_eq!(cached.version, 1);

    // Served from the cache until forced
    let again = feed.live_feed(false).await.unwrap();
    assert_eq!(again, entries);
    assert_eq!(h.cache.load_feed().await.unwrap().unwrap().version, 1);
}

#[tokio::test]
async fn test_forced_rebuild_keeps_cached_values() {
    let h = Harness::new().await;
    let (_queue, feed) = h.start_worker().await;

    let mut stored = stream_snapshot("s1", "1001", 10);
    stored.durations = 100;
    h.catalog
        .insert_video(new_video(&stored, Some(h.twitch_channel.id), Utc::now()))
        .await;

    let mut entries = feed.live_feed(false).await.unwrap();
    entries[0].views = 80;
    entries[0].durations = 40;
    entries[0].title = "renamed live".to_string();
    h.cache
        .replace_feed(entries, Duration::from_secs(60))
        .await
        .unwrap();

    let rebuilt = feed.live_feed(true).await.unwrap();
    assert_eq!(rebuilt[0].views, 80);
    assert_eq!(rebuilt[0].title, "renamed live");
    assert_eq!(rebuilt[0].durations, 100);
    assert_eq!(h.cache.load_feed().await.unwrap().unwrap().version, 3);
}

#[tokio::test]
async fn test_live_listing_hides_delisted_talents() {
    let h = Harness::new().await;
    let (_queue, feed) = h.start_worker().await;

    let bob_channel = h
        .catalog
        .insert_channel(channel(Platform::Twitch, "2002"))
        .await;
    let mut bob = talent("bob", None, Some(&bob_channel));
    bob.status = TalentStatus::Delisted;
    h.catalog.insert_talent(bob).await;

    for (stream, views, channel_id) in [
        ("quiet", 5, h.twitch_channel.id),
        ("busy", 50, h.twitch_channel.id),
        ("hidden", 500, bob_channel.id),
    ] {
        h.catalog
            .insert_video(new_video(
                &stream_snapshot(stream, "x", views),
                Some(channel_id),
                Utc::now(),
            ))
            .await;
    }

    let live = feed.get_videos(&VideoFilter::live()).await.unwrap();
    let streams: Vec<_> = live.iter().filter_map(|v| v.stream_id.as_deref()).collect();
    assert_eq!(streams, vec!["busy", "quiet"]);
    assert!(live.iter().all(|v| v.talents.iter().all(|t| t.slug == "alice")));
}

#[tokio::test]
async fn test_day_listing_queries_the_catalog_window() {
    let h = Harness::new().await;
    let (_queue, feed) = h.start_worker().await;

    let offset = h.config.local_offset();
    let today = Utc::now().with_timezone(&offset).date_naive();
    let (start, _) = day_window(today, offset).unwrap();

    for (id, at) in [
        ("soon", start + ChronoDuration::hours(20)),
        ("early", start + ChronoDuration::hours(2)),
        ("next-week", start + ChronoDuration::days(7)),
        ("midnight", start + ChronoDuration::days(1)),
    ] {
        h.catalog
            .insert_video(new_video(
                &video_snapshot(id, "UC_alice", VideoStatus::Upcoming),
                Some(h.youtube_channel.id),
                at,
            ))
            .await;
    }

    let upcoming = feed
        .get_videos(&VideoFilter::upcoming(Some(today), offset))
        .await
        .unwrap();
    let ids: Vec<_> = upcoming.iter().filter_map(|v| v.video_id.as_deref()).collect();
    assert_eq!(ids, vec!["early", "soon"]);

    // Next midnight belongs to the following day only
    let tomorrow = feed
        .get_videos(&VideoFilter::upcoming(today.succ_opt(), offset))
        .await
        .unwrap();
    let ids: Vec<_> = tomorrow.iter().filter_map(|v| v.video_id.as_deref()).collect();
    assert_eq!(ids, vec!["midnight"]);
}

#[tokio::test]
async fn test_talent_pages_follow_the_cursor() {
    let h = Harness::new().await;
    let (_queue, feed) = h.start_worker().await;

    let uploads = (1..=35)
        .map(|i| {
            let mut s = video_snapshot(&format!("up{}", i), "UC_alice", VideoStatus::Finished);
            s.video_type = VideoType::Uploaded;
            s.datetime = Some(Utc::now() - ChronoDuration::hours(i));
            s
        })
        .collect();
    h.videos.set_uploads("UC_alice", UploadKind::Videos, uploads);

    let first = feed
        .get_videos_by_talent("alice", VideoType::Uploaded, TalentSort::New, None)
        .await
        .unwrap();
    assert_eq!(first.data.len(), 30);
    assert_eq!(first.data[0].video_id.as_deref(), Some("up1"));
    assert_eq!(
        first.data[0].url.as_deref(),
        Some("https://www.youtube.com/watch?v=up1")
    );
    let token = first.next_token.clone().expect("full page carries a token");

    let second = feed
        .get_videos_by_talent("alice", VideoType::Uploaded, TalentSort::New, Some(&token))
        .await
        .unwrap();
    let ids: Vec<_> = second.data.iter().filter_map(|v| v.video_id.as_deref()).collect();
    assert_eq!(ids, vec!["up31", "up32", "up33", "up34", "up35"]);
    assert!(second.next_token.is_none());

    let cached = feed
        .get_videos_by_talent("alice", VideoType::Uploaded, TalentSort::New, None)
        .await
        .unwrap();
    assert_eq!(cached, first);

    let mismatched = feed
        .get_videos_by_talent("alice", VideoType::Uploaded, TalentSort::Views, Some(&token))
        .await;
    assert!(matches!(mismatched, Err(IngestionError::InvalidCursor(_))));
}

#[tokio::test]
async fn test_unknown_talent_gets_empty_page() {
    let h = Harness::new().await;
    let (_queue, feed) = h.start_worker().await;

    let page = feed
        .get_videos_by_talent("nobody", VideoType::Live, TalentSort::Views, None)
        .await
        .unwrap();

    assert!(page.data.is_empty());
    assert!(page.next_token.is_none());
    assert!(h.cache.exists(&fetching_marker_key("nobody")).await.unwrap());
}

#[tokio::test]
async fn test_garbage_token_is_rejected() {
    let h = Harness::new().await;
    let (_queue, feed) = h.start_worker().await;

    let result = feed
        .get_videos_by_talent("alice", VideoType::Live, TalentSort::Old, Some("not-a-token"))
        .await;
    assert!(matches!(result, Err(IngestionError::InvalidCursor(_))));
}

#[tokio::test]
async fn test_stream_lookup_overlays_cached_values() {
    let h = Harness::new().await;
    let (_queue, feed) = h.start_worker().await;
    h.catalog
        .insert_video(new_video(
            &stream_snapshot("s1", "1001", 10),
            Some(h.twitch_channel.id),
            Utc::now(),
        ))
        .await;

    let mut entries = feed.live_feed(false).await.unwrap();
    entries[0].views = 50;
    h.cache
        .replace_feed(entries, Duration::from_secs(60))
        .await
        .unwrap();

    let view = feed.get_video_by_stream_id("s1").await.unwrap().unwrap();
    assert_eq!(view.views, 50);
    assert_eq!(view.talents.len(), 1);
    assert!(feed.get_video_by_stream_id("missing").await.unwrap().is_none());
}

/// Counts runs per job key
#[derive(Default)]
struct CountingHandler {
    runs: Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn handle(&self, kind: &JobKind, _ctx: &JobContext) -> Result<()> {
        *self.runs.lock().unwrap().entry(kind.key()).or_default() += 1;
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_concurrent_backfill_triggers_run_each_channel_once() {
    let h = Harness::new().await;
    let queue = JobQueue::new(QueueConfig::default());
    let handler = Arc::new(CountingHandler::default());
    queue.start(handler.clone()).await.unwrap();
    let feed = h.feed_service(queue);

    let (a, b) = tokio::join!(
        feed.fetch_videos_by_talent("alice"),
        feed.fetch_videos_by_talent("alice")
    );
    a.unwrap();
    b.unwrap();

    let runs = handler.runs.lock().unwrap().clone();
    assert_eq!(runs.get("fetch-yt:UC_alice"), Some(&1));
    assert_eq!(runs.get("fetch-tw:1001"), Some(&1));
    assert_eq!(runs.len(), 2);
}

#[tokio::test]
async fn test_backfill_trigger_for_unknown_talent_fails() {
    let h = Harness::new().await;
    let (_queue, feed) = h.start_worker().await;

    let result = feed.fetch_videos_by_talent("nobody").await;
    assert!(matches!(result, Err(IngestionError::NotFound(_))));
}
