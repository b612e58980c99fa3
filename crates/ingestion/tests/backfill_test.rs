//! Channel resync jobs

mod common;

use chrono::Utc;
use common::{new_video, stream_snapshot, video_snapshot, Harness};
use livefeed_ingestion::{IngestionError, Platform, Snapshot, UploadKind, VideoStatus, VideoType};

fn archive(video_id: &str, stream_id: &str) -> Snapshot {
    Snapshot {
        platform: Platform::Twitch,
        video_id: Some(video_id.to_string()),
        stream_id: Some(stream_id.to_string()),
        channel_id: Some("1001".to_string()),
        title: format!("archive {}", video_id),
        thumbnail: Some(format!("https://archive/{}.jpg", video_id)),
        datetime: Some(Utc::now()),
        views: 12,
        durations: 3600,
        status: VideoStatus::Finished,
        video_type: VideoType::Live,
    }
}

#[tokio::test]
async fn test_youtube_resync_replaces_channel_videos() {
    let h = Harness::new().await;
    h.catalog
        .insert_video(new_video(
            &video_snapshot("removed", "UC_alice", VideoStatus::Finished),
            Some(h.youtube_channel.id),
            Utc::now(),
        ))
        .await;

    let mut upload = video_snapshot("v1", "UC_alice", VideoStatus::Finished);
    upload.video_type = VideoType::Uploaded;
    let mut short = video_snapshot("sh1", "UC_alice", VideoStatus::Finished);
    short.video_type = VideoType::Short;
    h.videos
        .set_uploads("UC_alice", UploadKind::Videos, vec![upload.clone(), upload]);
    h.videos.set_uploads("UC_alice", UploadKind::Shorts, vec![short]);

    let written = h
        .backfill()
        .resync_youtube_channel("UC_alice", &())
        .await
        .unwrap();

    assert_eq!(written, 2);
    assert_eq!(h.video_by_key("removed").await.status, VideoStatus::Unavailable);

    let v1 = h.video_by_key("v1").await;
    assert_eq!(v1.status, VideoStatus::Finished);
    assert_eq!(v1.channel_id, Some(h.youtube_channel.id));
    assert_eq!(h.video_by_key("sh1").await.video_type, VideoType::Short);
}

#[tokio::test]
async fn test_twitch_resync_keeps_running_stream_live() {
    let h = Harness::new().await;
    h.streams.set_live(vec![stream_snapshot("st1", "1001", 300)]);
    h.reconciler().run_feed_pass(&()).await.unwrap();
    let live_row = h.video_by_key("st1").await;

    h.catalog
        .insert_video(new_video(
            &archive("a0", "st0"),
            Some(h.twitch_channel.id),
            Utc::now(),
        ))
        .await;
    h.streams
        .set_uploads("1001", vec![archive("a1", "st1"), archive("a2", "st2")]);

    h.backfill()
        .resync_twitch_channel("1001", &())
        .await
        .unwrap();

    let running = h.video_by_key("st1").await;
    assert_eq!(running.id, live_row.id);
    assert_eq!(running.status, VideoStatus::Live);
    assert_eq!(running.video_id.as_deref(), Some("a1"));
    assert_eq!(running.thumbnail, live_row.thumbnail);

    assert_eq!(h.video_by_key("a2").await.status, VideoStatus::Finished);
    assert_eq!(h.video_by_key("a0").await.status, VideoStatus::Unavailable);
}

#[tokio::test]
async fn test_resync_of_unknown_channel_fails() {
    let h = Harness::new().await;

    let result = h.backfill().resync_youtube_channel("UC_nobody", &()).await;
    assert!(matches!(result, Err(IngestionError::NotFound(_))));

    let result = h.backfill().resync_twitch_channel("4242", &()).await;
    assert!(matches!(result, Err(IngestionError::NotFound(_))));
}
