//! PostgreSQL catalog repository

use async_trait::async_trait;
use chrono::NaiveDate;
use livefeed_core::pagination::{SortDirection, SortField};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use super::{CatalogRepository, ResyncScope, VideoQuery, RESYNC_CHUNK_SIZE};
use crate::model::{
    Channel, NewVideo, Platform, ProfileImageSource, Talent, TalentRef, TalentWithChannels, Video,
    VideoPatch, VideoRecord, VideoStatus,
};
use crate::providers::ChannelInfo;
use crate::{IngestionError, Result};

const VIDEO_FIELDS: &str = "id, platform, video_id, stream_id, title, thumbnail, datetime, \
     views, durations, status, type, channel_id, updated_at";

const VIDEO_COLUMNS: &str = "v.id, v.platform, v.video_id, v.stream_id, v.title, v.thumbnail, \
     v.datetime, v.views, v.durations, v.status, v.type, v.channel_id, v.updated_at";

const JOINED_CHANNEL_COLUMNS: &str = "c.id AS c_id, c.platform AS c_platform, \
     c.channel_id AS c_channel_id, c.name AS c_name, c.username AS c_username, \
     c.followers AS c_followers, c.profile_img_url AS c_profile_img_url";

const CHANNEL_FIELDS: &str = "id, platform, channel_id, name, username, followers, profile_img_url";

const TALENT_FIELDS: &str = "id, slug, name, status, profile_img_source, uploaded_img_url, \
     youtube_channel_id, twitch_channel_id, retired_on";

/// PostgreSQL implementation of [`CatalogRepository`]
pub struct PostgresCatalogRepository {
    pool: PgPool,
}

impl PostgresCatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the catalog tables when they do not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::Executor::execute(&self.pool, include_str!("../../sql/schema.sql")).await?;
        Ok(())
    }
}

fn video_from_row(row: &PgRow) -> Result<Video> {
    Ok(Video {
        id: row.try_get("id")?,
        platform: row.try_get::<String, _>("platform")?.parse()?,
        video_id: row.try_get("video_id")?,
        stream_id: row.try_get("stream_id")?,
        title: row.try_get("title")?,
        thumbnail: row.try_get("thumbnail")?,
        datetime: row.try_get("datetime")?,
        views: row.try_get("views")?,
        durations: row.try_get("durations")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        video_type: row.try_get::<String, _>("type")?.parse()?,
        channel_id: row.try_get("channel_id")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn channel_from_row(row: &PgRow) -> Result<Channel> {
    Ok(Channel {
        id: row.try_get("id")?,
        platform: row.try_get::<String, _>("platform")?.parse()?,
        channel_id: row.try_get("channel_id")?,
        name: row.try_get("name")?,
        username: row.try_get("username")?,
        followers: row.try_get("followers")?,
        profile_img_url: row.try_get("profile_img_url")?,
    })
}

/// Channel of a `video LEFT JOIN channel` row, `None` when the video is unlinked
fn joined_channel_from_row(row: &PgRow) -> Result<Option<Channel>> {
    let Some(id) = row.try_get::<Option<i64>, _>("c_id")? else {
        return Ok(None);
    };

    Ok(Some(Channel {
        id,
        platform: row.try_get::<String, _>("c_platform")?.parse()?,
        channel_id: row.try_get("c_channel_id")?,
        name: row.try_get("c_name")?,
        username: row.try_get("c_username")?,
        followers: row.try_get("c_followers")?,
        profile_img_url: row.try_get("c_profile_img_url")?,
    }))
}

fn talent_from_row(row: &PgRow) -> Result<Talent> {
    Ok(Talent {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        profile_img_source: row.try_get::<String, _>("profile_img_source")?.parse()?,
        uploaded_img_url: row.try_get("uploaded_img_url")?,
        youtube_channel_id: row.try_get("youtube_channel_id")?,
        twitch_channel_id: row.try_get("twitch_channel_id")?,
        retired_on: row.try_get("retired_on")?,
    })
}

async fn find_by_keys(
    conn: &mut PgConnection,
    stream_id: Option<&str>,
    video_id: Option<&str>,
) -> Result<Option<Video>> {
    if let Some(stream_id) = stream_id {
        let row = sqlx::query(&format!(
            "SELECT {} FROM video WHERE stream_id = $1",
            VIDEO_FIELDS
        ))
        .bind(stream_id)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = row {
            return video_from_row(&row).map(Some);
        }
    }

    if let Some(video_id) = video_id {
        let row = sqlx::query(&format!(
            "SELECT {} FROM video WHERE video_id = $1",
            VIDEO_FIELDS
        ))
        .bind(video_id)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = row {
            return video_from_row(&row).map(Some);
        }
    }

    Ok(None)
}

/// Overwrite a row with fresh values. Unknown values keep what is stored.
async fn refresh_row(conn: &mut PgConnection, id: i64, video: &NewVideo) -> Result<Video> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE video SET
            platform = $2,
            video_id = COALESCE($3, video_id),
            stream_id = COALESCE($4, stream_id),
            title = $5,
            thumbnail = COALESCE($6, thumbnail),
            datetime = COALESCE($7, datetime),
            views = $8,
            durations = CASE WHEN $9 > 0 THEN $9 ELSE durations END,
            status = $10,
            type = $11,
            channel_id = COALESCE($12, channel_id),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        VIDEO_FIELDS
    ))
    .bind(id)
    .bind(video.platform.as_str())
    .bind(&video.video_id)
    .bind(&video.stream_id)
    .bind(&video.title)
    .bind(&video.thumbnail)
    .bind(video.datetime)
    .bind(video.views)
    .bind(video.durations)
    .bind(video.status.as_str())
    .bind(video.video_type.as_str())
    .bind(video.channel_id)
    .fetch_one(&mut *conn)
    .await?;

    video_from_row(&row)
}

async fn insert_row(conn: &mut PgConnection, video: &NewVideo) -> Result<Video> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO video (
            platform, video_id, stream_id, title, thumbnail, datetime,
            views, durations, status, type, channel_id
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {}
        "#,
        VIDEO_FIELDS
    ))
    .bind(video.platform.as_str())
    .bind(&video.video_id)
    .bind(&video.stream_id)
    .bind(&video.title)
    .bind(&video.thumbnail)
    .bind(video.datetime)
    .bind(video.views)
    .bind(video.durations)
    .bind(video.status.as_str())
    .bind(video.video_type.as_str())
    .bind(video.channel_id)
    .fetch_one(&mut *conn)
    .await?;

    video_from_row(&row)
}

async fn upsert_on(conn: &mut PgConnection, video: &NewVideo) -> Result<Video> {
    let existing = find_by_keys(
        &mut *conn,
        video.stream_id.as_deref(),
        video.video_id.as_deref(),
    )
    .await?;

    match existing {
        Some(existing) => refresh_row(conn, existing.id, video).await,
        None => insert_row(conn, video).await,
    }
}

/// Write one resync chunk with a single key lookup, one multi-row INSERT for new rows and
/// one UPDATE ... FROM (VALUES ...) for rows that already exist
///
/// Matching follows [`upsert_on`]: stream id first, then video id. A later duplicate within
/// the chunk replaces the earlier one.
async fn write_chunk(conn: &mut PgConnection, chunk: &[NewVideo]) -> Result<usize> {
    let mut unique: Vec<&NewVideo> = Vec::with_capacity(chunk.len());
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for video in chunk {
        let keys = [video.stream_id.as_deref(), video.video_id.as_deref()];
        let position = keys
            .iter()
            .flatten()
            .find_map(|key| positions.get(key).copied());
        let position = match position {
            Some(position) => {
                unique[position] = video;
                position
            }
            None => {
                unique.push(video);
                unique.len() - 1
            }
        };
        for key in keys.into_iter().flatten() {
            positions.insert(key, position);
        }
    }

    let stream_ids: Vec<String> = unique.iter().filter_map(|v| v.stream_id.clone()).collect();
    let video_ids: Vec<String> = unique.iter().filter_map(|v| v.video_id.clone()).collect();
    let rows = sqlx::query(
        "SELECT id, video_id, stream_id FROM video WHERE stream_id = ANY($1) OR video_id = ANY($2)",
    )
    .bind(&stream_ids)
    .bind(&video_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_stream: HashMap<String, i64> = HashMap::new();
    let mut by_video: HashMap<String, i64> = HashMap::new();
    for row in &rows {
        let id: i64 = row.try_get("id")?;
        if let Some(stream_id) = row.try_get::<Option<String>, _>("stream_id")? {
            by_stream.insert(stream_id, id);
        }
        if let Some(video_id) = row.try_get::<Option<String>, _>("video_id")? {
            by_video.insert(video_id, id);
        }
    }

    let mut existing: HashMap<i64, &NewVideo> = HashMap::new();
    let mut fresh: Vec<&NewVideo> = Vec::new();
    for video in unique {
        let id = video
            .stream_id
            .as_ref()
            .and_then(|key| by_stream.get(key))
            .or_else(|| video.video_id.as_ref().and_then(|key| by_video.get(key)))
            .copied();
        match id {
            Some(id) => {
                existing.insert(id, video);
            }
            None => fresh.push(video),
        }
    }
    let written = existing.len() + fresh.len();

    if !fresh.is_empty() {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO video (platform, video_id, stream_id, title, thumbnail, datetime, \
             views, durations, status, type, channel_id) ",
        );
        qb.push_values(fresh, |mut b, video| {
            b.push_bind(video.platform.as_str())
                .push_bind(&video.video_id)
                .push_bind(&video.stream_id)
                .push_bind(&video.title)
                .push_bind(&video.thumbnail)
                .push_bind(video.datetime)
                .push_bind(video.views)
                .push_bind(video.durations)
                .push_bind(video.status.as_str())
                .push_bind(video.video_type.as_str())
                .push_bind(video.channel_id);
        });
        qb.build().execute(&mut *conn).await?;
    }

    if !existing.is_empty() {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            UPDATE video AS v SET
                platform = u.platform,
                video_id = COALESCE(u.video_id, v.video_id),
                stream_id = COALESCE(u.stream_id, v.stream_id),
                title = u.title,
                thumbnail = COALESCE(u.thumbnail, v.thumbnail),
                datetime = COALESCE(u.datetime, v.datetime),
                views = u.views,
                durations = CASE WHEN u.durations > 0 THEN u.durations ELSE v.durations END,
                status = u.status,
                type = u.video_type,
                channel_id = COALESCE(u.channel_id, v.channel_id),
                updated_at = NOW()
            FROM ("#,
        );
        qb.push_values(existing, |mut b, (id, video)| {
            b.push_bind(id)
                .push_bind(video.platform.as_str())
                .push_bind(&video.video_id)
                .push_bind(&video.stream_id)
                .push_bind(&video.title)
                .push_bind(&video.thumbnail)
                .push_bind(video.datetime)
                .push_bind(video.views)
                .push_bind(video.durations)
                .push_bind(video.status.as_str())
                .push_bind(video.video_type.as_str())
                .push_bind(video.channel_id);
        });
        qb.push(
            ") AS u (id, platform, video_id, stream_id, title, thumbnail, datetime, views, \
             durations, status, video_type, channel_id) WHERE v.id = u.id",
        );
        qb.build().execute(&mut *conn).await?;
    }

    Ok(written)
}

fn push_any<T>(qb: &mut QueryBuilder<'static, Postgres>, column: &str, values: Vec<T>)
where
    Vec<T>: 'static + sqlx::Encode<'static, Postgres> + sqlx::Type<Postgres> + Send,
{
    qb.push(" AND ")
        .push(column)
        .push(" = ANY(")
        .push_bind(values)
        .push(")");
}

fn build_video_query(query: &VideoQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {}, {} FROM video v LEFT JOIN channel c ON c.id = v.channel_id WHERE TRUE",
        VIDEO_COLUMNS, JOINED_CHANNEL_COLUMNS
    ));

    if let Some(ids) = &query.row_ids {
        push_any(&mut qb, "v.id", ids.clone());
    }
    if let Some(platform) = query.platform {
        qb.push(" AND v.platform = ").push_bind(platform.as_str());
    }
    if let Some(channels) = &query.channel_ids {
        push_any(&mut qb, "v.channel_id", channels.clone());
    }
    if query.channel_required {
        qb.push(" AND v.channel_id IS NOT NULL");
    }
    if query.exclude_unavailable {
        qb.push(" AND v.status <> 'UNAVAILABLE'");
    }
    if query.null_datetime {
        qb.push(" AND v.datetime IS NULL");
    }
    if let Some(before) = query.updated_before {
        qb.push(" AND v.updated_at <= ").push_bind(before);
    }

    if let Some(cursor) = &query.cursor {
        let op = match cursor.spec.direction {
            SortDirection::Desc => " < ",
            SortDirection::Asc => " > ",
        };
        match cursor.spec.field {
            SortField::Datetime => {
                qb.push(" AND (COALESCE(v.datetime, 'epoch'::timestamptz), v.id)")
                    .push(op)
                    .push("(")
                    .push_bind(cursor.datetime_bound())
                    .push(", ")
                    .push_bind(cursor.after.id)
                    .push(")");
            }
            SortField::Views => {
                qb.push(" AND (v.views, v.id)")
                    .push(op)
                    .push("(")
                    .push_bind(cursor.after.value)
                    .push(", ")
                    .push_bind(cursor.after.id)
                    .push(")");
            }
        }
    }

    let or_stream_ids = (!query.or_stream_ids.is_empty()).then(|| query.or_stream_ids.clone());

    if query.has_primary_group() {
        qb.push(" AND ((TRUE");
        if let Some(from) = query.datetime_from {
            qb.push(" AND v.datetime >= ").push_bind(from);
        }
        if let Some(to) = query.datetime_to {
            qb.push(" AND v.datetime < ").push_bind(to);
        }
        if !query.statuses.is_empty() {
            let statuses: Vec<String> = query.statuses.iter().map(|s| s.to_string()).collect();
            push_any(&mut qb, "v.status", statuses);
        }
        if !query.types.is_empty() {
            let types: Vec<String> = query.types.iter().map(|t| t.to_string()).collect();
            push_any(&mut qb, "v.type", types);
        }
        qb.push(")");
        if let Some(stream_ids) = or_stream_ids {
            qb.push(" OR v.stream_id = ANY(").push_bind(stream_ids).push(")");
        }
        qb.push(")");
    } else if let Some(stream_ids) = or_stream_ids {
        push_any(&mut qb, "v.stream_id", stream_ids);
    }

    match query.sort {
        Some(spec) => {
            let key = match spec.field {
                SortField::Datetime => "COALESCE(v.datetime, 'epoch'::timestamptz)",
                SortField::Views => "v.views",
            };
            let direction = spec.direction.sql();
            qb.push(format!(
                " ORDER BY {} {}, v.id {}",
                key, direction, direction
            ));
        }
        None => {
            qb.push(" ORDER BY v.id");
        }
    }

    if let Some(limit) = query.limit {
        qb.push(" LIMIT ").push_bind(limit as i64);
    }

    qb
}

impl PostgresCatalogRepository {
    /// Talents owning each of the given channels
    async fn talents_by_channel(
        &self,
        channel_ids: Vec<i64>,
    ) -> Result<HashMap<i64, Vec<TalentRef>>> {
        let mut by_channel: HashMap<i64, Vec<TalentRef>> = HashMap::new();
        if channel_ids.is_empty() {
            return Ok(by_channel);
        }

        let rows = sqlx::query(
            r#"
            SELECT t.slug, t.name, t.status, t.profile_img_source, t.uploaded_img_url,
                   t.youtube_channel_id, t.twitch_channel_id,
                   yc.profile_img_url AS youtube_img, tc.profile_img_url AS twitch_img
            FROM talent t
            LEFT JOIN channel yc ON yc.id = t.youtube_channel_id
            LEFT JOIN channel tc ON tc.id = t.twitch_channel_id
            WHERE t.youtube_channel_id = ANY($1) OR t.twitch_channel_id = ANY($1)
            ORDER BY t.id
            "#,
        )
        .bind(&channel_ids)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let source: ProfileImageSource =
                row.try_get::<String, _>("profile_img_source")?.parse()?;
            let uploaded: Option<String> = row.try_get("uploaded_img_url")?;
            let youtube_img: Option<String> = row.try_get("youtube_img")?;
            let twitch_img: Option<String> = row.try_get("twitch_img")?;

            let talent = TalentRef {
                slug: row.try_get("slug")?,
                name: row.try_get("name")?,
                status: row.try_get::<String, _>("status")?.parse()?,
                image_url: source.pick(
                    uploaded.as_deref(),
                    youtube_img.as_deref(),
                    twitch_img.as_deref(),
                ),
            };

            let linked: [Option<i64>; 2] = [
                row.try_get("youtube_channel_id")?,
                row.try_get("twitch_channel_id")?,
            ];
            for channel_id in linked.into_iter().flatten() {
                by_channel.entry(channel_id).or_default().push(talent.clone());
            }
        }

        Ok(by_channel)
    }

    async fn channel_by_id(&self, id: i64) -> Result<Option<Channel>> {
        let row = sqlx::query(&format!("SELECT {} FROM channel WHERE id = $1", CHANNEL_FIELDS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(channel_from_row).transpose()
    }
}

#[async_trait]
impl CatalogRepository for PostgresCatalogRepository {
    async fn find_video_by_stream_id(&self, stream_id: &str) -> Result<Option<VideoRecord>> {
        let query = VideoQuery {
            or_stream_ids: vec![stream_id.to_string()],
            limit: Some(1),
            ..VideoQuery::default()
        };
        Ok(self.query_videos(&query).await?.into_iter().next())
    }

    async fn find_video_by_keys(
        &self,
        stream_id: Option<&str>,
        video_id: Option<&str>,
    ) -> Result<Option<Video>> {
        let mut conn = self.pool.acquire().await?;
        find_by_keys(&mut conn, stream_id, video_id).await
    }

    #[instrument(
        skip(self, video),
        fields(stream_id = ?video.stream_id, video_id = ?video.video_id)
    )]
    async fn upsert_video(&self, video: &NewVideo) -> Result<Video> {
        let mut conn = self.pool.acquire().await?;

        match upsert_on(&mut conn, video).await {
            Err(e) if e.is_unique_violation() => {
                debug!("Unique key race on upsert, retrying as update");
                let existing = find_by_keys(
                    &mut conn,
                    video.stream_id.as_deref(),
                    video.video_id.as_deref(),
                )
                .await?;

                match existing {
                    Some(existing) => refresh_row(&mut conn, existing.id, video).await,
                    None => Err(IngestionError::ConflictDuringUpsert(format!(
                        "stream {:?} / video {:?}",
                        video.stream_id, video.video_id
                    ))),
                }
            }
            other => other,
        }
    }

    async fn update_video(&self, id: i64, patch: &VideoPatch) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE video SET
                title = COALESCE($2, title),
                thumbnail = COALESCE($3, thumbnail),
                datetime = COALESCE($4, datetime),
                views = COALESCE($5, views),
                durations = COALESCE($6, durations),
                status = COALESCE($7, status),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&patch.title)
        .bind(&patch.thumbnail)
        .bind(patch.datetime)
        .bind(patch.views)
        .bind(patch.durations)
        .bind(patch.status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IngestionError::NotFound(format!("video {}", id)));
        }
        Ok(())
    }

    async fn update_status_by_ids(&self, ids: &[i64], status: VideoStatus) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE video SET status = $2, updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn update_by_video_id(&self, video_id: &str, patch: &VideoPatch) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE video SET
                title = COALESCE($2, title),
                thumbnail = COALESCE($3, thumbnail),
                datetime = COALESCE($4, datetime),
                views = COALESCE($5, views),
                durations = COALESCE($6, durations),
                status = COALESCE($7, status),
                updated_at = NOW()
            WHERE video_id = $1
            "#,
        )
        .bind(video_id)
        .bind(&patch.title)
        .bind(&patch.thumbnail)
        .bind(patch.datetime)
        .bind(patch.views)
        .bind(patch.durations)
        .bind(patch.status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_unavailable_by_video_ids(&self, video_ids: &[String]) -> Result<u64> {
        if video_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE video SET status = 'UNAVAILABLE', updated_at = NOW() WHERE video_id = ANY($1)",
        )
        .bind(video_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn query_videos(&self, query: &VideoQuery) -> Result<Vec<VideoRecord>> {
        let mut qb = build_video_query(query);
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(VideoRecord {
                video: video_from_row(row)?,
                channel: joined_channel_from_row(row)?,
                talents: Vec::new(),
            });
        }

        let mut channel_ids: Vec<i64> = records.iter().filter_map(|r| r.video.channel_id).collect();
        channel_ids.sort_unstable();
        channel_ids.dedup();

        let talents = self.talents_by_channel(channel_ids).await?;
        for record in &mut records {
            if let Some(found) = record.video.channel_id.and_then(|id| talents.get(&id)) {
                record.talents = found.clone();
            }
        }

        Ok(records)
    }

    async fn find_channel_by_external_id(
        &self,
        platform: Platform,
        channel_id: &str,
    ) -> Result<Option<Channel>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM channel WHERE platform = $1 AND channel_id = $2",
            CHANNEL_FIELDS
        ))
        .bind(platform.as_str())
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(channel_from_row).transpose()
    }

    async fn find_talent_by_slug(&self, slug: &str) -> Result<Option<TalentWithChannels>> {
        let row = sqlx::query(&format!("SELECT {} FROM talent WHERE slug = $1", TALENT_FIELDS))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let talent = talent_from_row(&row)?;

        let youtube = match talent.youtube_channel_id {
            Some(id) => self.channel_by_id(id).await?,
            None => None,
        };
        let twitch = match talent.twitch_channel_id {
            Some(id) => self.channel_by_id(id).await?,
            None => None,
        };

        Ok(Some(TalentWithChannels {
            talent,
            youtube,
            twitch,
        }))
    }

    async fn list_channels(&self, platform: Platform) -> Result<Vec<Channel>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM channel WHERE platform = $1 ORDER BY id",
            CHANNEL_FIELDS
        ))
        .bind(platform.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(channel_from_row).collect()
    }

    async fn list_tracked_channels(&self, platform: Platform) -> Result<Vec<Channel>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.platform, c.channel_id, c.name, c.username, c.followers,
                   c.profile_img_url
            FROM channel c
            WHERE c.platform = $1
              AND EXISTS (
                  SELECT 1 FROM talent t
                  WHERE (t.youtube_channel_id = c.id OR t.twitch_channel_id = c.id)
                    AND t.status <> 'DELISTED'
              )
            ORDER BY c.id
            "#,
        )
        .bind(platform.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(channel_from_row).collect()
    }

    async fn update_channel_info(&self, info: &ChannelInfo) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE channel SET
                name = COALESCE($3, name),
                username = COALESCE($4, username),
                followers = $5,
                profile_img_url = COALESCE($6, profile_img_url),
                updated_at = NOW()
            WHERE platform = $1 AND channel_id = $2
            "#,
        )
        .bind(info.platform.as_str())
        .bind(&info.channel_id)
        .bind(&info.name)
        .bind(&info.username)
        .bind(info.followers)
        .bind(&info.profile_img_url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, videos), fields(videos = videos.len()))]
    async fn resync_channel(
        &self,
        channel_id: i64,
        scope: ResyncScope,
        videos: &[NewVideo],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let invalidate = match scope {
            ResyncScope::AllVideos => {
                "UPDATE video SET status = 'UNAVAILABLE', updated_at = NOW() WHERE channel_id = $1"
            }
            ResyncScope::NonLiveVideos => {
                "UPDATE video SET status = 'UNAVAILABLE', updated_at = NOW() \
                 WHERE channel_id = $1 AND status <> 'LIVE'"
            }
        };
        let invalidated = sqlx::query(invalidate)
            .bind(channel_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let mut written = 0;
        for chunk in videos.chunks(RESYNC_CHUNK_SIZE) {
            written += write_chunk(&mut tx, chunk).await?;
        }

        tx.commit().await?;

        info!(
            "Resynced channel {}: {} rows invalidated, {} written",
            channel_id, invalidated, written
        );
        Ok(written)
    }

    async fn retire_talents(&self, as_of: NaiveDate) -> Result<Vec<String>> {
        let slugs = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE talent SET status = 'RETIRED', updated_at = NOW()
            WHERE retired_on IS NOT NULL AND retired_on < $1 AND status = 'ACTIVE'
            RETURNING slug
            "#,
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        Ok(slugs)
    }
}
