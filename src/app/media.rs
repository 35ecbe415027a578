use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::media::{
    Image, Resolution, SpaceMedia, TransitionOutcome, Video, VideoStatus, VideoTransition,
};
use crate::infra::db::Db;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 50;

pub(crate) const IMAGE_COLUMNS: &str =
    "id, space_id, filename, alt, public_id, url, resolution, format, bytes, created_at";
pub(crate) const VIDEO_COLUMNS: &str = "id, space_id, filename, alt, identifier, asset_id, playback_id, \
     status::text AS status, duration, aspect_ratio, created_at";

/// One page of a newest-first listing. `next_cursor` is the id of the last
/// item returned when more rows follow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewImage {
    pub filename: String,
    pub alt: Option<String>,
    pub public_id: String,
    pub url: String,
    pub resolution: Option<Resolution>,
    pub format: Option<String>,
    pub bytes: Option<i64>,
}

#[derive(Clone, Copy)]
enum MediaTable {
    Images,
    Videos,
}

impl MediaTable {
    fn name(self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::Videos => "videos",
        }
    }

    fn columns(self) -> &'static str {
        match self {
            Self::Images => IMAGE_COLUMNS,
            Self::Videos => VIDEO_COLUMNS,
        }
    }
}

#[derive(Clone)]
pub struct MediaService {
    db: Db,
}

impl MediaService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn list_images(
        &self,
        space_id: Uuid,
        cursor: Option<Uuid>,
        limit: i64,
    ) -> Result<Page<Image>> {
        let rows = self
            .fetch_page(MediaTable::Images, space_id, cursor, limit)
            .await?;
        let images = rows.iter().map(image_from_row).collect();
        Ok(paginate(images, limit, |image: &Image| image.id))
    }

    pub async fn list_videos(
        &self,
        space_id: Uuid,
        cursor: Option<Uuid>,
        limit: i64,
    ) -> Result<Page<Video>> {
        let rows = self
            .fetch_page(MediaTable::Videos, space_id, cursor, limit)
            .await?;
        let videos = rows
            .iter()
            .map(video_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(paginate(videos, limit, |video: &Video| video.id))
    }

    /// Every image and video of a space, newest first.
    pub async fn space_media(&self, space_id: Uuid) -> Result<SpaceMedia> {
        let image_rows = sqlx::query(&format!(
            "SELECT {} FROM images WHERE space_id = $1 ORDER BY created_at DESC, id DESC",
            IMAGE_COLUMNS
        ))
        .bind(space_id)
        .fetch_all(self.db.pool())
        .await?;

        let video_rows = sqlx::query(&format!(
            "SELECT {} FROM videos WHERE space_id = $1 ORDER BY created_at DESC, id DESC",
            VIDEO_COLUMNS
        ))
        .bind(space_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(SpaceMedia {
            images: image_rows.iter().map(image_from_row).collect(),
            videos: video_rows
                .iter()
                .map(video_from_row)
                .collect::<Result<Vec<_>>>()?,
        })
    }

    pub async fn create_image(&self, space_id: Uuid, image: NewImage) -> Result<Image> {
        let row = sqlx::query(&format!(
            "INSERT INTO images (space_id, filename, alt, public_id, url, resolution, format, bytes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {}",
            IMAGE_COLUMNS
        ))
        .bind(space_id)
        .bind(image.filename)
        .bind(image.alt)
        .bind(image.public_id)
        .bind(image.url)
        .bind(image.resolution.map(Json))
        .bind(image.format)
        .bind(image.bytes)
        .fetch_one(self.db.pool())
        .await?;

        Ok(image_from_row(&row))
    }

    /// Records a video before its bytes reach the host. The row stays
    /// `processing` until the webhook or a refresh settles it.
    pub async fn create_pending_video(
        &self,
        space_id: Uuid,
        filename: String,
        alt: Option<String>,
        identifier: String,
    ) -> Result<Video> {
        let row = sqlx::query(&format!(
            "INSERT INTO videos (space_id, filename, alt, identifier, status) \
             VALUES ($1, $2, $3, $4, 'processing') \
             RETURNING {}",
            VIDEO_COLUMNS
        ))
        .bind(space_id)
        .bind(filename)
        .bind(alt)
        .bind(identifier)
        .fetch_one(self.db.pool())
        .await?;

        video_from_row(&row)
    }

    pub async fn get_video(&self, space_id: Uuid, video_id: Uuid) -> Result<Option<Video>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM videos WHERE id = $1 AND space_id = $2",
            VIDEO_COLUMNS
        ))
        .bind(video_id)
        .bind(space_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(video_from_row).transpose()
    }

    /// Applies a host-reported transition to the row with this upload
    /// identifier. The update is a single conditional statement guarded by
    /// [`VideoTransition::source_statuses`], so a settled row is never touched.
    pub async fn apply_video_transition(
        &self,
        identifier: &str,
        transition: &VideoTransition,
    ) -> Result<TransitionOutcome> {
        let sources = transition.source_statuses();
        let query = match transition {
            VideoTransition::AttachAsset { asset_id } => sqlx::query(
                "UPDATE videos SET asset_id = $3, updated_at = now() \
                 WHERE identifier = $1 AND status::text = ANY($2) \
                 RETURNING id, space_id, status::text AS status",
            )
            .bind(identifier)
            .bind(&sources)
            .bind(asset_id),
            VideoTransition::Ready {
                asset_id,
                playback_id,
                duration,
                aspect_ratio,
            } => sqlx::query(
                "UPDATE videos \
                 SET status = 'ready', asset_id = $3, playback_id = $4, \
                     duration = $5, aspect_ratio = $6, updated_at = now() \
                 WHERE identifier = $1 AND status::text = ANY($2) \
                 RETURNING id, space_id, status::text AS status",
            )
            .bind(identifier)
            .bind(&sources)
            .bind(asset_id)
            .bind(playback_id)
            .bind(*duration)
            .bind(aspect_ratio),
            VideoTransition::Failed => sqlx::query(
                "UPDATE videos SET status = 'failed', updated_at = now() \
                 WHERE identifier = $1 AND status::text = ANY($2) \
                 RETURNING id, space_id, status::text AS status",
            )
            .bind(identifier)
            .bind(&sources),
        };

        if let Some(row) = query.fetch_optional(self.db.pool()).await? {
            return Ok(TransitionOutcome::Applied {
                video_id: row.get("id"),
                space_id: row.get("space_id"),
                status: status_from_row(&row)?,
            });
        }

        let existing = sqlx::query(
            "SELECT id, space_id, status::text AS status FROM videos WHERE identifier = $1",
        )
        .bind(identifier)
        .fetch_optional(self.db.pool())
        .await?;

        match existing {
            Some(row) => Ok(TransitionOutcome::AlreadySettled {
                video_id: row.get("id"),
                space_id: row.get("space_id"),
                status: status_from_row(&row)?,
            }),
            None => Ok(TransitionOutcome::Unmatched),
        }
    }

    async fn fetch_page(
        &self,
        table: MediaTable,
        space_id: Uuid,
        cursor: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<PgRow>> {
        let position = match cursor {
            Some(cursor) => self.cursor_position(table, space_id, cursor).await?,
            None => None,
        };

        let rows = match position {
            Some((created_at, id)) => {
                sqlx::query(&format!(
                    "SELECT {} FROM {} \
                     WHERE space_id = $1 \
                       AND (created_at < $2 OR (created_at = $2 AND id < $3)) \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $4",
                    table.columns(),
                    table.name()
                ))
                .bind(space_id)
                .bind(created_at)
                .bind(id)
                .bind(limit + 1)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM {} \
                     WHERE space_id = $1 \
                     ORDER BY created_at DESC, id DESC \
                     LIMIT $2",
                    table.columns(),
                    table.name()
                ))
                .bind(space_id)
                .bind(limit + 1)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(rows)
    }

    /// Unknown cursors (or cursors from another space) restart from the first page.
    async fn cursor_position(
        &self,
        table: MediaTable,
        space_id: Uuid,
        cursor: Uuid,
    ) -> Result<Option<(OffsetDateTime, Uuid)>> {
        let row = sqlx::query(&format!(
            "SELECT created_at, id FROM {} WHERE id = $1 AND space_id = $2",
            table.name()
        ))
        .bind(cursor)
        .bind(space_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| (row.get("created_at"), row.get("id"))))
    }
}

/// Trims the look-ahead row and derives the next cursor from the last kept item.
pub fn paginate<T>(mut items: Vec<T>, limit: i64, id_of: impl Fn(&T) -> Uuid) -> Page<T> {
    let limit = limit.max(0) as usize;
    if items.len() > limit {
        items.truncate(limit);
        let next_cursor = items.last().map(&id_of);
        Page { items, next_cursor }
    } else {
        Page {
            items,
            next_cursor: None,
        }
    }
}

pub(crate) fn image_from_row(row: &PgRow) -> Image {
    let resolution: Option<Json<Resolution>> = row.get("resolution");
    Image {
        id: row.get("id"),
        space_id: row.get("space_id"),
        filename: row.get("filename"),
        alt: row.get("alt"),
        public_id: row.get("public_id"),
        url: row.get("url"),
        resolution: resolution.map(|json| json.0),
        format: row.get("format"),
        bytes: row.get("bytes"),
        created_at: row.get("created_at"),
    }
}

pub(crate) fn video_from_row(row: &PgRow) -> Result<Video> {
    Ok(Video {
        id: row.get("id"),
        space_id: row.get("space_id"),
        filename: row.get("filename"),
        alt: row.get("alt"),
        identifier: row.get("identifier"),
        asset_id: row.get("asset_id"),
        playback_id: row.get("playback_id"),
        status: status_from_row(row)?,
        duration: row.get("duration"),
        aspect_ratio: row.get("aspect_ratio"),
        created_at: row.get("created_at"),
    })
}

fn status_from_row(row: &PgRow) -> Result<VideoStatus> {
    let status: String = row.get("status");
    VideoStatus::from_db(&status).ok_or_else(|| anyhow!("unknown video status: {}", status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_page_points_at_last_kept_item() {
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let page = paginate(ids.clone(), 3, |id| *id);
        assert_eq!(page.items, ids[..3].to_vec());
        assert_eq!(page.next_cursor, Some(ids[2]));
    }

    #[test]
    fn short_page_has_no_cursor() {
        let ids: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let page = paginate(ids.clone(), 3, |id| *id);
        assert_eq!(page.items, ids);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn exact_page_has_no_cursor() {
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let page = paginate(ids, 3, |id| *id);
        assert_eq!(page.items.len(), 3);
        assert!(page.next_cursor.is_none());
    }
}
