use anyhow::{anyhow, Result};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use crate::app::media::{image_from_row, video_from_row, IMAGE_COLUMNS, VIDEO_COLUMNS};
use crate::domain::media::{Image, Video};
use crate::domain::project::{
    Content, ContentStatus, ContentType, ContentWithCover, Project, ProjectDraft,
};
use crate::infra::db::Db;

const PROJECT_COLUMNS: &str = "p.id AS project_id, p.year, p.featured, p.details, \
     c.id, c.space_id, c.title, c.description, c.tags, c.status::text AS status, \
     c.content_type::text AS content_type, c.cover_image_id, c.cover_video_id, \
     c.created_at, c.updated_at";

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("referenced {kind} does not belong to this space")]
    ForeignMedia { kind: &'static str },
}

#[derive(Clone)]
pub struct ProjectService {
    db: Db,
}

impl ProjectService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Projects of a space with their cover media, newest first.
    pub async fn list(&self, space_id: Uuid) -> Result<Vec<Project>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM projects p \
             JOIN content c ON c.id = p.content_id \
             WHERE c.space_id = $1 \
             ORDER BY c.created_at DESC, c.id DESC",
            PROJECT_COLUMNS
        ))
        .bind(space_id)
        .fetch_all(self.db.pool())
        .await?;

        let mut projects = rows
            .iter()
            .map(project_from_row)
            .collect::<Result<Vec<_>>>()?;
        self.attach_covers(&mut projects).await?;
        Ok(projects)
    }

    /// One project with its cover and its ordered image and video sets.
    pub async fn get(&self, space_id: Uuid, project_id: Uuid) -> Result<Option<Project>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM projects p \
             JOIN content c ON c.id = p.content_id \
             WHERE p.id = $1 AND c.space_id = $2",
            PROJECT_COLUMNS
        ))
        .bind(project_id)
        .bind(space_id)
        .fetch_optional(self.db.pool())
        .await?;

        let mut project = match row {
            Some(row) => project_from_row(&row)?,
            None => return Ok(None),
        };

        self.attach_covers(std::slice::from_mut(&mut project)).await?;

        let content_id = project.content.content.id;
        let image_rows = sqlx::query(&format!(
            "SELECT {} FROM images_to_content itc \
             JOIN images ON images.id = itc.image_id \
             WHERE itc.content_id = $1 \
             ORDER BY itc.position ASC",
            IMAGE_COLUMNS
        ))
        .bind(content_id)
        .fetch_all(self.db.pool())
        .await?;

        let video_rows = sqlx::query(&format!(
            "SELECT {} FROM videos_to_content vtc \
             JOIN videos ON videos.id = vtc.video_id \
             WHERE vtc.content_id = $1 \
             ORDER BY vtc.position ASC",
            VIDEO_COLUMNS
        ))
        .bind(content_id)
        .fetch_all(self.db.pool())
        .await?;

        project.images = Some(image_rows.iter().map(image_from_row).collect());
        project.videos = Some(
            video_rows
                .iter()
                .map(video_from_row)
                .collect::<Result<Vec<_>>>()?,
        );
        Ok(Some(project))
    }

    /// Writes content, project and both media sets in one transaction.
    pub async fn create(&self, space_id: Uuid, draft: ProjectDraft) -> Result<Project> {
        let mut tx = self.db.pool().begin().await?;
        ensure_media_in_space(&mut tx, space_id, &draft).await?;

        let content_id: Uuid = sqlx::query(
            "INSERT INTO content \
                 (space_id, title, description, tags, status, content_type, cover_image_id, cover_video_id) \
             VALUES ($1, $2, $3, $4, $5::content_status, $6::content_type, $7, $8) \
             RETURNING id",
        )
        .bind(space_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.tags)
        .bind(draft.status.as_db())
        .bind(ContentType::Project.as_db())
        .bind(draft.cover.image_id())
        .bind(draft.cover.video_id())
        .fetch_one(&mut *tx)
        .await?
        .get("id");

        let project_id: Uuid = sqlx::query(
            "INSERT INTO projects (content_id, year, details) \
             VALUES ($1, $2, $3) \
             RETURNING id",
        )
        .bind(content_id)
        .bind(draft.year)
        .bind(&draft.details)
        .fetch_one(&mut *tx)
        .await?
        .get("id");

        replace_media_sets(&mut tx, content_id, &draft).await?;
        tx.commit().await?;

        self.get(space_id, project_id)
            .await?
            .ok_or_else(|| anyhow!("project {} vanished after insert", project_id))
    }

    /// Replaces every field and association of the project. Returns `None`
    /// when no such project exists in the space.
    pub async fn update(
        &self,
        space_id: Uuid,
        project_id: Uuid,
        draft: ProjectDraft,
    ) -> Result<Option<Project>> {
        let mut tx = self.db.pool().begin().await?;
        ensure_media_in_space(&mut tx, space_id, &draft).await?;

        let row = sqlx::query(
            "UPDATE content c \
             SET title = $3, description = $4, tags = $5, status = $6::content_status, \
                 cover_image_id = $7, cover_video_id = $8, updated_at = now() \
             FROM projects p \
             WHERE p.content_id = c.id AND p.id = $1 AND c.space_id = $2 \
             RETURNING c.id",
        )
        .bind(project_id)
        .bind(space_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.tags)
        .bind(draft.status.as_db())
        .bind(draft.cover.image_id())
        .bind(draft.cover.video_id())
        .fetch_optional(&mut *tx)
        .await?;

        let content_id: Uuid = match row {
            Some(row) => row.get("id"),
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        sqlx::query(
            "UPDATE projects SET year = $2, details = $3, updated_at = now() WHERE id = $1",
        )
        .bind(project_id)
        .bind(draft.year)
        .bind(&draft.details)
        .execute(&mut *tx)
        .await?;

        replace_media_sets(&mut tx, content_id, &draft).await?;
        tx.commit().await?;

        self.get(space_id, project_id).await
    }

    pub async fn delete(&self, space_id: Uuid, project_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM content c USING projects p \
             WHERE p.content_id = c.id AND p.id = $1 AND c.space_id = $2",
        )
        .bind(project_id)
        .bind(space_id)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn attach_covers(&self, projects: &mut [Project]) -> Result<()> {
        let image_ids: Vec<Uuid> = projects
            .iter()
            .filter_map(|p| p.content.content.cover_image_id)
            .collect();
        let video_ids: Vec<Uuid> = projects
            .iter()
            .filter_map(|p| p.content.content.cover_video_id)
            .collect();

        let mut images: HashMap<Uuid, Image> = HashMap::new();
        if !image_ids.is_empty() {
            let rows = sqlx::query(&format!(
                "SELECT {} FROM images WHERE id = ANY($1)",
                IMAGE_COLUMNS
            ))
            .bind(&image_ids)
            .fetch_all(self.db.pool())
            .await?;
            images = rows
                .iter()
                .map(image_from_row)
                .map(|image| (image.id, image))
                .collect();
        }

        let mut videos: HashMap<Uuid, Video> = HashMap::new();
        if !video_ids.is_empty() {
            let rows = sqlx::query(&format!(
                "SELECT {} FROM videos WHERE id = ANY($1)",
                VIDEO_COLUMNS
            ))
            .bind(&video_ids)
            .fetch_all(self.db.pool())
            .await?;
            for row in &rows {
                let video = video_from_row(row)?;
                videos.insert(video.id, video);
            }
        }

        for project in projects.iter_mut() {
            let cover_image_id = project.content.content.cover_image_id;
            let cover_video_id = project.content.content.cover_video_id;
            project.content.cover_image = cover_image_id.and_then(|id| images.get(&id).cloned());
            project.content.cover_video = cover_video_id.and_then(|id| videos.get(&id).cloned());
        }
        Ok(())
    }
}

async fn ensure_media_in_space(
    tx: &mut Transaction<'_, Postgres>,
    space_id: Uuid,
    draft: &ProjectDraft,
) -> Result<()> {
    let image_ids = draft.referenced_images();
    if !image_ids.is_empty() {
        let found: i64 = sqlx::query(
            "SELECT COUNT(*) AS found FROM images WHERE id = ANY($1) AND space_id = $2",
        )
        .bind(&image_ids)
        .bind(space_id)
        .fetch_one(&mut **tx)
        .await?
        .get("found");
        if found != image_ids.len() as i64 {
            return Err(ProjectError::ForeignMedia { kind: "image" }.into());
        }
    }

    let video_ids = draft.referenced_videos();
    if !video_ids.is_empty() {
        let found: i64 = sqlx::query(
            "SELECT COUNT(*) AS found FROM videos WHERE id = ANY($1) AND space_id = $2",
        )
        .bind(&video_ids)
        .bind(space_id)
        .fetch_one(&mut **tx)
        .await?
        .get("found");
        if found != video_ids.len() as i64 {
            return Err(ProjectError::ForeignMedia { kind: "video" }.into());
        }
    }

    Ok(())
}

/// Delete-all-then-reinsert of both join tables, keeping the submitted order.
async fn replace_media_sets(
    tx: &mut Transaction<'_, Postgres>,
    content_id: Uuid,
    draft: &ProjectDraft,
) -> Result<()> {
    sqlx::query("DELETE FROM images_to_content WHERE content_id = $1")
        .bind(content_id)
        .execute(&mut **tx)
        .await?;
    if !draft.images.is_empty() {
        sqlx::query(
            "INSERT INTO images_to_content (image_id, content_id, position) \
             SELECT t.id, $1, t.ord::int FROM unnest($2::uuid[]) WITH ORDINALITY AS t(id, ord)",
        )
        .bind(content_id)
        .bind(&draft.images)
        .execute(&mut **tx)
        .await?;
    }

    sqlx::query("DELETE FROM videos_to_content WHERE content_id = $1")
        .bind(content_id)
        .execute(&mut **tx)
        .await?;
    if !draft.videos.is_empty() {
        sqlx::query(
            "INSERT INTO videos_to_content (video_id, content_id, position) \
             SELECT t.id, $1, t.ord::int FROM unnest($2::uuid[]) WITH ORDINALITY AS t(id, ord)",
        )
        .bind(content_id)
        .bind(&draft.videos)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

fn project_from_row(row: &PgRow) -> Result<Project> {
    let status: String = row.get("status");
    let content_type: String = row.get("content_type");
    let details: Value = row.get("details");

    let content = Content {
        id: row.get("id"),
        space_id: row.get("space_id"),
        title: row.get("title"),
        description: row.get("description"),
        tags: row.get("tags"),
        status: ContentStatus::from_db(&status)
            .ok_or_else(|| anyhow!("unknown content status: {}", status))?,
        content_type: ContentType::from_db(&content_type)
            .ok_or_else(|| anyhow!("unknown content type: {}", content_type))?,
        cover_image_id: row.get("cover_image_id"),
        cover_video_id: row.get("cover_video_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    };

    Ok(Project {
        id: row.get("project_id"),
        year: row.get("year"),
        featured: row.get("featured"),
        details,
        content: ContentWithCover {
            content,
            cover_image: None,
            cover_video: None,
        },
        images: None,
        videos: None,
    })
}
