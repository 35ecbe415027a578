use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::space::Space;
use crate::infra::db::Db;

pub const DEFAULT_SPACE_NAME: &str = "My Space";
pub const DEFAULT_SPACE_DESCRIPTION: &str = "My personal space for managing content";

#[derive(Clone)]
pub struct SpaceService {
    db: Db,
}

impl SpaceService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Space>> {
        let rows = sqlx::query(
            "SELECT id, user_id, name, description, created_at \
             FROM spaces WHERE user_id = $1 \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(space_from_row).collect())
    }

    /// Returns the space only when it belongs to `user_id`.
    pub async fn get_owned(&self, space_id: Uuid, user_id: Uuid) -> Result<Option<Space>> {
        let row = sqlx::query(
            "SELECT id, user_id, name, description, created_at \
             FROM spaces WHERE id = $1 AND user_id = $2",
        )
        .bind(space_id)
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(space_from_row))
    }

    /// The user's earliest space, created on first access.
    pub async fn get_or_create_default(&self, user_id: Uuid) -> Result<Space> {
        let mut tx = self.db.pool().begin().await?;

        // Serializes concurrent first visits of the same user.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query(
            "SELECT id, user_id, name, description, created_at \
             FROM spaces WHERE user_id = $1 \
             ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let space = match existing {
            Some(row) => space_from_row(&row),
            None => {
                let row = sqlx::query(
                    "INSERT INTO spaces (user_id, name, description) \
                     VALUES ($1, $2, $3) \
                     RETURNING id, user_id, name, description, created_at",
                )
                .bind(user_id)
                .bind(DEFAULT_SPACE_NAME)
                .bind(DEFAULT_SPACE_DESCRIPTION)
                .fetch_one(&mut *tx)
                .await?;
                tracing::info!(user_id = %user_id, "created default space");
                space_from_row(&row)
            }
        };

        tx.commit().await?;
        Ok(space)
    }
}

fn space_from_row(row: &PgRow) -> Space {
    Space {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    }
}
