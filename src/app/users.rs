use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::user::{Role, SafeUser, SocialLink, User};
use crate::infra::db::Db;

#[derive(Clone)]
pub struct UserService {
    db: Db,
}

/// Profile fields a user may change. Absent optional fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: String,
    pub last_name: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
}

impl UserService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn get_safe_user(&self, user_id: Uuid) -> Result<Option<SafeUser>> {
        let row = sqlx::query(
            "SELECT id, email, first_name, last_name, location, bio, role::text AS role, created_at \
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        let user = match row {
            Some(row) => user_from_row(&row),
            None => return Ok(None),
        };

        let links = self.social_links(user.id).await?;
        Ok(Some(SafeUser::from_user(user, links)))
    }

    pub async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Option<SafeUser>> {
        let row = sqlx::query(
            "UPDATE users \
             SET first_name = $2, \
                 last_name = COALESCE($3, last_name), \
                 location = COALESCE($4, location), \
                 bio = COALESCE($5, bio), \
                 updated_at = now() \
             WHERE id = $1 \
             RETURNING id, email, first_name, last_name, location, bio, role::text AS role, created_at",
        )
        .bind(user_id)
        .bind(update.first_name)
        .bind(update.last_name)
        .bind(update.location)
        .bind(update.bio)
        .fetch_optional(self.db.pool())
        .await?;

        let user = match row {
            Some(row) => user_from_row(&row),
            None => return Ok(None),
        };

        let links = self.social_links(user.id).await?;
        Ok(Some(SafeUser::from_user(user, links)))
    }

    async fn social_links(&self, user_id: Uuid) -> Result<Vec<SocialLink>> {
        let rows = sqlx::query(
            "SELECT id, platform, url FROM social_links \
             WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SocialLink {
                id: row.get("id"),
                platform: row.get("platform"),
                url: row.get("url"),
            })
            .collect())
    }
}

fn user_from_row(row: &PgRow) -> User {
    let role: String = row.get("role");
    User {
        id: row.get("id"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        location: row.get("location"),
        bio: row.get("bio"),
        role: Role::from_db(&role),
        created_at: row.get("created_at"),
    }
}
