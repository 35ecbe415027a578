use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    User,
    Admin,
}

impl Role {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "guest" => Some(Self::Guest),
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialLink {
    pub id: Uuid,
    pub platform: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub role: Option<Role>,
    pub created_at: OffsetDateTime,
}

/// User data that is safe to hand to the dashboard. Never carries key material.
#[derive(Debug, Clone, Serialize)]
pub struct SafeUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub role: Role,
    pub social_links: Vec<SocialLink>,
    pub full_name: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl SafeUser {
    pub fn from_user(user: User, social_links: Vec<SocialLink>) -> Self {
        let full_name = full_name(user.first_name.as_deref(), user.last_name.as_deref());
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            location: user.location,
            bio: user.bio,
            role: user.role.unwrap_or(Role::User),
            social_links,
            full_name,
            created_at: user.created_at,
        }
    }
}

pub fn full_name(first_name: Option<&str>, last_name: Option<&str>) -> Option<String> {
    let first_name = first_name.filter(|name| !name.is_empty());
    let last_name = last_name.filter(|name| !name.is_empty());
    match (first_name, last_name) {
        (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
        (Some(first), None) => Some(first.to_string()),
        (None, Some(last)) => Some(last.to_string()),
        (None, None) => None,
    }
}
