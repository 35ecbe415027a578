use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::media::{Image, Video};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl ContentStatus {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Project,
    Blogpost,
    Event,
}

impl ContentType {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "project" => Some(Self::Project),
            "blogpost" => Some(Self::Blogpost),
            "event" => Some(Self::Event),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Blogpost => "blogpost",
            Self::Event => "event",
        }
    }
}

/// Cover media of a content row. At most one of image or video is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Cover {
    Image { image_id: Uuid },
    Video { video_id: Uuid },
    None,
}

impl Cover {
    pub fn image_id(&self) -> Option<Uuid> {
        match self {
            Self::Image { image_id } => Some(*image_id),
            _ => None,
        }
    }

    pub fn video_id(&self) -> Option<Uuid> {
        match self {
            Self::Video { video_id } => Some(*video_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub id: Uuid,
    pub space_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub status: ContentStatus,
    pub content_type: ContentType,
    pub cover_image_id: Option<Uuid>,
    pub cover_video_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentWithCover {
    #[serde(flatten)]
    pub content: Content,
    pub cover_image: Option<Image>,
    pub cover_video: Option<Video>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub year: Option<i32>,
    pub featured: bool,
    pub details: Value,
    pub content: ContentWithCover,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<Image>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videos: Option<Vec<Video>>,
}

/// Project form as submitted by the dashboard.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectForm {
    pub title: String,
    pub description: Option<String>,
    pub year: Option<i32>,
    pub tags: Option<Vec<String>>,
    pub details: Option<Value>,
    pub status: Option<ContentStatus>,
    pub cover: Cover,
    pub images: Option<Vec<Uuid>>,
    pub videos: Option<Vec<Uuid>>,
}

/// A validated project form, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectDraft {
    pub title: String,
    pub description: Option<String>,
    pub year: Option<i32>,
    pub tags: Vec<String>,
    pub details: Value,
    pub status: ContentStatus,
    pub cover: Cover,
    pub images: Vec<Uuid>,
    pub videos: Vec<Uuid>,
}

impl ProjectDraft {
    /// Every image id the draft references, cover included.
    pub fn referenced_images(&self) -> Vec<Uuid> {
        let mut ids = self.images.clone();
        if let Some(id) = self.cover.image_id() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn referenced_videos(&self) -> Vec<Uuid> {
        let mut ids = self.videos.clone();
        if let Some(id) = self.cover.video_id() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

impl ProjectForm {
    pub fn validate(self) -> Result<ProjectDraft, String> {
        const MAX_TITLE_LEN: usize = 256;

        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err("title is required".into());
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err("title must be at most 256 characters".into());
        }

        let details = match self.details {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(Value::Object(map)) => Value::Object(map),
            Some(_) => return Err("details must be an object".into()),
        };

        let tags = self
            .tags
            .unwrap_or_default()
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect();

        Ok(ProjectDraft {
            title,
            description: self.description.filter(|d| !d.trim().is_empty()),
            year: self.year,
            tags,
            details,
            status: self.status.unwrap_or_default(),
            cover: self.cover,
            images: dedup(self.images.unwrap_or_default()),
            videos: dedup(self.videos.unwrap_or_default()),
        })
    }
}

fn dedup(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}
