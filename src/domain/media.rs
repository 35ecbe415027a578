use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: Uuid,
    pub space_id: Uuid,
    pub filename: String,
    pub alt: Option<String>,
    pub public_id: String,
    pub url: String,
    pub resolution: Option<Resolution>,
    pub format: Option<String>,
    pub bytes: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Processing,
    Ready,
    Failed,
}

impl VideoStatus {
    pub const ALL: [VideoStatus; 3] = [Self::Processing, Self::Ready, Self::Failed];

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: Uuid,
    pub space_id: Uuid,
    pub filename: String,
    pub alt: Option<String>,
    /// Upload handle issued by the video host before the asset exists.
    pub identifier: String,
    pub asset_id: Option<String>,
    pub playback_id: Option<String>,
    pub status: VideoStatus,
    pub duration: Option<f64>,
    pub aspect_ratio: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A status change reported by the video host for one upload.
///
/// Every transition only applies to a row that is still `processing`; a row
/// that already reached `ready` or `failed` is left untouched, which makes
/// redelivered and out-of-order events harmless.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoTransition {
    AttachAsset {
        asset_id: String,
    },
    Ready {
        asset_id: String,
        playback_id: String,
        duration: Option<f64>,
        aspect_ratio: Option<String>,
    },
    Failed,
}

impl VideoTransition {
    pub fn applies_to(&self, current: VideoStatus) -> bool {
        !current.is_terminal()
    }

    /// Database names of the statuses this transition may start from. The
    /// stored update guards on exactly this set.
    pub fn source_statuses(&self) -> Vec<&'static str> {
        VideoStatus::ALL
            .into_iter()
            .filter(|status| self.applies_to(*status))
            .map(|status| status.as_db())
            .collect()
    }

    /// Applies the transition to an in-memory row. Returns false when the row
    /// was already settled and nothing changed.
    pub fn apply(&self, video: &mut Video) -> bool {
        if !self.applies_to(video.status) {
            return false;
        }

        match self {
            Self::AttachAsset { asset_id } => {
                video.asset_id = Some(asset_id.clone());
            }
            Self::Ready {
                asset_id,
                playback_id,
                duration,
                aspect_ratio,
            } => {
                video.asset_id = Some(asset_id.clone());
                video.playback_id = Some(playback_id.clone());
                video.duration = *duration;
                video.aspect_ratio = aspect_ratio.clone();
                video.status = VideoStatus::Ready;
            }
            Self::Failed => {
                video.status = VideoStatus::Failed;
            }
        }

        true
    }
}

/// Result of applying a [`VideoTransition`] to the stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied {
        video_id: Uuid,
        space_id: Uuid,
        status: VideoStatus,
    },
    AlreadySettled {
        video_id: Uuid,
        space_id: Uuid,
        status: VideoStatus,
    },
    Unmatched,
}

/// Row-change notification emitted by the `videos` table trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoChange {
    pub id: Uuid,
    pub space_id: Uuid,
    pub filename: String,
    pub old_status: Option<VideoStatus>,
    pub new_status: VideoStatus,
    pub playback_id: Option<String>,
}

impl VideoChange {
    pub fn became_ready(&self) -> bool {
        self.new_status == VideoStatus::Ready && self.old_status != Some(VideoStatus::Ready)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceMedia {
    pub images: Vec<Image>,
    pub videos: Vec<Video>,
}
