use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::media::{MediaService, NewImage};
use crate::domain::media::{Image, Resolution, TransitionOutcome, Video, VideoTransition};
use crate::infra::hosts::{HostedImage, ImageHost, MediaFile, VideoHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Unsupported,
}

impl MediaKind {
    pub fn classify(content_type: &str) -> Self {
        let content_type = content_type.trim().to_ascii_lowercase();
        if content_type.starts_with("image/") {
            Self::Image
        } else if content_type.starts_with("video/") {
            Self::Video
        } else {
            Self::Unsupported
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub details: Vec<IngestFailure>,
    pub images: Vec<Image>,
    pub videos: Vec<Video>,
    /// True once any video row was inserted, including provisional rows that
    /// were marked failed afterwards.
    #[serde(skip)]
    pub video_rows_written: bool,
}

/// Outcome of one video file. `recorded` holds even when the transfer failed
/// after the provisional row was inserted.
struct VideoAttempt {
    recorded: bool,
    result: Result<Video>,
}

/// Where ingested media rows are recorded.
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    async fn record_image(&self, space_id: Uuid, image: NewImage) -> Result<Image>;

    async fn record_pending_video(
        &self,
        space_id: Uuid,
        filename: String,
        identifier: String,
    ) -> Result<Video>;

    async fn mark_video_failed(&self, identifier: &str) -> Result<()>;
}

#[async_trait]
impl MediaCatalog for MediaService {
    async fn record_image(&self, space_id: Uuid, image: NewImage) -> Result<Image> {
        self.create_image(space_id, image).await
    }

    async fn record_pending_video(
        &self,
        space_id: Uuid,
        filename: String,
        identifier: String,
    ) -> Result<Video> {
        self.create_pending_video(space_id, filename, None, identifier)
            .await
    }

    async fn mark_video_failed(&self, identifier: &str) -> Result<()> {
        let outcome = self
            .apply_video_transition(identifier, &VideoTransition::Failed)
            .await?;
        if !matches!(outcome, TransitionOutcome::Applied { .. }) {
            warn!(identifier, ?outcome, "failed upload was already settled");
        }
        Ok(())
    }
}

/// Server-side batch upload. Every file is uploaded and recorded on its own;
/// one file failing never prevents the others from landing.
#[derive(Clone)]
pub struct IngestService {
    catalog: Arc<dyn MediaCatalog>,
    image_host: Arc<dyn ImageHost>,
    video_host: Arc<dyn VideoHost>,
    concurrency: usize,
}

impl IngestService {
    pub fn new(
        catalog: Arc<dyn MediaCatalog>,
        image_host: Arc<dyn ImageHost>,
        video_host: Arc<dyn VideoHost>,
        concurrency: usize,
    ) -> Self {
        Self {
            catalog,
            image_host,
            video_host,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn ingest(&self, space_id: Uuid, files: Vec<MediaFile>) -> IngestReport {
        let mut details = Vec::new();
        let mut image_files = Vec::new();
        let mut video_files = Vec::new();

        for file in files {
            match MediaKind::classify(&file.content_type) {
                MediaKind::Image => image_files.push(file),
                MediaKind::Video => video_files.push(file),
                MediaKind::Unsupported => details.push(IngestFailure {
                    message: format!("unsupported file type: {}", file.content_type),
                    kind: MediaKind::Unsupported,
                    filename: file.filename,
                }),
            }
        }

        let image_results: Vec<_> = stream::iter(image_files)
            .map(|file| async move {
                let result = self.ingest_image(space_id, &file).await;
                (file.filename, result)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut images = Vec::new();
        for (filename, result) in image_results {
            match result {
                Ok(image) => images.push(image),
                Err(err) => {
                    warn!(error = ?err, space_id = %space_id, filename = %filename, "image ingest failed");
                    details.push(IngestFailure {
                        message: err.to_string(),
                        kind: MediaKind::Image,
                        filename,
                    });
                }
            }
        }

        let video_results: Vec<_> = stream::iter(video_files)
            .map(|file| async move {
                let attempt = self.ingest_video(space_id, &file).await;
                (file.filename, attempt)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut videos = Vec::new();
        let mut video_rows_written = false;
        for (filename, attempt) in video_results {
            video_rows_written |= attempt.recorded;
            match attempt.result {
                Ok(video) => videos.push(video),
                Err(err) => {
                    warn!(error = ?err, space_id = %space_id, filename = %filename, "video ingest failed");
                    details.push(IngestFailure {
                        message: err.to_string(),
                        kind: MediaKind::Video,
                        filename,
                    });
                }
            }
        }

        info!(
            space_id = %space_id,
            images = images.len(),
            videos = videos.len(),
            failed = details.len(),
            "media batch ingested"
        );

        let success = details.is_empty();
        IngestReport {
            success,
            error: (!success).then(|| "Some uploads failed".to_string()),
            details,
            images,
            videos,
            video_rows_written,
        }
    }

    async fn ingest_image(&self, space_id: Uuid, file: &MediaFile) -> Result<Image> {
        let hosted = self.image_host.upload(file).await?;
        self.catalog
            .record_image(space_id, new_image(file, hosted))
            .await
    }

    /// Two-phase write: the provisional row exists before any bytes move so
    /// the webhook always has something to match.
    async fn ingest_video(&self, space_id: Uuid, file: &MediaFile) -> VideoAttempt {
        let not_recorded = |err: anyhow::Error| VideoAttempt {
            recorded: false,
            result: Err(err),
        };

        let upload = match self.video_host.create_upload().await {
            Ok(upload) => upload,
            Err(err) => return not_recorded(err.into()),
        };
        let video = match self
            .catalog
            .record_pending_video(space_id, file.filename.clone(), upload.upload_id.clone())
            .await
        {
            Ok(video) => video,
            Err(err) => return not_recorded(err),
        };

        let result = match self.video_host.put_bytes(&upload.upload_url, file).await {
            Ok(()) => Ok(video),
            Err(err) => {
                if let Err(mark_err) = self.catalog.mark_video_failed(&upload.upload_id).await {
                    warn!(error = ?mark_err, video_id = %video.id, "failed to mark video as failed");
                }
                Err(err.into())
            }
        };

        VideoAttempt {
            recorded: true,
            result,
        }
    }
}

fn new_image(file: &MediaFile, hosted: HostedImage) -> NewImage {
    let resolution = match (hosted.width, hosted.height) {
        (Some(width), Some(height)) => Some(Resolution { width, height }),
        _ => None,
    };

    NewImage {
        filename: file.filename.clone(),
        alt: None,
        public_id: hosted.public_id,
        url: hosted.secure_url,
        resolution,
        format: hosted.format,
        bytes: hosted.bytes.or(Some(file.data.len() as i64)),
    }
}
