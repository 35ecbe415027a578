use anyhow::Result;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::app::media::MediaService;
use crate::app::tag_cache::{CacheTag, TagCache};
use crate::domain::media::{TransitionOutcome, Video, VideoTransition};
use crate::infra::hosts::{
    DirectUpload, HostError, ImageHost, RemoteVideoState, UploadSignature, VideoHost,
};

/// Issues upload credentials and pulls video state from the host on demand.
#[derive(Clone)]
pub struct UploadService {
    media: MediaService,
    tags: TagCache,
    image_host: Arc<dyn ImageHost>,
    video_host: Arc<dyn VideoHost>,
}

impl UploadService {
    pub fn new(
        media: MediaService,
        tags: TagCache,
        image_host: Arc<dyn ImageHost>,
        video_host: Arc<dyn VideoHost>,
    ) -> Self {
        Self {
            media,
            tags,
            image_host,
            video_host,
        }
    }

    pub async fn issue_video_upload(&self) -> Result<DirectUpload, HostError> {
        self.video_host.create_upload().await
    }

    pub fn sign_image_upload(&self) -> Result<UploadSignature, HostError> {
        self.image_host
            .sign_upload(OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Asks the host where an upload stands and applies the same transition
    /// rules as the webhook. Settled rows are returned without a host call.
    pub async fn refresh_video(&self, space_id: Uuid, video_id: Uuid) -> Result<Option<Video>> {
        let video = match self.media.get_video(space_id, video_id).await? {
            Some(video) => video,
            None => return Ok(None),
        };
        if video.status.is_terminal() {
            return Ok(Some(video));
        }

        let state = self.video_host.upload_state(&video.identifier).await?;
        let transition = match transition_from_remote(&state) {
            Some(transition) => transition,
            None => return Ok(Some(video)),
        };

        let outcome = self
            .media
            .apply_video_transition(&video.identifier, &transition)
            .await?;
        if let TransitionOutcome::Applied { status, .. } = outcome {
            info!(video_id = %video_id, status = status.as_db(), "video refreshed from host");
            self.tags.invalidate(&CacheTag::video_write(space_id)).await;
        }

        self.media.get_video(space_id, video_id).await
    }
}

/// Maps the host's view of an upload onto a local transition, if any applies yet.
pub fn transition_from_remote(state: &RemoteVideoState) -> Option<VideoTransition> {
    if matches!(
        state.upload_status.as_str(),
        "errored" | "cancelled" | "timed_out"
    ) {
        return Some(VideoTransition::Failed);
    }

    let asset_id = state.asset_id.clone()?;
    match state.asset_status.as_deref() {
        Some("errored") => Some(VideoTransition::Failed),
        Some("ready") => match &state.playback_id {
            Some(playback_id) => Some(VideoTransition::Ready {
                asset_id,
                playback_id: playback_id.clone(),
                duration: state.duration,
                aspect_ratio: state.aspect_ratio.clone(),
            }),
            None => Some(VideoTransition::AttachAsset { asset_id }),
        },
        _ => Some(VideoTransition::AttachAsset { asset_id }),
    }
}
