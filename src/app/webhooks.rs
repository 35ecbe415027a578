use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::app::media::MediaService;
use crate::app::tag_cache::{CacheTag, TagCache};
use crate::domain::media::{TransitionOutcome, VideoTransition};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook secret is not configured")]
    NotConfigured,
    #[error("missing webhook signature")]
    MissingSignature,
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
    #[error("ready event carries no playback id")]
    MissingPlaybackId,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A verified event reduced to what the reconciler acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    Transition {
        event_type: String,
        identifier: String,
        transition: VideoTransition,
    },
    Ignored {
        event_type: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Ignored,
    Reconciled(TransitionOutcome),
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: RawData,
}

#[derive(Deserialize, Default)]
struct RawData {
    id: Option<String>,
    upload_id: Option<String>,
    asset_id: Option<String>,
    #[serde(default)]
    playback_ids: Vec<RawPlaybackId>,
    duration: Option<f64>,
    aspect_ratio: Option<String>,
}

#[derive(Deserialize)]
struct RawPlaybackId {
    id: String,
}

/// Verifies a `t=<unix>,v1=<hex>` signature header: HMAC-SHA256 over
/// `"{t}.{body}"`, with `t` within `tolerance_seconds` of `now`.
pub fn verify_signature(
    header: &str,
    body: &[u8],
    secret: &str,
    now: i64,
    tolerance_seconds: i64,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::InvalidSignature)?;
    if signatures.is_empty() {
        return Err(WebhookError::InvalidSignature);
    }
    if tolerance_seconds > 0 && (now - timestamp).abs() > tolerance_seconds {
        return Err(WebhookError::InvalidSignature);
    }

    for signature in signatures {
        let expected = match hex::decode(signature) {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        let mac = signing_mac(secret, timestamp, body)?;
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(WebhookError::InvalidSignature)
}

/// Produces the header value the video host would send for `body`.
pub fn sign_payload(body: &[u8], secret: &str, timestamp: i64) -> String {
    let digest = match signing_mac(secret, timestamp, body) {
        Ok(mac) => hex::encode(mac.finalize().into_bytes()),
        Err(_) => String::new(),
    };
    format!("t={},v1={}", timestamp, digest)
}

fn signing_mac(secret: &str, timestamp: i64, body: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::NotConfigured)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

pub fn parse_event(body: &[u8]) -> Result<WebhookEvent, WebhookError> {
    let raw: RawEvent = serde_json::from_slice(body)
        .map_err(|err| WebhookError::MalformedPayload(err.to_string()))?;
    let data = raw.data;
    let event_type = raw.event_type;
    let kind = event_type.clone();

    let ignored = |event_type: String| -> Result<WebhookEvent, WebhookError> {
        Ok(WebhookEvent::Ignored { event_type })
    };

    match kind.as_str() {
        "video.upload.asset_created" => match (data.id, data.asset_id) {
            (Some(identifier), Some(asset_id)) => Ok(WebhookEvent::Transition {
                event_type,
                identifier,
                transition: VideoTransition::AttachAsset { asset_id },
            }),
            _ => Err(WebhookError::MalformedPayload(
                "upload event without upload or asset id".into(),
            )),
        },
        "video.upload.errored" | "video.upload.cancelled" => match data.id {
            Some(identifier) => Ok(WebhookEvent::Transition {
                event_type,
                identifier,
                transition: VideoTransition::Failed,
            }),
            None => Err(WebhookError::MalformedPayload("upload event without id".into())),
        },
        "video.asset.created" | "video.asset.ready" | "video.asset.errored" => {
            // Assets not created through a direct upload have nothing to match.
            let identifier = match data.upload_id {
                Some(identifier) => identifier,
                None => return ignored(event_type),
            };
            let asset_id = data
                .id
                .ok_or_else(|| WebhookError::MalformedPayload("asset event without id".into()))?;

            let transition = match kind.as_str() {
                "video.asset.created" => VideoTransition::AttachAsset { asset_id },
                "video.asset.ready" => {
                    let playback_id = data
                        .playback_ids
                        .into_iter()
                        .next()
                        .map(|playback| playback.id)
                        .ok_or(WebhookError::MissingPlaybackId)?;
                    VideoTransition::Ready {
                        asset_id,
                        playback_id,
                        duration: data.duration,
                        aspect_ratio: data.aspect_ratio,
                    }
                }
                _ => VideoTransition::Failed,
            };

            Ok(WebhookEvent::Transition {
                event_type,
                identifier,
                transition,
            })
        }
        _ => ignored(event_type),
    }
}

#[derive(Clone)]
pub struct WebhookService {
    media: MediaService,
    tags: TagCache,
    secret: Option<String>,
    tolerance_seconds: i64,
}

impl WebhookService {
    pub fn new(
        media: MediaService,
        tags: TagCache,
        secret: Option<String>,
        tolerance_seconds: i64,
    ) -> Self {
        Self {
            media,
            tags,
            secret,
            tolerance_seconds,
        }
    }

    /// Authenticates and applies one delivery. Nothing is written unless the
    /// signature checks out and the payload parses.
    pub async fn reconcile(
        &self,
        signature: Option<&str>,
        body: &[u8],
        now: i64,
    ) -> Result<WebhookOutcome, WebhookError> {
        let secret = self.secret.as_deref().ok_or(WebhookError::NotConfigured)?;
        let signature = signature.ok_or(WebhookError::MissingSignature)?;
        verify_signature(signature, body, secret, now, self.tolerance_seconds)?;

        let (event_type, identifier, transition) = match parse_event(body)? {
            WebhookEvent::Ignored { event_type } => {
                info!(event_type = %event_type, "ignoring webhook event");
                return Ok(WebhookOutcome::Ignored);
            }
            WebhookEvent::Transition {
                event_type,
                identifier,
                transition,
            } => (event_type, identifier, transition),
        };

        let outcome = self
            .media
            .apply_video_transition(&identifier, &transition)
            .await?;

        match &outcome {
            TransitionOutcome::Applied {
                video_id,
                space_id,
                status,
            } => {
                info!(
                    event_type = %event_type,
                    video_id = %video_id,
                    status = status.as_db(),
                    "video reconciled"
                );
                self.tags.invalidate(&CacheTag::video_write(*space_id)).await;
            }
            TransitionOutcome::AlreadySettled {
                video_id, status, ..
            } => {
                info!(
                    event_type = %event_type,
                    video_id = %video_id,
                    status = status.as_db(),
                    "duplicate webhook for settled video"
                );
            }
            TransitionOutcome::Unmatched => {
                warn!(event_type = %event_type, identifier = %identifier, "no video for upload");
            }
        }

        Ok(WebhookOutcome::Reconciled(outcome))
    }
}
