//! Seams to the two external media processors.
//!
//! The image CDN answers synchronously with the final asset, the video host
//! hands out a one-time upload URL and reports the asset later through its
//! webhook.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("{0} credentials are not configured")]
    NotConfigured(&'static str),
    #[error("{service} rejected the request: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// A file received from the dashboard, held in memory until it is handed to a host.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Signed parameters a browser needs to upload straight to the image CDN.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSignature {
    pub signature: String,
    pub timestamp: i64,
    pub api_key: String,
    pub cloud_name: String,
    pub upload_preset: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HostedImage {
    pub public_id: String,
    pub secure_url: String,
    pub format: Option<String>,
    pub bytes: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectUpload {
    pub upload_url: String,
    pub upload_id: String,
}

/// What the video host currently knows about an upload and its asset.
#[derive(Debug, Clone, Default)]
pub struct RemoteVideoState {
    pub upload_status: String,
    pub asset_id: Option<String>,
    pub asset_status: Option<String>,
    pub playback_id: Option<String>,
    pub duration: Option<f64>,
    pub aspect_ratio: Option<String>,
}

#[async_trait]
pub trait ImageHost: Send + Sync {
    fn sign_upload(&self, timestamp: i64) -> Result<UploadSignature, HostError>;

    async fn upload(&self, file: &MediaFile) -> Result<HostedImage, HostError>;
}

#[async_trait]
pub trait VideoHost: Send + Sync {
    async fn create_upload(&self) -> Result<DirectUpload, HostError>;

    async fn put_bytes(&self, upload_url: &str, file: &MediaFile) -> Result<(), HostError>;

    async fn upload_state(&self, upload_id: &str) -> Result<RemoteVideoState, HostError>;
}
