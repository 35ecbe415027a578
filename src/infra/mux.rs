use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::MuxConfig;
use crate::infra::hosts::{DirectUpload, HostError, MediaFile, RemoteVideoState, VideoHost};

const SERVICE: &str = "mux";

#[derive(Clone)]
struct Token {
    id: String,
    secret: String,
}

/// Video host client speaking the direct-upload and asset APIs.
#[derive(Clone)]
pub struct MuxClient {
    http: Client,
    api_base: String,
    token: Option<Token>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct UploadData {
    id: String,
    url: Option<String>,
    status: Option<String>,
    asset_id: Option<String>,
}

#[derive(Deserialize)]
struct AssetData {
    status: Option<String>,
    #[serde(default)]
    playback_ids: Vec<PlaybackId>,
    duration: Option<f64>,
    aspect_ratio: Option<String>,
}

#[derive(Deserialize)]
struct PlaybackId {
    id: String,
}

impl MuxClient {
    pub fn new(config: &MuxConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        let token = match (&config.token_id, &config.token_secret) {
            (Some(id), Some(secret)) => Some(Token {
                id: id.clone(),
                secret: secret.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, HostError> {
        let token = self.token.as_ref().ok_or(HostError::NotConfigured(SERVICE))?;
        Ok(builder.basic_auth(&token.id, Some(&token.secret)))
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<T, HostError> {
        let url = format!("{}{}", self.api_base, path);
        let response = self.authorized(self.http.get(url))?.send().await?;
        let envelope: Envelope<T> = read_json(response).await?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl VideoHost for MuxClient {
    async fn create_upload(&self) -> Result<DirectUpload, HostError> {
        let url = format!("{}/video/v1/uploads", self.api_base);
        let body = json!({
            "new_asset_settings": {
                "playback_policy": ["public"],
                "video_quality": "basic",
            },
            "cors_origin": "*",
        });

        let response = self
            .authorized(self.http.post(url))?
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<UploadData> = read_json(response).await?;

        let upload_url = envelope.data.url.ok_or_else(|| HostError::Upstream {
            service: SERVICE,
            message: "upload response is missing the upload url".into(),
        })?;

        debug!(upload_id = %envelope.data.id, "direct upload created");
        Ok(DirectUpload {
            upload_url,
            upload_id: envelope.data.id,
        })
    }

    async fn put_bytes(&self, upload_url: &str, file: &MediaFile) -> Result<(), HostError> {
        let response = self
            .http
            .put(upload_url)
            .header(CONTENT_TYPE, file.content_type.as_str())
            .body(file.data.clone())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HostError::Upstream {
                service: SERVICE,
                message: format!("video upload failed with status {}", response.status()),
            });
        }
        Ok(())
    }

    async fn upload_state(&self, upload_id: &str) -> Result<RemoteVideoState, HostError> {
        let upload: UploadData = self
            .get_data(&format!("/video/v1/uploads/{}", upload_id))
            .await?;

        let mut state = RemoteVideoState {
            upload_status: upload.status.unwrap_or_default(),
            asset_id: upload.asset_id.clone(),
            ..Default::default()
        };

        if let Some(asset_id) = upload.asset_id {
            let asset: AssetData = self
                .get_data(&format!("/video/v1/assets/{}", asset_id))
                .await?;
            state.asset_status = asset.status;
            state.playback_id = asset.playback_ids.into_iter().next().map(|p| p.id);
            state.duration = asset.duration;
            state.aspect_ratio = asset.aspect_ratio;
        }

        Ok(state)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, HostError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(HostError::Upstream {
            service: SERVICE,
            message: format!("{}: {}", status, upstream_message(&body)),
        });
    }
    Ok(response.json().await?)
}

/// Pulls the human readable message out of an error body, falling back to the raw text.
fn upstream_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        #[serde(default)]
        messages: Vec<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.error.messages.is_empty() => parsed.error.messages.join("; "),
        Ok(parsed) => parsed.error.kind.unwrap_or_default(),
        Err(_) => body.trim().to_string(),
    }
}
