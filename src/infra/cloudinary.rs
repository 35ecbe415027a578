use anyhow::Result;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;

use crate::config::CloudinaryConfig;
use crate::infra::hosts::{HostError, HostedImage, ImageHost, MediaFile, UploadSignature};

const SERVICE: &str = "cloudinary";

#[derive(Clone)]
struct Credentials {
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

/// Image CDN client. Uploads are signed with the account secret, which never
/// leaves the server.
#[derive(Clone)]
pub struct CloudinaryClient {
    http: Client,
    api_base: String,
    credentials: Option<Credentials>,
    upload_preset: Option<String>,
}

#[derive(Deserialize)]
struct UploadResponse {
    public_id: Option<String>,
    secure_url: Option<String>,
    format: Option<String>,
    bytes: Option<i64>,
    width: Option<i32>,
    height: Option<i32>,
    error: Option<UploadError>,
}

#[derive(Deserialize)]
struct UploadError {
    message: String,
}

impl CloudinaryClient {
    pub fn new(config: &CloudinaryConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        let credentials = match (&config.cloud_name, &config.api_key, &config.api_secret) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Some(Credentials {
                cloud_name: cloud_name.clone(),
                api_key: api_key.clone(),
                api_secret: api_secret.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            credentials,
            upload_preset: config.upload_preset.clone(),
        })
    }

    fn credentials(&self) -> Result<&Credentials, HostError> {
        self.credentials
            .as_ref()
            .ok_or(HostError::NotConfigured(SERVICE))
    }

    fn signed_params(&self, credentials: &Credentials, timestamp: i64) -> Vec<(&'static str, String)> {
        let mut params = vec![("timestamp", timestamp.to_string())];
        if let Some(preset) = &self.upload_preset {
            params.push(("upload_preset", preset.clone()));
        }
        let signature = sign_request(&params, &credentials.api_secret);
        params.push(("signature", signature));
        params.push(("api_key", credentials.api_key.clone()));
        params
    }
}

#[async_trait]
impl ImageHost for CloudinaryClient {
    fn sign_upload(&self, timestamp: i64) -> Result<UploadSignature, HostError> {
        let credentials = self.credentials()?;
        let mut params = vec![("timestamp", timestamp.to_string())];
        if let Some(preset) = &self.upload_preset {
            params.push(("upload_preset", preset.clone()));
        }

        Ok(UploadSignature {
            signature: sign_request(&params, &credentials.api_secret),
            timestamp,
            api_key: credentials.api_key.clone(),
            cloud_name: credentials.cloud_name.clone(),
            upload_preset: self.upload_preset.clone(),
        })
    }

    async fn upload(&self, file: &MediaFile) -> Result<HostedImage, HostError> {
        let credentials = self.credentials()?;
        let timestamp = OffsetDateTime::now_utc().unix_timestamp();

        let part = Part::bytes(file.data.to_vec())
            .file_name(file.filename.clone())
            .mime_str(&file.content_type)?;
        let mut form = Form::new().part("file", part);
        for (name, value) in self.signed_params(credentials, timestamp) {
            form = form.text(name, value);
        }

        let url = format!("{}/v1_1/{}/image/upload", self.api_base, credentials.cloud_name);
        let response = self.http.post(url).multipart(form).send().await?;
        let status = response.status();
        let body: UploadResponse = response.json().await?;

        if !status.is_success() {
            let message = body
                .error
                .map(|err| err.message)
                .unwrap_or_else(|| format!("upload failed with status {}", status));
            return Err(HostError::Upstream {
                service: SERVICE,
                message,
            });
        }

        let (public_id, secure_url) = match (body.public_id, body.secure_url) {
            (Some(public_id), Some(secure_url)) => (public_id, secure_url),
            _ => {
                return Err(HostError::Upstream {
                    service: SERVICE,
                    message: "upload response is missing the asset url".into(),
                })
            }
        };

        debug!(public_id = %public_id, filename = %file.filename, "image uploaded");
        Ok(HostedImage {
            public_id,
            secure_url,
            format: body.format,
            bytes: body.bytes,
            width: body.width,
            height: body.height,
        })
    }
}

/// Signs upload parameters: sorted `key=value` pairs joined with `&`, the
/// secret appended, SHA-1 hex encoded. Empty values are not signed.
pub fn sign_request(params: &[(&str, String)], api_secret: &str) -> String {
    let mut signed: Vec<_> = params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .collect();
    signed.sort_by(|a, b| a.0.cmp(b.0));

    let to_sign = signed
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(with_secret: bool) -> CloudinaryConfig {
        CloudinaryConfig {
            api_base: "https://api.cloudinary.com/".into(),
            cloud_name: Some("demo".into()),
            api_key: Some("1234".into()),
            api_secret: with_secret.then(|| "abcd".into()),
            upload_preset: Some("portfolio".into()),
            request_timeout_seconds: 5,
        }
    }

    #[test]
    fn signature_is_order_independent() {
        let a = sign_request(
            &[("timestamp", "1315060510".into()), ("public_id", "sample".into())],
            "abcd",
        );
        let b = sign_request(
            &[("public_id", "sample".into()), ("timestamp", "1315060510".into())],
            "abcd",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn signature_matches_reference_digest() {
        let mut hasher = Sha1::new();
        hasher.update(b"public_id=sample&timestamp=1315060510abcd");
        let expected = hex::encode(hasher.finalize());

        let signature = sign_request(
            &[("timestamp", "1315060510".into()), ("public_id", "sample".into())],
            "abcd",
        );
        assert_eq!(signature, expected);
        assert_eq!(signature.len(), 40);
    }

    #[test]
    fn empty_params_are_not_signed() {
        let with_empty = sign_request(
            &[("timestamp", "1".into()), ("upload_preset", String::new())],
            "abcd",
        );
        let without = sign_request(&[("timestamp", "1".into())], "abcd");
        assert_eq!(with_empty, without);
    }

    #[test]
    fn sign_upload_covers_the_preset() {
        let client = CloudinaryClient::new(&config(true)).unwrap();
        let signed = client.sign_upload(1700000000).unwrap();
        let expected = sign_request(
            &[
                ("timestamp", "1700000000".into()),
                ("upload_preset", "portfolio".into()),
            ],
            "abcd",
        );
        assert_eq!(signed.signature, expected);
        assert_eq!(signed.cloud_name, "demo");
        assert_eq!(signed.timestamp, 1700000000);
    }

    #[test]
    fn unconfigured_client_refuses_to_sign() {
        let client = CloudinaryClient::new(&config(false)).unwrap();
        assert!(matches!(
            client.sign_upload(1),
            Err(HostError::NotConfigured("cloudinary"))
        ));
    }
}
