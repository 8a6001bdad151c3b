use async_trait::async_trait;
use chrono::Utc;
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::config::MediaConfig;

const UPLOAD_ENDPOINT: &str = "https://api.cloudinary.com/v1_1";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media host is not configured")]
    NotConfigured,
    #[error("http error: {0}")]
    Http(String),
    #[error("media host error: {0}")]
    Api(String),
}

/// Stores uploaded images and hands back a public URL.
#[async_trait]
pub trait MediaHost: Send + Sync {
    async fn upload_image(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, MediaError>;
}

/// Stand-in used when no media credentials are configured.
pub struct DisabledMedia;

#[async_trait]
impl MediaHost for DisabledMedia {
    async fn upload_image(&self, _file_name: &str, _bytes: Vec<u8>) -> Result<String, MediaError> {
        Err(MediaError::NotConfigured)
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

pub struct CloudinaryUploader {
    cloud_name: String,
    api_key: String,
    api_secret: String,
    folder: String,
    endpoint: String,
    client: Client,
}

impl CloudinaryUploader {
    pub fn from_config(config: &MediaConfig) -> Result<Self, MediaError> {
        let required = |value: &Option<String>| -> Result<String, MediaError> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or(MediaError::NotConfigured)
        };

        Ok(Self {
            cloud_name: required(&config.cloud_name)?,
            api_key: required(&config.api_key)?,
            api_secret: required(&config.api_secret)?,
            folder: config.folder.clone(),
            endpoint: UPLOAD_ENDPOINT.to_string(),
            client: Client::new(),
        })
    }

    #[cfg(test)]
    fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[async_trait]
impl MediaHost for CloudinaryUploader {
    async fn upload_image(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, MediaError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign_params(
            &[("folder", self.folder.as_str()), ("timestamp", timestamp.as_str())],
            &self.api_secret,
        );

        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()))
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("folder", self.folder.clone())
            .text("signature_algorithm", "sha256")
            .text("signature", signature);

        let url = format!("{}/{}/image/upload", self.endpoint, self.cloud_name);
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|err| MediaError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|err| MediaError::Http(err.to_string()))?;
            return Err(MediaError::Api(format!("{status}: {body}")));
        }

        let uploaded = response
            .json::<UploadResponse>()
            .await
            .map_err(|err| MediaError::Api(err.to_string()))?;
        info!(url = %uploaded.secure_url, "image uploaded");
        Ok(uploaded.secure_url)
    }
}

/// Signature over `key=value` pairs sorted by key, joined with `&`, with the
/// API secret appended.
pub fn sign_params(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by_key(|(key, _)| *key);
    let joined = sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    format!("{:x}", hasher.finalize())
}
