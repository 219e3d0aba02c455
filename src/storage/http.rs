//! HTTP blob store: multipart upload to an external file API.
//!
//! The store accepts `multipart/form-data` with a single `file` field and an
//! `X-API-Key` header, and answers with
//!
//! ```json
//! { "result": { "links": { "download": "…", "stream": "…" } } }
//! ```
//!
//! The `stream` link is what readers load. Anything else — a non-2xx status,
//! a body without `result.links.stream`, or a request that outlives the
//! configured timeout — is a [`StorageError`].

use super::BlobStore;
use crate::config::StorageConfig;
use crate::error::StorageError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct UploadResponse {
    result: Option<UploadResult>,
}

#[derive(Debug, Deserialize)]
struct UploadResult {
    links: UploadLinks,
}

#[derive(Debug, Deserialize)]
struct UploadLinks {
    stream: Option<String>,
}

/// Blob store reached over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    config: StorageConfig,
}

impl HttpBlobStore {
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("pagecast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn map_send_error(&self, target: &str, e: reqwest::Error) -> StorageError {
        if e.is_timeout() {
            StorageError::Timeout {
                target: target.to_string(),
                secs: self.config.timeout_secs,
            }
        } else {
            StorageError::Network {
                target: target.to_string(),
                detail: e.to_string(),
            }
        }
    }
}

/// Extract the stream URL from an upload response body.
pub(crate) fn parse_upload_response(target: &str, body: &[u8]) -> Result<String, StorageError> {
    let parsed: UploadResponse =
        serde_json::from_slice(body).map_err(|e| StorageError::MalformedResponse {
            target: target.to_string(),
            detail: format!("invalid JSON: {e}"),
        })?;

    let stream = parsed
        .result
        .and_then(|r| r.links.stream)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| StorageError::MalformedResponse {
            target: target.to_string(),
            detail: "missing result.links.stream".to_string(),
        })?;

    Ok(stream)
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn upload(
        &self,
        filename: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, StorageError> {
        let part = Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str(mime_type)
            .map_err(|e| StorageError::Config(format!("mime type '{mime_type}': {e}")))?;
        let form = Form::new().part("file", part);

        let mut request = self.client.post(&self.config.endpoint).multipart(form);
        if let Some(ref key) = self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_send_error(filename, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Rejected {
                target: filename.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(filename, e))?;

        let url = parse_upload_response(filename, &body)?;
        debug!("Uploaded {} ({} bytes) → {}", filename, bytes.len(), url);
        Ok(url)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        info!("Fetching {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(url, e))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(StorageError::NotFound {
                    url: url.to_string(),
                })
            }
            s => {
                return Err(StorageError::Rejected {
                    target: url.to_string(),
                    status: s.as_u16(),
                })
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(url, e))?;
        Ok(bytes.to_vec())
    }
}
