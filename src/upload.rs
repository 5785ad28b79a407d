use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use tracing::{info, instrument};

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::types::UploadResult;

/// Destination for the encoded CSV document.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Any status the remote answers with is a successful upload from our side;
    /// only transport failures are errors.
    async fn upload(&self, csv: String) -> Result<UploadResult>;
}

/// Posts the CSV as one request body to a fixed endpoint.
pub struct HttpUploader {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpUploader {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }

    pub fn from_config(config: &Config, http: reqwest::Client) -> Self {
        Self::new(http, config.endpoint.clone(), config.token.clone())
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("bearer {}", self.token))
            .map_err(|e| RelayError::Transport(format!("invalid auth header: {e}")))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/csv"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/plain"));
        Ok(headers)
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    #[instrument(name = "csv_upload", skip(self, csv), fields(endpoint = %self.endpoint))]
    async fn upload(&self, csv: String) -> Result<UploadResult> {
        let bytes = csv.into_bytes();
        let size = bytes.len();
        let resp = self
            .http
            .post(&self.endpoint)
            .headers(self.headers()?)
            .body(bytes)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        let status_code = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| RelayError::Transport(format!("read body failed: {e}")))?;
        info!(status = status_code, bytes = size, "csv uploaded");
        Ok(UploadResult { status_code, body })
    }
}
