//! HTTP implementation of the remote sync boundary.

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::time::Duration;

use crate::models::{SyncItem, SyncItemKind};

use super::{classify_http_status, SyncAttemptError, SyncEndpoint, SyncRetryClass};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

fn log_response(status: reqwest::StatusCode, body: &str) {
    if status.is_success() {
        debug!("sync API response status: {}", status);
        return;
    }

    let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        preview.push_str("...");
    }
    debug!("sync API response error ({}): {}", status, preview);
}

/// Uploads missions and measurement batches over REST. Records are addressed
/// by their id (PUT), so a re-submitted item overwrites rather than
/// duplicates on the backend.
#[derive(Debug, Clone)]
pub struct HttpSyncEndpoint {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSyncEndpoint {
    pub fn new(base_url: &str, api_token: Option<&str>) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = api_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, item: &SyncItem) -> String {
        match item.kind {
            SyncItemKind::Mission => format!("{}/missions/{}", self.base_url, item.id),
            SyncItemKind::MeasurementBatch => {
                format!("{}/measurement-batches/{}", self.base_url, item.id)
            }
        }
    }
}

#[async_trait]
impl SyncEndpoint for HttpSyncEndpoint {
    async fn upload(&self, item: &SyncItem) -> Result<(), SyncAttemptError> {
        let url = self.url_for(item);
        let response = self
            .client
            .put(&url)
            .json(&item.payload)
            .send()
            .await
            .map_err(|err| {
                if is_retryable_transport_error(&err) {
                    SyncAttemptError::Retryable(format!("transport error: {err}"))
                } else {
                    SyncAttemptError::Permanent(format!("request error: {err}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            log_response(status, "");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        log_response(status, &body);

        match classify_http_status(status.as_u16()) {
            SyncRetryClass::Retryable => Err(SyncAttemptError::Retryable(format!(
                "backend returned {status}"
            ))),
            SyncRetryClass::Permanent => Err(SyncAttemptError::Permanent(format!(
                "backend rejected with {status}"
            ))),
        }
    }
}
