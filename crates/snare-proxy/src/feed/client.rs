//! Outbound analytics client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;

use crate::error::IngestError;

/// Default timeout for one analytics call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Fetches a per-target analytics document.
#[async_trait]
pub trait AnalyticsClient: Send + Sync {
    /// GETs `url`, sending `bearer` as an `Authorization: Bearer` token when
    /// present, and parses the body as JSON.
    async fn fetch(&self, url: &str, bearer: Option<&str>) -> Result<Value, IngestError>;
}

/// [`AnalyticsClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpAnalyticsClient {
    client: reqwest::Client,
}

impl HttpAnalyticsClient {
    /// Builds a client whose calls time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("Snare/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AnalyticsClient for HttpAnalyticsClient {
    async fn fetch(&self, url: &str, bearer: Option<&str>) -> Result<Value, IngestError> {
        let mut request = self.client.get(url).header(ACCEPT, "application/json");
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
