//! Upstream fetcher: one GET, one JSON decode.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use crate::collector::CollectorError;

/// Build the HTTP client shared by every collector.
///
/// # Errors
/// Returns `CollectorError::Config` if the client cannot be built.
pub fn build_client(request_timeout: Duration) -> Result<Client, CollectorError> {
    Client::builder()
        .timeout(request_timeout)
        .build()
        .map_err(|e| CollectorError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Upstream base URL plus the client and timeout used to reach it.
///
/// Immutable after construction. Cloning shares the client's connection pool.
#[derive(Debug, Clone)]
pub struct Target {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl Target {
    pub fn new(client: Client, base: Url, timeout: Duration) -> Self {
        Self {
            client,
            base,
            timeout,
        }
    }

    /// Parse `base` and build a dedicated client with `request_timeout`.
    ///
    /// # Errors
    /// Returns `CollectorError::Config` for an unparsable URL or client failure.
    pub fn from_url(base: &str, request_timeout: Duration) -> Result<Self, CollectorError> {
        let base = Url::parse(base)
            .map_err(|e| CollectorError::Config(format!("invalid upstream url '{}': {}", base, e)))?;
        Ok(Self::new(build_client(request_timeout)?, base, request_timeout))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// URL for `path`, replacing whatever path the base URL carries.
    pub fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url
    }

    /// GET `path` and decode the JSON body into `T`.
    ///
    /// The whole exchange (send and body read) is bounded by the target's
    /// timeout. The body is dropped on every exit path.
    ///
    /// # Errors
    /// - `Network` / `Timeout` when the request cannot complete
    /// - `Status` for any status other than 200
    /// - `Decode` for invalid or mismatched JSON
    pub async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, CollectorError> {
        let url = self.endpoint(path);
        tracing::debug!(url = %url, "Fetching upstream stats");

        match timeout(self.timeout, self.get_json(url)).await {
            Ok(result) => result,
            Err(_) => Err(CollectorError::Timeout(self.timeout)),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, CollectorError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(CollectorError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn transport_error(&self, err: reqwest::Error) -> CollectorError {
        if err.is_timeout() {
            CollectorError::Timeout(self.timeout)
        } else {
            CollectorError::Network(err)
        }
    }
}
