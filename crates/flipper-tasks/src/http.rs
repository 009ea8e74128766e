//! Upstream page fetcher backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use flipper_core::{FetchError, FetchResult, PageFetcher};
use reqwest::Client;
use tracing::debug;

/// Fetches pages over HTTP(S).
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    /// Build a fetcher with the given timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration, user_agent: &str) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|err| FetchError::Transport {
                url: String::new(),
                detail: err.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::Transport {
                url: url.to_owned(),
                detail: err.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(|err| FetchError::Body {
            url: url.to_owned(),
            detail: err.to_string(),
        })?;
        debug!(url, bytes = body.len(), "fetched upstream page");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_hosts_are_transport_errors() {
        let fetcher = HttpPageFetcher::new(Duration::from_millis(500), "flipper-test").unwrap();
        let err = fetcher.fetch("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
        assert_eq!(err.url(), "http://127.0.0.1:9/");
    }
}
