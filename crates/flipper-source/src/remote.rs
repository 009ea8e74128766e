//! `FicSource` backed by a remote recommendation service.

use std::time::Duration;

use async_trait::async_trait;
use flipper_core::{FicSource, Filter, ScoredStory, SourceError, SourceResult, UserData};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::wire::{COUNT_PATH, CountResponse, ErrorBody, FETCH_PATH, RetrievalRequest};

/// Client for the routes served by [`crate::service::router`].
#[derive(Clone)]
pub struct RemoteFicSource {
    client: Client,
    fetch_url: Url,
    count_url: Url,
}

impl RemoteFicSource {
    /// Client for the service rooted at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::SourceUnavailable`] when the endpoint is not a
    /// valid base URL or the HTTP client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> SourceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SourceError::unavailable("remote_client", err.to_string()))?;
        Self::with_client(client, endpoint)
    }

    /// Client reusing an existing HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::SourceUnavailable`] when the endpoint is not a
    /// valid base URL.
    pub fn with_client(client: Client, endpoint: &str) -> SourceResult<Self> {
        let base = Url::parse(endpoint)
            .map_err(|err| SourceError::unavailable("remote_client", err.to_string()))?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|err| SourceError::unavailable("remote_client", err.to_string()))
        };
        Ok(Self {
            fetch_url: join(FETCH_PATH)?,
            count_url: join(COUNT_PATH)?,
            client,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        url: &Url,
        operation: &'static str,
        filter: &Filter,
        user_data: &UserData,
    ) -> SourceResult<T> {
        let request = RetrievalRequest {
            filter: filter.clone(),
            user_data: user_data.clone(),
        };
        let response = self
            .client
            .post(url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                warn!(operation, error = %err, "remote retrieval request failed");
                SourceError::unavailable(operation, err.to_string())
            })?;
        decode(response, operation).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response, operation: &'static str) -> SourceResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|err| SourceError::unavailable(operation, err.to_string()));
    }
    debug!(operation, status = status.as_u16(), "remote retrieval rejected");
    match response.json::<ErrorBody>().await {
        Ok(body) => Err(body.into_error(operation)),
        Err(_) => Err(SourceError::unavailable(
            operation,
            format!("remote service answered {status}"),
        )),
    }
}

#[async_trait]
impl FicSource for RemoteFicSource {
    async fn fetch_data(
        &self,
        filter: &Filter,
        user_data: &UserData,
    ) -> SourceResult<Vec<ScoredStory>> {
        filter.validate(user_data)?;
        self.call(&self.fetch_url, "fetch_data", filter, user_data)
            .await
    }

    async fn get_count(&self, filter: &Filter, user_data: &UserData) -> SourceResult<usize> {
        filter.validate(user_data)?;
        let response: CountResponse = self
            .call(&self.count_url, "get_count", filter, user_data)
            .await?;
        Ok(response.count)
    }
}
