//! Artifact store speaking plain HTTP to an object-storage gateway.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

use super::ArtifactStore;
use crate::errors::RemoteError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Object store reached through `HEAD`/`GET`/`DELETE` on `{base_url}/{key}`.
#[derive(Debug, Clone)]
pub struct HttpArtifactStore {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpArtifactStore {
    /// Creates a store for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Creates a store with a custom request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::fatal("store.client", e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            bearer_token: None,
        })
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Returns the URL of the object stored under `key`.
    #[must_use]
    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, key: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.object_url(key));
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

fn transport_error(operation: &str, error: &reqwest::Error) -> RemoteError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        RemoteError::transient(operation, error.to_string())
    } else if let Some(status) = error.status() {
        RemoteError::from_status(operation, status.as_u16(), error.to_string())
    } else {
        RemoteError::fatal(operation, error.to_string())
    }
}

fn status_error(operation: &str, key: &str, status: StatusCode) -> RemoteError {
    RemoteError::from_status(operation, status.as_u16(), format!("{key}: HTTP {status}"))
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        let response = self
            .request(reqwest::Method::HEAD, key)
            .send()
            .await
            .map_err(|e| transport_error("store.exists", &e))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(status_error("store.exists", key, status)),
        }
    }

    async fn read_json(&self, key: &str) -> Result<Option<Value>, RemoteError> {
        let response = self
            .request(reqwest::Method::GET, key)
            .send()
            .await
            .map_err(|e| transport_error("store.read_json", &e))?;
        match response.status() {
            status if status.is_success() => {
                let value = response
                    .json::<Value>()
                    .await
                    .map_err(|e| RemoteError::fatal("store.read_json", format!("{key}: {e}")))?;
                Ok(Some(value))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(status_error("store.read_json", key, status)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        let response = self
            .request(reqwest::Method::DELETE, key)
            .send()
            .await
            .map_err(|e| transport_error("store.delete", &e))?;
        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            status => Err(status_error("store.delete", key, status)),
        }
    }
}
