//! `reqwest` implementation of [`ApiClient`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::traits::{ApiClient, ApiResponse, Query};
use crate::error::{Error, Result};

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Google-style error envelope.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Authenticated JSON client for one API origin and version.
#[derive(Clone)]
pub struct HttpClient {
    /// HTTP client.
    client: Client,
    /// API origin, e.g. `https://cloudfunctions.googleapis.com`.
    origin: String,
    /// API version path segment, e.g. `v2`.
    api_version: String,
    /// `OAuth2` access token.
    access_token: String,
}

impl HttpClient {
    /// Create a client for `origin`/`api_version`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(
        origin: impl Into<String>,
        api_version: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            origin: origin.into(),
            api_version: api_version.into(),
            access_token: access_token.into(),
        })
    }

    /// Absolute URL for `path` with `query` appended.
    fn url(&self, path: &str, query: Query<'_>) -> Result<Url> {
        let base = format!(
            "{}/{}/{}",
            self.origin.trim_end_matches('/'),
            self.api_version,
            path.trim_start_matches('/')
        );
        let url = if query.is_empty() {
            Url::parse(&base)
        } else {
            Url::parse_with_params(&base, query.iter().map(|(k, v)| (*k, v.as_str())))
        };
        url.map_err(|e| Error::Config(format!("invalid API URL {base}: {e}")))
    }

    /// Turn a response into an [`ApiResponse`] or a typed error.
    async fn handle_response(response: reqwest::Response) -> Result<ApiResponse> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            let body = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text).map_err(|e| {
                    warn!(error = %e, body = %text, "Failed to parse response");
                    Error::Serialization(e)
                })?
            };
            return Ok(ApiResponse {
                status: status.as_u16(),
                body,
            });
        }

        let (message, provider_status) = match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => (envelope.error.message, envelope.error.status),
            Err(_) => (text, None),
        };

        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(message));
        }
        Err(Error::Api {
            status: status.as_u16(),
            provider_status,
            message,
        })
    }
}

#[async_trait]
impl ApiClient for HttpClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: Query<'_>,
    ) -> Result<ApiResponse> {
        let url = self.url(path, query)?;
        debug!(url = %url, method = %method, "API request");

        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.access_token));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        Self::handle_response(response).await
    }
}
