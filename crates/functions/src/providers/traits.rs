//! Seams between the reconcilers and the outside world.
//!
//! Every reconciler takes these as constructor arguments, so tests substitute
//! scripted fakes and production code passes the HTTP implementations.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

// ============================================================================
// RPC client
// ============================================================================

/// A successful API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body (`Null` when the body was empty).
    pub body: Value,
}

impl ApiResponse {
    /// Response with status 200.
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// Deserialize the body.
    ///
    /// # Errors
    /// Returns an error if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.body)?)
    }
}

/// Query parameters of a request.
pub type Query<'a> = &'a [(&'a str, String)];

/// JSON RPC client bound to one API origin and version.
///
/// Non-2xx responses are returned as errors carrying the HTTP status and the
/// provider's structured `{error:{status}}` string.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Issue a request against `path`, relative to the API root.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: Query<'_>,
    ) -> Result<ApiResponse>;

    /// GET `path`.
    async fn get(&self, path: &str, query: Query<'_>) -> Result<ApiResponse> {
        self.request(Method::GET, path, None, query).await
    }

    /// POST `body` to `path`.
    async fn post(&self, path: &str, body: Value, query: Query<'_>) -> Result<ApiResponse> {
        self.request(Method::POST, path, Some(body), query).await
    }

    /// PATCH `path` with `body`.
    async fn patch(&self, path: &str, body: Value, query: Query<'_>) -> Result<ApiResponse> {
        self.request(Method::PATCH, path, Some(body), query).await
    }

    /// DELETE `path`.
    async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.request(Method::DELETE, path, None, &[]).await
    }
}

// ============================================================================
// Long-running operations
// ============================================================================

/// How to wait for a long-running operation.
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Operation name, relative to the API root of the poller's client.
    pub operation_resource_name: String,
    /// Initial delay between polls.
    pub backoff: Duration,
    /// Maximum delay between polls.
    pub max_backoff: Duration,
    /// Give up after this long.
    pub master_timeout: Duration,
}

impl PollOptions {
    /// Options for `name` with the default cadence.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            operation_resource_name: name.into(),
            backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            master_timeout: Duration::from_secs(25 * 60),
        }
    }
}

/// Waits for long-running operations to reach a terminal state.
#[async_trait]
pub trait OperationPoller: Send + Sync {
    /// Poll until the operation is done and return its `response`.
    async fn poll(&self, options: &PollOptions) -> Result<Value>;
}

// ============================================================================
// Identity
// ============================================================================

/// Resolves service account names to full resource names.
#[async_trait]
pub trait ServiceAccountResolver: Send + Sync {
    /// Resolve `name` (an email) in `project` to
    /// `projects/{project}/serviceAccounts/{email}`.
    async fn resolve(&self, project: &str, name: &str) -> Result<String>;
}
