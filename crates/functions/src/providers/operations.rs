//! Long-running operation polling.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::traits::{ApiClient, OperationPoller, PollOptions};
use crate::error::{Error, Result};

/// A long-running operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Operation name.
    pub name: String,
    /// Whether the operation reached a terminal state.
    #[serde(default)]
    pub done: bool,
    /// Failure, when done and unsuccessful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    /// Result, when done and successful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Service-specific progress information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Error status of a failed operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// Polls operations through an [`ApiClient`] with capped exponential backoff.
#[derive(Clone)]
pub struct ApiOperationPoller {
    client: Arc<dyn ApiClient>,
}

impl ApiOperationPoller {
    /// Poller for operations of the API `client` is bound to.
    #[must_use]
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OperationPoller for ApiOperationPoller {
    async fn poll(&self, options: &PollOptions) -> Result<Value> {
        let name = &options.operation_resource_name;
        let start = Instant::now();
        let mut delay = options.backoff;

        loop {
            let op: Operation = self.client.get(name, &[]).await?.json()?;

            debug!(
                operation = %name,
                done = op.done,
                elapsed_secs = start.elapsed().as_secs(),
                "Polling operation"
            );

            if op.done {
                if let Some(error) = op.error {
                    return Err(Error::OperationFailed {
                        name: name.clone(),
                        message: error.message,
                    });
                }
                info!(operation = %name, "Operation complete");
                return Ok(op.response.unwrap_or(Value::Null));
            }

            if start.elapsed() >= options.master_timeout {
                return Err(Error::Timeout(options.master_timeout.as_secs()));
            }

            tokio::time::sleep(delay).await;
            delay = std::cmp::min(options.max_backoff, delay * 2);
        }
    }
}
