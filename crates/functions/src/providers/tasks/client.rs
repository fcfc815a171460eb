//! Task-queue (v2) API client and queue reconciliation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, instrument};

use super::models::{Queue, State};
use crate::error::{Error, Result};
use crate::iam::{update_policy, with_role_members, Policy, PolicyStore};
use crate::proto::{invoker_members, to_body, update_mask};
use crate::providers::traits::ApiClient;
use crate::retry::RetryConfig;

/// API version of the task-queue API.
pub const API_VERSION: &str = "v2";

/// Role allowing principals to enqueue tasks.
pub const ENQUEUER_ROLE: &str = "roles/cloudtasks.enqueuer";

/// Client for task queues.
#[derive(Clone)]
pub struct TasksClient {
    client: Arc<dyn ApiClient>,
    retry: RetryConfig,
}

impl TasksClient {
    /// Client issuing requests through `client`; `retry` bounds IAM conflicts.
    #[must_use]
    pub fn new(client: Arc<dyn ApiClient>, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Create `queue` under its parent location.
    ///
    /// # Errors
    /// Returns any request error.
    pub async fn create(&self, queue: &Queue) -> Result<Queue> {
        let (parent, _) = queue
            .name
            .rsplit_once('/')
            .ok_or_else(|| Error::InvalidEndpoint(format!("invalid queue name {:?}", queue.name)))?;
        self.client.post(parent, to_body(queue)?, &[]).await?.json()
    }

    /// Read the queue `name`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when it does not exist.
    pub async fn get(&self, name: &str) -> Result<Queue> {
        self.client.get(name, &[]).await?.json()
    }

    /// Update `queue`, masking every field it sets.
    ///
    /// # Errors
    /// Returns any request error.
    pub async fn update(&self, queue: &Queue) -> Result<Queue> {
        let mask = update_mask(queue, &[])?;
        debug!(queue = %queue.name, update_mask = %mask, "Updating task queue");
        self.client
            .patch(&queue.name, to_body(queue)?, &[("updateMask", mask)])
            .await?
            .json()
    }

    /// Drop every pending task of `name`.
    ///
    /// # Errors
    /// Returns any request error.
    pub async fn purge(&self, name: &str) -> Result<()> {
        self.client.post(&format!("{name}:purge"), json!({}), &[]).await?;
        Ok(())
    }

    /// Delete the queue `name`.
    ///
    /// # Errors
    /// Returns any request error.
    pub async fn delete(&self, name: &str) -> Result<()> {
        info!(queue = %name, "Deleting task queue");
        self.client.delete(name).await?;
        Ok(())
    }

    /// Read the IAM policy of queue `name`.
    ///
    /// # Errors
    /// Returns any request error.
    pub async fn get_iam_policy(&self, name: &str) -> Result<Policy> {
        self.policy(name).get_policy().await
    }

    /// Write the IAM policy of queue `name`.
    ///
    /// # Errors
    /// Returns any request error; a stale etag fails with a conflict.
    pub async fn set_iam_policy(&self, name: &str, policy: &Policy) -> Result<Policy> {
        self.policy(name).set_policy(policy).await
    }

    /// Make the provider queue match `queue`.
    ///
    /// Creates the queue when missing. An existing queue equal to `queue` up to
    /// duration spelling is left alone; a disabled one is purged before the
    /// update. Returns whether the queue was created.
    ///
    /// # Errors
    /// Returns any request error other than the not-found that triggers
    /// creation.
    #[instrument(skip(self, queue), fields(queue = %queue.name))]
    pub async fn upsert_queue(&self, queue: &Queue) -> Result<bool> {
        let existing = match self.get(&queue.name).await {
            Ok(existing) => existing,
            Err(e) if e.is_not_found() => {
                self.create(queue).await?;
                info!(queue = %queue.name, "Created task queue");
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        if queue.equivalent(&existing) {
            debug!(queue = %queue.name, "Task queue already up to date");
            return Ok(false);
        }

        if existing.state == Some(State::Disabled) {
            info!(queue = %queue.name, "Purging disabled task queue before update");
            self.purge(&queue.name).await?;
        }

        self.update(queue).await?;
        info!(queue = %queue.name, "Updated task queue");
        Ok(false)
    }

    /// Make `invoker` the exact set of members allowed to enqueue into `name`.
    ///
    /// With `assume_empty` the first attempt starts from an empty policy
    /// instead of reading it, for queues that were just created.
    ///
    /// # Errors
    /// Returns [`Error::InvalidEndpoint`] for a malformed queue name or invoker
    /// list, or any policy read and write error.
    #[instrument(skip(self, invoker), fields(queue = %name))]
    pub async fn set_enqueuer(&self, name: &str, invoker: &[String], assume_empty: bool) -> Result<()> {
        let project = name
            .strip_prefix("projects/")
            .and_then(|rest| rest.split('/').next())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::InvalidEndpoint(format!("invalid queue name {name:?}")))?;
        let members = invoker_members(invoker, project)?;
        let assumed = assume_empty.then(Policy::empty);

        let changed = update_policy(&self.policy(name), &self.retry, assumed, |current| {
            Ok(with_role_members(current, ENQUEUER_ROLE, &members))
        })
        .await?;
        if changed {
            info!(members = ?members, "Set task queue enqueuers");
        }
        Ok(())
    }

    fn policy(&self, name: &str) -> QueuePolicy {
        QueuePolicy {
            client: self.client.clone(),
            resource: name.to_string(),
        }
    }
}

/// IAM policy of one queue.
struct QueuePolicy {
    client: Arc<dyn ApiClient>,
    resource: String,
}

#[async_trait]
impl PolicyStore for QueuePolicy {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn get_policy(&self) -> Result<Policy> {
        self.client
            .post(&format!("{}:getIamPolicy", self.resource), json!({}), &[])
            .await?
            .json()
    }

    async fn set_policy(&self, policy: &Policy) -> Result<Policy> {
        self.client
            .post(
                &format!("{}:setIamPolicy", self.resource),
                json!({ "policy": policy }),
                &[],
            )
            .await?
            .json()
    }
}
