//! Project IAM policy through the resource manager API.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::traits::ApiClient;
use crate::error::Result;
use crate::iam::{Policy, PolicyStore, POLICY_VERSION};

/// API version of the resource manager.
pub const API_VERSION: &str = "v1";

/// IAM policy of one project.
pub struct ProjectPolicy {
    client: Arc<dyn ApiClient>,
    resource: String,
}

impl ProjectPolicy {
    /// Store for `projects/{project}`; `project` is an id or a number.
    #[must_use]
    pub fn new(client: Arc<dyn ApiClient>, project: &str) -> Self {
        Self {
            client,
            resource: format!("projects/{project}"),
        }
    }
}

#[async_trait]
impl PolicyStore for ProjectPolicy {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn get_policy(&self) -> Result<Policy> {
        self.client
            .post(
                &format!("{}:getIamPolicy", self.resource),
                json!({ "options": { "requestedPolicyVersion": POLICY_VERSION } }),
                &[],
            )
            .await?
            .json()
    }

    async fn set_policy(&self, policy: &Policy) -> Result<Policy> {
        self.client
            .post(
                &format!("{}:setIamPolicy", self.resource),
                json!({ "policy": policy, "updateMask": "bindings" }),
                &[],
            )
            .await?
            .json()
    }
}
