//! Container-service (v2) API client.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, instrument};

use super::models::{ListServicesResponse, Service};
use crate::error::{Error, Result};
use crate::iam::{update_policy, with_role_members, Policy, PolicyStore, RUN_INVOKER_ROLE};
use crate::proto::{invoker_members, to_body, update_mask};
use crate::providers::operations::Operation;
use crate::providers::traits::ApiClient;
use crate::retry::RetryConfig;

/// API version of the container-service API.
pub const API_VERSION: &str = "v2";

/// Map fields whose keys are user data; masked as a whole.
pub const NO_RECURSE_FIELDS: [&str; 4] = [
    "labels",
    "annotations",
    "template.labels",
    "template.annotations",
];

/// Client for container services.
#[derive(Clone)]
pub struct RunClient {
    client: Arc<dyn ApiClient>,
    retry: RetryConfig,
}

impl RunClient {
    /// Client issuing requests through `client`; `retry` bounds IAM conflicts.
    #[must_use]
    pub fn new(client: Arc<dyn ApiClient>, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Read the service `name`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when it does not exist.
    pub async fn get(&self, name: &str) -> Result<Service> {
        self.client.get(name, &[]).await?.json()
    }

    /// Create `service` and return the long-running operation.
    ///
    /// # Errors
    /// Returns [`Error::Rejected`] when the provider refuses the service, or
    /// any request error.
    pub async fn create(&self, service: &Service) -> Result<Operation> {
        let (parent, service_id) = service.name.rsplit_once('/').ok_or_else(|| {
            Error::InvalidEndpoint(format!("invalid service name {:?}", service.name))
        })?;

        info!(service = %service.name, "Creating service");
        self.client
            .post(parent, to_body(service)?, &[("serviceId", service_id.to_string())])
            .await
            .map_err(|e| e.rejection(&service.name, "create"))?
            .json()
    }

    /// Update `service`, masking every field it sets.
    ///
    /// # Errors
    /// Returns [`Error::Rejected`] when the provider refuses the update, or
    /// any request error.
    pub async fn update(&self, service: &Service) -> Result<Operation> {
        let mask = update_mask(service, &NO_RECURSE_FIELDS)?;
        debug!(service = %service.name, update_mask = %mask, "Updating service");

        self.client
            .patch(&service.name, to_body(service)?, &[("updateMask", mask)])
            .await
            .map_err(|e| e.rejection(&service.name, "update"))?
            .json()
    }

    /// Delete the service `name`.
    ///
    /// # Errors
    /// Returns any request error.
    pub async fn delete(&self, name: &str) -> Result<Operation> {
        info!(service = %name, "Deleting service");
        self.client
            .delete(name)
            .await
            .map_err(|e| e.rejection(name, "delete"))?
            .json()
    }

    /// List services in `region` (`-` for every region), following pages.
    ///
    /// # Errors
    /// Returns any request error.
    pub async fn list(&self, project: &str, region: &str) -> Result<Vec<Service>> {
        let path = format!("projects/{project}/locations/{region}/services");
        let mut services = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let query: Vec<(&str, String)> = page_token
                .take()
                .map(|token| vec![("pageToken", token)])
                .unwrap_or_default();
            let page: ListServicesResponse = self.client.get(&path, &query).await?.json()?;
            services.extend(page.services);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(project = %project, count = services.len(), "Listed services");
        Ok(services)
    }

    /// Make `invoker` the exact set of members allowed to invoke `service`.
    ///
    /// `public` grants everyone and `private` grants nobody. Returns whether
    /// the policy changed.
    ///
    /// # Errors
    /// Returns [`Error::InvalidEndpoint`] for an empty or malformed invoker
    /// list, or any policy read and write error.
    #[instrument(skip(self, invoker), fields(service = %service))]
    pub async fn set_invoker(&self, project: &str, service: &str, invoker: &[String]) -> Result<bool> {
        if invoker.is_empty() {
            return Err(Error::InvalidEndpoint(format!(
                "invoker of {service} cannot be an empty list"
            )));
        }
        let members = invoker_members(invoker, project)?;
        let store = ServicePolicy {
            client: self.client.clone(),
            resource: service.to_string(),
        };

        let changed = update_policy(&store, &self.retry, None, |current| {
            Ok(with_role_members(current, RUN_INVOKER_ROLE, &members))
        })
        .await?;
        if changed {
            info!(members = ?members, "Set invokers");
        }
        Ok(changed)
    }
}

/// IAM policy of one service.
struct ServicePolicy {
    client: Arc<dyn ApiClient>,
    resource: String,
}

#[async_trait]
impl PolicyStore for ServicePolicy {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn get_policy(&self) -> Result<Policy> {
        self.client
            .get(&format!("{}:getIamPolicy", self.resource), &[])
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
