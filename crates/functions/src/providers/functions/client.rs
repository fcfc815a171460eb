//! Managed-functions (v2) API client.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::models::{CloudFunction, FunctionList, ListFunctionsResponse};
use crate::error::{Error, Result};
use crate::proto::{to_body, update_mask};
use crate::providers::operations::Operation;
use crate::providers::traits::ApiClient;

/// API version of the managed-functions API.
pub const API_VERSION: &str = "v2";

/// Map fields whose keys are user data; masked as a whole.
pub const NO_RECURSE_FIELDS: [&str; 4] = [
    "labels",
    "serviceConfig.environmentVariables",
    "serviceConfig.secretEnvironmentVariables",
    "buildConfig.environmentVariables",
];

/// Client for second generation managed functions.
#[derive(Clone)]
pub struct FunctionsClient {
    client: Arc<dyn ApiClient>,
}

impl FunctionsClient {
    /// Client issuing requests through `client`.
    #[must_use]
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }

    /// Create `function` and return the long-running operation.
    ///
    /// # Errors
    /// Returns [`Error::Rejected`] when the provider refuses the function, or
    /// any request error.
    pub async fn create(&self, function: &CloudFunction) -> Result<Operation> {
        let (parent, function_id) = function.name.rsplit_once('/').ok_or_else(|| {
            Error::InvalidEndpoint(format!("invalid function name {:?}", function.name))
        })?;

        info!(function = %function.name, "Creating function");
        self.client
            .post(parent, to_body(function)?, &[("functionId", function_id.to_string())])
            .await
            .map_err(|e| e.rejection(&function.name, "create"))?
            .json()
    }

    /// Read one function.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when it does not exist.
    pub async fn get(&self, project: &str, location: &str, id: &str) -> Result<CloudFunction> {
        let name = format!("projects/{project}/locations/{location}/functions/{id}");
        self.client.get(&name, &[]).await?.json()
    }

    /// List functions in `region` (`-` for every region), following pages.
    ///
    /// # Errors
    /// Returns any request error.
    pub async fn list(&self, project: &str, region: &str) -> Result<FunctionList> {
        let path = format!("projects/{project}/locations/{region}/functions");
        let mut functions = Vec::new();
        let mut unreachable = BTreeSet::new();
        let mut page_token: Option<String> = None;

        loop {
            let query: Vec<(&str, String)> = page_token
                .take()
                .map(|token| vec![("pageToken", token)])
                .unwrap_or_default();
            let page: ListFunctionsResponse = self.client.get(&path, &query).await?.json()?;

            functions.extend(page.functions);
            unreachable.extend(page.unreachable);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            project = %project,
            count = functions.len(),
            unreachable = unreachable.len(),
            "Listed functions"
        );
        Ok(FunctionList {
            functions,
            unreachable: unreachable.into_iter().collect(),
        })
    }

    /// List functions in every region.
    ///
    /// # Errors
    /// Returns any request error.
    pub async fn list_all(&self, project: &str) -> Result<FunctionList> {
        self.list(project, "-").await
    }

    /// Update `function`, masking every field it sets.
    ///
    /// # Errors
    /// Returns [`Error::Rejected`] when the provider refuses the update, or
    /// any request error.
    pub async fn update(&self, function: &CloudFunction) -> Result<Operation> {
        let mask = update_mask(function, &NO_RECURSE_FIELDS)?;
        debug!(function = %function.name, update_mask = %mask, "Updating function");

        self.client
            .patch(&function.name, to_body(function)?, &[("updateMask", mask)])
            .await
            .map_err(|e| e.rejection(&function.name, "update"))?
            .json()
    }

    /// Delete the function `name`.
    ///
    /// # Errors
    /// Returns any request error.
    pub async fn delete(&self, name: &str) -> Result<Operation> {
        info!(function = %name, "Deleting function");
        self.client
            .delete(name)
            .await
            .map_err(|e| e.rejection(name, "delete"))?
            .json()
    }
}
