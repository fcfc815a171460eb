//! Service account lookup through the IAM API.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::traits::{ApiClient, ServiceAccountResolver};
use crate::error::{Error, Result};

/// API version of the IAM API.
pub const API_VERSION: &str = "v1";

#[derive(Debug, Deserialize)]
struct ServiceAccount {
    name: String,
}

/// Resolves service accounts by reading them from the IAM API.
#[derive(Clone)]
pub struct IamServiceAccountResolver {
    client: Arc<dyn ApiClient>,
}

impl IamServiceAccountResolver {
    #[must_use]
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceAccountResolver for IamServiceAccountResolver {
    async fn resolve(&self, project: &str, name: &str) -> Result<String> {
        let path = format!("projects/{project}/serviceAccounts/{name}");
        let account: ServiceAccount = self.client.get(&path, &[]).await?.json()?;
        if account.name.is_empty() {
            return Err(Error::MalformedProviderData(format!(
                "service account {name} has no resource name"
            )));
        }
        debug!(service_account = %account.name, "Resolved service account");
        Ok(account.name)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::providers::fake::FakeClient;

    #[tokio::test]
    async fn test_resolve() {
        let fake = Arc::new(FakeClient::new().ok(
            Method::GET,
            "projects/p/serviceAccounts/sa@p.iam.gserviceaccount.com",
            json!({
                "name": "projects/p/serviceAccounts/sa@p.iam.gserviceaccount.com",
                "email": "sa@p.iam.gserviceaccount.com"
            }),
        ));
        let resolver = IamServiceAccountResolver::new(fake);
        assert_eq!(
            resolver.resolve("p", "sa@p.iam.gserviceaccount.com").await.unwrap(),
            "projects/p/serviceAccounts/sa@p.iam.gserviceaccount.com"
        );
    }

    #[tokio::test]
    async fn test_resolve_missing_account() {
        let fake = Arc::new(FakeClient::new().err(
            Method::GET,
            "projects/p/serviceAccounts/nobody@p.iam.gserviceaccount.com",
            404,
            Some("NOT_FOUND"),
        ));
        let resolver = IamServiceAccountResolver::new(fake);
        let err = resolver
            .resolve("p", "nobody@p.iam.gserviceaccount.com")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
