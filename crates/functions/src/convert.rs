//! Platform dispatch over the provider converters.

use serde::{Deserialize, Serialize};

use crate::endpoint::{Endpoint, Platform};
use crate::error::{Error, Result};
use crate::providers::functions::{self, CloudFunction};
use crate::providers::run::{self, Service};

/// A provider resource an endpoint converts to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderResource {
    /// Second generation managed function.
    ManagedFunction(CloudFunction),
    /// Container service.
    ContainerService(Service),
}

impl ProviderResource {
    /// Full resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::ManagedFunction(f) => &f.name,
            Self::ContainerService(s) => &s.name,
        }
    }

    /// Update mask covering every field the resource sets.
    ///
    /// # Errors
    /// Returns a serialization error if the resource cannot be encoded.
    pub fn update_mask(&self) -> Result<String> {
        match self {
            Self::ManagedFunction(f) => crate::proto::update_mask(f, &functions::NO_RECURSE_FIELDS),
            Self::ContainerService(s) => crate::proto::update_mask(s, &run::NO_RECURSE_FIELDS),
        }
    }
}

/// Convert `endpoint` with the converter for its platform.
///
/// # Errors
/// Returns [`Error::PlatformMismatch`] for first generation endpoints, which
/// have no converter, or any converter error.
pub fn to_provider_resource(endpoint: &Endpoint) -> Result<ProviderResource> {
    match endpoint.platform {
        Platform::FunctionsV2 => functions::function_from_endpoint(endpoint)
            .map(ProviderResource::ManagedFunction),
        Platform::Run => run::service_from_endpoint(endpoint).map(ProviderResource::ContainerService),
        Platform::FunctionsV1 => Err(Error::PlatformMismatch {
            expected: "gcfv2 or run",
            actual: endpoint.platform.to_string(),
        }),
    }
}

/// Recover the endpoint a provider resource describes.
///
/// # Errors
/// Returns [`Error::MalformedProviderData`] when the resource cannot be read.
pub fn from_provider_resource(resource: &ProviderResource) -> Result<Endpoint> {
    match resource {
        ProviderResource::ManagedFunction(f) => functions::endpoint_from_function(f),
        ProviderResource::ContainerService(s) => run::endpoint_from_service(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Source, Trigger};

    #[test]
    fn test_dispatches_by_platform() {
        let ep = Endpoint::new("fn", "p", "us-central1", Platform::FunctionsV2, Trigger::https());
        let resource = to_provider_resource(&ep).unwrap();
        assert!(matches!(resource, ProviderResource::ManagedFunction(_)));
        assert_eq!(resource.name(), "projects/p/locations/us-central1/functions/fn");
        assert_eq!(from_provider_resource(&resource).unwrap().id, "fn");

        let mut ep = Endpoint::new("svc", "p", "us-central1", Platform::Run, Trigger::https());
        ep.source = Some(Source {
            storage_source: None,
            image_uri: Some("gcr.io/p/svc".into()),
        });
        let resource = to_provider_resource(&ep).unwrap();
        assert!(matches!(resource, ProviderResource::ContainerService(_)));
        assert!(resource.update_mask().unwrap().contains("template.containers"));
        assert_eq!(from_provider_resource(&resource).unwrap().id, "svc");
    }

    #[test]
    fn test_first_generation_is_rejected() {
        let ep = Endpoint::new("fn", "p", "us-central1", Platform::FunctionsV1, Trigger::https());
        assert!(matches!(
            to_provider_resource(&ep),
            Err(Error::PlatformMismatch { .. })
        ));
    }
}
