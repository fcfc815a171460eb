//! Managed-functions (v2) API request and response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::endpoint::{
    IngressSettings, Labels, Nullable, SecretEnvVar, StorageSource, VpcEgressSettings,
};

// ============================================================================
// Function
// ============================================================================

/// A second generation managed function.
///
/// Output-only fields are read from responses but never serialized, so they
/// can neither reach a request body nor an update mask.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudFunction {
    /// `projects/{project}/locations/{region}/functions/{id}`.
    pub name: String,
    /// User description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How the source is built.
    pub build_config: BuildConfig,
    /// The service that runs the built container.
    pub service_config: ServiceConfig,
    /// Event delivery; absent for HTTPS functions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_trigger: Option<EventTrigger>,
    /// Resource labels. Always sent so stale labels get cleared.
    #[serde(default)]
    pub labels: Labels,

    /// Lifecycle state.
    #[serde(default, skip_serializing)]
    pub state: Option<FunctionState>,
    /// Last modification time.
    #[serde(default, skip_serializing)]
    pub update_time: Option<DateTime<Utc>>,
}

/// Lifecycle state of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionState {
    Active,
    Failed,
    Deploying,
    Deleting,
    #[serde(other)]
    Unknown,
}

/// Settings for building a container from the uploaded source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// Runtime tag, e.g. `nodejs22`.
    pub runtime: String,
    /// Exported function name.
    pub entry_point: String,
    /// Uploaded source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Build-time environment.
    #[serde(default)]
    pub environment_variables: Labels,

    /// Cloud Build id of the last build.
    #[serde(default, skip_serializing)]
    pub build: Option<String>,
}

/// Source of a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_source: Option<StorageSource>,
}

/// The container service behind a function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    /// Memory with a binary unit suffix, e.g. `256Mi`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_memory: Option<String>,
    /// CPU count as a decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_cpu: Option<String>,
    /// Runtime environment. Always sent so removed variables get cleared.
    #[serde(default)]
    pub environment_variables: Labels,
    /// Secret-backed environment. Always sent so removed secrets get cleared.
    #[serde(default)]
    pub secret_environment_variables: Vec<SecretEnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instance_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_instance_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instance_request_concurrency: Option<u32>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub vpc_connector: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub vpc_connector_egress_settings: Nullable<VpcEgressSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_settings: Option<IngressSettings>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub service_account_email: Nullable<String>,

    /// Name of the backing container service.
    #[serde(default, skip_serializing)]
    pub service: Option<String>,
    /// Invocation URI.
    #[serde(default, skip_serializing)]
    pub uri: Option<String>,
    /// Latest ready revision.
    #[serde(default, skip_serializing)]
    pub revision: Option<String>,
}

// ============================================================================
// Event trigger
// ============================================================================

/// Filter operator marking a path-pattern match.
pub const PATH_PATTERN_OPERATOR: &str = "match-path-pattern";

/// Event delivery into a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTrigger {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_filters: Vec<EventFilter>,
    /// Topic of a Pub/Sub trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubsub_topic: Option<String>,
    /// Region of the event source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Identity the trigger invokes the function with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_email: Option<String>,

    /// Name of the underlying Eventarc trigger.
    #[serde(default, skip_serializing)]
    pub trigger: Option<String>,
}

/// One attribute filter of an event trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub attribute: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

/// Whether failed event deliveries are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryPolicy {
    #[serde(rename = "RETRY_POLICY_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "RETRY_POLICY_DO_NOT_RETRY")]
    DoNotRetry,
    #[serde(rename = "RETRY_POLICY_RETRY")]
    Retry,
}

// ============================================================================
// List
// ============================================================================

/// One page of a function listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFunctionsResponse {
    #[serde(default)]
    pub functions: Vec<CloudFunction>,
    #[serde(default)]
    pub unreachable: Vec<String>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Functions across every page of a listing.
#[derive(Debug, Clone, Default)]
pub struct FunctionList {
    pub functions: Vec<CloudFunction>,
    /// Regions that could not be listed.
    pub unreachable: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_output_only_fields_are_not_serialized() {
        let function: CloudFunction = serde_json::from_value(json!({
            "name": "projects/p/locations/l/functions/f",
            "buildConfig": { "runtime": "nodejs22", "entryPoint": "f", "build": "b1" },
            "serviceConfig": { "uri": "https://f-abc.a.run.app", "service": "projects/p/locations/l/services/f" },
            "state": "ACTIVE",
            "updateTime": "2024-05-01T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(function.state, Some(FunctionState::Active));
        assert!(function.update_time.is_some());

        let value = serde_json::to_value(&function).unwrap();
        assert!(value.get("state").is_none());
        assert!(value.get("updateTime").is_none());
        assert!(value["serviceConfig"].get("uri").is_none());
        assert!(value["buildConfig"].get("build").is_none());
    }

    #[test]
    fn test_unknown_state() {
        let state: FunctionState = serde_json::from_value(json!("STATE_UNSPECIFIED")).unwrap();
        assert_eq!(state, FunctionState::Unknown);
    }
}
