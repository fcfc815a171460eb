//! The provider-agnostic endpoint model.
//!
//! An [`Endpoint`] describes one deployable function or service: where it
//! lives, what it runs, its resource and network shape, and exactly one
//! [`Trigger`]. Converters in [`crate::providers`] translate it to and from
//! the resources each provider stores.

mod trigger;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

pub use trigger::{
    BlockingTrigger, CallableTrigger, EventTrigger, HttpsTrigger, ScheduleRetryConfig,
    ScheduleTrigger, TaskQueueRateLimits, TaskQueueRetryConfig, TaskQueueTrigger, Trigger,
    BEFORE_CREATE_EVENT, BEFORE_SEND_EMAIL_EVENT, BEFORE_SEND_SMS_EVENT, BEFORE_SIGN_IN_EVENT,
    PUBSUB_PUBLISH_EVENT, TRIGGER_KEYS,
};

/// Codebase of endpoints that do not name one.
pub const DEFAULT_CODEBASE: &str = "default";

/// Concurrency of instances with at least one CPU, when not specified.
pub const DEFAULT_CONCURRENCY: u32 = 80;

/// Runtime assumed for resources that do not report one.
pub const DEFAULT_RUNTIME: &str = "nodejs22";

/// Free-form string map used for labels and environment variables.
pub type Labels = BTreeMap<String, String>;

// ============================================================================
// Enumerations
// ============================================================================

/// Platform an endpoint is deployed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    /// First generation managed functions.
    #[serde(rename = "gcfv1")]
    FunctionsV1,
    /// Second generation managed functions.
    #[serde(rename = "gcfv2")]
    FunctionsV2,
    /// Container service.
    #[serde(rename = "run")]
    Run,
}

impl Platform {
    /// Serialized name of the platform.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FunctionsV1 => "gcfv1",
            Self::FunctionsV2 => "gcfv2",
            Self::Run => "run",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which traffic may reach an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngressSettings {
    AllowAll,
    AllowInternalOnly,
    AllowInternalAndGclb,
}

/// Which outbound traffic is routed through the VPC connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VpcEgressSettings {
    PrivateRangesOnly,
    AllTraffic,
}

// ============================================================================
// Nullable
// ============================================================================

/// A field that can be left alone, explicitly cleared, or set.
///
/// `Null` is written to the provider as JSON `null`, which puts the path in the
/// update mask while the value itself is dropped from the request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Nullable<T> {
    /// Not specified; the provider keeps its current value.
    #[default]
    Absent,
    /// Reset to the provider default.
    Null,
    /// Set to a value.
    Value(T),
}

impl<T> Nullable<T> {
    /// Whether the field was left unspecified.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// The value, if set.
    #[must_use]
    pub fn as_value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Turn `Null` into `Absent`, leaving values alone.
    pub fn clear_null(&mut self) {
        if matches!(self, Self::Null) {
            *self = Self::Absent;
        }
    }

    /// Map the contained value, preserving `Absent` and `Null`.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Nullable<U> {
        match self {
            Self::Absent => Nullable::Absent,
            Self::Null => Nullable::Null,
            Self::Value(v) => Nullable::Value(f(v)),
        }
    }

    /// Like [`Nullable::map`] for fallible conversions.
    ///
    /// # Errors
    /// Returns the error produced by `f`.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Nullable<U>, E> {
        Ok(match self {
            Self::Absent => Nullable::Absent,
            Self::Null => Nullable::Null,
            Self::Value(v) => Nullable::Value(f(v)?),
        })
    }
}

impl<T> From<Option<T>> for Nullable<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Self::Value)
    }
}

impl<T: Serialize> Serialize for Nullable<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => v.serialize(serializer),
            Self::Absent | Self::Null => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Nullable<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(Option::<T>::deserialize(deserializer)?.map_or(Self::Null, Self::Value))
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// VPC connector settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vpc {
    /// Connector resource name.
    pub connector: String,
    /// Egress routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_settings: Option<VpcEgressSettings>,
}

/// An environment variable backed by a secret version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretEnvVar {
    /// Environment variable name.
    pub key: String,
    /// Secret name.
    pub secret: String,
    /// Project that owns the secret.
    pub project_id: String,
    /// Secret version.
    #[serde(default = "latest_version")]
    pub version: String,
}

fn latest_version() -> String {
    "latest".to_string()
}

/// Uploaded source archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSource {
    pub bucket: String,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

/// Where the deployed code comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Source archive built by the managed-functions platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_source: Option<StorageSource>,
    /// Prebuilt container image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
}

/// A deployable function or service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Function id, unique within project and region.
    pub id: String,
    /// Project id.
    pub project: String,
    /// Region.
    pub region: String,
    /// Deployment platform.
    pub platform: Platform,

    /// The trigger.
    #[serde(flatten)]
    pub trigger: Trigger,

    /// Runtime tag, e.g. `nodejs22`.
    pub runtime: String,
    /// Exported function name.
    pub entry_point: String,
    /// Codebase the endpoint belongs to.
    #[serde(default = "default_codebase")]
    pub codebase: String,
    /// Content fingerprint of the deployed code and configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Memory in MiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_memory_mb: Option<u32>,
    /// Number of CPUs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    /// Concurrent requests per instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Minimum instance count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_instances: Option<u32>,
    /// Maximum instance count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,

    /// VPC connector.
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub vpc: Nullable<Vpc>,
    /// Ingress policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_settings: Option<IngressSettings>,
    /// Runtime service account email (`name@` shorthand allowed).
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub service_account: Nullable<String>,

    /// Plaintext environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_variables: Labels,
    /// Secret-backed environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_environment_variables: Vec<SecretEnvVar>,
    /// User labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,

    /// Code to deploy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,

    /// Invocation URI reported by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Id of the container service backing a managed function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_service_id: Option<String>,
}

fn default_codebase() -> String {
    DEFAULT_CODEBASE.to_string()
}

impl Endpoint {
    /// Endpoint with the given identity and trigger and no optional settings.
    ///
    /// The entry point defaults to the id and the runtime to [`DEFAULT_RUNTIME`].
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        project: impl Into<String>,
        region: impl Into<String>,
        platform: Platform,
        trigger: Trigger,
    ) -> Self {
        let id = id.into();
        Self {
            entry_point: id.clone(),
            id,
            project: project.into(),
            region: region.into(),
            platform,
            trigger,
            runtime: DEFAULT_RUNTIME.to_string(),
            codebase: default_codebase(),
            hash: None,
            available_memory_mb: None,
            cpu: None,
            concurrency: None,
            min_instances: None,
            max_instances: None,
            timeout_seconds: None,
            vpc: Nullable::Absent,
            ingress_settings: None,
            service_account: Nullable::Absent,
            environment_variables: Labels::new(),
            secret_environment_variables: Vec::new(),
            labels: Labels::new(),
            source: None,
            uri: None,
            run_service_id: None,
        }
    }

    /// Full resource name of the managed function.
    #[must_use]
    pub fn function_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/functions/{}",
            self.project, self.region, self.id
        )
    }

    /// Scheduler job id used for a scheduled endpoint.
    #[must_use]
    pub fn schedule_id(&self) -> String {
        format!("firebase-schedule-{}-{}", self.id, self.region)
    }

    /// Whether the endpoint belongs to the default codebase.
    #[must_use]
    pub fn is_default_codebase(&self) -> bool {
        self.codebase == DEFAULT_CODEBASE
    }

    /// Service account with the `name@` shorthand expanded.
    ///
    /// # Errors
    /// Returns [`Error::InvalidEndpoint`] for malformed service accounts.
    pub fn resolved_service_account(&self) -> Result<Nullable<String>> {
        self.service_account
            .clone()
            .try_map(|sa| crate::proto::expand_service_account(&sa, &self.project))
    }

    /// Fail unless the endpoint targets `platform`.
    ///
    /// # Errors
    /// Returns [`Error::PlatformMismatch`] naming both platforms.
    pub fn expect_platform(&self, platform: Platform) -> Result<()> {
        if self.platform == platform {
            Ok(())
        } else {
            Err(Error::PlatformMismatch {
                expected: platform.as_str(),
                actual: self.platform.to_string(),
            })
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.id, self.region)
    }
}

/// Parse endpoint documents from YAML or JSON.
///
/// Accepts a single endpoint or a list of endpoints. Each document must carry
/// exactly one of the [`TRIGGER_KEYS`].
///
/// # Errors
/// Returns [`Error::InvalidEndpoint`] when a document is malformed or does not
/// carry exactly one trigger.
pub fn parse_endpoints(input: &str) -> Result<Vec<Endpoint>> {
    let document: serde_yaml::Value =
        serde_yaml::from_str(input).map_err(|e| Error::InvalidEndpoint(e.to_string()))?;

    let documents = match document {
        serde_yaml::Value::Sequence(items) => items,
        other => vec![other],
    };

    documents
        .into_iter()
        .enumerate()
        .map(|(index, doc)| {
            let triggers: Vec<&str> = TRIGGER_KEYS
                .iter()
                .copied()
                .filter(|key| doc.get(*key).is_some())
                .collect();
            if triggers.len() != 1 {
                let id = doc
                    .get("id")
                    .and_then(serde_yaml::Value::as_str)
                    .map_or_else(|| format!("#{index}"), str::to_string);
                return Err(Error::InvalidEndpoint(format!(
                    "endpoint {id} must have exactly one trigger, found {}",
                    if triggers.is_empty() {
                        "none".to_string()
                    } else {
                        triggers.join(", ")
                    }
                )));
            }
            serde_yaml::from_value(doc).map_err(|e| Error::InvalidEndpoint(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let ep = Endpoint::new("fn", "proj", "us-central1", Platform::FunctionsV2, Trigger::https());
        assert_eq!(ep.function_name(), "projects/proj/locations/us-central1/functions/fn");
        assert_eq!(ep.schedule_id(), "firebase-schedule-fn-us-central1");
        assert_eq!(ep.entry_point, "fn");
        assert!(ep.is_default_codebase());
        assert_eq!(ep.to_string(), "fn(us-central1)");
    }

    #[test]
    fn test_expect_platform() {
        let ep = Endpoint::new("fn", "p", "r", Platform::Run, Trigger::https());
        assert!(ep.expect_platform(Platform::Run).is_ok());
        match ep.expect_platform(Platform::FunctionsV2) {
            Err(Error::PlatformMismatch { expected, actual }) => {
                assert_eq!(expected, "gcfv2");
                assert_eq!(actual, "run");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_resolved_service_account() {
        let mut ep = Endpoint::new("fn", "proj", "r", Platform::FunctionsV2, Trigger::https());
        assert_eq!(ep.resolved_service_account().unwrap(), Nullable::Absent);

        ep.service_account = Nullable::Value("robot@".to_string());
        assert_eq!(
            ep.resolved_service_account().unwrap(),
            Nullable::Value("robot@proj.iam.gserviceaccount.com".to_string())
        );

        ep.service_account = Nullable::Null;
        assert_eq!(ep.resolved_service_account().unwrap(), Nullable::Null);
    }

    #[test]
    fn test_parse_endpoints() {
        let yaml = r"
- id: hello
  project: proj
  region: us-central1
  platform: gcfv2
  runtime: nodejs22
  entryPoint: hello
  httpsTrigger: {}
  serviceAccount: null
- id: worker
  project: proj
  region: us-central1
  platform: gcfv2
  runtime: nodejs22
  entryPoint: worker
  codebase: jobs
  taskQueueTrigger:
    rateLimits:
      maxConcurrentDispatches: 10
";
        let endpoints = parse_endpoints(yaml).unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].trigger, Trigger::https());
        assert_eq!(endpoints[0].service_account, Nullable::Null);
        assert_eq!(endpoints[0].codebase, DEFAULT_CODEBASE);
        assert_eq!(endpoints[1].codebase, "jobs");
        match &endpoints[1].trigger {
            Trigger::TaskQueue(tq) => assert_eq!(
                tq.rate_limits.as_ref().map(|r| &r.max_concurrent_dispatches),
                Some(&Nullable::Value(10))
            ),
            other => panic!("unexpected trigger {other:?}"),
        }
    }

    #[test]
    fn test_parse_endpoints_rejects_zero_or_two_triggers() {
        let none = "{id: a, project: p, region: r, platform: gcfv2, runtime: nodejs22, entryPoint: a}";
        let err = parse_endpoints(none).unwrap_err();
        assert!(err.to_string().contains("found none"), "{err}");

        let two = "{id: a, project: p, region: r, platform: gcfv2, runtime: nodejs22, entryPoint: a, httpsTrigger: {}, callableTrigger: {}}";
        let err = parse_endpoints(two).unwrap_err();
        assert!(err.to_string().contains("httpsTrigger, callableTrigger"), "{err}");
    }

    #[test]
    fn test_nullable_serde() {
        let mut ep = Endpoint::new("fn", "p", "r", Platform::FunctionsV2, Trigger::https());
        let json = serde_json::to_value(&ep).unwrap();
        assert!(json.get("serviceAccount").is_none());

        ep.service_account = Nullable::Null;
        let json = serde_json::to_value(&ep).unwrap();
        assert!(json["serviceAccount"].is_null());

        let back: Endpoint = serde_json::from_value(json).unwrap();
        assert_eq!(back, ep);
    }
}
