//! Conversion between [`Endpoint`] and [`Service`].
//!
//! A service has no structured place for the function identity, so it is
//! written to annotations. Reading it back tries, in order: the JSON metadata
//! annotation, the function-id annotation, the build-target annotation, the
//! `FUNCTION_TARGET` environment variable, and finally the last segment of the
//! service name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::models::{
    Container, EnvVar, EnvVarSource, Ingress, ResourceRequirements, RevisionTemplate,
    SecretKeySelector, Service, VpcAccess,
};
use crate::endpoint::{
    self, Endpoint, HttpsTrigger, IngressSettings, Labels, Nullable, Platform, SecretEnvVar,
    Trigger, Vpc, DEFAULT_CONCURRENCY, DEFAULT_RUNTIME,
};
use crate::error::{Error, Result};
use crate::labels::{
    strip_owned_labels, CodebaseLabel, HashLabel, LabelCodec, Owner, OwnershipLabel, RuntimeLabel,
};
use crate::memory::{memory_to_gen2_cpu, parse_memory, render_memory, DEFAULT_MEMORY_MB};
use crate::proto::{duration_from_seconds, split_resource_name, whole_seconds_from_duration};

/// Tool that last wrote the service.
pub const CLIENT_NAME_ANNOTATION: &str = "run.googleapis.com/client-name";
/// [`CLIENT_NAME_ANNOTATION`] value written by this tool.
pub const CLIENT_NAME: &str = "cli-firebase";
/// Exported function the container serves.
pub const FUNCTION_TARGET_ANNOTATION: &str = "run.googleapis.com/build-function-target";
/// Logical function id, which may differ from the service id.
pub const FUNCTION_ID_ANNOTATION: &str = "firebase-functions-id";
/// JSON object with `functionId` and `entryPoint`.
pub const METADATA_ANNOTATION: &str = "firebase-functions-metadata";
/// JSON event trigger of an event-triggered service.
pub const TRIGGER_ANNOTATION: &str = "firebase-functions-trigger";
pub const CPU_BOOST_ANNOTATION: &str = "run.googleapis.com/startup-cpu-boost";
pub const MIN_INSTANCES_ANNOTATION: &str = "autoscaling.knative.dev/minScale";
pub const MAX_INSTANCES_ANNOTATION: &str = "autoscaling.knative.dev/maxScale";

/// Name of the single container of a function service.
pub const CONTAINER_NAME: &str = "worker";
/// Environment variable naming the exported function.
pub const FUNCTION_TARGET_ENV: &str = "FUNCTION_TARGET";

/// Contents of [`METADATA_ANNOTATION`].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunctionMetadata {
    #[serde(default)]
    function_id: Option<String>,
    #[serde(default)]
    entry_point: Option<String>,
}

/// Service id for `endpoint`: lower case, without underscores.
#[must_use]
pub fn service_id(endpoint: &Endpoint) -> String {
    endpoint
        .run_service_id
        .clone()
        .unwrap_or_else(|| endpoint.id.to_lowercase().replace('_', "-"))
}

/// Full resource name of the service for `endpoint`.
#[must_use]
pub fn service_name(endpoint: &Endpoint) -> String {
    format!(
        "projects/{}/locations/{}/services/{}",
        endpoint.project,
        endpoint.region,
        service_id(endpoint)
    )
}

fn ingress_from_settings(settings: IngressSettings) -> Ingress {
    match settings {
        IngressSettings::AllowAll => Ingress::IngressTrafficAll,
        IngressSettings::AllowInternalOnly => Ingress::IngressTrafficInternalOnly,
        IngressSettings::AllowInternalAndGclb => Ingress::IngressTrafficInternalLoadBalancer,
    }
}

fn settings_from_ingress(ingress: Ingress) -> Option<IngressSettings> {
    match ingress {
        Ingress::IngressTrafficAll => Some(IngressSettings::AllowAll),
        Ingress::IngressTrafficInternalOnly => Some(IngressSettings::AllowInternalOnly),
        Ingress::IngressTrafficInternalLoadBalancer => Some(IngressSettings::AllowInternalAndGclb),
        Ingress::IngressTrafficNone | Ingress::IngressTrafficUnspecified => None,
    }
}

// ============================================================================
// Endpoint -> Service
// ============================================================================

/// Build the service resource for `endpoint`.
///
/// # Errors
/// Returns [`Error::PlatformMismatch`] for endpoints of another platform and
/// [`Error::InvalidEndpoint`] for triggers a service cannot carry or an
/// endpoint without a container image.
pub fn service_from_endpoint(endpoint: &Endpoint) -> Result<Service> {
    endpoint.expect_platform(Platform::Run)?;

    let mut annotations = Labels::from([
        (CLIENT_NAME_ANNOTATION.to_string(), CLIENT_NAME.to_string()),
        (FUNCTION_ID_ANNOTATION.to_string(), endpoint.id.clone()),
        (FUNCTION_TARGET_ANNOTATION.to_string(), endpoint.entry_point.clone()),
        (CPU_BOOST_ANNOTATION.to_string(), "true".to_string()),
    ]);
    match &endpoint.trigger {
        Trigger::Https(_) => {}
        Trigger::Event(event) => {
            annotations.insert(TRIGGER_ANNOTATION.to_string(), serde_json::to_string(event)?);
        }
        other => {
            return Err(Error::InvalidEndpoint(format!(
                "{endpoint}: {other} triggers are not supported on container services"
            )));
        }
    }
    if let Some(min) = endpoint.min_instances {
        annotations.insert(MIN_INSTANCES_ANNOTATION.to_string(), min.to_string());
    }
    if let Some(max) = endpoint.max_instances {
        annotations.insert(MAX_INSTANCES_ANNOTATION.to_string(), max.to_string());
    }

    let mut labels = endpoint.labels.clone();
    strip_owned_labels(&mut labels);
    OwnershipLabel::encode(&Some(Owner::Tool), &mut labels)?;
    RuntimeLabel::encode(&Some(endpoint.runtime.clone()), &mut labels)?;
    CodebaseLabel::encode(&endpoint.codebase, &mut labels)?;
    HashLabel::encode(&endpoint.hash, &mut labels)?;

    let image = endpoint
        .source
        .as_ref()
        .and_then(|s| s.image_uri.clone())
        .ok_or_else(|| {
            Error::InvalidEndpoint(format!("{endpoint} has no container image to deploy"))
        })?;

    let memory = endpoint.available_memory_mb.unwrap_or(DEFAULT_MEMORY_MB);
    let cpu = endpoint.cpu.unwrap_or_else(|| memory_to_gen2_cpu(memory));
    let concurrency = endpoint
        .concurrency
        .or((cpu >= 1.0).then_some(DEFAULT_CONCURRENCY));

    let container = Container {
        name: Some(CONTAINER_NAME.to_string()),
        image,
        env: env_from_endpoint(endpoint),
        resources: Some(ResourceRequirements {
            limits: Labels::from([
                ("cpu".to_string(), cpu.to_string()),
                ("memory".to_string(), render_memory(memory)),
            ]),
            cpu_idle: None,
            startup_cpu_boost: Some(true),
        }),
    };

    let vpc_access = endpoint.vpc.clone().map(|vpc| VpcAccess {
        connector: vpc.connector,
        egress: vpc.egress_settings,
    });

    Ok(Service {
        name: service_name(endpoint),
        labels,
        annotations,
        ingress: endpoint.ingress_settings.map(ingress_from_settings),
        template: RevisionTemplate {
            vpc_access,
            timeout: endpoint.timeout_seconds.map(duration_from_seconds),
            service_account: endpoint.resolved_service_account()?,
            containers: vec![container],
            max_instance_request_concurrency: concurrency,
            ..RevisionTemplate::default()
        },
        ..Service::default()
    })
}

fn env_from_endpoint(endpoint: &Endpoint) -> Vec<EnvVar> {
    let plain = endpoint
        .environment_variables
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_source: None,
        });
    let secrets = endpoint.secret_environment_variables.iter().map(|s| {
        let secret = if s.project_id == endpoint.project {
            s.secret.clone()
        } else {
            format!("projects/{}/secrets/{}", s.project_id, s.secret)
        };
        EnvVar {
            name: s.key.clone(),
            value: None,
            value_source: Some(EnvVarSource {
                secret_key_ref: SecretKeySelector {
                    secret,
                    version: Some(s.version.clone()),
                },
            }),
        }
    });
    plain.chain(secrets).collect()
}

// ============================================================================
// Service -> Endpoint
// ============================================================================

/// Recover the endpoint a service was deployed from.
///
/// Services owned by the managed-functions product come back with platform
/// [`Platform::FunctionsV2`].
///
/// # Errors
/// Returns [`Error::MalformedProviderData`] for malformed names, annotations,
/// resource limits or secret references.
pub fn endpoint_from_service(service: &Service) -> Result<Endpoint> {
    let (project, region, service_id) = split_resource_name(&service.name, "services")?;
    let annotations = &service.annotations;
    let container = service.template.containers.first();

    let metadata: FunctionMetadata = annotations
        .get(METADATA_ANNOTATION)
        .map(|raw| {
            serde_json::from_str(raw).map_err(|e| {
                Error::MalformedProviderData(format!(
                    "invalid {METADATA_ANNOTATION} annotation on {}: {e}",
                    service.name
                ))
            })
        })
        .transpose()?
        .unwrap_or_default();
    let target_env = container
        .and_then(|c| c.env.iter().find(|e| e.name == FUNCTION_TARGET_ENV))
        .and_then(|e| e.value.clone());
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
    let annotation = |key: &str| annotations.get(key).cloned().filter(|s| !s.is_empty());

    let id = non_empty(&metadata.function_id)
        .or_else(|| annotation(FUNCTION_ID_ANNOTATION))
        .or_else(|| annotation(FUNCTION_TARGET_ANNOTATION))
        .or_else(|| non_empty(&target_env))
        .unwrap_or_else(|| service_id.to_string());
    let entry_point = non_empty(&metadata.entry_point)
        .or_else(|| annotation(FUNCTION_TARGET_ANNOTATION))
        .or_else(|| non_empty(&target_env))
        .unwrap_or_else(|| id.clone());

    let trigger = match annotations.get(TRIGGER_ANNOTATION) {
        Some(raw) => Trigger::Event(serde_json::from_str::<endpoint::EventTrigger>(raw).map_err(
            |e| {
                Error::MalformedProviderData(format!(
                    "invalid {TRIGGER_ANNOTATION} annotation on {}: {e}",
                    service.name
                ))
            },
        )?),
        None => Trigger::Https(HttpsTrigger::default()),
    };

    let mut labels = service.labels.clone();
    let platform = match OwnershipLabel::decode(&labels)? {
        Some(Owner::ManagedFunctions) => Platform::FunctionsV2,
        _ => Platform::Run,
    };
    let runtime = RuntimeLabel::decode(&labels)?.unwrap_or_else(|| DEFAULT_RUNTIME.to_string());
    let codebase = CodebaseLabel::decode(&labels)?;
    let hash = HashLabel::decode(&labels)?;
    strip_owned_labels(&mut labels);

    let mut ep = Endpoint::new(id, project, region, platform, trigger);
    ep.entry_point = entry_point;
    ep.runtime = runtime;
    ep.codebase = codebase;
    ep.hash = hash;
    ep.labels = labels;

    ep.min_instances = count_annotation(service, MIN_INSTANCES_ANNOTATION)?;
    ep.max_instances = count_annotation(service, MAX_INSTANCES_ANNOTATION)?;
    ep.concurrency = service.template.max_instance_request_concurrency;
    ep.timeout_seconds = service
        .template
        .timeout
        .as_deref()
        .map(whole_seconds_from_duration)
        .transpose()?;

    if let Some(vpc) = service.template.vpc_access.as_value() {
        ep.vpc = Nullable::Value(Vpc {
            connector: vpc.connector.clone(),
            egress_settings: vpc.egress,
        });
    }
    ep.ingress_settings = service.ingress.and_then(settings_from_ingress);
    if let Some(account) = service.template.service_account.as_value() {
        ep.service_account = Nullable::Value(account.clone());
    }

    if let Some(container) = container {
        if let Some(limits) = container.resources.as_ref().map(|r| &r.limits) {
            ep.available_memory_mb =
                limits.get("memory").map(|m| parse_memory(m)).transpose()?;
            ep.cpu = limits
                .get("cpu")
                .map(|cpu| parse_cpu(cpu, &service.name))
                .transpose()?;
        }
        let (plain, secrets) = env_from_container(container, project)?;
        ep.environment_variables = plain;
        ep.secret_environment_variables = secrets;
        if !container.image.is_empty() {
            ep.source = Some(endpoint::Source {
                storage_source: None,
                image_uri: Some(container.image.clone()),
            });
        }
    }
    ep.uri.clone_from(&service.uri);

    debug!(endpoint = %ep, platform = %ep.platform, "Read service");
    Ok(ep)
}

fn count_annotation(service: &Service, key: &str) -> Result<Option<u32>> {
    service
        .annotations
        .get(key)
        .map(|raw| {
            raw.parse().map_err(|_| {
                Error::MalformedProviderData(format!(
                    "invalid {key} annotation {raw:?} on {}",
                    service.name
                ))
            })
        })
        .transpose()
}

/// Parse a CPU limit: a decimal count or millicores (`"500m"`).
fn parse_cpu(cpu: &str, name: &str) -> Result<f64> {
    let parsed = match cpu.strip_suffix('m') {
        Some(millis) => millis.parse::<f64>().map(|m| m / 1000.0),
        None => cpu.parse::<f64>(),
    };
    parsed.map_err(|_| Error::MalformedProviderData(format!("invalid CPU limit {cpu:?} on {name}")))
}

/// Split container env into plaintext variables and secret references.
fn env_from_container(
    container: &Container,
    project: &str,
) -> Result<(Labels, Vec<SecretEnvVar>)> {
    let mut plain = BTreeMap::new();
    let mut secrets = Vec::new();

    for var in &container.env {
        if let Some(value) = &var.value {
            plain.insert(var.name.clone(), value.clone());
        } else if let Some(source) = &var.value_source {
            let selector = &source.secret_key_ref;
            let (project_id, secret) = match selector.secret.split('/').collect::<Vec<_>>().as_slice()
            {
                ["projects", project_id, "secrets", secret] => {
                    ((*project_id).to_string(), (*secret).to_string())
                }
                [secret] => (project.to_string(), (*secret).to_string()),
                _ => {
                    return Err(Error::MalformedProviderData(format!(
                        "invalid secret reference {:?} for {}",
                        selector.secret, var.name
                    )))
                }
            };
            secrets.push(SecretEnvVar {
                key: var.name.clone(),
                secret,
                project_id,
                version: selector
                    .version
                    .clone()
                    .unwrap_or_else(|| "latest".to_string()),
            });
        } else {
            // An empty variable is serialized without a value.
            plain.insert(var.name.clone(), String::new());
        }
    }

    Ok((plain, secrets))
}
