//! Conversion between [`Endpoint`] and [`CloudFunction`].

use std::collections::BTreeMap;

use tracing::debug;

use super::models::{
    BuildConfig, CloudFunction, EventFilter, EventTrigger, RetryPolicy, ServiceConfig, Source,
    PATH_PATTERN_OPERATOR,
};
use crate::endpoint::{
    self, Endpoint, HttpsTrigger, Nullable, Platform, Trigger, Vpc, PUBSUB_PUBLISH_EVENT,
};
use crate::error::{Error, Result};
use crate::labels::{
    strip_owned_labels, CodebaseLabel, HashLabel, LabelCodec, LabeledKind, TriggerKindLabel,
};
use crate::memory::{parse_memory, render_memory, DEFAULT_MEMORY_MB};
use crate::proto::split_resource_name;

/// Runtime variable naming the exported function.
pub const FUNCTION_TARGET_ENV: &str = "FUNCTION_TARGET";
/// Runtime variable enabling execution ids in logs.
pub const LOG_EXECUTION_ID_ENV: &str = "LOG_EXECUTION_ID";
/// Runtime variable selecting the invocation payload format.
pub const FUNCTION_SIGNATURE_TYPE_ENV: &str = "FUNCTION_SIGNATURE_TYPE";
/// Build variable controlling package script execution.
pub const NODE_RUN_SCRIPTS_ENV: &str = "GOOGLE_NODE_RUN_SCRIPTS";

/// Filter attribute promoted to [`EventTrigger::pubsub_topic`].
const TOPIC_FILTER: &str = "topic";

/// Variables this converter writes and strips again when reading back.
const RESERVED_ENV: [&str; 2] = [FUNCTION_TARGET_ENV, LOG_EXECUTION_ID_ENV];

/// Build the function resource for `endpoint`.
///
/// # Errors
/// Returns [`Error::PlatformMismatch`] for endpoints of another platform and
/// [`Error::InvalidEndpoint`] when a field cannot be expressed.
pub fn function_from_endpoint(endpoint: &Endpoint) -> Result<CloudFunction> {
    endpoint.expect_platform(Platform::FunctionsV2)?;

    let mut labels = endpoint.labels.clone();
    strip_owned_labels(&mut labels);
    TriggerKindLabel::encode(&LabeledKind::of(&endpoint.trigger), &mut labels)?;
    CodebaseLabel::encode(&endpoint.codebase, &mut labels)?;
    HashLabel::encode(&endpoint.hash, &mut labels)?;

    let mut environment_variables = endpoint.environment_variables.clone();
    environment_variables.insert(FUNCTION_TARGET_ENV.to_string(), endpoint.entry_point.clone());
    environment_variables.insert(LOG_EXECUTION_ID_ENV.to_string(), "true".to_string());

    let event_trigger = match &endpoint.trigger {
        Trigger::Event(event) => {
            // Without this the runtime downgrades payloads to the legacy format.
            environment_variables
                .insert(FUNCTION_SIGNATURE_TYPE_ENV.to_string(), "cloudevent".to_string());
            Some(event_trigger_from_endpoint(endpoint, event)?)
        }
        _ => None,
    };

    let (vpc_connector, vpc_connector_egress_settings) = match &endpoint.vpc {
        Nullable::Absent => (Nullable::Absent, Nullable::Absent),
        Nullable::Null => (Nullable::Null, Nullable::Null),
        Nullable::Value(vpc) => (
            Nullable::Value(vpc.connector.clone()),
            vpc.egress_settings.into(),
        ),
    };

    let service_config = ServiceConfig {
        timeout_seconds: endpoint.timeout_seconds,
        available_memory: Some(render_memory(
            endpoint.available_memory_mb.unwrap_or(DEFAULT_MEMORY_MB),
        )),
        available_cpu: endpoint.cpu.map(|cpu| cpu.to_string()),
        environment_variables,
        secret_environment_variables: endpoint.secret_environment_variables.clone(),
        max_instance_count: endpoint.max_instances,
        min_instance_count: endpoint.min_instances,
        max_instance_request_concurrency: endpoint.concurrency,
        vpc_connector,
        vpc_connector_egress_settings,
        ingress_settings: endpoint.ingress_settings,
        service_account_email: endpoint.resolved_service_account()?,
        ..ServiceConfig::default()
    };

    let build_config = BuildConfig {
        runtime: endpoint.runtime.clone(),
        entry_point: endpoint.entry_point.clone(),
        source: endpoint
            .source
            .as_ref()
            .and_then(|s| s.storage_source.clone())
            .map(|storage_source| Source {
                storage_source: Some(storage_source),
            }),
        environment_variables: BTreeMap::from([(NODE_RUN_SCRIPTS_ENV.to_string(), String::new())]),
        build: None,
    };

    Ok(CloudFunction {
        name: endpoint.function_name(),
        description: None,
        build_config,
        service_config,
        event_trigger,
        labels,
        state: None,
        update_time: None,
    })
}

fn event_trigger_from_endpoint(
    endpoint: &Endpoint,
    event: &endpoint::EventTrigger,
) -> Result<EventTrigger> {
    let mut filters = event.event_filters.clone();

    let pubsub_topic = if event.event_type == PUBSUB_PUBLISH_EVENT {
        let topic = filters.remove(TOPIC_FILTER).ok_or_else(|| {
            Error::InvalidEndpoint(format!(
                "Pub/Sub endpoint {endpoint} has no {TOPIC_FILTER:?} event filter"
            ))
        })?;
        Some(topic)
    } else {
        None
    };

    let event_filters = filters
        .into_iter()
        .map(|(attribute, value)| EventFilter {
            attribute,
            value,
            operator: None,
        })
        .chain(
            event
                .event_filter_path_patterns
                .iter()
                .map(|(attribute, value)| EventFilter {
                    attribute: attribute.clone(),
                    value: value.clone(),
                    operator: Some(PATH_PATTERN_OPERATOR.to_string()),
                }),
        )
        .collect();

    Ok(EventTrigger {
        event_type: event.event_type.clone(),
        event_filters,
        pubsub_topic,
        trigger_region: event.region.clone(),
        retry_policy: Some(if event.retry {
            RetryPolicy::Retry
        } else {
            RetryPolicy::DoNotRetry
        }),
        channel: event.channel.clone(),
        service_account_email: None,
        trigger: None,
    })
}

/// Recover the endpoint a function was deployed from.
///
/// # Errors
/// Returns [`Error::MalformedProviderData`] for malformed names, memory or CPU
/// values, unknown label values, or an event trigger without an event type.
pub fn endpoint_from_function(function: &CloudFunction) -> Result<Endpoint> {
    let (project, region, id) = split_resource_name(&function.name, "functions")?;

    let mut labels = function.labels.clone();
    let kind = TriggerKindLabel::decode(&labels)?;
    let codebase = CodebaseLabel::decode(&labels)?;
    let hash = HashLabel::decode(&labels)?;
    strip_owned_labels(&mut labels);

    // A trigger label wins over the structured event trigger.
    let trigger = match (kind, &function.event_trigger) {
        (Some(kind), _) => kind.into_trigger(),
        (None, Some(event)) => Trigger::Event(endpoint_event_trigger(&function.name, event)?),
        (None, None) => Trigger::Https(HttpsTrigger::default()),
    };

    let service = &function.service_config;
    let mut environment_variables = service.environment_variables.clone();
    for key in RESERVED_ENV {
        environment_variables.remove(key);
    }
    if matches!(trigger, Trigger::Event(_)) {
        environment_variables.remove(FUNCTION_SIGNATURE_TYPE_ENV);
    }

    let mut endpoint = Endpoint::new(id, project, region, Platform::FunctionsV2, trigger);
    endpoint.runtime.clone_from(&function.build_config.runtime);
    endpoint.entry_point.clone_from(&function.build_config.entry_point);
    endpoint.codebase = codebase;
    endpoint.hash = hash;
    endpoint.labels = labels;

    endpoint.available_memory_mb = service
        .available_memory
        .as_deref()
        .map(parse_memory)
        .transpose()?;
    endpoint.cpu = service
        .available_cpu
        .as_deref()
        .map(|cpu| {
            cpu.parse::<f64>().map_err(|_| {
                Error::MalformedProviderData(format!("invalid CPU value {cpu:?} on {}", function.name))
            })
        })
        .transpose()?;
    endpoint.concurrency = service.max_instance_request_concurrency;
    endpoint.min_instances = service.min_instance_count;
    endpoint.max_instances = service.max_instance_count;
    endpoint.timeout_seconds = service.timeout_seconds;

    if let Some(connector) = service.vpc_connector.as_value() {
        endpoint.vpc = Nullable::Value(Vpc {
            connector: connector.clone(),
            egress_settings: service.vpc_connector_egress_settings.as_value().copied(),
        });
    }
    endpoint.ingress_settings = service.ingress_settings;
    if let Some(email) = service.service_account_email.as_value() {
        endpoint.service_account = Nullable::Value(email.clone());
    }

    endpoint.environment_variables = environment_variables;
    endpoint.secret_environment_variables = service.secret_environment_variables.clone();

    endpoint.source = function
        .build_config
        .source
        .as_ref()
        .and_then(|s| s.storage_source.clone())
        .map(|storage_source| endpoint::Source {
            storage_source: Some(storage_source),
            image_uri: None,
        });
    endpoint.uri.clone_from(&service.uri);
    endpoint.run_service_id = service
        .service
        .as_deref()
        .and_then(|s| s.rsplit('/').next())
        .map(str::to_string);

    debug!(endpoint = %endpoint, trigger = %endpoint.trigger, "Read function");
    Ok(endpoint)
}

fn endpoint_event_trigger(name: &str, event: &EventTrigger) -> Result<endpoint::EventTrigger> {
    if event.event_type.is_empty() {
        return Err(Error::MalformedProviderData(format!(
            "function {name} has an event trigger without an event type"
        )));
    }

    let mut event_filters = BTreeMap::new();
    let mut event_filter_path_patterns = BTreeMap::new();
    for filter in &event.event_filters {
        let target = if filter.operator.as_deref() == Some(PATH_PATTERN_OPERATOR) {
            &mut event_filter_path_patterns
        } else {
            &mut event_filters
        };
        target.insert(filter.attribute.clone(), filter.value.clone());
    }
    if let Some(topic) = &event.pubsub_topic {
        event_filters.insert(TOPIC_FILTER.to_string(), topic.clone());
    }

    Ok(endpoint::EventTrigger {
        event_type: event.event_type.clone(),
        event_filters,
        event_filter_path_patterns,
        retry: event.retry_policy == Some(RetryPolicy::Retry),
        region: event.trigger_region.clone(),
        channel: event.channel.clone(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::endpoint::{
        BlockingTrigger, CallableTrigger, IngressSettings, ScheduleTrigger, SecretEnvVar,
        StorageSource, TaskQueueTrigger, VpcEgressSettings, BEFORE_SIGN_IN_EVENT,
    };
    use crate::labels::{BLOCKING_LABEL, CODEBASE_LABEL, HASH_LABEL, SCHEDULED_LABEL};
    use crate::proto::{field_masks, to_body};

    fn endpoint(trigger: Trigger) -> Endpoint {
        Endpoint::new("fn", "proj", "us-central1", Platform::FunctionsV2, trigger)
    }

    fn pubsub() -> Trigger {
        Trigger::Event(endpoint::EventTrigger {
            event_type: PUBSUB_PUBLISH_EVENT.to_string(),
            event_filters: BTreeMap::from([
                ("topic".to_string(), "projects/p/topics/t".to_string()),
                ("serviceName".to_string(), "pubsub.googleapis.com".to_string()),
            ]),
            retry: true,
            ..endpoint::EventTrigger::default()
        })
    }

    fn full_endpoint(trigger: Trigger) -> Endpoint {
        let mut ep = endpoint(trigger);
        ep.runtime = "nodejs20".into();
        ep.entry_point = "handler".into();
        ep.codebase = "backend".into();
        ep.hash = Some("abc123".into());
        ep.available_memory_mb = Some(2048);
        ep.cpu = Some(1.0);
        ep.concurrency = Some(40);
        ep.min_instances = Some(1);
        ep.max_instances = Some(10);
        ep.timeout_seconds = Some(120);
        ep.vpc = Nullable::Value(Vpc {
            connector: "projects/proj/locations/us-central1/connectors/c".into(),
            egress_settings: Some(VpcEgressSettings::AllTraffic),
        });
        ep.ingress_settings = Some(IngressSettings::AllowInternalOnly);
        ep.service_account = Nullable::Value("robot@proj.iam.gserviceaccount.com".into());
        ep.environment_variables = BTreeMap::from([("FOO".into(), "bar".into())]);
        ep.secret_environment_variables = vec![SecretEnvVar {
            key: "API_KEY".into(),
            secret: "api-key".into(),
            project_id: "proj".into(),
            version: "3".into(),
        }];
        ep.labels = BTreeMap::from([("team".into(), "core".into())]);
        ep.source = Some(endpoint::Source {
            storage_source: Some(StorageSource {
                bucket: "b".into(),
                object: "o.zip".into(),
                generation: Some(7),
            }),
            image_uri: None,
        });
        ep
    }

    #[test]
    fn test_rejects_other_platforms() {
        for platform in [Platform::FunctionsV1, Platform::Run] {
            let mut ep = endpoint(Trigger::https());
            ep.platform = platform;
            assert!(matches!(
                function_from_endpoint(&ep),
                Err(Error::PlatformMismatch { expected: "gcfv2", .. })
            ));
        }
    }

    #[test]
    fn test_pubsub_topic_is_promoted() {
        let function = function_from_endpoint(&endpoint(pubsub())).unwrap();
        let trigger = function.event_trigger.clone().unwrap();
        assert_eq!(trigger.pubsub_topic.as_deref(), Some("projects/p/topics/t"));
        assert_eq!(
            trigger.event_filters,
            vec![EventFilter {
                attribute: "serviceName".into(),
                value: "pubsub.googleapis.com".into(),
                operator: None,
            }]
        );
        assert_eq!(trigger.retry_policy, Some(RetryPolicy::Retry));
        assert_eq!(
            function.service_config.environment_variables[FUNCTION_SIGNATURE_TYPE_ENV],
            "cloudevent"
        );

        let back = endpoint_from_function(&function).unwrap();
        let Trigger::Event(event) = back.trigger else {
            panic!("expected event trigger");
        };
        assert_eq!(event.event_filters["topic"], "projects/p/topics/t");
        assert_eq!(event.event_filters["serviceName"], "pubsub.googleapis.com");
        assert!(event.retry);
    }

    #[test]
    fn test_pubsub_without_topic_is_invalid() {
        let trigger = Trigger::Event(endpoint::EventTrigger {
            event_type: PUBSUB_PUBLISH_EVENT.to_string(),
            ..endpoint::EventTrigger::default()
        });
        assert!(matches!(
            function_from_endpoint(&endpoint(trigger)),
            Err(Error::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_path_patterns_use_operator() {
        let trigger = Trigger::Event(endpoint::EventTrigger {
            event_type: "google.cloud.firestore.document.v1.written".into(),
            event_filters: BTreeMap::from([("database".into(), "(default)".into())]),
            event_filter_path_patterns: BTreeMap::from([("document".into(), "users/{uid}".into())]),
            ..endpoint::EventTrigger::default()
        });
        let function = function_from_endpoint(&endpoint(trigger.clone())).unwrap();
        let filters = &function.event_trigger.as_ref().unwrap().event_filters;
        assert!(filters.contains(&EventFilter {
            attribute: "document".into(),
            value: "users/{uid}".into(),
            operator: Some(PATH_PATTERN_OPERATOR.into()),
        }));
        assert_eq!(
            function.event_trigger.as_ref().unwrap().retry_policy,
            Some(RetryPolicy::DoNotRetry)
        );

        assert_eq!(endpoint_from_function(&function).unwrap().trigger, trigger);
    }

    #[test]
    fn test_round_trip_every_representable_trigger() {
        let triggers = vec![
            Trigger::https(),
            Trigger::Callable(CallableTrigger {}),
            Trigger::Schedule(ScheduleTrigger::default()),
            Trigger::TaskQueue(TaskQueueTrigger::default()),
            Trigger::Blocking(BlockingTrigger {
                event_type: BEFORE_SIGN_IN_EVENT.into(),
                ..BlockingTrigger::default()
            }),
            pubsub(),
        ];
        for trigger in triggers {
            let ep = full_endpoint(trigger);
            let function = function_from_endpoint(&ep).unwrap();
            let back = endpoint_from_function(&function).unwrap();
            assert_eq!(back, ep, "round trip of {}", ep.trigger);
        }
    }

    #[test]
    fn test_labels() {
        let function = function_from_endpoint(&full_endpoint(Trigger::Schedule(
            ScheduleTrigger::default(),
        )))
        .unwrap();
        assert_eq!(function.labels[SCHEDULED_LABEL], "true");
        assert_eq!(function.labels[CODEBASE_LABEL], "backend");
        assert_eq!(function.labels[HASH_LABEL], "abc123");
        assert_eq!(function.labels["team"], "core");

        let blocking = function_from_endpoint(&endpoint(Trigger::Blocking(BlockingTrigger {
            event_type: BEFORE_SIGN_IN_EVENT.into(),
            ..BlockingTrigger::default()
        })))
        .unwrap();
        assert_eq!(blocking.labels[BLOCKING_LABEL], "before-sign-in");
    }

    #[test]
    fn test_default_codebase_clears_stale_label() {
        let mut ep = endpoint(Trigger::https());
        ep.labels.insert(CODEBASE_LABEL.into(), "old".into());
        let function = function_from_endpoint(&ep).unwrap();
        assert!(!function.labels.contains_key(CODEBASE_LABEL));

        let masks = field_masks(&serde_json::to_value(&function).unwrap(), &["labels"]);
        assert!(masks.contains(&"labels".to_string()));
    }

    #[test]
    fn test_trigger_label_wins_over_event_trigger() {
        let mut function = function_from_endpoint(&endpoint(pubsub())).unwrap();
        function
            .labels
            .insert(SCHEDULED_LABEL.into(), "true".into());
        let back = endpoint_from_function(&function).unwrap();
        assert_eq!(back.trigger, Trigger::Schedule(ScheduleTrigger::default()));
    }

    #[test]
    fn test_memory_rendering() {
        let mut ep = endpoint(Trigger::https());
        assert_eq!(
            function_from_endpoint(&ep).unwrap().service_config.available_memory.as_deref(),
            Some("256Mi")
        );
        ep.available_memory_mb = Some(4096);
        assert_eq!(
            function_from_endpoint(&ep).unwrap().service_config.available_memory.as_deref(),
            Some("4Gi")
        );
    }

    #[test]
    fn test_decimal_memory_from_provider() {
        let mut function = function_from_endpoint(&endpoint(Trigger::https())).unwrap();
        for (quantity, mb) in [
            ("1G", 954),
            ("512M", 488),
            ("1e9", 954),
            ("1.5e9", 1431),
            ("1073741824", 1024),
        ] {
            function.service_config.available_memory = Some(quantity.into());
            assert_eq!(
                endpoint_from_function(&function).unwrap().available_memory_mb,
                Some(mb),
                "{quantity}"
            );
        }
    }

    #[test]
    fn test_unparseable_memory_is_malformed() {
        let mut function = function_from_endpoint(&endpoint(Trigger::https())).unwrap();
        function.service_config.available_memory = Some("lots".into());
        assert!(matches!(
            endpoint_from_function(&function),
            Err(Error::MalformedProviderData(_))
        ));
    }

    #[test]
    fn test_vpc_clear_is_sent_as_null() {
        let mut ep = endpoint(Trigger::https());
        ep.vpc = Nullable::Null;
        ep.service_account = Nullable::Null;
        let function = function_from_endpoint(&ep).unwrap();
        let value = serde_json::to_value(&function).unwrap();

        let masks = field_masks(&value, &[]);
        assert!(masks.contains(&"serviceConfig.vpcConnector".to_string()));
        assert!(masks.contains(&"serviceConfig.vpcConnectorEgressSettings".to_string()));
        assert!(masks.contains(&"serviceConfig.serviceAccountEmail".to_string()));

        let body = to_body(&function).unwrap();
        assert!(body["serviceConfig"].get("vpcConnector").is_none());

        let absent = serde_json::to_value(function_from_endpoint(&endpoint(Trigger::https())).unwrap())
            .unwrap();
        assert!(!field_masks(&absent, &[]).iter().any(|m| m.contains("vpcConnector")));
    }

    #[test]
    fn test_service_account_shorthand_is_expanded() {
        let mut ep = endpoint(Trigger::https());
        ep.service_account = Nullable::Value("robot@".into());
        let function = function_from_endpoint(&ep).unwrap();
        assert_eq!(
            function.service_config.service_account_email,
            Nullable::Value("robot@proj.iam.gserviceaccount.com".to_string())
        );
    }

    #[test]
    fn test_reads_provider_listing() {
        let function: CloudFunction = serde_json::from_value(json!({
            "name": "projects/p/locations/europe-west1/functions/onUpload",
            "buildConfig": { "runtime": "python312", "entryPoint": "on_upload" },
            "serviceConfig": {
                "availableMemory": "512Mi",
                "uri": "https://onupload-xyz.a.run.app",
                "service": "projects/p/locations/europe-west1/services/onupload",
                "environmentVariables": { "LOG_EXECUTION_ID": "true", "FUNCTION_TARGET": "on_upload" }
            },
            "eventTrigger": {
                "eventType": "google.cloud.storage.object.v1.finalized",
                "eventFilters": [{ "attribute": "bucket", "value": "uploads" }],
                "retryPolicy": "RETRY_POLICY_UNSPECIFIED"
            },
            "state": "ACTIVE"
        }))
        .unwrap();

        let ep = endpoint_from_function(&function).unwrap();
        assert_eq!(ep.id, "onUpload");
        assert_eq!(ep.region, "europe-west1");
        assert_eq!(ep.entry_point, "on_upload");
        assert_eq!(ep.codebase, "default");
        assert!(ep.environment_variables.is_empty());
        assert_eq!(ep.run_service_id.as_deref(), Some("onupload"));
        assert_eq!(ep.available_memory_mb, Some(512));
        let Trigger::Event(event) = ep.trigger else {
            panic!("expected event trigger");
        };
        assert!(!event.retry);
        assert_eq!(event.event_filters["bucket"], "uploads");
    }
}
