//! Conversion between task-queue triggers and [`Queue`].

use super::models::Queue;
use crate::endpoint::{
    Endpoint, Nullable, TaskQueueRateLimits, TaskQueueRetryConfig, TaskQueueTrigger, Trigger,
};
use crate::error::{Error, Result};
use crate::proto::{duration_from_secs_f64, seconds_from_duration};

/// Name of the queue backing `endpoint`.
#[must_use]
pub fn queue_name(endpoint: &Endpoint) -> String {
    format!(
        "projects/{}/locations/{}/queues/{}",
        endpoint.project, endpoint.region, endpoint.id
    )
}

/// Queue for a task-queue endpoint: [`Queue::default_settings`] overridden by
/// whatever the trigger sets.
///
/// # Errors
/// Returns [`Error::InvalidEndpoint`] when the endpoint has another trigger.
pub fn queue_from_endpoint(endpoint: &Endpoint) -> Result<Queue> {
    let Trigger::TaskQueue(trigger) = &endpoint.trigger else {
        return Err(Error::InvalidEndpoint(format!(
            "{endpoint} has a {} trigger, not a task queue",
            endpoint.trigger
        )));
    };

    let mut queue = Queue {
        name: queue_name(endpoint),
        ..Queue::default_settings()
    };

    if let (Some(wanted), Some(limits)) = (&trigger.rate_limits, queue.rate_limits.as_mut()) {
        override_with(&mut limits.max_concurrent_dispatches, &wanted.max_concurrent_dispatches);
        override_with(&mut limits.max_dispatches_per_second, &wanted.max_dispatches_per_second);
    }

    if let (Some(wanted), Some(retry)) = (&trigger.retry_config, queue.retry_config.as_mut()) {
        override_with(&mut retry.max_attempts, &wanted.max_attempts);
        override_with(&mut retry.max_doublings, &wanted.max_doublings);
        let durations = [
            (&mut retry.max_retry_duration, wanted.max_retry_seconds.clone()),
            (&mut retry.max_backoff, wanted.max_backoff_seconds.clone()),
            (&mut retry.min_backoff, wanted.min_backoff_seconds.clone()),
        ];
        for (field, seconds) in durations {
            override_with(field, &seconds.map(duration_from_secs_f64));
        }
    }

    Ok(queue)
}

/// Replace `field` unless `wanted` is absent; `Null` clears it.
fn override_with<T: Clone>(field: &mut Nullable<T>, wanted: &Nullable<T>) {
    if !wanted.is_absent() {
        *field = wanted.clone();
    }
}

/// Task-queue trigger described by `queue`.
///
/// The invoker list lives in the queue's IAM policy and is not recovered.
///
/// # Errors
/// Returns [`Error::MalformedProviderData`] for malformed durations.
pub fn trigger_from_queue(queue: &Queue) -> Result<TaskQueueTrigger> {
    let rate_limits = queue.rate_limits.as_ref().map(|limits| TaskQueueRateLimits {
        max_concurrent_dispatches: limits.max_concurrent_dispatches.clone(),
        max_dispatches_per_second: limits.max_dispatches_per_second.clone(),
    });

    let retry_config = queue
        .retry_config
        .as_ref()
        .map(|retry| -> Result<TaskQueueRetryConfig> {
            let seconds = |d: &Nullable<String>| d.clone().try_map(|d| seconds_from_duration(&d));
            Ok(TaskQueueRetryConfig {
                max_attempts: retry.max_attempts.clone(),
                max_retry_seconds: seconds(&retry.max_retry_duration)?,
                max_backoff_seconds: seconds(&retry.max_backoff)?,
                max_doublings: retry.max_doublings.clone(),
                min_backoff_seconds: seconds(&retry.min_backoff)?,
            })
        })
        .transpose()?;

    Ok(TaskQueueTrigger {
        rate_limits,
        retry_config,
        invoker: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Platform;

    fn endpoint(trigger: TaskQueueTrigger) -> Endpoint {
        Endpoint::new(
            "tq",
            "project",
            "us-central1",
            Platform::FunctionsV2,
            Trigger::TaskQueue(trigger),
        )
    }

    #[test]
    fn test_defaults_when_unset() {
        let queue = queue_from_endpoint(&endpoint(TaskQueueTrigger::default())).unwrap();
        assert_eq!(queue.name, "projects/project/locations/us-central1/queues/tq");
        assert_eq!(
            Queue {
                name: String::new(),
                ..queue
            },
            Queue::default_settings()
        );
    }

    #[test]
    fn test_overrides() {
        let queue = queue_from_endpoint(&endpoint(TaskQueueTrigger {
            rate_limits: Some(TaskQueueRateLimits {
                max_concurrent_dispatches: Nullable::Value(20),
                max_dispatches_per_second: Nullable::Absent,
            }),
            retry_config: Some(TaskQueueRetryConfig {
                max_attempts: Nullable::Value(10),
                max_retry_seconds: Nullable::Value(60.0),
                max_backoff_seconds: Nullable::Value(20.0),
                max_doublings: Nullable::Absent,
                min_backoff_seconds: Nullable::Value(0.5),
            }),
            invoker: Some(vec!["public".into()]),
        }))
        .unwrap();

        let limits = queue.rate_limits.unwrap();
        assert_eq!(limits.max_concurrent_dispatches, Nullable::Value(20));
        assert_eq!(limits.max_dispatches_per_second, Nullable::Value(500.0));

        let retry = queue.retry_config.unwrap();
        assert_eq!(retry.max_attempts, Nullable::Value(10));
        assert_eq!(retry.max_doublings, Nullable::Value(16));
        assert_eq!(retry.max_retry_duration, Nullable::Value("60s".to_string()));
        assert_eq!(retry.max_backoff, Nullable::Value("20s".to_string()));
        assert_eq!(retry.min_backoff, Nullable::Value("0.5s".to_string()));
    }

    #[test]
    fn test_null_clears_queue_field() {
        let queue = queue_from_endpoint(&endpoint(TaskQueueTrigger {
            retry_config: Some(TaskQueueRetryConfig {
                max_attempts: Nullable::Null,
                min_backoff_seconds: Nullable::Null,
                ..TaskQueueRetryConfig::default()
            }),
            ..TaskQueueTrigger::default()
        }))
        .unwrap();

        let retry = queue.retry_config.as_ref().unwrap();
        assert_eq!(retry.max_attempts, Nullable::Null);
        assert_eq!(retry.min_backoff, Nullable::Null);
        assert_eq!(retry.max_doublings, Nullable::Value(16));

        let mask = crate::proto::update_mask(&queue, &[]).unwrap();
        assert!(mask.split(',').any(|path| path == "retryConfig.maxAttempts"));
        assert!(mask.split(',').any(|path| path == "retryConfig.minBackoff"));

        let body = crate::proto::to_body(&queue).unwrap();
        assert!(body["retryConfig"].get("maxAttempts").is_none());
        assert!(body["retryConfig"].get("minBackoff").is_none());
        assert_eq!(body["retryConfig"]["maxDoublings"], 16);
    }

    #[test]
    fn test_rejects_other_triggers() {
        let ep = Endpoint::new("fn", "p", "r", Platform::FunctionsV2, Trigger::https());
        assert!(matches!(queue_from_endpoint(&ep), Err(Error::InvalidEndpoint(_))));
    }

    #[test]
    fn test_trigger_from_queue() {
        let trigger = trigger_from_queue(&Queue::default_settings()).unwrap();
        let retry = trigger.retry_config.unwrap();
        assert_eq!(retry.max_attempts, Nullable::Value(3));
        assert_eq!(retry.min_backoff_seconds, Nullable::Value(0.1));
        assert_eq!(retry.max_backoff_seconds, Nullable::Value(3600.0));
        assert_eq!(retry.max_retry_seconds, Nullable::Absent);
        assert_eq!(
            trigger.rate_limits.unwrap().max_concurrent_dispatches,
            Nullable::Value(1000)
        );
    }

    #[test]
    fn test_trigger_from_queue_rejects_bad_duration() {
        let mut queue = Queue::default_settings();
        queue.retry_config.as_mut().unwrap().max_backoff = Nullable::Value("soon".into());
        assert!(matches!(
            trigger_from_queue(&queue),
            Err(Error::MalformedProviderData(_))
        ));
    }
}
