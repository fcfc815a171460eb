//! Trigger variants.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::Nullable;

/// Event type of a Pub/Sub message publication.
pub const PUBSUB_PUBLISH_EVENT: &str = "google.cloud.pubsub.topic.v1.messagePublished";

/// Auth blocking event fired before a user is created.
pub const BEFORE_CREATE_EVENT: &str = "providers/cloud.auth/eventTypes/user.beforeCreate";

/// Auth blocking event fired before a user signs in.
pub const BEFORE_SIGN_IN_EVENT: &str = "providers/cloud.auth/eventTypes/user.beforeSignIn";

/// Auth blocking event fired before an email is sent.
pub const BEFORE_SEND_EMAIL_EVENT: &str = "providers/cloud.auth/eventTypes/user.beforeSendEmail";

/// Auth blocking event fired before an SMS is sent.
pub const BEFORE_SEND_SMS_EVENT: &str = "providers/cloud.auth/eventTypes/user.beforeSendSms";

/// Serialized keys of the trigger variants, as they appear in endpoint documents.
pub const TRIGGER_KEYS: [&str; 6] = [
    "httpsTrigger",
    "callableTrigger",
    "eventTrigger",
    "scheduleTrigger",
    "taskQueueTrigger",
    "blockingTrigger",
];

/// How an endpoint is invoked. Every endpoint has exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Trigger {
    #[serde(rename = "httpsTrigger")]
    Https(HttpsTrigger),
    #[serde(rename = "callableTrigger")]
    Callable(CallableTrigger),
    #[serde(rename = "eventTrigger")]
    Event(EventTrigger),
    #[serde(rename = "scheduleTrigger")]
    Schedule(ScheduleTrigger),
    #[serde(rename = "taskQueueTrigger")]
    TaskQueue(TaskQueueTrigger),
    #[serde(rename = "blockingTrigger")]
    Blocking(BlockingTrigger),
}

impl Trigger {
    /// Plain HTTPS trigger with no invoker override.
    #[must_use]
    pub fn https() -> Self {
        Self::Https(HttpsTrigger::default())
    }

    /// User-facing name of the trigger kind.
    ///
    /// Event and blocking triggers report their event type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Https(_) => "https",
            Self::Callable(_) => "callable",
            Self::Event(e) => &e.event_type,
            Self::Schedule(_) => "scheduled",
            Self::TaskQueue(_) => "taskQueue",
            Self::Blocking(b) => &b.event_type,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Invoked over HTTPS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpsTrigger {
    /// Who may invoke the function (`public`, `private` or service accounts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoker: Option<Vec<String>>,
}

/// Invoked through a client SDK callable protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallableTrigger {}

/// Invoked by an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTrigger {
    /// Event type, e.g. [`PUBSUB_PUBLISH_EVENT`].
    pub event_type: String,
    /// Exact-match attribute filters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub event_filters: BTreeMap<String, String>,
    /// Path-pattern attribute filters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub event_filter_path_patterns: BTreeMap<String, String>,
    /// Whether failed deliveries are retried.
    #[serde(default)]
    pub retry: bool,
    /// Region of the event source, when it differs from the function's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Event channel for third-party events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// Invoked on a schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<ScheduleRetryConfig>,
}

/// Retry settings of a scheduled job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRetryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_backoff_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_doublings: Option<u32>,
}

/// Invoked by a task queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueueTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limits: Option<TaskQueueRateLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<TaskQueueRetryConfig>,
    /// Who may enqueue tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoker: Option<Vec<String>>,
}

/// Dispatch rate limits of a task queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueueRateLimits {
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub max_concurrent_dispatches: Nullable<u32>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub max_dispatches_per_second: Nullable<f64>,
}

/// Retry policy of a task queue.
///
/// A `null` field resets the queue to the provider default instead of the
/// defaults this crate applies to unset fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueueRetryConfig {
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub max_attempts: Nullable<i32>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub max_retry_seconds: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub max_backoff_seconds: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub max_doublings: Nullable<i32>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub min_backoff_seconds: Nullable<f64>,
}

/// Invoked synchronously by an auth lifecycle event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingTrigger {
    /// One of the `BEFORE_*_EVENT` types.
    pub event_type: String,
    /// Which credentials are passed to the function.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, bool>,
}
