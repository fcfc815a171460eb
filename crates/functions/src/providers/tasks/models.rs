//! Task-queue (v2) API models.

use serde::{Deserialize, Serialize};

use crate::endpoint::Nullable;
use crate::proto::{duration_from_secs_f64, seconds_from_duration};

/// A task queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Queue {
    /// `projects/{project}/locations/{region}/queues/{id}`.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limits: Option<RateLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<QueueRetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
}

/// Dispatch rate limits.
///
/// A `Null` field is cleared, so the server falls back to its own default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimits {
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub max_dispatches_per_second: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub max_concurrent_dispatches: Nullable<u32>,
}

/// Retry policy for failed tasks. Durations are protobuf duration strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRetryConfig {
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub max_attempts: Nullable<i32>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub max_retry_duration: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub min_backoff: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub max_backoff: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub max_doublings: Nullable<i32>,
}

/// Queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Running,
    Paused,
    Disabled,
}

impl Queue {
    /// Settings the server fills in for unset fields, except `maxAttempts`:
    /// the server default is unbounded, so queues are capped at 3 attempts.
    #[must_use]
    pub fn default_settings() -> Self {
        Self {
            name: String::new(),
            rate_limits: Some(RateLimits {
                max_dispatches_per_second: Nullable::Value(500.0),
                max_concurrent_dispatches: Nullable::Value(1000),
            }),
            retry_config: Some(QueueRetryConfig {
                max_attempts: Nullable::Value(3),
                max_retry_duration: Nullable::Absent,
                min_backoff: Nullable::Value("0.100s".to_string()),
                max_backoff: Nullable::Value("3600s".to_string()),
                max_doublings: Nullable::Value(16),
            }),
            state: Some(State::Running),
        }
    }

    /// Copy in canonical form, for comparison.
    ///
    /// Durations are respelled and cleared fields read as unset, since the
    /// server reports a cleared field by omitting it. Unparseable durations
    /// are kept verbatim.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut queue = self.clone();
        if let Some(limits) = queue.rate_limits.as_mut() {
            limits.max_dispatches_per_second.clear_null();
            limits.max_concurrent_dispatches.clear_null();
        }
        if let Some(retry) = queue.retry_config.as_mut() {
            retry.max_attempts.clear_null();
            retry.max_doublings.clear_null();
            for duration in [
                &mut retry.max_retry_duration,
                &mut retry.min_backoff,
                &mut retry.max_backoff,
            ] {
                duration.clear_null();
                if let Nullable::Value(spelled) = duration {
                    if let Ok(seconds) = seconds_from_duration(spelled) {
                        *spelled = duration_from_secs_f64(seconds);
                    }
                }
            }
        }
        queue
    }

    /// Whether two queues are equal once normalized.
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}
