//! Runtime configuration: API origins, timeouts and concurrency bounds.

use std::env;
use std::time::Duration;

use crate::providers::http::DEFAULT_TIMEOUT_SECS;
use crate::retry::RetryConfig;

/// Default number of endpoints reconciled at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Deployment configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Managed-functions API origin.
    pub functions_origin: String,
    /// Container-service API origin.
    pub run_origin: String,
    /// Task-queue API origin.
    pub tasks_origin: String,
    /// Resource manager API origin (project IAM).
    pub resource_manager_origin: String,
    /// IAM API origin (service accounts).
    pub iam_origin: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Endpoints reconciled concurrently.
    pub max_concurrency: usize,
    /// Retry policy for conflicting IAM writes.
    pub retry: RetryConfig,
    /// Initial delay between operation polls.
    pub poll_backoff: Duration,
    /// Maximum delay between operation polls.
    pub poll_max_backoff: Duration,
    /// Give up on an operation after this long.
    pub poll_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            functions_origin: "https://cloudfunctions.googleapis.com".to_string(),
            run_origin: "https://run.googleapis.com".to_string(),
            tasks_origin: "https://cloudtasks.googleapis.com".to_string(),
            resource_manager_origin: "https://cloudresourcemanager.googleapis.com".to_string(),
            iam_origin: "https://iam.googleapis.com".to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryConfig::default(),
            poll_backoff: Duration::from_millis(250),
            poll_max_backoff: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(25 * 60),
        }
    }
}

impl Config {
    /// Defaults overridden from the environment.
    ///
    /// Unparseable numbers keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut retry = defaults.retry.clone();
        retry.max_attempts = env_number::<u32>("FNCTL_CONFLICT_MAX_ATTEMPTS")
            .filter(|n| *n > 0)
            .unwrap_or(retry.max_attempts);

        Self {
            functions_origin: env_origin("FUNCTIONS_V2_URL", defaults.functions_origin),
            run_origin: env_origin("CLOUD_RUN_URL", defaults.run_origin),
            tasks_origin: env_origin("CLOUD_TASKS_URL", defaults.tasks_origin),
            resource_manager_origin: env_origin(
                "RESOURCE_MANAGER_URL",
                defaults.resource_manager_origin,
            ),
            iam_origin: env_origin("IAM_URL", defaults.iam_origin),
            request_timeout: env_number::<u64>("FNCTL_REQUEST_TIMEOUT_SECS")
                .filter(|n| *n > 0)
                .map_or(defaults.request_timeout, Duration::from_secs),
            max_concurrency: env_number::<usize>("FNCTL_MAX_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrency),
            retry,
            ..defaults
        }
    }
}

fn env_origin(key: &str, default: String) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    const KEYS: [&str; 8] = [
        "FUNCTIONS_V2_URL",
        "CLOUD_RUN_URL",
        "CLOUD_TASKS_URL",
        "RESOURCE_MANAGER_URL",
        "IAM_URL",
        "FNCTL_REQUEST_TIMEOUT_SECS",
        "FNCTL_MAX_CONCURRENCY",
        "FNCTL_CONFLICT_MAX_ATTEMPTS",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        assert_eq!(Config::from_env(), Config::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("CLOUD_TASKS_URL", "http://localhost:9000/");
        env::set_var("FNCTL_REQUEST_TIMEOUT_SECS", "5");
        env::set_var("FNCTL_MAX_CONCURRENCY", "2");
        env::set_var("FNCTL_CONFLICT_MAX_ATTEMPTS", "3");

        let config = Config::from_env();
        assert_eq!(config.tasks_origin, "http://localhost:9000");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.run_origin, "https://run.googleapis.com");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_garbage() {
        clear_env();
        env::set_var("FNCTL_MAX_CONCURRENCY", "lots");
        env::set_var("FNCTL_CONFLICT_MAX_ATTEMPTS", "0");

        let config = Config::from_env();
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.retry.max_attempts, 6);

        clear_env();
    }
}
