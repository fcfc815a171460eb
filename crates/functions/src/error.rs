//! Error types for endpoint conversion and provider reconciliation.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Provider status reported when a precondition on the resource is not met.
pub const FAILED_PRECONDITION: &str = "FAILED_PRECONDITION";

/// Provider status reported when the request payload is rejected.
pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";

/// Errors that can occur while converting or reconciling endpoints.
#[derive(Error, Debug)]
pub enum Error {
    /// A converter was invoked with an endpoint for a different platform.
    #[error("Cannot convert a {actual} endpoint with the {expected} converter")]
    PlatformMismatch {
        expected: &'static str,
        actual: String,
    },

    /// The provider returned data that cannot be mapped back onto an endpoint.
    #[error("Malformed provider data: {0}")]
    MalformedProviderData(String),

    /// The endpoint cannot be expressed on the target provider.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The caller lacks permission to read or modify an IAM policy.
    #[error("Permission denied on {resource}: {message}")]
    PermissionDenied { resource: String, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api {
        status: u16,
        provider_status: Option<String>,
        message: String,
    },

    /// The provider refused a write for a business reason.
    #[error("{message}")]
    Rejected { status: String, message: String },

    /// An optimistic-concurrency write kept conflicting.
    #[error("Gave up updating {resource} after {attempts} conflicting writes")]
    ConflictRetriesExhausted { resource: String, attempts: u32 },

    /// A long-running operation finished with an error.
    #[error("Operation {name} failed: {message}")]
    OperationFailed { name: String, message: String },

    /// Operation timed out.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status carried by the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::NotFound(_) => Some(404),
            Self::PermissionDenied { .. } => Some(403),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Structured provider status string (`{error:{status}}`), if any.
    #[must_use]
    pub fn provider_status(&self) -> Option<&str> {
        match self {
            Self::Api {
                provider_status, ..
            } => provider_status.as_deref(),
            Self::Rejected { status, .. } => Some(status),
            _ => None,
        }
    }

    /// Whether the error is the provider's not-found signal.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Whether the caller lacks permission on the resource.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        self.status() == Some(403)
    }

    /// Whether a write lost an optimistic-concurrency race or was throttled.
    ///
    /// These are the only errors the reconcilers retry.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self.status(), Some(409 | 429))
            || matches!(
                self.provider_status(),
                Some("ABORTED" | "RESOURCE_EXHAUSTED")
            )
    }

    /// Map business-rule rejections of a write to a user-facing message.
    ///
    /// Errors with other statuses are returned unchanged.
    #[must_use]
    pub fn rejection(self, resource: &str, verb: &str) -> Self {
        let mapped = match &self {
            Self::Api {
                provider_status: Some(status),
                message,
                ..
            } => match status.as_str() {
                FAILED_PRECONDITION => Some((
                    status.clone(),
                    format!(
                        "Failed to {verb} {resource}: the resource is not in a state that allows it. {message}"
                    ),
                )),
                INVALID_ARGUMENT => Some((
                    status.clone(),
                    format!(
                        "Failed to {verb} {resource}: the provider rejected its configuration. {message}"
                    ),
                )),
                _ => None,
            },
            _ => None,
        };

        match mapped {
            Some((status, message)) => Self::Rejected { status, message },
            None => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, provider_status: Option<&str>) -> Error {
        Error::Api {
            status,
            provider_status: provider_status.map(str::to_string),
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_conflict_classification() {
        assert!(api(429, None).is_conflict());
        assert!(api(409, Some("ABORTED")).is_conflict());
        assert!(api(400, Some("RESOURCE_EXHAUSTED")).is_conflict());
        assert!(!api(403, Some("PERMISSION_DENIED")).is_conflict());
        assert!(!Error::NotFound("queue".into()).is_conflict());
    }

    #[test]
    fn test_not_found_and_permission() {
        assert!(Error::NotFound("x".into()).is_not_found());
        assert!(api(403, None).is_permission_denied());
        assert!(!api(500, None).is_not_found());
    }

    #[test]
    fn test_rejection_maps_known_statuses() {
        let err = api(400, Some(FAILED_PRECONDITION)).rejection("projects/p/functions/f", "update");
        match err {
            Error::Rejected { status, message } => {
                assert_eq!(status, FAILED_PRECONDITION);
                assert!(message.contains("update projects/p/functions/f"));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = api(400, Some(INVALID_ARGUMENT)).rejection("f", "create");
        assert!(matches!(err, Error::Rejected { .. }));
    }

    #[test]
    fn test_rejection_passes_other_errors_through() {
        let err = api(500, Some("INTERNAL")).rejection("f", "update");
        assert!(matches!(err, Error::Api { status: 500, .. }));

        let err = Error::NotFound("f".into()).rejection("f", "update");
        assert!(err.is_not_found());
    }
}
