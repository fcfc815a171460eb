//! Content fingerprints for idempotent redeploys.

use sha1::{Digest, Sha1};

use crate::endpoint::Endpoint;

/// Fingerprint of an endpoint's code and runtime configuration.
///
/// Covers the source archive hash, plaintext environment variables and the
/// pinned secret versions. Two endpoints with the same fingerprint deploy the
/// same thing, so an update can be skipped.
#[must_use]
pub fn endpoint_hash(source_hash: &str, endpoint: &Endpoint) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source_hash.as_bytes());

    // Environment variables are a BTreeMap, so iteration order is stable.
    for (key, value) in &endpoint.environment_variables {
        hasher.update(b"\0env\0");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }

    let mut secrets: Vec<_> = endpoint
        .secret_environment_variables
        .iter()
        .map(|s| format!("{}={}/{}@{}", s.key, s.project_id, s.secret, s.version))
        .collect();
    secrets.sort();
    for secret in secrets {
        hasher.update(b"\0secret\0");
        hasher.update(secret.as_bytes());
    }

    hex::encode(hasher.finalize())
}

/// Stamp every endpoint that carries no hash with its [`endpoint_hash`].
///
/// Hashes already set on an endpoint are kept.
pub fn assign_hashes(endpoints: &mut [Endpoint], source_hash: &str) {
    for endpoint in endpoints.iter_mut().filter(|e| e.hash.is_none()) {
        endpoint.hash = Some(endpoint_hash(source_hash, endpoint));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Platform, SecretEnvVar, Trigger};

    fn endpoint() -> Endpoint {
        Endpoint::new("fn", "p", "r", Platform::FunctionsV2, Trigger::https())
    }

    #[test]
    fn test_hash_is_stable_and_hex() {
        let a = endpoint_hash("src", &endpoint());
        let b = endpoint_hash("src", &endpoint());
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_changes_with_inputs() {
        let base = endpoint_hash("src", &endpoint());
        assert_ne!(base, endpoint_hash("other", &endpoint()));

        let mut ep = endpoint();
        ep.environment_variables.insert("FOO".into(), "bar".into());
        assert_ne!(base, endpoint_hash("src", &ep));

        let mut ep = endpoint();
        ep.secret_environment_variables.push(SecretEnvVar {
            key: "API_KEY".into(),
            secret: "api-key".into(),
            project_id: "p".into(),
            version: "3".into(),
        });
        let pinned = endpoint_hash("src", &ep);
        ep.secret_environment_variables[0].version = "4".into();
        assert_ne!(pinned, endpoint_hash("src", &ep));
    }

    #[test]
    fn test_assign_hashes_keeps_explicit_hash() {
        let mut explicit = endpoint();
        explicit.hash = Some("pinned".into());
        let mut endpoints = vec![endpoint(), explicit];

        assign_hashes(&mut endpoints, "src");
        assert_eq!(endpoints[0].hash, Some(endpoint_hash("src", &endpoint())));
        assert_eq!(endpoints[1].hash.as_deref(), Some("pinned"));
    }

    #[test]
    fn test_hash_ignores_secret_order() {
        let secret = |key: &str| SecretEnvVar {
            key: key.into(),
            secret: key.to_lowercase(),
            project_id: "p".into(),
            version: "1".into(),
        };
        let mut a = endpoint();
        a.secret_environment_variables = vec![secret("A"), secret("B")];
        let mut b = endpoint();
        b.secret_environment_variables = vec![secret("B"), secret("A")];
        assert_eq!(endpoint_hash("s", &a), endpoint_hash("s", &b));
    }
}
