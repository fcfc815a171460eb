//! IAM policy reconciliation.
//!
//! Policies are never cached: every reconciliation reads the current policy,
//! computes the desired one, and writes it back with the etag it read. A write
//! that loses a race is retried from a fresh read by [`update_policy`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::providers::resource_manager::ProjectPolicy;
use crate::providers::traits::{ApiClient, ServiceAccountResolver};
use crate::retry::{retry_on_conflict, RetryConfig};

/// Lets a service agent mint tokens for other service accounts.
pub const SERVICE_ACCOUNT_TOKEN_CREATOR_ROLE: &str = "roles/iam.serviceAccountTokenCreator";
/// Lets a principal invoke container services.
pub const RUN_INVOKER_ROLE: &str = "roles/run.invoker";
/// Lets a principal receive Eventarc events.
pub const EVENTARC_EVENT_RECEIVER_ROLE: &str = "roles/eventarc.eventReceiver";
/// Role of the Eventarc service agent.
pub const EVENTARC_SERVICE_AGENT_ROLE: &str = "roles/eventarc.serviceAgent";

/// Policy version that supports conditional bindings.
pub const POLICY_VERSION: i32 = 3;

// ============================================================================
// Policy model
// ============================================================================

/// An IAM policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Role grants.
    #[serde(default)]
    pub bindings: Vec<Binding>,
    /// Concurrency token; echoed back unchanged on write.
    #[serde(default)]
    pub etag: String,
    /// Policy format version.
    #[serde(default)]
    pub version: i32,
}

impl Policy {
    /// An empty policy, used when a resource is known to be brand new.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            bindings: Vec::new(),
            etag: String::new(),
            version: POLICY_VERSION,
        }
    }
}

/// Grants `role` to `members`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// Role name, e.g. `roles/run.invoker`.
    pub role: String,
    /// Principals, e.g. `serviceAccount:a@p.iam.gserviceaccount.com`.
    #[serde(default)]
    pub members: Vec<String>,
    /// Condition restricting the grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expr>,
}

impl Binding {
    /// Unconditional binding of `role` to `members`.
    #[must_use]
    pub fn new<I, S>(role: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role: role.into(),
            members: members.into_iter().map(Into::into).collect(),
            condition: None,
        }
    }
}

/// A CEL condition on a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expr {
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Merge `required` into `policy` and report whether anything changed.
///
/// Each required binding is matched by role against the policy's
/// unconditional bindings. Missing bindings are appended; for existing ones
/// only members not already listed are appended, in order. Duplicate members in
/// `required` are collapsed.
pub fn merge_bindings(policy: &mut Policy, required: &[Binding]) -> bool {
    let mut changed = false;

    for wanted in required {
        let index = match policy
            .bindings
            .iter()
            .position(|b| b.role == wanted.role && b.condition.is_none())
        {
            Some(index) => index,
            None => {
                policy.bindings.push(Binding::new(wanted.role.clone(), Vec::<String>::new()));
                changed = true;
                policy.bindings.len() - 1
            }
        };

        let binding = &mut policy.bindings[index];
        for member in &wanted.members {
            if !binding.members.contains(member) {
                binding.members.push(member.clone());
                changed = true;
            }
        }
    }

    changed
}

/// Copy of `policy` where `role` is granted to exactly `members`.
///
/// The first unconditional binding of `role` is replaced in place and any
/// others are dropped; an empty `members` removes the role. Etag and version
/// are kept, so an already matching policy comes back equal.
#[must_use]
pub fn with_role_members(policy: &Policy, role: &str, members: &[String]) -> Policy {
    let mut bindings = Vec::with_capacity(policy.bindings.len() + 1);
    let mut placed = members.is_empty();
    for binding in &policy.bindings {
        if binding.role != role || binding.condition.is_some() {
            bindings.push(binding.clone());
        } else if !placed {
            bindings.push(Binding::new(role, members.iter().cloned()));
            placed = true;
        }
    }
    if !placed {
        bindings.push(Binding::new(role, members.iter().cloned()));
    }
    Policy {
        bindings,
        etag: policy.etag.clone(),
        version: policy.version,
    }
}

// ============================================================================
// Read-modify-write
// ============================================================================

/// A resource whose IAM policy can be read and written.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Resource name, for logs and errors.
    fn resource(&self) -> &str;

    /// Read the current policy.
    async fn get_policy(&self) -> Result<Policy>;

    /// Write `policy`; fails with a conflict when its etag is stale.
    async fn set_policy(&self, policy: &Policy) -> Result<Policy>;
}

/// Read, mutate and conditionally write the policy of `store`.
///
/// `mutate` computes the desired policy from the one just read. Nothing is
/// written when it equals the current policy. When `assumed` is given the first
/// attempt uses it instead of reading; conflict retries always re-read.
///
/// Returns whether a write happened.
///
/// # Errors
/// Returns the first non-conflict error, or
/// [`Error::ConflictRetriesExhausted`].
pub async fn update_policy<S, F>(
    store: &S,
    retry: &RetryConfig,
    assumed: Option<Policy>,
    mutate: F,
) -> Result<bool>
where
    S: PolicyStore + ?Sized,
    F: Fn(&Policy) -> Result<Policy> + Sync,
{
    let mutate = &mutate;
    let mut assumed = assumed;

    retry_on_conflict(retry, store.resource(), move |attempt| {
        let initial = if attempt == 1 { assumed.take() } else { None };
        async move {
            let current = match initial {
                Some(policy) => policy,
                None => store.get_policy().await?,
            };
            let desired = mutate(&current)?;
            if desired == current {
                debug!(resource = %store.resource(), "IAM policy already up to date");
                return Ok(false);
            }
            store.set_policy(&desired).await?;
            Ok(true)
        }
    })
    .await
}

/// Actionable error for a 403 on a project policy.
fn permission_denied(resource: &str, roles: &[String]) -> Error {
    Error::PermissionDenied {
        resource: resource.to_string(),
        message: format!(
            "you need permission resourcemanager.projects.setIamPolicy to grant {}. \
             Ask a project Owner or an administrator with the Security Admin role to \
             grant these roles, then retry.",
            roles.join(", ")
        ),
    }
}

// ============================================================================
// Service agents
// ============================================================================

/// Token creator grant for the Pub/Sub service agent.
#[must_use]
pub fn pubsub_service_agent_bindings(project_number: &str) -> Vec<Binding> {
    vec![Binding::new(
        SERVICE_ACCOUNT_TOKEN_CREATOR_ROLE,
        [format!(
            "serviceAccount:service-{project_number}@gcp-sa-pubsub.iam.gserviceaccount.com"
        )],
    )]
}

/// Invoker and event receiver grants for the default compute service account.
#[must_use]
pub fn default_compute_service_agent_bindings(project_number: &str) -> Vec<Binding> {
    let member = format!("serviceAccount:{project_number}-compute@developer.gserviceaccount.com");
    vec![
        Binding::new(RUN_INVOKER_ROLE, [member.clone()]),
        Binding::new(EVENTARC_EVENT_RECEIVER_ROLE, [member]),
    ]
}

/// Service agent role for the Eventarc service agent.
#[must_use]
pub fn eventarc_service_agent_bindings(project_number: &str) -> Vec<Binding> {
    vec![Binding::new(
        EVENTARC_SERVICE_AGENT_ROLE,
        [format!(
            "serviceAccount:service-{project_number}@gcp-sa-eventarc.iam.gserviceaccount.com"
        )],
    )]
}

// ============================================================================
// Project policy reconciler
// ============================================================================

/// Grants project-level roles.
#[derive(Clone)]
pub struct PolicyReconciler {
    /// Resource manager API client.
    client: Arc<dyn ApiClient>,
    /// Service account lookup.
    resolver: Arc<dyn ServiceAccountResolver>,
    /// Conflict retry policy.
    retry: RetryConfig,
}

impl PolicyReconciler {
    /// Reconciler writing through `client` (the resource manager API).
    #[must_use]
    pub fn new(
        client: Arc<dyn ApiClient>,
        resolver: Arc<dyn ServiceAccountResolver>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            resolver,
            retry,
        }
    }

    /// Grant `roles` on `project` to a service account.
    ///
    /// `service_account` is an email; it is resolved to its canonical name
    /// first unless `skip_account_lookup` is set.
    ///
    /// # Errors
    /// Returns [`Error::PermissionDenied`] when the caller may not read or
    /// write the project policy, or any lookup and write error.
    #[instrument(skip(self, roles), fields(project = %project, service_account = %service_account))]
    pub async fn grant_roles_to_service_account(
        &self,
        project: &str,
        service_account: &str,
        roles: &[String],
        skip_account_lookup: bool,
    ) -> Result<bool> {
        let full_name = if skip_account_lookup {
            service_account.to_string()
        } else {
            self.resolver.resolve(project, service_account).await?
        };
        let email = full_name.rsplit('/').next().unwrap_or(&full_name);
        let member = format!("serviceAccount:{email}");

        let required: Vec<Binding> = roles
            .iter()
            .map(|role| Binding::new(role.clone(), [member.clone()]))
            .collect();

        let changed = self.merge_into_project(project, &required).await?;
        if changed {
            info!(member = %member, roles = ?roles, "Granted project roles");
        }
        Ok(changed)
    }

    /// Make sure service agents hold the roles deployments depend on.
    ///
    /// # Errors
    /// Returns [`Error::PermissionDenied`] when the caller may not read or
    /// write the project policy, or any write error.
    #[instrument(skip(self, required), fields(project_number = %project_number))]
    pub async fn ensure_service_agent_roles(
        &self,
        project_number: &str,
        required: &[Binding],
    ) -> Result<bool> {
        if required.iter().all(|b| b.members.is_empty()) {
            return Ok(false);
        }
        let changed = self.merge_into_project(project_number, required).await?;
        if changed {
            info!(bindings = required.len(), "Granted service agent roles");
        }
        Ok(changed)
    }

    async fn merge_into_project(&self, project: &str, required: &[Binding]) -> Result<bool> {
        let store = ProjectPolicy::new(self.client.clone(), project);
        let result = update_policy(&store, &self.retry, None, |current| {
            let mut desired = current.clone();
            merge_bindings(&mut desired, required);
            Ok(desired)
        })
        .await;

        result.map_err(|e| {
            if e.is_permission_denied() {
                let roles: Vec<String> = required.iter().map(|b| b.role.clone()).collect();
                permission_denied(&format!("projects/{project}"), &roles)
            } else {
                e
            }
        })
    }
}
