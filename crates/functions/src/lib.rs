//! Endpoint reconciliation for serverless deployments.
//!
//! This crate translates a provider-agnostic [`Endpoint`] into the resources
//! each provider stores, and back:
//!
//! - **Managed functions** (second generation) - [`providers::functions`]
//! - **Container services** - [`providers::run`]
//! - **Task queues** - [`providers::tasks`]
//!
//! ## Reconciliation
//!
//! Every write follows the same read-current, compute-desired,
//! write-if-different cycle:
//!
//! 1. **Resources** - converted, masked with [`proto::update_mask`] and written
//!    by the [`Deployer`], which waits on the long-running operation
//! 2. **IAM policies** - merged with [`iam::merge_bindings`] or replaced per
//!    role, retried on conflicts with a fresh read each time
//! 3. **Queues** - upserted against server-side defaults, purged when disabled
//!
//! All I/O goes through the [`ApiClient`], [`OperationPoller`] and
//! [`ServiceAccountResolver`] seams, so reconcilers can be driven by fakes.

#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod convert;
pub mod deploy;
pub mod endpoint;
pub mod error;
pub mod hash;
pub mod iam;
pub mod labels;
pub mod memory;
pub mod proto;
pub mod providers;
pub mod retry;

pub use config::Config;
pub use convert::{from_provider_resource, to_provider_resource, ProviderResource};
pub use deploy::{Action, Apis, Deployer, Outcome};
pub use endpoint::{parse_endpoints, Endpoint, Nullable, Platform, Trigger};
pub use error::{Error, Result};
pub use hash::{assign_hashes, endpoint_hash};
pub use iam::{merge_bindings, Binding, Policy, PolicyReconciler};
pub use proto::field_masks;
pub use providers::{
    ApiClient, ApiOperationPoller, ApiResponse, HttpClient, OperationPoller, PollOptions,
    ServiceAccountResolver,
};
pub use retry::RetryConfig;
