//! Provider integrations.
//!
//! This module holds one submodule per provider API:
//!
//! - **functions** - second generation managed functions
//! - **run** - container services
//! - **tasks** - task queues
//! - **`resource_manager`** - project IAM policy
//! - **`service_accounts`** - service account lookup
//!
//! The seams they share (RPC client, operation poller, identity resolver) live
//! in [`traits`], with HTTP implementations in [`http`] and [`operations`].

pub mod functions;
pub mod http;
pub mod operations;
pub mod resource_manager;
pub mod run;
pub mod service_accounts;
pub mod tasks;
pub mod traits;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpClient;
pub use operations::{ApiOperationPoller, Operation};
pub use resource_manager::ProjectPolicy;
pub use service_accounts::IamServiceAccountResolver;
pub use traits::{
    ApiClient, ApiResponse, OperationPoller, PollOptions, Query, ServiceAccountResolver,
};

// Re-export provider clients
pub use functions::FunctionsClient;
pub use run::RunClient;
pub use tasks::TasksClient;
