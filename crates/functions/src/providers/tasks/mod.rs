//! Task queues backing task-queue triggered endpoints.

mod client;
mod convert;
mod models;

pub use client::{TasksClient, API_VERSION, ENQUEUER_ROLE};
pub use convert::{queue_from_endpoint, queue_name, trigger_from_queue};
pub use models::*;
