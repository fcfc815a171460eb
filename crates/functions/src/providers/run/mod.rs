//! Container services.
//!
//! Function identity that the service resource has no field for travels in
//! annotations; see [`endpoint_from_service`] for the lookup order.

mod client;
mod convert;
mod models;

pub use client::{RunClient, API_VERSION, NO_RECURSE_FIELDS};
pub use convert::{
    endpoint_from_service, service_from_endpoint, service_id, service_name, CLIENT_NAME,
    CLIENT_NAME_ANNOTATION, CONTAINER_NAME, CPU_BOOST_ANNOTATION, FUNCTION_ID_ANNOTATION,
    FUNCTION_TARGET_ANNOTATION, MAX_INSTANCES_ANNOTATION, METADATA_ANNOTATION,
    MIN_INSTANCES_ANNOTATION, TRIGGER_ANNOTATION,
};
pub use models::*;
