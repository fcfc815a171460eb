//! Second generation managed functions.
//!
//! [`function_from_endpoint`] and [`endpoint_from_function`] translate between
//! the endpoint model and the function resource; [`FunctionsClient`] reads and
//! writes functions.

mod client;
mod convert;
mod models;

pub use client::{FunctionsClient, API_VERSION, NO_RECURSE_FIELDS};
pub use convert::{
    endpoint_from_function, function_from_endpoint, FUNCTION_SIGNATURE_TYPE_ENV,
    FUNCTION_TARGET_ENV, LOG_EXECUTION_ID_ENV, NODE_RUN_SCRIPTS_ENV,
};
pub use models::*;
