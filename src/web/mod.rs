//! Operational HTTP endpoints for the orianna service.

pub mod routes;
pub mod status;

pub use routes::*;
