//! Riot Games API adapter.

pub mod client;
pub mod errors;
pub mod json;

pub use client::{RiotApi, RiotRateLimit};
pub use errors::FetchError;
