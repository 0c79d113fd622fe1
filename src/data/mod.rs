//! Database models and schema.

pub mod health;
pub mod kv;
pub mod memory;
pub mod models;
pub mod players;
mod store;

pub use store::PlayerStore;
