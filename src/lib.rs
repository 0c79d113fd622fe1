pub mod app;
pub mod bot;
pub mod cli;
pub mod config;
pub mod data;
pub mod logging;
pub mod refresh;
pub mod riot;
pub mod services;
pub mod state;
pub mod utils;
pub mod web;
