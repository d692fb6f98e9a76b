//! Core library for sidetrack: API gateway and client, session, models,
//! dashboard statistics and the local cache.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod navigation;
pub mod stats;
pub mod utils;
pub mod validation;

pub use api::{ApiClient, ApiError, Gateway};
pub use auth::Session;
pub use config::Config;
