//! Configuration management
//!
//! Handles loading and validation of psyas client configuration from
//! files and environment variables.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::*;
