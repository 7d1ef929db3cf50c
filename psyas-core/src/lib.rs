//! Client core for the psyas counseling chat service
//!
//! This crate provides the session/auth store, the conversation
//! controller, and the HTTP API wrapper used by the psyas front ends.
//! Front ends render snapshots of the two stores and issue commands
//! into them; they hold no business logic of their own.

pub mod auth;
pub mod config;
pub mod conversation;
pub mod error;
pub mod http;
pub mod logging;
pub mod token;

pub use error::{Error, Result};
