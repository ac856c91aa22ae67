//! Remote code interpreter sessions.
//!
//! Drives a pool of hosted interpreter sandboxes (Python or Node.js),
//! normalizes their results and persists generated images.

pub mod artifacts;
pub mod auth;
pub mod config;
pub mod error;
pub mod session;
pub mod tools;
pub mod upload;
pub mod user_agent;

pub use error::{Result, SessionError};
