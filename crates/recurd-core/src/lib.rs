//! `recurd-core`: configuration and shared error types for the recurd daemon.

pub mod config;
pub mod error;

pub use config::RecurdConfig;
pub use error::{ConfigError, Result};
