//! Infrastructure layer module
//!
//! Process-level concerns around the engine:
//! - Configuration management
//! - Logging infrastructure

pub mod config;
pub mod logging;
