//! Service Configuration Module
//!
//! Loaded from TOML files; every tunable of training and serving lives here.
//!
//! ## Loading Order
//!
//! 1. `BOLTWATCH_CONFIG` environment variable (path to TOML file)
//! 2. `boltwatch.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded [`ServiceConfig`] is passed explicitly to whatever needs it.

mod service_config;
pub mod defaults;

pub use service_config::*;
