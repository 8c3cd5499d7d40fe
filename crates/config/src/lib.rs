//! Configuration module for the vidsplit media service
//!
//! Handles loading configuration from TOML files and environment variable overrides.

pub mod config;

pub use config::*;
