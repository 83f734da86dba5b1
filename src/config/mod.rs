//! Configuration management for codemap.
//!
//! Supports configuration from:
//! - Command-line arguments (highest priority)
//! - Environment variables (`CODEMAP_*`)

mod settings;

pub use settings::{Config, FilterSettings};
