// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Neurogen Configuration System
//!
//! Type-safe configuration loader for the code generator:
//! - TOML file parsing
//! - Environment variable overrides (`NEUROGEN_*`)
//! - Validation of paradigm/precision/step-size combinations
//!
//! ## Usage
//!
//! ```rust,no_run
//! use neurogen_config::{load_config, GeneratorConfig};
//!
//! let config = load_config(None).expect("Failed to load config");
//! println!("Paradigm: {:?}", config.paradigm);
//! println!("dt: {}", config.dt);
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{apply_environment_overrides, find_config_file, load_config};
pub use types::*;
pub use validation::validate_config;

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found. Searched: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax: {0}")]
    ParseError(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
