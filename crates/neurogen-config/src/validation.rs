// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation

use crate::{ConfigError, ConfigResult, GeneratorConfig, Paradigm};

/// Validate a loaded configuration.
///
/// Checks value ranges; paradigm/network compatibility (e.g. CUDA with
/// non-uniform delays) is checked later against the actual network by the
/// code generator, since it depends on the projections being compiled.
pub fn validate_config(config: &GeneratorConfig) -> ConfigResult<()> {
    if !(config.dt.is_finite() && config.dt > 0.0) {
        return Err(ConfigError::ValidationError(format!(
            "dt must be a positive finite number, got {}",
            config.dt
        )));
    }
    if config.num_threads == 0 {
        return Err(ConfigError::ValidationError(
            "num_threads must be at least 1".to_string(),
        ));
    }
    if config.paradigm == Paradigm::Cuda && config.num_threads > 1 {
        return Err(ConfigError::ValidationError(
            "num_threads is an OpenMP setting and must be 1 for the CUDA paradigm".to_string(),
        ));
    }
    if config.emit_dir.is_empty() {
        return Err(ConfigError::ValidationError(
            "emit_dir must not be empty".to_string(),
        ));
    }
    Ok(())
}
