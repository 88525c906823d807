// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! Two-tier loading:
//! 1. TOML file (base values)
//! 2. Environment variables (runtime overrides)

use crate::{validate_config, ConfigError, ConfigResult, GeneratorConfig, Paradigm, Precision};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Find the neurogen configuration file.
///
/// Search order:
/// 1. `NEUROGEN_CONFIG_PATH` environment variable
/// 2. Current working directory: `./neurogen.toml`
/// 3. Parent directories (up to 5 levels, for workspace roots)
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("NEUROGEN_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by NEUROGEN_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join("neurogen.toml"));
        let mut current = cwd;
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join("neurogen.toml"));
                    current = parent.to_path_buf();
                }
                None => break,
            }
        }
    }

    for path in &search_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "'neurogen.toml' not found in any of these locations:\n{search_list}\n\nSet NEUROGEN_CONFIG_PATH to specify a custom location."
    )))
}

/// Load configuration from a file (or discover one), apply environment
/// overrides and validate the result.
///
/// When `path` is `None` and no config file is discoverable, falls back to
/// defaults; an explicit `path` that does not exist is an error.
pub fn load_config(path: Option<&Path>) -> ConfigResult<GeneratorConfig> {
    let mut config = match path {
        Some(p) => parse_file(p)?,
        None => match find_config_file() {
            Ok(p) => parse_file(&p)?,
            Err(ConfigError::FileNotFound(_)) => GeneratorConfig::default(),
            Err(e) => return Err(e),
        },
    };

    apply_environment_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_file(path: &Path) -> ConfigResult<GeneratorConfig> {
    let contents = fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

/// Apply `NEUROGEN_*` environment variable overrides in place.
///
/// Recognized variables: `NEUROGEN_PARADIGM`, `NEUROGEN_PRECISION`,
/// `NEUROGEN_DT`, `NEUROGEN_NUM_THREADS`, `NEUROGEN_STRUCTURAL_PLASTICITY`,
/// `NEUROGEN_PROFILING`, `NEUROGEN_EMIT_DIR`, `NEUROGEN_SEED`.
pub fn apply_environment_overrides(config: &mut GeneratorConfig) -> ConfigResult<()> {
    if let Ok(v) = env::var("NEUROGEN_PARADIGM") {
        config.paradigm = match v.as_str() {
            "single_thread" => Paradigm::SingleThread,
            "openmp" => Paradigm::OpenMp,
            "cuda" => Paradigm::Cuda,
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: "paradigm",
                    value: v,
                })
            }
        };
    }
    if let Ok(v) = env::var("NEUROGEN_PRECISION") {
        config.precision = match v.as_str() {
            "single" => Precision::Single,
            "double" => Precision::Double,
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: "precision",
                    value: v,
                })
            }
        };
    }
    if let Ok(v) = env::var("NEUROGEN_DT") {
        config.dt = v.parse().map_err(|_| ConfigError::InvalidValue {
            field: "dt",
            value: v,
        })?;
    }
    if let Ok(v) = env::var("NEUROGEN_NUM_THREADS") {
        config.num_threads = v.parse().map_err(|_| ConfigError::InvalidValue {
            field: "num_threads",
            value: v,
        })?;
    }
    if let Ok(v) = env::var("NEUROGEN_STRUCTURAL_PLASTICITY") {
        config.structural_plasticity = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = env::var("NEUROGEN_PROFILING") {
        config.profiling = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = env::var("NEUROGEN_EMIT_DIR") {
        config.emit_dir = v;
    }
    if let Ok(v) = env::var("NEUROGEN_SEED") {
        config.seed = v.parse().map_err(|_| ConfigError::InvalidValue {
            field: "seed",
            value: v,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
paradigm = "openmp"
precision = "single"
dt = 0.5
num_threads = 4
structural_plasticity = true
"#
        )
        .unwrap();

        let config = parse_file(file.path()).unwrap();
        assert_eq!(config.paradigm, Paradigm::OpenMp);
        assert_eq!(config.precision, Precision::Single);
        assert_eq!(config.dt, 0.5);
        assert_eq!(config.num_threads, 4);
        assert!(config.structural_plasticity);
        // Unset fields keep defaults
        assert!(!config.profiling);
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = parse_file(file.path()).unwrap();
        assert_eq!(config.paradigm, Paradigm::SingleThread);
    }

    #[test]
    fn test_bad_toml_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "paradigm = \"vulkan\"").unwrap();
        assert!(matches!(
            parse_file(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
