// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors that abort a compile cycle. No partial output is usable after
/// any of these.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{object}: unsupported combination: {reason}")]
    Unsupported { object: String, reason: String },

    #[error("{type_name}: undeclared symbol '{symbol}' in equation `{equation}`")]
    UndeclaredSymbol {
        type_name: String,
        symbol: String,
        equation: String,
    },

    #[error("{object}: {source}")]
    Ir {
        object: String,
        source: neurogen_ir::IrError,
    },

    #[error("projection '{name}': creation delay {delay} steps exceeds the configured maximum {max}")]
    CreationDelayTooLarge {
        name: String,
        delay: usize,
        max: usize,
    },

    #[error("projection '{name}': creation declares a delay in a projection without per-synapse delays")]
    CreationDelayNonUniform { name: String },

    #[error(transparent)]
    Model(#[from] neurogen_model::ModelError),

    #[error(transparent)]
    Config(#[from] neurogen_config::ConfigError),

    #[error("failed to write '{path}': {message}")]
    Emit { path: String, message: String },
}

impl GenerationError {
    pub fn ir(object: impl Into<String>, source: neurogen_ir::IrError) -> Self {
        Self::Ir {
            object: object.into(),
            source,
        }
    }

    pub fn unsupported(object: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            object: object.into(),
            reason: reason.into(),
        }
    }
}

pub type GenResult<T> = Result<T, GenerationError>;
