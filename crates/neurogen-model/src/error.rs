// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors raised while assembling a network description.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("population id {id} does not exist")]
    UnknownPopulation { id: usize },

    #[error("projection id {id} does not exist")]
    UnknownProjection { id: usize },

    #[error("duplicate name '{name}'")]
    DuplicateName { name: String },

    #[error("population '{name}' has an empty geometry")]
    EmptyGeometry { name: String },

    #[error("projection '{name}': rank {rank} out of range for a population of {size}")]
    RankOutOfRange {
        name: String,
        rank: usize,
        size: usize,
    },

    #[error("projection '{name}': ranks of {what} must be strictly ascending")]
    UnsortedRanks { name: String, what: String },

    #[error("projection '{name}': {what} does not match the connectivity shape")]
    ShapeMismatch { name: String, what: String },

    #[error("projection '{name}': target label is empty")]
    EmptyTarget { name: String },

    #[error(
        "projection '{name}': spiking synapse type '{synapse}' on non-spiking population '{pre}'"
    )]
    KindMismatch {
        name: String,
        synapse: String,
        pre: String,
    },

    #[error(
        "projection '{name}': specialization references projection {source_id}, which does not exist"
    )]
    BadSpecializationSource { name: String, source_id: usize },
}

pub type ModelResult<T> = Result<T, ModelError>;
