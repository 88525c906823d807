// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Connectivity representation selection.
//!
//! Decides, per projection, the storage layout and delay-handling
//! scheme, and rejects combinations the chosen backend cannot run.
//! Rejection happens here, before any file is emitted, so a failed
//! compile leaves no partial output.

use neurogen_config::{GeneratorConfig, Paradigm};
use neurogen_model::{DelaySpec, Projection, SynapseKind};
use tracing::debug;

use crate::error::{GenResult, GenerationError};

/// Storage/delay scheme of one projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityScheme {
    /// List-of-lists, next-step transmission.
    FixedDelay,
    /// List-of-lists plus one scalar delay into the presynaptic
    /// population's ring buffer.
    UniformDelay,
    /// Rate-coded list-of-lists with per-synapse delays.
    NonUniformDelayRate,
    /// Spiking list-of-lists with a pending-event ring buffer of depth
    /// `max_delay`; slot `(idx_delay + delay - 1) % max_delay`.
    NonUniformDelaySpike,
}

/// Selector outcome consumed by the projection generator.
#[derive(Debug, Clone, Copy)]
pub struct Selection {
    pub scheme: ConnectivityScheme,
    /// Whether the `get_max_delay`/`set_max_delay`/`update_max_delay`/
    /// `reset_ring_buffer` accessor family must be emitted.
    pub needs_max_delay_accessors: bool,
}

pub fn select(proj: &Projection, config: &GeneratorConfig) -> GenResult<Selection> {
    let object = format!("projection '{}'", proj.name);
    if config.paradigm == Paradigm::Cuda {
        if proj.synapse.kind == SynapseKind::Spike {
            return Err(GenerationError::unsupported(
                object,
                "spiking synapse types cannot target the CUDA backend",
            ));
        }
        if proj.connectivity.delay.is_nonuniform() {
            return Err(GenerationError::unsupported(
                object,
                "non-uniform delays cannot target the CUDA backend",
            ));
        }
        if proj.synapse.psp.is_some() {
            return Err(GenerationError::unsupported(
                object,
                "custom psp expressions cannot target the CUDA backend",
            ));
        }
        if proj.synapse.has_structural_plasticity() {
            return Err(GenerationError::unsupported(
                object,
                "structural plasticity cannot target the CUDA backend",
            ));
        }
    }

    let scheme = match (&proj.connectivity.delay, proj.synapse.kind) {
        (DelaySpec::None, _) | (DelaySpec::Uniform(1), _) => ConnectivityScheme::FixedDelay,
        (DelaySpec::Uniform(_), _) => ConnectivityScheme::UniformDelay,
        (DelaySpec::NonUniform(_), SynapseKind::Rate) => ConnectivityScheme::NonUniformDelayRate,
        (DelaySpec::NonUniform(_), SynapseKind::Spike) => {
            ConnectivityScheme::NonUniformDelaySpike
        }
    };
    debug!(projection = %proj.name, ?scheme, "selected connectivity scheme");
    Ok(Selection {
        scheme,
        needs_max_delay_accessors: proj.connectivity.delay.is_nonuniform(),
    })
}
