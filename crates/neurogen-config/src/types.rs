// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions

use serde::{Deserialize, Serialize};

/// Execution paradigm the generated code targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Paradigm {
    /// Plain sequential C++ loops.
    SingleThread,
    /// Shared-memory parallel C++ (OpenMP pragmas).
    #[serde(rename = "openmp")]
    OpenMp,
    /// CUDA device kernels with host/device transfer scheduling.
    Cuda,
}

/// Numeric precision of generated state arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Single,
    Double,
}

impl Precision {
    /// C type name used by the printers.
    pub fn ctype(self) -> &'static str {
        match self {
            Precision::Single => "float",
            Precision::Double => "double",
        }
    }
}

/// Top-level generator configuration.
///
/// Loaded from `neurogen.toml`, then overridden by `NEUROGEN_*` environment
/// variables. All fields have defaults so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Target execution paradigm.
    pub paradigm: Paradigm,
    /// Numeric precision of generated state arrays.
    pub precision: Precision,
    /// Discretization step in milliseconds.
    pub dt: f64,
    /// Number of OpenMP threads the emitted code assumes.
    pub num_threads: usize,
    /// Enable structural plasticity code paths (creating/pruning).
    pub structural_plasticity: bool,
    /// Annotate emitted code with profiling hooks.
    pub profiling: bool,
    /// Directory the generated sources are written to.
    pub emit_dir: String,
    /// Seed used for stochastic terms in the in-process evaluator.
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            paradigm: Paradigm::SingleThread,
            precision: Precision::Double,
            dt: 1.0,
            num_threads: 1,
            structural_plasticity: false,
            profiling: false,
            emit_dir: "generate".to_string(),
            seed: 0,
        }
    }
}

impl GeneratorConfig {
    /// Populations smaller than this are not worth an OpenMP parallel-for.
    pub const OMP_MIN_NB_NEURONS: usize = 100;

    /// Whether the emitted loops carry OpenMP pragmas for `size` work items.
    pub fn parallel_loops(&self, size: usize) -> bool {
        self.paradigm == Paradigm::OpenMp
            && self.num_threads > 1
            && size > Self::OMP_MIN_NB_NEURONS
    }
}
