// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Backend specialization.
//!
//! Renders a compiled network into target-language source files:
//! `network.h` (shared globals), one `pop<id>.hpp` / `proj<id>.hpp` per
//! object and `simulation.cpp` with the nine-phase `single_step()`. The
//! single-thread and OpenMP paradigms share the C++ backend (the latter
//! adds pragmas); CUDA gets its own kernel translation unit.
//!
//! Emission is deterministic: files are rendered and written in a fixed
//! order, and every loop below runs over id-ordered sequences.

pub mod cpu;
pub mod cuda;

use std::fs;
use std::path::PathBuf;

use neurogen_config::{GeneratorConfig, Paradigm};
use neurogen_model::NetworkBuildContext;
use tracing::info;

use crate::assembler::GeneratedNetwork;
use crate::error::{GenResult, GenerationError};

/// One rendered source file, relative to the emission directory.
#[derive(Debug, Clone)]
pub struct EmittedFile {
    pub name: String,
    pub contents: String,
}

/// Render every source file of the network for the configured paradigm.
pub fn render(
    ctx: &NetworkBuildContext,
    net: &GeneratedNetwork,
    config: &GeneratorConfig,
) -> GenResult<Vec<EmittedFile>> {
    match config.paradigm {
        Paradigm::SingleThread | Paradigm::OpenMp => cpu::render(ctx, net, config),
        Paradigm::Cuda => cuda::render(ctx, net, config),
    }
}

/// Render and write the files into `config.emit_dir`. Returns the paths
/// written, in emission order.
pub fn emit(
    ctx: &NetworkBuildContext,
    net: &GeneratedNetwork,
    config: &GeneratorConfig,
) -> GenResult<Vec<PathBuf>> {
    let files = render(ctx, net, config)?;
    let dir = PathBuf::from(&config.emit_dir);
    fs::create_dir_all(&dir).map_err(|e| GenerationError::Emit {
        path: dir.display().to_string(),
        message: e.to_string(),
    })?;
    let mut written = Vec::with_capacity(files.len());
    for file in &files {
        let path = dir.join(&file.name);
        fs::write(&path, &file.contents).map_err(|e| GenerationError::Emit {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        written.push(path);
    }
    info!(dir = %dir.display(), files = written.len(), "emitted generated sources");
    Ok(written)
}
