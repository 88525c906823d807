// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Neurogen Compiler Core
//!
//! Turns a validated [`neurogen_model::NetworkBuildContext`] into generated
//! simulation code. The pipeline is:
//!
//! 1. [`selector`] — pick the connectivity/delay storage scheme of each
//!    projection and reject combinations the target paradigm cannot run
//! 2. [`population`] / [`projection`] — bind the symbolic equations
//!    ([`bind`]) and produce per-object IR fragment plans; projection
//!    variants (transpose, shared weights, copy) plug in through
//!    [`provider::FragmentProvider`]
//! 3. [`assembler`] — order the fragments into the nine-phase step program
//!    and draw the deterministic initial state
//! 4. [`backend`] — print the program as C++/OpenMP or CUDA sources
//!
//! [`assembler::compile`] runs steps 1-3; [`backend::emit`] writes the
//! sources. The compiled network also carries a
//! [`neurogen_ir::StepProgram`] that the in-process evaluator can run
//! directly, from the same fragments the printers see.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod assembler;
pub mod backend;
pub mod bind;
pub mod error;
pub mod population;
pub mod projection;
pub mod provider;
pub mod selector;

pub use assembler::{compile, load_state, save_state, GeneratedNetwork};
pub use backend::{emit, render, EmittedFile};
pub use error::{GenResult, GenerationError};
pub use population::PopulationPlan;
pub use projection::ProjectionPlan;
pub use provider::FragmentProvider;
pub use selector::{ConnectivityScheme, Selection};
