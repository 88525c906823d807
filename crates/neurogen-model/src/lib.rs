// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Neurogen Network Model
//!
//! The declarative description the code generator consumes: neuron and
//! synapse type descriptors (attribute lists with locality, integration
//! method, bounds and initial values, plus spike/event equations),
//! population and projection instances, and the [`NetworkBuildContext`]
//! that owns them for the duration of one compile cycle.
//!
//! Equations arrive as [`neurogen_ir::Expr`] trees produced by an
//! external equation parser. Attribute references inside them are plain
//! symbolic names (`v`, `w`, `pre.r`, `post.u`); the code generator
//! binds them to typed accesses against the declared attribute tables.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod context;
pub mod descriptor;
pub mod error;
pub mod population;
pub mod projection;

pub use context::NetworkBuildContext;
pub use descriptor::{
    Attribute, Bounds, CreatingRule, Equation, EquationKind, EventEquation, Init, Locality,
    Method, NeuronType, PruningRule, PspOperator, RandomDistribution, ResetEquation, SpikeSpec,
    SynapseKind, SynapseType,
};
pub use error::{ModelError, ModelResult};
pub use population::Population;
pub use projection::{Connectivity, DelaySpec, Projection, Specialization};
