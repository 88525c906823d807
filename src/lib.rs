// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Neurogen
//!
//! Compiler from declarative neural-network descriptions to specialized
//! parallel simulation code.
//!
//! A network is described as populations of neurons and projections of
//! synapses between them, each carrying symbolic parameters and update
//! equations. Neurogen binds the symbols, selects a storage scheme per
//! projection, assembles a deterministic nine-phase step program and
//! prints it as C++ sources for the single-thread, OpenMP or CUDA
//! paradigm. The same compiled program can also be run in-process by the
//! reference evaluator, without a C++ toolchain.
//!
//! ## Workspace layout
//!
//! - [`config`] — generation configuration (paradigm, precision, dt,
//!   threads), loadable from TOML with programmatic overrides
//! - [`model`] — neuron/synapse descriptors, populations, projections and
//!   the build context that validates a network
//! - [`ir`] — typed code IR, transformation passes (delay redirection),
//!   the C++/CUDA printers and the in-process evaluator
//! - [`codegen`] — symbol binding, scheme selection, per-object fragment
//!   generation, the step assembler and the backends
//!
//! ## Quick start
//!
//! ```no_run
//! use neurogen::prelude::*;
//!
//! // A leaky rate neuron: tau dr/dt = sum(exc) - r.
//! let neuron = NeuronType {
//!     name: "LeakyRate".into(),
//!     parameters: vec![Attribute::parameter("tau", Locality::Global, 10.0)],
//!     variables: vec![Attribute::variable(
//!         "r",
//!         Locality::Local,
//!         Equation {
//!             kind: EquationKind::Derivative,
//!             rhs: Expr::var("sum(exc)")
//!                 .sub(Expr::var("r"))
//!                 .div(Expr::var("tau")),
//!         },
//!     )],
//!     spike: None,
//! };
//!
//! let mut net = NetworkBuildContext::new(1.0);
//! let input = net.add_population("input", vec![100], neuron.clone()).unwrap();
//! let output = net.add_population("output", vec![10], neuron).unwrap();
//! net.add_projection(
//!     "feedforward",
//!     input,
//!     output,
//!     "exc",
//!     SynapseType::rate_default("static"),
//!     Connectivity::all_to_all(100, 10, 0.01),
//!     Specialization::Default,
//! )
//! .unwrap();
//!
//! let config = GeneratorConfig::default();
//! let compiled = neurogen::codegen::compile(&net, &config).unwrap();
//!
//! // Emit C++ sources into `config.emit_dir`...
//! neurogen::codegen::backend::emit(&net, &compiled, &config).unwrap();
//!
//! // ...or run the reference evaluator directly.
//! let mut state = compiled.state;
//! state.run(&compiled.program, 100).unwrap();
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use neurogen_codegen as codegen;
pub use neurogen_config as config;
pub use neurogen_ir as ir;
pub use neurogen_model as model;

/// Common imports for describing and compiling a network.
pub mod prelude {
    pub use crate::codegen::{compile, GeneratedNetwork};
    pub use crate::config::{GeneratorConfig, Paradigm, Precision};
    pub use crate::ir::ast::Expr;
    pub use crate::model::{
        Attribute, Connectivity, DelaySpec, Equation, EquationKind, Locality,
        NetworkBuildContext, NeuronType, Specialization, SpikeSpec, SynapseKind, SynapseType,
    };
}
