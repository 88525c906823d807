// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Neurogen Code IR
//!
//! Structured intermediate representation for generated simulation code.
//!
//! Every fragment produced by the code generator (a PSP loop, a synaptic
//! update, a pre-spike handler) is a tree of [`Stmt`] nodes over typed
//! attribute accesses, not source text. Cross-cutting rewrites that the
//! original string-template approach handled with ad hoc `replace()` calls
//! (most importantly delay redirection of presynaptic reads) are
//! transformation passes over this tree, so they apply *identically* to
//! every fragment they touch.
//!
//! The IR has three consumers:
//! - the C++/OpenMP printer ([`printer::CppPrinter`])
//! - the CUDA printer ([`printer::CudaPrinter`])
//! - the in-process evaluator ([`eval`]) used by tests and callers that
//!   want a reference simulation without a C++ toolchain

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod ast;
pub mod eval;
pub mod fragment;
pub mod passes;
pub mod printer;

pub use ast::{
    AccessIndex, AssignOp, AttrRef, BinOp, DelaySteps, Expr, LValue, Owner, ScalarType, Stmt, UnOp,
};
pub use eval::{NetworkState, Phase, PhaseItem, PopulationState, ProjectionState, StepProgram};
pub use fragment::{Fragment, FragmentSlot};
pub use passes::{check_parallel_independence, collect_attr_reads, redirect_delays, DelayInfo};
pub use printer::{CppPrinter, CudaPrinter, RenderCtx};

/// Errors raised by IR passes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IrError {
    #[error("a global presynaptic variable '{var}' cannot be read through a non-uniform delay")]
    GlobalNonUniformDelay { var: String },

    #[error(
        "per-neuron update of '{var}' reads index-shifted state of '{other}' updated in the same phase"
    )]
    ParallelDependency { var: String, other: String },

    #[error("delay violation: {0}")]
    DelayViolation(String),

    #[error("evaluation error: {0}")]
    Eval(String),
}

pub type Result<T> = core::result::Result<T, IrError>;
