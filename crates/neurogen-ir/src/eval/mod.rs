// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-process reference evaluator for assembled step programs.
//!
//! The evaluator executes the same IR fragments the printers render,
//! against in-memory network state, with the same phase ordering as the
//! emitted `single_step()`. It is the reference semantics the generated
//! C++/CUDA code is held to, and what the integration tests run.
//!
//! The evaluator is deliberately sequential: `parallel` flags on loops
//! are hints for the printers, not for this interpreter.

mod exec;
mod state;

pub use state::{NetworkState, PopulationState, ProjectionState, NEVER_FIRED};

use crate::ast::{Expr, Stmt};

/// A named step phase, executed in order.
#[derive(Debug, Clone)]
pub struct Phase {
    pub name: String,
    pub items: Vec<PhaseItem>,
}

impl Phase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }
}

/// The full per-step schedule. `NetworkState::step` runs every phase in
/// order, then increments the step counter.
#[derive(Debug, Clone, Default)]
pub struct StepProgram {
    pub phases: Vec<Phase>,
}

impl StepProgram {
    pub fn push(&mut self, phase: Phase) {
        self.phases.push(phase);
    }
}

/// One schedulable unit inside a phase.
#[derive(Debug, Clone)]
pub enum PhaseItem {
    /// Zero the named `_sum_<target>` arrays of a population before the
    /// projections of this step accumulate into them.
    ClearSums { pop: usize, targets: Vec<String> },
    /// Run an IR fragment with no enclosing projection (neuron updates,
    /// global-operation prologues).
    PopFragment { pop: usize, stmts: Vec<Stmt> },
    /// Run an IR fragment in the scope of one projection (PSP, synapse
    /// update, spike propagation, structural plasticity).
    ProjFragment { proj: usize, stmts: Vec<Stmt> },
    /// Evaluate the spike condition of every non-refractory neuron,
    /// rebuild the population spike list, apply resets and arm the
    /// refractory counter.
    SpikeDetect { pop: usize, rule: SpikeRule },
    /// Rotate the delayed-variable ring buffers: push this step's values
    /// to the front, drop the oldest slot.
    RotateDelays {
        pop: usize,
        vars: Vec<String>,
        spikes: bool,
    },
    /// Recompute requested whole-population reductions into
    /// `_<op>_<var>` globals.
    GlobalOps {
        pop: usize,
        ops: Vec<(String, GlobalOp)>,
    },
    /// Redraw one random-number attribute from its distribution.
    RefreshRandom {
        target: RandomTarget,
        name: String,
        dist: RandomDist,
    },
}

/// Spike condition and its consequences.
#[derive(Debug, Clone)]
pub struct SpikeRule {
    /// Boolean predicate over the neuron at `i`.
    pub predicate: Expr,
    /// Reset statements applied to every neuron that fired.
    pub reset: Vec<Stmt>,
    /// Refractory duration in steps, evaluated per firing neuron.
    pub refractory: Option<Expr>,
}

/// Whole-population reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GlobalOp {
    Min,
    Max,
    Mean,
    Sum,
    Norm1,
    Norm2,
}

impl GlobalOp {
    /// Name prefix of the global the result is stored under
    /// (`_max_r`, `_mean_r`, ...).
    pub fn key(self, var: &str) -> String {
        let op = match self {
            GlobalOp::Min => "min",
            GlobalOp::Max => "max",
            GlobalOp::Mean => "mean",
            GlobalOp::Sum => "sum",
            GlobalOp::Norm1 => "norm1",
            GlobalOp::Norm2 => "norm2",
        };
        format!("_{op}_{var}")
    }
}

/// Which attribute a `RefreshRandom` item refills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomTarget {
    PopLocal(usize),
    PopGlobal(usize),
    ProjLocal(usize),
    ProjSemiglobal(usize),
    ProjGlobal(usize),
}

/// Distribution of a random-number attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RandomDist {
    Uniform { min: f64, max: f64 },
    Normal { mean: f64, sd: f64 },
}
