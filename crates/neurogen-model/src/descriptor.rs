// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Neuron and synapse type descriptors.
//!
//! A type is an immutable template created once at network-definition
//! time and consumed read-only by the generator. Attributes are kept in
//! declaration order; emission iterates these lists, never a map, so
//! generated files are byte-stable.

use std::collections::BTreeSet;

use neurogen_ir::ast::{AssignOp, Expr, ScalarType};

/// Scope of a parameter or variable.
///
/// For a population, `Local` is one value per neuron. For a projection,
/// `Local` is one value per synapse and `Semiglobal` one per
/// postsynaptic neuron. `Global` is always one value per object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    Global,
    Semiglobal,
    Local,
}

/// How a variable advances in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Per-step explicit Euler integration.
    Explicit,
    /// Closed-form advance applied only at event times, from the
    /// `_last_event` timestamp to now.
    EventDriven,
    /// No integration (parameters).
    None,
}

/// Initial value of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Init {
    Constant(f64),
    /// Redrawn once per step, phase 2 of the step order.
    Random(RandomDistribution),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RandomDistribution {
    Uniform { min: f64, max: f64 },
    Normal { mean: f64, sd: f64 },
}

/// Declared `[min, max]` constraint, enforced after every write.
/// Bounds may reference parameters (`max = w_max`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bounds {
    pub min: Option<Expr>,
    pub max: Option<Expr>,
}

impl Bounds {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Per-step update rule of an explicit variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub kind: EquationKind,
    /// Right-hand side over symbolic attribute names.
    pub rhs: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquationKind {
    /// `dx/dt = rhs`, integrated as `x += dt * rhs`.
    Derivative,
    /// `x = rhs`, assigned each step.
    Assignment,
}

/// One declared parameter or variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub ty: ScalarType,
    pub locality: Locality,
    pub method: Method,
    pub init: Init,
    pub bounds: Bounds,
    /// `None` for parameters. For event-driven variables the equation
    /// holds the closed-form advance from `_last_event` to `t`.
    pub equation: Option<Equation>,
}

impl Attribute {
    pub fn parameter(name: impl Into<String>, locality: Locality, value: f64) -> Self {
        Self {
            name: name.into(),
            ty: ScalarType::Real,
            locality,
            method: Method::None,
            init: Init::Constant(value),
            bounds: Bounds::none(),
            equation: None,
        }
    }

    pub fn variable(name: impl Into<String>, locality: Locality, equation: Equation) -> Self {
        Self {
            name: name.into(),
            ty: ScalarType::Real,
            locality,
            method: Method::Explicit,
            init: Init::Constant(0.0),
            bounds: Bounds::none(),
            equation: Some(equation),
        }
    }

    /// A per-synapse variable advanced in closed form at event times.
    pub fn event_driven(name: impl Into<String>, advance: Expr) -> Self {
        Self {
            name: name.into(),
            ty: ScalarType::Real,
            locality: Locality::Local,
            method: Method::EventDriven,
            init: Init::Constant(0.0),
            bounds: Bounds::none(),
            equation: Some(Equation {
                kind: EquationKind::Assignment,
                rhs: advance,
            }),
        }
    }

    pub fn with_init(mut self, init: Init) -> Self {
        self.init = init;
        self
    }

    pub fn with_bounds(mut self, min: Option<Expr>, max: Option<Expr>) -> Self {
        self.bounds = Bounds { min, max };
        self
    }

    pub fn is_parameter(&self) -> bool {
        self.method == Method::None && self.equation.is_none()
    }
}

/// Spike condition of a spiking neuron type.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeSpec {
    /// Boolean predicate over the neuron's attributes.
    pub condition: Expr,
    /// Applied to every neuron that fired, in declaration order.
    pub reset: Vec<ResetEquation>,
    /// Refractory duration in ms; attribute references allowed.
    pub refractory: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResetEquation {
    pub target: String,
    pub value: Expr,
    /// Skip this reset while the refractory window is active.
    pub unless_refractory: bool,
}

/// Immutable neuron template.
#[derive(Debug, Clone, PartialEq)]
pub struct NeuronType {
    pub name: String,
    pub parameters: Vec<Attribute>,
    pub variables: Vec<Attribute>,
    pub spike: Option<SpikeSpec>,
}

impl NeuronType {
    pub fn is_spiking(&self) -> bool {
        self.spike.is_some()
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.parameters
            .iter()
            .chain(self.variables.iter())
            .find(|a| a.name == name)
    }
}

/// PSP reduction across the synapses of one postsynaptic neuron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PspOperator {
    #[default]
    Sum,
    /// Running extremum seeded from the first synapse, not from an
    /// identity element.
    Max,
    Min,
    /// Sum divided by the live synapse count of that neuron.
    Mean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynapseKind {
    Rate,
    Spike,
}

/// One equation of a `pre_spike`/`post_spike` block, e.g. `w += 0.1`.
///
/// A target of `g_target` denotes the conductance accumulator of the
/// postsynaptic neuron for this projection's target label.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEquation {
    pub target: String,
    pub op: AssignOp,
    pub value: Expr,
}

/// Periodic, probabilistic synapse creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatingRule {
    /// Over pre/post attributes of a candidate pair.
    pub condition: Expr,
    /// ANDed with the condition as `unif(0,1) < p`.
    pub probability: Option<f64>,
    pub weight: f64,
    /// Delay of created synapses in ms.
    pub delay_ms: Option<f64>,
    pub period_ms: f64,
    pub offset_ms: f64,
}

/// Periodic, probabilistic synapse removal.
#[derive(Debug, Clone, PartialEq)]
pub struct PruningRule {
    pub condition: Expr,
    pub probability: Option<f64>,
    pub period_ms: f64,
    pub offset_ms: f64,
}

/// Immutable synapse template.
#[derive(Debug, Clone, PartialEq)]
pub struct SynapseType {
    pub name: String,
    pub kind: SynapseKind,
    pub parameters: Vec<Attribute>,
    pub variables: Vec<Attribute>,
    /// Per-synapse contribution; `None` means `w * pre.r`.
    pub psp: Option<Expr>,
    pub operation: PspOperator,
    /// Applied per touched synapse when the presynaptic neuron fires.
    pub pre_spike: Vec<EventEquation>,
    /// Applied to all synapses of a firing postsynaptic neuron.
    pub post_spike: Vec<EventEquation>,
    /// Update gating: the synaptic update runs only when
    /// `(t - offset) % period == 0`, in steps.
    pub update_period_ms: f64,
    pub update_offset_ms: f64,
    pub creating: Option<CreatingRule>,
    pub pruning: Option<PruningRule>,
}

impl SynapseType {
    /// A plain `w * pre.r` rate-coded synapse with no dynamics.
    pub fn rate_default(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SynapseKind::Rate,
            parameters: Vec::new(),
            variables: Vec::new(),
            psp: None,
            operation: PspOperator::Sum,
            pre_spike: Vec::new(),
            post_spike: Vec::new(),
            update_period_ms: 0.0,
            update_offset_ms: 0.0,
            creating: None,
            pruning: None,
        }
    }

    /// A conductance-increment spiking synapse (`g_target += w`).
    pub fn spike_default(name: impl Into<String>) -> Self {
        Self {
            kind: SynapseKind::Spike,
            pre_spike: vec![EventEquation {
                target: "g_target".into(),
                op: AssignOp::Add,
                value: Expr::var("w"),
            }],
            ..Self::rate_default(name)
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.parameters
            .iter()
            .chain(self.variables.iter())
            .find(|a| a.name == name)
    }

    /// Any event-driven variable disables the skip-on-same-step
    /// post-spike optimization of the pre-event path.
    pub fn has_event_driven(&self) -> bool {
        self.variables.iter().any(|a| a.method == Method::EventDriven)
    }

    pub fn has_structural_plasticity(&self) -> bool {
        self.creating.is_some() || self.pruning.is_some()
    }

    /// Presynaptic attribute names this type reads (`pre.r` -> `r`),
    /// across psp, update and pre-event equations. These are the
    /// variables that need a delay ring buffer when the projection is
    /// delayed.
    pub fn pre_reads(&self) -> BTreeSet<String> {
        fn scan(e: &Expr, names: &mut BTreeSet<String>) {
            for var in referenced_vars(e) {
                if let Some(rest) = var.strip_prefix("pre.") {
                    names.insert(rest.to_string());
                }
            }
        }
        let mut names = BTreeSet::new();
        if let Some(psp) = &self.psp {
            scan(psp, &mut names);
        } else if self.kind == SynapseKind::Rate {
            names.insert("r".to_string());
        }
        for attr in &self.variables {
            if let Some(eq) = &attr.equation {
                scan(&eq.rhs, &mut names);
            }
        }
        for ev in &self.pre_spike {
            scan(&ev.value, &mut names);
        }
        names
    }
}

/// All symbolic names an expression reads, in sorted order.
pub fn referenced_vars(e: &Expr) -> BTreeSet<String> {
    fn walk(e: &Expr, out: &mut BTreeSet<String>) {
        match e {
            Expr::Var(name) => {
                out.insert(name.clone());
            }
            Expr::Unary(_, inner) => walk(inner, out),
            Expr::Binary(_, lhs, rhs) => {
                walk(lhs, out);
                walk(rhs, out);
            }
            Expr::Call(_, args) => {
                for a in args {
                    walk(a, out);
                }
            }
            Expr::Real(_) | Expr::Int(_) | Expr::Bool(_) | Expr::Attr(_) | Expr::UniformDraw => {}
        }
    }
    let mut out = BTreeSet::new();
    walk(e, &mut out);
    out
}
