// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Population code generation.
//!
//! Produces the semantic plan of one population: the bound phase-3
//! update fragment, the spike rule, the ring-buffer rotation set, the
//! per-step random refreshes and the reductions its equations demand.
//! Backends render the plan into a state-struct header; the assembler
//! schedules it.

use std::collections::BTreeSet;

use neurogen_config::GeneratorConfig;
use neurogen_ir::ast::{AccessIndex, AssignOp, AttrRef, Expr, LValue, ScalarType, Stmt};
use neurogen_ir::eval::{GlobalOp, RandomDist, SpikeRule};
use neurogen_ir::check_parallel_independence;
use neurogen_model::{
    Attribute, EquationKind, Init, Locality, Method, Population, RandomDistribution,
};
use tracing::debug;

use crate::bind::Binder;
use crate::error::{GenResult, GenerationError};

/// Everything downstream stages need to know about one population.
#[derive(Debug, Clone)]
pub struct PopulationPlan {
    pub id: usize,
    /// Phase-3 fragment: neuron-variable update (spike detection is a
    /// separate rule so backends can schedule it right after).
    pub update: Vec<Stmt>,
    pub spike_rule: Option<SpikeRule>,
    /// Variables rotated into ring buffers in phase 4.
    pub delayed_vars: Vec<String>,
    pub rotate_spikes: bool,
    /// Reductions demanded by this population's own equations.
    pub global_ops: BTreeSet<(usize, String, GlobalOp)>,
    /// Per-step random attributes: `(name, locality-is-local, dist)`.
    pub randoms: Vec<(String, bool, RandomDist)>,
    /// Rate accumulators (`_sum_<target>`) zeroed in phase 1.
    pub sum_targets: Vec<String>,
    /// Conductance accumulators (`g_<target>`) of a spiking population
    /// that are not declared as variables; allocated, never cleared.
    pub implicit_conductances: Vec<String>,
}

pub fn generate(pop: &Population, config: &GeneratorConfig) -> GenResult<PopulationPlan> {
    debug!(population = %pop.name, size = pop.size, "generating population plan");
    let mut binder = Binder::neuron(pop);

    let globals: Vec<&Attribute> = pop
        .neuron
        .variables
        .iter()
        .filter(|a| a.locality != Locality::Local && a.equation.is_some())
        .collect();
    let locals: Vec<&Attribute> = pop
        .neuron
        .variables
        .iter()
        .filter(|a| a.locality == Locality::Local && a.equation.is_some())
        .collect();

    let mut update = Vec::new();
    for attr in globals {
        update.extend(update_stmts(&mut binder, pop.id, attr, AccessIndex::Scalar)?);
    }

    let mut body = Vec::new();
    for attr in &locals {
        body.extend(update_stmts(&mut binder, pop.id, attr, AccessIndex::Neuron)?);
    }
    // During the refractory window only the conductances keep evolving;
    // everything else is held and the countdown decremented.
    let has_refractory = pop
        .neuron
        .spike
        .as_ref()
        .map(|s| s.refractory.is_some())
        .unwrap_or(false);
    let body = if has_refractory {
        let mut held = Vec::new();
        for attr in &locals {
            if attr.name.starts_with("g_") {
                held.extend(update_stmts(&mut binder, pop.id, attr, AccessIndex::Neuron)?);
            }
        }
        let countdown = AttrRef::pop(pop.id, "refractory_remaining", AccessIndex::Neuron);
        let mut then_branch = vec![Stmt::Assign {
            target: LValue::Attr(countdown.clone()),
            op: AssignOp::Sub,
            value: Expr::Real(1.0),
        }];
        then_branch.extend(held);
        vec![Stmt::If {
            cond: Expr::attr(countdown).gt(Expr::Real(0.0)),
            then_branch,
            else_branch: body,
        }]
    } else {
        body
    };
    if !body.is_empty() {
        update.push(Stmt::ForNeurons {
            pop: pop.id,
            parallel: config.parallel_loops(pop.size),
            body,
        });
    }
    check_parallel_independence(pop.id, &update)
        .map_err(|e| GenerationError::ir(format!("population '{}'", pop.name), e))?;

    let spike_rule = match &pop.neuron.spike {
        Some(spec) => {
            let predicate = binder.bind(&spec.condition)?;
            let mut reset = Vec::new();
            for eq in &spec.reset {
                let target = binder.bind_target(&eq.target)?;
                let stmt = Stmt::Assign {
                    target: target.clone(),
                    op: AssignOp::Set,
                    value: binder.bind(&eq.value)?,
                };
                // Detection already skips refractory neurons; the guard
                // keeps the emitted template shape.
                if eq.unless_refractory && spec.refractory.is_some() {
                    reset.push(Stmt::If {
                        cond: Expr::attr(AttrRef::pop(
                            pop.id,
                            "refractory_remaining",
                            AccessIndex::Neuron,
                        ))
                        .gt(Expr::Real(0.0)),
                        then_branch: vec![],
                        else_branch: vec![stmt],
                    });
                } else {
                    reset.push(stmt);
                }
            }
            let refractory = match &spec.refractory {
                // Declared in ms, armed in steps.
                Some(e) => Some(binder.bind(e)?.div(Expr::var("dt"))),
                None => None,
            };
            Some(SpikeRule {
                predicate,
                reset,
                refractory,
            })
        }
        None => None,
    };

    let randoms = pop
        .neuron
        .variables
        .iter()
        .filter(|a| a.equation.is_none() && a.method == Method::None)
        .filter_map(|a| match &a.init {
            Init::Random(dist) => Some((
                a.name.clone(),
                a.locality == Locality::Local,
                to_dist(*dist),
            )),
            Init::Constant(_) => None,
        })
        .collect();

    // Accumulators: declared targets plus any sum(<target>) the
    // equations read (an unconnected target sums to zero).
    let mut sum_targets = BTreeSet::new();
    let mut implicit_conductances = BTreeSet::new();
    if pop.is_spiking() {
        for target in &pop.targets {
            if pop.neuron.attribute(&format!("g_{target}")).is_none() {
                implicit_conductances.insert(format!("g_{target}"));
            }
        }
    } else {
        for target in &pop.targets {
            sum_targets.insert(format!("_sum_{target}"));
        }
        for attr in &pop.neuron.variables {
            if let Some(eq) = &attr.equation {
                for var in neurogen_model::descriptor::referenced_vars(&eq.rhs) {
                    if let Some(t) = var.strip_prefix("sum(").and_then(|s| s.strip_suffix(')')) {
                        sum_targets.insert(format!("_sum_{t}"));
                    }
                }
            }
        }
    }

    Ok(PopulationPlan {
        id: pop.id,
        update,
        spike_rule,
        delayed_vars: pop.delayed_variables.iter().cloned().collect(),
        rotate_spikes: pop.delayed_spikes,
        global_ops: binder.global_ops,
        randoms,
        sum_targets: sum_targets.into_iter().collect(),
        implicit_conductances: implicit_conductances.into_iter().collect(),
    })
}

pub(crate) fn to_dist(d: RandomDistribution) -> RandomDist {
    match d {
        RandomDistribution::Uniform { min, max } => RandomDist::Uniform { min, max },
        RandomDistribution::Normal { mean, sd } => RandomDist::Normal { mean, sd },
    }
}

/// Euler / assignment update of one attribute plus its bound clamp.
fn update_stmts(
    binder: &mut Binder<'_>,
    pop: usize,
    attr: &Attribute,
    index: AccessIndex,
) -> GenResult<Vec<Stmt>> {
    let Some(eq) = &attr.equation else {
        return Ok(Vec::new());
    };
    let rhs = binder.bind(&eq.rhs)?;
    let target = LValue::Attr(AttrRef::pop(pop, &attr.name, index));
    let mut out = Vec::new();
    match eq.kind {
        EquationKind::Derivative => {
            let tmp = format!("_{}", attr.name);
            out.push(Stmt::Local {
                name: tmp.clone(),
                ty: ScalarType::Real,
                init: Some(rhs),
            });
            out.push(Stmt::Assign {
                target: target.clone(),
                op: AssignOp::Add,
                value: Expr::var("dt").mul(Expr::var(tmp)),
            });
        }
        EquationKind::Assignment => {
            out.push(Stmt::Assign {
                target: target.clone(),
                op: AssignOp::Set,
                value: rhs,
            });
        }
    }
    if !attr.bounds.is_none() {
        out.push(Stmt::Clamp {
            target,
            min: binder.bind_opt(&attr.bounds.min)?,
            max: binder.bind_opt(&attr.bounds.max)?,
        });
    }
    Ok(out)
}
