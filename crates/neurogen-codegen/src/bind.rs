// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Symbol binding.
//!
//! Descriptor equations reference attributes by symbolic name (`v`,
//! `w`, `pre.r`, `sum(exc)`); this module resolves every name against
//! the declared attribute tables into a typed [`AttrRef`], picking the
//! access index from the attribute's locality and the reference site.
//! An unresolvable name aborts generation with the type name and the
//! offending equation text.
//!
//! Naming conventions resolved here:
//! - `sum(<target>)`   the rate accumulator `_sum_<target>` of the
//!   population
//! - `g_<target>`      the conductance accumulator of a spiking
//!   population (unless declared explicitly)
//! - `g_target`        inside synapse event equations, the accumulator
//!   of the projection's own target label
//! - `max(r)` etc.     population-wide reductions, read back from
//!   `_max_r`; the demanded `(population, variable, op)` triples are
//!   collected for the assembler's phase-5 schedule
//! - `pre.X` / `post.X`  attributes of the connected populations
//! - `last_spike`, `_last_event`, `t`, `dt`  builtins

use std::collections::BTreeSet;

use neurogen_ir::ast::{AccessIndex, AttrRef, Expr, LValue};
use neurogen_ir::eval::GlobalOp;
use neurogen_ir::{CppPrinter, RenderCtx};
use neurogen_model::{Locality, Population, Projection};

use crate::error::{GenResult, GenerationError};

/// Where an equation lives, deciding how bare names resolve.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    Neuron {
        pop: &'a Population,
    },
    Synapse {
        proj: &'a Projection,
        pre: &'a Population,
        post: &'a Population,
    },
}

/// Binds the equations of one type; collects the population reductions
/// they demand.
pub struct Binder<'a> {
    scope: Scope<'a>,
    type_name: String,
    /// `(population id, variable, op)` triples needed by phase 5.
    pub global_ops: BTreeSet<(usize, String, GlobalOp)>,
}

impl<'a> Binder<'a> {
    pub fn neuron(pop: &'a Population) -> Self {
        Self {
            type_name: pop.neuron.name.clone(),
            scope: Scope::Neuron { pop },
            global_ops: BTreeSet::new(),
        }
    }

    pub fn synapse(proj: &'a Projection, pre: &'a Population, post: &'a Population) -> Self {
        Self {
            type_name: proj.synapse.name.clone(),
            scope: Scope::Synapse { proj, pre, post },
            global_ops: BTreeSet::new(),
        }
    }

    /// Bind every symbolic name in `e` to a typed access.
    pub fn bind(&mut self, e: &Expr) -> GenResult<Expr> {
        self.bind_in(e, e)
    }

    /// Bind an optional bound expression.
    pub fn bind_opt(&mut self, e: &Option<Expr>) -> GenResult<Option<Expr>> {
        match e {
            Some(e) => Ok(Some(self.bind(e)?)),
            None => Ok(None),
        }
    }

    /// Resolve the target of a reset or event equation.
    pub fn bind_target(&mut self, target: &str) -> GenResult<LValue> {
        let root = Expr::var(target);
        match self.bind_in(&root, &root)? {
            Expr::Attr(attr) => Ok(LValue::Attr(attr)),
            _ => Err(self.undeclared(target, &root)),
        }
    }

    fn undeclared(&self, symbol: &str, equation: &Expr) -> GenerationError {
        let printer = CppPrinter::new("double", false);
        GenerationError::UndeclaredSymbol {
            type_name: self.type_name.clone(),
            symbol: symbol.to_string(),
            equation: printer.expr(equation, &RenderCtx::default()),
        }
    }

    fn bind_in(&mut self, e: &Expr, equation: &Expr) -> GenResult<Expr> {
        match e {
            Expr::Var(name) => self.bind_var(name, equation),
            Expr::Unary(op, inner) => Ok(Expr::Unary(
                *op,
                Box::new(self.bind_in(inner, equation)?),
            )),
            Expr::Binary(op, lhs, rhs) => Ok(Expr::Binary(
                *op,
                Box::new(self.bind_in(lhs, equation)?),
                Box::new(self.bind_in(rhs, equation)?),
            )),
            Expr::Call(func, args) => self.bind_call(func, args, equation),
            Expr::Real(_) | Expr::Int(_) | Expr::Bool(_) | Expr::Attr(_) | Expr::UniformDraw => {
                Ok(e.clone())
            }
        }
    }

    fn bind_var(&mut self, name: &str, equation: &Expr) -> GenResult<Expr> {
        if name == "t" || name == "dt" {
            return Ok(Expr::var(name));
        }
        // Reductions written in functional form: `mean(r)`, `max(pre.v)`.
        // `sum(<target>)` reads the rate accumulator instead and keeps
        // falling through to the attribute tables below.
        if let Some((func, inner)) = split_functional(name) {
            if let Some(op) = reduction_op(func) {
                let accumulator = op == GlobalOp::Sum && self.is_sum_target(inner);
                if !accumulator {
                    if let Some((pop, var, index_ok)) = self.reduction_operand(inner) {
                        if index_ok {
                            self.global_ops.insert((pop, var.clone(), op));
                            return Ok(Expr::attr(AttrRef::pop(
                                pop,
                                op.key(&var),
                                AccessIndex::Scalar,
                            )));
                        }
                    }
                }
            }
        }
        match self.scope {
            Scope::Neuron { pop } => self
                .pop_symbol(pop, name, AccessIndex::Neuron)
                .map(Expr::Attr)
                .ok_or_else(|| self.undeclared(name, equation)),
            Scope::Synapse { proj, pre, post } => {
                if let Some(rest) = name.strip_prefix("pre.") {
                    return self
                        .pop_symbol(pre, rest, AccessIndex::PreNeuron)
                        .map(Expr::Attr)
                        .ok_or_else(|| self.undeclared(name, equation));
                }
                if let Some(rest) = name.strip_prefix("post.") {
                    return self
                        .pop_symbol(post, rest, AccessIndex::PostNeuron)
                        .map(Expr::Attr)
                        .ok_or_else(|| self.undeclared(name, equation));
                }
                match name {
                    "w" => Ok(Expr::attr(AttrRef::proj(proj.id, "w", AccessIndex::Synapse))),
                    "delay" => Ok(Expr::attr(AttrRef::proj(
                        proj.id,
                        "delay",
                        AccessIndex::Synapse,
                    ))),
                    "_last_event" => Ok(Expr::attr(AttrRef::proj(
                        proj.id,
                        "_last_event",
                        AccessIndex::Synapse,
                    ))),
                    "g_target" => Ok(Expr::attr(AttrRef::pop(
                        post.id,
                        format!("g_{}", proj.target),
                        AccessIndex::PostNeuron,
                    ))),
                    _ => self
                        .synapse_symbol(proj, name)
                        .map(Expr::Attr)
                        .ok_or_else(|| self.undeclared(name, equation)),
                }
            }
        }
    }

    /// A bare name against a population's attribute table.
    fn pop_symbol(
        &self,
        pop: &Population,
        name: &str,
        local_index: AccessIndex,
    ) -> Option<AttrRef> {
        // sum(<target>) reads the rate accumulator.
        if let Some(target) = name.strip_prefix("sum(").and_then(|s| s.strip_suffix(')')) {
            return Some(AttrRef::pop(
                pop.id,
                format!("_sum_{target}"),
                local_index,
            ));
        }
        if let Some(attr) = pop.neuron.attribute(name) {
            let index = match attr.locality {
                Locality::Local => local_index,
                Locality::Global | Locality::Semiglobal => AccessIndex::Scalar,
            };
            return Some(AttrRef::pop(pop.id, name, index));
        }
        // Conductance accumulators exist per incoming target on spiking
        // populations without being declared.
        if let Some(target) = name.strip_prefix("g_") {
            if pop.is_spiking() && pop.targets.contains(target) {
                return Some(AttrRef::pop(pop.id, name, local_index));
            }
        }
        if name == "last_spike" && pop.is_spiking() {
            return Some(AttrRef::pop(pop.id, name, local_index));
        }
        None
    }

    fn synapse_symbol(&self, proj: &Projection, name: &str) -> Option<AttrRef> {
        let attr = proj.synapse.attribute(name)?;
        let index = match attr.locality {
            Locality::Local => AccessIndex::Synapse,
            Locality::Semiglobal => AccessIndex::PostIndexed,
            Locality::Global => AccessIndex::Scalar,
        };
        Some(AttrRef::proj(proj.id, name, index))
    }

    fn bind_call(&mut self, func: &str, args: &[Expr], equation: &Expr) -> GenResult<Expr> {
        // Population-wide reductions: max(r), mean(pre.r), ...
        if let Some(op) = reduction_op(func) {
            if let [Expr::Var(name)] = args {
                if let Some((pop, var, index_ok)) = self.reduction_operand(name) {
                    if index_ok {
                        self.global_ops.insert((pop, var.clone(), op));
                        return Ok(Expr::attr(AttrRef::pop(
                            pop,
                            op.key(&var),
                            AccessIndex::Scalar,
                        )));
                    }
                }
            }
        }
        let mut bound = Vec::with_capacity(args.len());
        for a in args {
            bound.push(self.bind_in(a, equation)?);
        }
        Ok(Expr::Call(func.to_string(), bound))
    }

    /// Whether `inner` names an incoming target of the scope's
    /// population, so `sum(inner)` means the rate accumulator.
    fn is_sum_target(&self, inner: &str) -> bool {
        let (pop, bare): (&Population, &str) = match self.scope {
            Scope::Neuron { pop } => (pop, inner),
            Scope::Synapse { pre, post, .. } => {
                if let Some(rest) = inner.strip_prefix("pre.") {
                    (pre, rest)
                } else if let Some(rest) = inner.strip_prefix("post.") {
                    (post, rest)
                } else {
                    return false;
                }
            }
        };
        pop.targets.contains(bare)
    }

    /// `(population id, variable name, is a local variable)` for a
    /// reduction argument.
    fn reduction_operand(&self, name: &str) -> Option<(usize, String, bool)> {
        let (pop, bare): (&Population, &str) = match self.scope {
            Scope::Neuron { pop } => (pop, name),
            Scope::Synapse { pre, post, .. } => {
                if let Some(rest) = name.strip_prefix("pre.") {
                    (pre, rest)
                } else if let Some(rest) = name.strip_prefix("post.") {
                    (post, rest)
                } else {
                    return None;
                }
            }
        };
        let attr = pop.neuron.attribute(bare)?;
        Some((pop.id, bare.to_string(), attr.locality == Locality::Local))
    }
}

/// Splits `func(inner)` names; dotted prefixes (`post.sum(exc)`) stay
/// whole so the `pre.`/`post.` resolution sees them first.
fn split_functional(name: &str) -> Option<(&str, &str)> {
    let open = name.find('(')?;
    let func = &name[..open];
    if func.is_empty() || func.contains('.') {
        return None;
    }
    let inner = name[open + 1..].strip_suffix(')')?;
    Some((func, inner))
}

fn reduction_op(func: &str) -> Option<GlobalOp> {
    match func {
        "min" => Some(GlobalOp::Min),
        "max" => Some(GlobalOp::Max),
        "mean" => Some(GlobalOp::Mean),
        "sum" => Some(GlobalOp::Sum),
        "norm1" => Some(GlobalOp::Norm1),
        "norm2" => Some(GlobalOp::Norm2),
        _ => None,
    }
}
