// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transformation and analysis passes over the IR.
//!
//! Delay redirection is the pass that motivated the structured IR: the same
//! rewrite must hit the PSP fragment, the synaptic-update fragment and the
//! pre-event fragment of a projection identically, which string substitution
//! cannot guarantee.

use crate::ast::{AccessIndex, AttrRef, DelaySteps, Expr, LValue, Owner, Stmt};
use crate::{IrError, Result};
use tracing::trace;

/// Delay context of one projection, driving the redirection pass.
#[derive(Debug, Clone)]
pub struct DelayInfo {
    /// Presynaptic population whose reads are redirected.
    pub pre_pop: usize,
    /// Variables of the presynaptic population that are buffered.
    pub delayed_vars: Vec<String>,
    /// Ring-buffer depth addressing.
    pub steps: DelaySteps,
}

/// Redirect every read of a delayed presynaptic variable into the
/// presynaptic population's ring buffer.
///
/// Reads through `pre_rank[i][j]` become ring-buffer accesses at slot
/// `d - 1` (uniform) or `delay[i][j] - 1` (per-synapse). A global
/// presynaptic variable can only be redirected under a uniform delay;
/// per-synapse delays on a global read are rejected, matching the original
/// generator's fatal error.
pub fn redirect_delays(stmts: &[Stmt], info: &DelayInfo) -> Result<Vec<Stmt>> {
    stmts.iter().map(|s| redirect_stmt(s, info)).collect()
}

fn redirect_stmt(stmt: &Stmt, info: &DelayInfo) -> Result<Stmt> {
    let mut out = stmt.clone();
    match &mut out {
        Stmt::Assign { target, value, .. } => {
            *value = redirect_expr(value, info)?;
            if let LValue::Attr(attr) = target {
                *attr = redirect_attr(attr, info)?;
            }
        }
        Stmt::Clamp { min, max, .. } => {
            if let Some(e) = min {
                *e = redirect_expr(e, info)?;
            }
            if let Some(e) = max {
                *e = redirect_expr(e, info)?;
            }
        }
        Stmt::Local { init: Some(e), .. } => *e = redirect_expr(e, info)?,
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            *cond = redirect_expr(cond, info)?;
            *then_branch = redirect_delays(then_branch, info)?;
            *else_branch = redirect_delays(else_branch, info)?;
        }
        Stmt::ForNeurons { body, .. }
        | Stmt::ForPost { body, .. }
        | Stmt::ForSynapses { body }
        | Stmt::ForPreCandidates { body, .. }
        | Stmt::ForInvPost { body }
        | Stmt::ForPostSpikes { body, .. }
        | Stmt::ForPendingSpikes { body } => *body = redirect_delays(body, info)?,
        Stmt::ForSpikes { pop, delay, body } => {
            // The
            // spike list itself is delayed when the source population is the
            // delayed presynaptic one and the delay is uniform.
            if *pop == info.pre_pop {
                if let DelaySteps::Uniform(d) = info.steps {
                    *delay = Some(d);
                }
            }
            *body = redirect_delays(body, info)?;
        }
        Stmt::AddSynapse { weight, delay } => {
            *weight = redirect_expr(weight, info)?;
            if let Some(e) = delay {
                *e = redirect_expr(e, info)?;
            }
        }
        _ => {}
    }
    Ok(out)
}

fn redirect_expr(expr: &Expr, info: &DelayInfo) -> Result<Expr> {
    let out = match expr {
        Expr::Attr(attr) => Expr::Attr(redirect_attr(attr, info)?),
        Expr::Unary(op, e) => Expr::Unary(*op, Box::new(redirect_expr(e, info)?)),
        Expr::Binary(op, a, b) => Expr::Binary(
            *op,
            Box::new(redirect_expr(a, info)?),
            Box::new(redirect_expr(b, info)?),
        ),
        Expr::Call(name, args) => Expr::Call(
            name.clone(),
            args.iter()
                .map(|a| redirect_expr(a, info))
                .collect::<Result<_>>()?,
        ),
        other => other.clone(),
    };
    Ok(out)
}

fn redirect_attr(attr: &AttrRef, info: &DelayInfo) -> Result<AttrRef> {
    if attr.owner != Owner::Pop(info.pre_pop) || !info.delayed_vars.contains(&attr.name) {
        return Ok(attr.clone());
    }
    match &attr.index {
        // Already redirected; the pass is idempotent.
        AccessIndex::Delayed { .. } => Ok(attr.clone()),
        AccessIndex::PreNeuron => {
            trace!(var = %attr.name, "delay-redirecting presynaptic read");
            Ok(AttrRef {
                owner: attr.owner,
                name: attr.name.clone(),
                index: AccessIndex::Delayed {
                    base: Box::new(AccessIndex::PreNeuron),
                    steps: info.steps,
                },
            })
        }
        AccessIndex::Scalar => match info.steps {
            DelaySteps::Uniform(_) => Ok(AttrRef {
                owner: attr.owner,
                name: attr.name.clone(),
                index: AccessIndex::Delayed {
                    base: Box::new(AccessIndex::Scalar),
                    steps: info.steps,
                },
            }),
            DelaySteps::PerSynapse => Err(IrError::GlobalNonUniformDelay {
                var: attr.name.clone(),
            }),
        },
        _ => Ok(attr.clone()),
    }
}

/// Collect every attribute read in a statement list, in source order.
pub fn collect_attr_reads(stmts: &[Stmt]) -> Vec<AttrRef> {
    let mut out = Vec::new();
    for stmt in stmts {
        collect_stmt(stmt, &mut out);
    }
    out
}

fn collect_stmt(stmt: &Stmt, out: &mut Vec<AttrRef>) {
    match stmt {
        Stmt::Assign { value, .. } => collect_expr(value, out),
        Stmt::Local { init: Some(e), .. } => collect_expr(e, out),
        Stmt::Clamp { min, max, .. } => {
            if let Some(e) = min {
                collect_expr(e, out);
            }
            if let Some(e) = max {
                collect_expr(e, out);
            }
        }
        Stmt::If { cond, .. } => collect_expr(cond, out),
        Stmt::AddSynapse { weight, delay } => {
            collect_expr(weight, out);
            if let Some(e) = delay {
                collect_expr(e, out);
            }
        }
        _ => {}
    }
    for child in stmt.children() {
        for s in child {
            collect_stmt(s, out);
        }
    }
}

fn collect_expr(expr: &Expr, out: &mut Vec<AttrRef>) {
    match expr {
        Expr::Attr(attr) => {
            if let AccessIndex::NeuronAt(e) = &attr.index {
                collect_expr(e, out);
            }
            out.push(attr.clone());
        }
        Expr::Unary(_, e) => collect_expr(e, out),
        Expr::Binary(_, a, b) => {
            collect_expr(a, out);
            collect_expr(b, out);
        }
        Expr::Call(_, args) => {
            for a in args {
                collect_expr(a, out);
            }
        }
        _ => {}
    }
}

/// Statically verify the data-parallelism invariant of a per-neuron update.
///
/// The update of neuron `i` may only read variables of the same population
/// at index `i`; a rank-shifted read (`AccessIndex::NeuronAt`) of a variable
/// that is itself written in `stmts` would make the loop carry a dependency
/// and is rejected.
pub fn check_parallel_independence(pop: usize, stmts: &[Stmt]) -> Result<()> {
    let mut written: Vec<String> = Vec::new();
    collect_writes(stmts, pop, &mut written);

    for (var, attr) in reads_with_context(stmts) {
        if attr.owner == Owner::Pop(pop) {
            if let AccessIndex::NeuronAt(_) = attr.index {
                if written.contains(&attr.name) {
                    return Err(IrError::ParallelDependency {
                        var,
                        other: attr.name,
                    });
                }
            }
        }
    }
    Ok(())
}

fn collect_writes(stmts: &[Stmt], pop: usize, out: &mut Vec<String>) {
    for stmt in stmts {
        if let Stmt::Assign {
            target: LValue::Attr(attr),
            ..
        } = stmt
        {
            if attr.owner == Owner::Pop(pop) && !out.contains(&attr.name) {
                out.push(attr.name.clone());
            }
        }
        for child in stmt.children() {
            collect_writes(child, pop, out);
        }
    }
}

/// Pair every attribute read with the name of the variable whose update
/// contains it, for error reporting.
fn reads_with_context(stmts: &[Stmt]) -> Vec<(String, AttrRef)> {
    let mut out = Vec::new();
    for stmt in stmts {
        if let Stmt::Assign { target, value, .. } = stmt {
            let ctx = match target {
                LValue::Attr(a) => a.name.clone(),
                LValue::Var(v) => v.clone(),
            };
            let mut reads = Vec::new();
            collect_expr(value, &mut reads);
            out.extend(reads.into_iter().map(|r| (ctx.clone(), r)));
        }
        for child in stmt.children() {
            out.extend(reads_with_context(child));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AssignOp;

    fn pre_read() -> Expr {
        Expr::Attr(AttrRef::pop(0, "r", AccessIndex::PreNeuron))
    }

    #[test]
    fn test_uniform_redirection() {
        let stmts = vec![Stmt::Assign {
            target: LValue::Var("sum".into()),
            op: AssignOp::Add,
            value: Expr::Attr(AttrRef::proj(0, "w", AccessIndex::Synapse)).mul(pre_read()),
        }];
        let info = DelayInfo {
            pre_pop: 0,
            delayed_vars: vec!["r".into()],
            steps: DelaySteps::Uniform(3),
        };
        let out = redirect_delays(&stmts, &info).unwrap();
        let reads = collect_attr_reads(&out);
        let delayed: Vec<_> = reads
            .iter()
            .filter(|a| matches!(a.index, AccessIndex::Delayed { .. }))
            .collect();
        assert_eq!(delayed.len(), 1);
        assert_eq!(delayed[0].name, "r");
    }

    #[test]
    fn test_redirection_is_idempotent() {
        let stmts = vec![Stmt::Assign {
            target: LValue::Var("sum".into()),
            op: AssignOp::Add,
            value: pre_read(),
        }];
        let info = DelayInfo {
            pre_pop: 0,
            delayed_vars: vec!["r".into()],
            steps: DelaySteps::Uniform(2),
        };
        let once = redirect_delays(&stmts, &info).unwrap();
        let twice = redirect_delays(&once, &info).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_global_nonuniform_rejected() {
        let stmts = vec![Stmt::Assign {
            target: LValue::Var("sum".into()),
            op: AssignOp::Add,
            value: Expr::Attr(AttrRef::pop(0, "mean_r", AccessIndex::Scalar)),
        }];
        let info = DelayInfo {
            pre_pop: 0,
            delayed_vars: vec!["mean_r".into()],
            steps: DelaySteps::PerSynapse,
        };
        assert!(matches!(
            redirect_delays(&stmts, &info),
            Err(IrError::GlobalNonUniformDelay { .. })
        ));
    }

    #[test]
    fn test_parallel_independence_violation() {
        // v[i] += dt * v[i-1] is a loop-carried dependency
        let shifted = AttrRef::pop(
            1,
            "v",
            AccessIndex::NeuronAt(Box::new(Expr::var("i").sub(Expr::Int(1)))),
        );
        let stmts = vec![Stmt::ForNeurons {
            pop: 1,
            parallel: true,
            body: vec![Stmt::Assign {
                target: LValue::Attr(AttrRef::pop(1, "v", AccessIndex::Neuron)),
                op: AssignOp::Add,
                value: Expr::var("dt").mul(Expr::Attr(shifted)),
            }],
        }];
        assert!(check_parallel_independence(1, &stmts).is_err());
    }

    #[test]
    fn test_parallel_independence_ok_for_own_index() {
        let stmts = vec![Stmt::ForNeurons {
            pop: 1,
            parallel: true,
            body: vec![Stmt::Assign {
                target: LValue::Attr(AttrRef::pop(1, "v", AccessIndex::Neuron)),
                op: AssignOp::Add,
                value: Expr::var("dt").mul(Expr::Attr(AttrRef::pop(1, "v", AccessIndex::Neuron))),
            }],
        }];
        assert!(check_parallel_independence(1, &stmts).is_ok());
    }
}
