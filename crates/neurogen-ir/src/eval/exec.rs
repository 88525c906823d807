// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! The fragment interpreter.

use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use rayon::prelude::*;
use tracing::trace;

use crate::ast::{AccessIndex, AssignOp, AttrRef, BinOp, DelaySteps, Expr, LValue, Owner, Stmt, UnOp};
use crate::{IrError, Result};

use super::state::NetworkState;
use super::{GlobalOp, PhaseItem, RandomDist, RandomTarget, SpikeRule, StepProgram};

/// Scope of the fragment being executed.
#[derive(Debug, Clone, Copy, Default)]
struct Ctx {
    proj: Option<usize>,
}

impl Ctx {
    fn proj(&self) -> Result<usize> {
        self.proj
            .ok_or_else(|| IrError::Eval("projection loop outside a projection fragment".into()))
    }
}

/// Loop bindings and fragment-local scalars.
#[derive(Debug, Clone, Default)]
struct Frame {
    i: usize,
    j: usize,
    rk_pre: usize,
    rk_post: usize,
    rk_j: usize,
    locals: Vec<(String, f64)>,
    /// Set by `RemoveSynapse` so the enclosing synapse loop does not
    /// skip the element shifted into the removed slot.
    removed: bool,
}

impl NetworkState {
    /// Execute one full step: every phase in order, then advance `t`.
    pub fn step(&mut self, program: &StepProgram) -> Result<()> {
        trace!(t = self.t, "executing step");
        for phase in &program.phases {
            for item in &phase.items {
                self.exec_item(item)?;
            }
        }
        self.t += 1;
        Ok(())
    }

    pub fn run(&mut self, program: &StepProgram, steps: usize) -> Result<()> {
        for _ in 0..steps {
            self.step(program)?;
        }
        Ok(())
    }

    fn exec_item(&mut self, item: &PhaseItem) -> Result<()> {
        match item {
            PhaseItem::ClearSums { pop, targets } => {
                for name in targets {
                    if let Some(values) = self.pops[*pop].locals.get_mut(name) {
                        values.iter_mut().for_each(|v| *v = 0.0);
                    }
                }
                Ok(())
            }
            PhaseItem::PopFragment { stmts, .. } => {
                let ctx = Ctx::default();
                let mut frame = Frame::default();
                exec_stmts(self, ctx, &mut frame, stmts)
            }
            PhaseItem::ProjFragment { proj, stmts } => {
                let ctx = Ctx { proj: Some(*proj) };
                let mut frame = Frame::default();
                exec_stmts(self, ctx, &mut frame, stmts)
            }
            PhaseItem::SpikeDetect { pop, rule } => self.spike_detect(*pop, rule),
            PhaseItem::RotateDelays { pop, vars, spikes } => {
                for name in vars {
                    let current = match self.pops[*pop].locals.get(name) {
                        Some(values) => values.clone(),
                        None => vec![*self.pops[*pop].globals.get(name).unwrap_or(&0.0)],
                    };
                    if let Some(ring) = self.pops[*pop].delayed.get_mut(name) {
                        ring.push_front(current);
                        ring.pop_back();
                    }
                }
                if *spikes {
                    let current = self.pops[*pop].spiked.clone();
                    self.pops[*pop].delayed_spikes.push_front(current);
                    self.pops[*pop].delayed_spikes.pop_back();
                }
                Ok(())
            }
            PhaseItem::GlobalOps { pop, ops } => {
                for (var, op) in ops {
                    let values = self.pops[*pop].locals.get(var).ok_or_else(|| {
                        IrError::Eval(format!("global operation over unknown variable '{var}'"))
                    })?;
                    let result = reduce(*op, values);
                    self.pops[*pop].globals.insert(op.key(var), result);
                }
                Ok(())
            }
            PhaseItem::RefreshRandom { target, name, dist } => self.refresh_random(*target, name, *dist),
        }
    }

    fn spike_detect(&mut self, pop: usize, rule: &SpikeRule) -> Result<()> {
        let ctx = Ctx::default();
        let mut frame = Frame::default();
        let size = self.pops[pop].size;
        let mut fired = Vec::new();
        for i in 0..size {
            if self.pops[pop].refractory_remaining[i] > 0.0 {
                continue;
            }
            frame.i = i;
            if eval_expr(self, ctx, &frame, &rule.predicate)? != 0.0 {
                fired.push(i);
            }
        }
        for &i in &fired {
            frame.i = i;
            exec_body(self, ctx, &mut frame, &rule.reset)?;
            if let Some(refractory) = &rule.refractory {
                let steps = eval_expr(self, ctx, &frame, refractory)?;
                self.pops[pop].refractory_remaining[i] = steps.max(0.0).round();
            }
            self.pops[pop].last_spike[i] = self.t as f64;
        }
        self.pops[pop].spiked = fired;
        Ok(())
    }

    fn refresh_random(&mut self, target: RandomTarget, name: &str, dist: RandomDist) -> Result<()> {
        enum Sampler {
            Uniform(Uniform<f64>),
            Normal(Normal<f64>),
        }
        let sampler = match dist {
            RandomDist::Uniform { min, max } => {
                if min >= max {
                    return Err(IrError::Eval(format!(
                        "invalid uniform range [{min}, {max}) for '{name}'"
                    )));
                }
                Sampler::Uniform(Uniform::new(min, max))
            }
            RandomDist::Normal { mean, sd } => Sampler::Normal(
                Normal::new(mean, sd)
                    .map_err(|e| IrError::Eval(format!("invalid normal distribution: {e}")))?,
            ),
        };
        let draw = |rng: &mut rand::rngs::StdRng| match &sampler {
            Sampler::Uniform(d) => d.sample(rng),
            Sampler::Normal(d) => d.sample(rng),
        };
        match target {
            RandomTarget::PopLocal(p) => {
                let size = self.pops[p].size;
                let values = self
                    .pops[p]
                    .locals
                    .entry(name.to_string())
                    .or_insert_with(|| vec![0.0; size]);
                for v in values.iter_mut() {
                    *v = draw(&mut self.rng);
                }
            }
            RandomTarget::PopGlobal(p) => {
                let v = draw(&mut self.rng);
                self.pops[p].globals.insert(name.to_string(), v);
            }
            RandomTarget::ProjLocal(p) => {
                let shape: Vec<usize> = self.projs[p].pre_ranks.iter().map(Vec::len).collect();
                let values = self
                    .projs[p]
                    .locals
                    .entry(name.to_string())
                    .or_insert_with(|| shape.iter().map(|&n| vec![0.0; n]).collect());
                for row in values.iter_mut() {
                    for v in row.iter_mut() {
                        *v = draw(&mut self.rng);
                    }
                }
            }
            RandomTarget::ProjSemiglobal(p) => {
                let rows = self.projs[p].post_ranks.len();
                let values = self
                    .projs[p]
                    .semiglobals
                    .entry(name.to_string())
                    .or_insert_with(|| vec![0.0; rows]);
                for v in values.iter_mut() {
                    *v = draw(&mut self.rng);
                }
            }
            RandomTarget::ProjGlobal(p) => {
                let v = draw(&mut self.rng);
                self.projs[p].globals.insert(name.to_string(), v);
            }
        }
        Ok(())
    }
}

fn reduce(op: GlobalOp, values: &[f64]) -> f64 {
    match op {
        GlobalOp::Min => values.par_iter().cloned().reduce(|| f64::INFINITY, f64::min),
        GlobalOp::Max => values
            .par_iter()
            .cloned()
            .reduce(|| f64::NEG_INFINITY, f64::max),
        GlobalOp::Sum => values.par_iter().sum(),
        GlobalOp::Mean => {
            if values.is_empty() {
                0.0
            } else {
                values.par_iter().sum::<f64>() / values.len() as f64
            }
        }
        GlobalOp::Norm1 => values.par_iter().map(|v| v.abs()).sum(),
        GlobalOp::Norm2 => values.par_iter().map(|v| v * v).sum::<f64>().sqrt(),
    }
}

/// Run a loop or branch body in its own local scope.
fn exec_body(st: &mut NetworkState, ctx: Ctx, frame: &mut Frame, body: &[Stmt]) -> Result<()> {
    let depth = frame.locals.len();
    let result = exec_stmts(st, ctx, frame, body);
    frame.locals.truncate(depth);
    result
}

fn exec_stmts(st: &mut NetworkState, ctx: Ctx, frame: &mut Frame, stmts: &[Stmt]) -> Result<()> {
    for stmt in stmts {
        exec_stmt(st, ctx, frame, stmt)?;
    }
    Ok(())
}

fn exec_stmt(st: &mut NetworkState, ctx: Ctx, frame: &mut Frame, stmt: &Stmt) -> Result<()> {
    match stmt {
        Stmt::Comment(_) => Ok(()),
        Stmt::Local { name, init, .. } => {
            let v = match init {
                Some(e) => eval_expr(st, ctx, frame, e)?,
                None => 0.0,
            };
            frame.locals.push((name.clone(), v));
            Ok(())
        }
        Stmt::Assign { target, op, value } => {
            let rhs = eval_expr(st, ctx, frame, value)?;
            let v = match op {
                AssignOp::Set => rhs,
                _ => apply(*op, read_lvalue(st, ctx, frame, target)?, rhs),
            };
            write_lvalue(st, ctx, frame, target, v)
        }
        Stmt::Clamp { target, min, max } => {
            let mut v = read_lvalue(st, ctx, frame, target)?;
            if let Some(lo) = min {
                v = v.max(eval_expr(st, ctx, frame, lo)?);
            }
            if let Some(hi) = max {
                v = v.min(eval_expr(st, ctx, frame, hi)?);
            }
            write_lvalue(st, ctx, frame, target, v)
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            if eval_expr(st, ctx, frame, cond)? != 0.0 {
                exec_body(st, ctx, frame, then_branch)
            } else {
                exec_body(st, ctx, frame, else_branch)
            }
        }
        Stmt::ForNeurons { pop, body, .. } => {
            let size = st.pops[*pop].size;
            for i in 0..size {
                frame.i = i;
                exec_body(st, ctx, frame, body)?;
            }
            Ok(())
        }
        Stmt::ForPost { body, .. } => {
            let pid = ctx.proj()?;
            let rows = st.projs[pid].post_ranks.len();
            for i in 0..rows {
                frame.i = i;
                frame.rk_post = st.projs[pid].post_ranks[i];
                exec_body(st, ctx, frame, body)?;
            }
            Ok(())
        }
        Stmt::ForSynapses { body } => {
            let pid = ctx.proj()?;
            let mut j = 0;
            loop {
                if j >= st.projs[pid].pre_ranks[frame.i].len() {
                    break;
                }
                frame.j = j;
                frame.rk_pre = st.projs[pid].pre_ranks[frame.i][j];
                exec_body(st, ctx, frame, body)?;
                if frame.removed {
                    frame.removed = false;
                } else {
                    j += 1;
                }
            }
            Ok(())
        }
        Stmt::ForPreCandidates { pop, body } => {
            let size = st.pops[*pop].size;
            for rk in 0..size {
                frame.rk_pre = rk;
                exec_body(st, ctx, frame, body)?;
            }
            Ok(())
        }
        Stmt::ForSpikes { pop, delay, body } => {
            let list = match delay {
                Some(d) => st.pops[*pop]
                    .delayed_spikes
                    .get(d.saturating_sub(1))
                    .cloned()
                    .ok_or_else(|| {
                        IrError::Eval(format!("spike ring buffer shallower than delay {d}"))
                    })?,
                None => st.pops[*pop].spiked.clone(),
            };
            for rk in list {
                frame.rk_j = rk;
                exec_body(st, ctx, frame, body)?;
            }
            Ok(())
        }
        Stmt::ForInvPost { body } => {
            let pid = ctx.proj()?;
            let pairs = st.projs[pid]
                .inv_pre_rank
                .get(&frame.rk_j)
                .cloned()
                .unwrap_or_default();
            for (i, j) in pairs {
                frame.i = i;
                frame.j = j;
                frame.rk_post = st.projs[pid].post_ranks[i];
                frame.rk_pre = st.projs[pid].pre_ranks[i][j];
                exec_body(st, ctx, frame, body)?;
            }
            Ok(())
        }
        Stmt::ForPostSpikes { pop, body } => {
            let pid = ctx.proj()?;
            let spikes = st.pops[*pop].spiked.clone();
            for rk in spikes {
                let Some(&row) = st.projs[pid].inv_post_rank.get(&rk) else {
                    continue;
                };
                frame.rk_post = rk;
                frame.i = row;
                exec_body(st, ctx, frame, body)?;
            }
            Ok(())
        }
        Stmt::EnqueueDelayedSpikes { pop } => {
            let pid = ctx.proj()?;
            if st.projs[pid].delays.is_none() {
                return Err(IrError::Eval(
                    "delayed spike queue on a projection without per-synapse delays".into(),
                ));
            }
            let spikes = st.pops[*pop].spiked.clone();
            for rk in spikes {
                let pairs = st.projs[pid]
                    .inv_pre_rank
                    .get(&rk)
                    .cloned()
                    .unwrap_or_default();
                for (i, j) in pairs {
                    let d = st.projs[pid].delays.as_ref().map(|dl| dl[i][j]).unwrap_or(1);
                    let slot =
                        (st.projs[pid].idx_delay + d - 1) % st.projs[pid].max_delay;
                    st.projs[pid].pending[slot].push((i, j));
                }
            }
            Ok(())
        }
        Stmt::ForPendingSpikes { body } => {
            let pid = ctx.proj()?;
            let slot = st.projs[pid].idx_delay;
            let pairs = std::mem::take(&mut st.projs[pid].pending[slot]);
            for (i, j) in pairs {
                frame.i = i;
                frame.j = j;
                frame.rk_post = st.projs[pid].post_ranks[i];
                frame.rk_pre = st.projs[pid].pre_ranks[i][j];
                exec_body(st, ctx, frame, body)?;
            }
            st.projs[pid].idx_delay = (slot + 1) % st.projs[pid].max_delay;
            Ok(())
        }
        Stmt::AddSynapse { weight, delay } => {
            let pid = ctx.proj()?;
            let w = eval_expr(st, ctx, frame, weight)?;
            let d = match delay {
                Some(e) => Some(eval_expr(st, ctx, frame, e)?.max(0.0).round() as usize),
                None => None,
            };
            st.projs[pid].add_synapse(frame.i, frame.rk_pre, w, d)
        }
        Stmt::RemoveSynapse => {
            let pid = ctx.proj()?;
            st.projs[pid].remove_synapse(frame.i, frame.j);
            frame.removed = true;
            Ok(())
        }
        Stmt::Raw(_) => Err(IrError::Eval(
            "verbatim statement in an evaluated fragment".into(),
        )),
    }
}

fn apply(op: AssignOp, current: f64, rhs: f64) -> f64 {
    match op {
        AssignOp::Set => rhs,
        AssignOp::Add => current + rhs,
        AssignOp::Sub => current - rhs,
        AssignOp::Mul => current * rhs,
        AssignOp::Div => current / rhs,
    }
}

fn read_lvalue(st: &mut NetworkState, ctx: Ctx, frame: &Frame, lv: &LValue) -> Result<f64> {
    match lv {
        LValue::Var(name) => frame
            .locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| IrError::Eval(format!("read of undeclared local '{name}'"))),
        LValue::Attr(attr) => read_attr(st, ctx, frame, attr),
    }
}

fn write_lvalue(
    st: &mut NetworkState,
    ctx: Ctx,
    frame: &mut Frame,
    lv: &LValue,
    v: f64,
) -> Result<()> {
    match lv {
        LValue::Var(name) => {
            let slot = frame
                .locals
                .iter_mut()
                .rev()
                .find(|(n, _)| n == name)
                .ok_or_else(|| IrError::Eval(format!("write to undeclared local '{name}'")))?;
            slot.1 = v;
            Ok(())
        }
        LValue::Attr(attr) => write_attr(st, ctx, frame, attr, v),
    }
}

/// Resolve a non-delayed population access to a rank, `None` for a
/// per-population scalar.
fn pop_rank(
    st: &mut NetworkState,
    ctx: Ctx,
    frame: &Frame,
    index: &AccessIndex,
) -> Result<Option<usize>> {
    match index {
        AccessIndex::Scalar => Ok(None),
        AccessIndex::Neuron => Ok(Some(frame.i)),
        AccessIndex::NeuronAt(e) => {
            let v = eval_expr(st, ctx, frame, e)?;
            Ok(Some(v.max(0.0) as usize))
        }
        AccessIndex::PostNeuron => Ok(Some(frame.rk_post)),
        AccessIndex::PreNeuron => Ok(Some(frame.rk_pre)),
        other => Err(IrError::Eval(format!(
            "index {other:?} is not valid on a population attribute"
        ))),
    }
}

fn delay_slot(st: &NetworkState, ctx: Ctx, frame: &Frame, steps: &DelaySteps) -> Result<usize> {
    match steps {
        DelaySteps::Uniform(d) => Ok(d.saturating_sub(1)),
        DelaySteps::PerSynapse => {
            let pid = ctx.proj()?;
            let delays = st.projs[pid].delays.as_ref().ok_or_else(|| {
                IrError::Eval("per-synapse delayed read without per-synapse delays".into())
            })?;
            Ok(delays[frame.i][frame.j].saturating_sub(1))
        }
    }
}

fn read_attr(st: &mut NetworkState, ctx: Ctx, frame: &Frame, attr: &AttrRef) -> Result<f64> {
    match attr.owner {
        Owner::Pop(p) => match &attr.index {
            AccessIndex::Delayed { base, steps } => {
                let slot = delay_slot(st, ctx, frame, steps)?;
                let rank = pop_rank(st, ctx, frame, base)?.unwrap_or(0);
                let ring = st.pops[p].delayed.get(&attr.name).ok_or_else(|| {
                    IrError::Eval(format!("no delay ring buffer for '{}'", attr.name))
                })?;
                let past = ring.get(slot).ok_or_else(|| {
                    IrError::Eval(format!(
                        "delay ring buffer of '{}' shallower than slot {slot}",
                        attr.name
                    ))
                })?;
                Ok(past[rank])
            }
            index => {
                let rank = pop_rank(st, ctx, frame, index)?;
                let pop = &st.pops[p];
                match rank {
                    Some(rk) => match attr.name.as_str() {
                        "last_spike" => Ok(pop.last_spike[rk]),
                        "refractory_remaining" => Ok(pop.refractory_remaining[rk]),
                        name => pop
                            .locals
                            .get(name)
                            .map(|v| v[rk])
                            .or_else(|| pop.globals.get(name).copied())
                            .ok_or_else(|| {
                                IrError::Eval(format!("unknown population attribute '{name}'"))
                            }),
                    },
                    None => pop.globals.get(&attr.name).copied().ok_or_else(|| {
                        IrError::Eval(format!("unknown population attribute '{}'", attr.name))
                    }),
                }
            }
        },
        Owner::Proj(p) => {
            let proj = &st.projs[p];
            match &attr.index {
                AccessIndex::Scalar => {
                    proj.globals.get(&attr.name).copied().ok_or_else(|| {
                        IrError::Eval(format!("unknown projection attribute '{}'", attr.name))
                    })
                }
                AccessIndex::PostIndexed => proj
                    .semiglobals
                    .get(&attr.name)
                    .map(|v| v[frame.i])
                    .ok_or_else(|| {
                        IrError::Eval(format!("unknown semiglobal attribute '{}'", attr.name))
                    }),
                AccessIndex::Synapse => match attr.name.as_str() {
                    "w" => Ok(proj.w[frame.i][frame.j]),
                    "delay" => match &proj.delays {
                        Some(d) => Ok(d[frame.i][frame.j] as f64),
                        None => Ok(proj.uniform_delay as f64),
                    },
                    name => proj
                        .locals
                        .get(name)
                        .map(|v| v[frame.i][frame.j])
                        .ok_or_else(|| {
                            IrError::Eval(format!("unknown synaptic attribute '{name}'"))
                        }),
                },
                other => Err(IrError::Eval(format!(
                    "index {other:?} is not valid on a projection attribute"
                ))),
            }
        }
    }
}

fn write_attr(
    st: &mut NetworkState,
    ctx: Ctx,
    frame: &mut Frame,
    attr: &AttrRef,
    v: f64,
) -> Result<()> {
    match attr.owner {
        Owner::Pop(p) => {
            let rank = pop_rank(st, ctx, frame, &attr.index)?;
            let pop = &mut st.pops[p];
            match rank {
                Some(rk) => match attr.name.as_str() {
                    "last_spike" => pop.last_spike[rk] = v,
                    "refractory_remaining" => pop.refractory_remaining[rk] = v,
                    name => {
                        let values = pop.locals.get_mut(name).ok_or_else(|| {
                            IrError::Eval(format!("write to unknown population attribute '{name}'"))
                        })?;
                        values[rk] = v;
                    }
                },
                None => {
                    pop.globals.insert(attr.name.clone(), v);
                }
            }
            Ok(())
        }
        Owner::Proj(p) => {
            let proj = &mut st.projs[p];
            match &attr.index {
                AccessIndex::Scalar => {
                    proj.globals.insert(attr.name.clone(), v);
                    Ok(())
                }
                AccessIndex::PostIndexed => {
                    let values = proj.semiglobals.get_mut(&attr.name).ok_or_else(|| {
                        IrError::Eval(format!(
                            "write to unknown semiglobal attribute '{}'",
                            attr.name
                        ))
                    })?;
                    values[frame.i] = v;
                    Ok(())
                }
                AccessIndex::Synapse => {
                    match attr.name.as_str() {
                        "w" => proj.w[frame.i][frame.j] = v,
                        name => {
                            let values = proj.locals.get_mut(name).ok_or_else(|| {
                                IrError::Eval(format!(
                                    "write to unknown synaptic attribute '{name}'"
                                ))
                            })?;
                            values[frame.i][frame.j] = v;
                        }
                    }
                    Ok(())
                }
                other => Err(IrError::Eval(format!(
                    "index {other:?} is not valid on a projection attribute"
                ))),
            }
        }
    }
}

fn eval_expr(st: &mut NetworkState, ctx: Ctx, frame: &Frame, e: &Expr) -> Result<f64> {
    match e {
        Expr::Real(v) => Ok(*v),
        Expr::Int(v) => Ok(*v as f64),
        Expr::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
        Expr::Var(name) => match name.as_str() {
            "i" => Ok(frame.i as f64),
            "j" => Ok(frame.j as f64),
            "rk_pre" => Ok(frame.rk_pre as f64),
            "rk_post" => Ok(frame.rk_post as f64),
            "rk_j" => Ok(frame.rk_j as f64),
            "t" => Ok(st.t as f64),
            "dt" => Ok(st.dt),
            _ => frame
                .locals
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| *v)
                .ok_or_else(|| IrError::Eval(format!("unbound variable '{name}'"))),
        },
        Expr::Attr(attr) => read_attr(st, ctx, frame, attr),
        Expr::Unary(op, inner) => {
            let v = eval_expr(st, ctx, frame, inner)?;
            Ok(match op {
                UnOp::Neg => -v,
                UnOp::Not => {
                    if v != 0.0 {
                        0.0
                    } else {
                        1.0
                    }
                }
            })
        }
        Expr::Binary(op, lhs, rhs) => {
            let a = eval_expr(st, ctx, frame, lhs)?;
            let b = eval_expr(st, ctx, frame, rhs)?;
            Ok(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Mod => a % b,
                BinOp::Lt => bool_to_f64(a < b),
                BinOp::Le => bool_to_f64(a <= b),
                BinOp::Gt => bool_to_f64(a > b),
                BinOp::Ge => bool_to_f64(a >= b),
                BinOp::Eq => bool_to_f64(a == b),
                BinOp::Ne => bool_to_f64(a != b),
                BinOp::And => bool_to_f64(a != 0.0 && b != 0.0),
                BinOp::Or => bool_to_f64(a != 0.0 || b != 0.0),
            })
        }
        Expr::Call(func, args) => eval_call(st, ctx, frame, func, args),
        Expr::UniformDraw => Ok(st.rng.gen::<f64>()),
    }
}

fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn eval_call(
    st: &mut NetworkState,
    ctx: Ctx,
    frame: &Frame,
    func: &str,
    args: &[Expr],
) -> Result<f64> {
    // Live synapse count of the current row, used by the mean PSP
    // operator.
    if func == "row_size" && args.is_empty() {
        let pid = ctx.proj()?;
        return Ok(st.projs[pid].pre_ranks[frame.i].len() as f64);
    }
    // Connectivity probe used by synapse-creation conditions.
    if func == "isConnected" {
        let pid = ctx.proj()?;
        let row = eval_expr(st, ctx, frame, &args[0])?.max(0.0) as usize;
        let rk_pre = eval_expr(st, ctx, frame, &args[1])?.max(0.0) as usize;
        return Ok(bool_to_f64(st.projs[pid].is_connected(row, rk_pre)));
    }
    let mut vals = Vec::with_capacity(args.len());
    for a in args {
        vals.push(eval_expr(st, ctx, frame, a)?);
    }
    let check = |n: usize| -> Result<()> {
        if vals.len() == n {
            Ok(())
        } else {
            Err(IrError::Eval(format!(
                "function '{func}' expects {n} arguments, got {}",
                vals.len()
            )))
        }
    };
    match func {
        "exp" => check(1).map(|_| vals[0].exp()),
        "log" => check(1).map(|_| vals[0].ln()),
        "log10" => check(1).map(|_| vals[0].log10()),
        "sqrt" => check(1).map(|_| vals[0].sqrt()),
        "fabs" | "abs" => check(1).map(|_| vals[0].abs()),
        "sin" => check(1).map(|_| vals[0].sin()),
        "cos" => check(1).map(|_| vals[0].cos()),
        "tan" => check(1).map(|_| vals[0].tan()),
        "sinh" => check(1).map(|_| vals[0].sinh()),
        "cosh" => check(1).map(|_| vals[0].cosh()),
        "tanh" => check(1).map(|_| vals[0].tanh()),
        "floor" => check(1).map(|_| vals[0].floor()),
        "ceil" => check(1).map(|_| vals[0].ceil()),
        "round" => check(1).map(|_| vals[0].round()),
        "pow" => check(2).map(|_| vals[0].powf(vals[1])),
        "fmod" => check(2).map(|_| vals[0] % vals[1]),
        "fmin" => check(2).map(|_| vals[0].min(vals[1])),
        "fmax" => check(2).map(|_| vals[0].max(vals[1])),
        "clip" => check(3).map(|_| vals[0].max(vals[1]).min(vals[2])),
        other => Err(IrError::Eval(format!("unknown function '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Phase, PhaseItem, StepProgram};
    use super::*;
    use crate::ast::ScalarType;
    use crate::eval::{PopulationState, ProjectionState};

    fn pre_r(pop: usize) -> Expr {
        Expr::attr(AttrRef::pop(pop, "r", AccessIndex::PreNeuron))
    }

    fn syn_w(proj: usize) -> Expr {
        Expr::attr(AttrRef::proj(proj, "w", AccessIndex::Synapse))
    }

    /// `sum` of `w * r_pre` written to `_sum_exc[post_rank[i]]`.
    fn weighted_sum_fragment() -> Vec<Stmt> {
        vec![Stmt::ForPost {
            parallel: false,
            body: vec![
                Stmt::Local {
                    name: "sum".into(),
                    ty: ScalarType::Real,
                    init: Some(Expr::Real(0.0)),
                },
                Stmt::ForSynapses {
                    body: vec![Stmt::Assign {
                        target: LValue::Var("sum".into()),
                        op: AssignOp::Add,
                        value: syn_w(0).mul(pre_r(0)),
                    }],
                },
                Stmt::Assign {
                    target: LValue::Attr(AttrRef::pop(
                        1,
                        "_sum_exc",
                        AccessIndex::PostNeuron,
                    )),
                    op: AssignOp::Set,
                    value: Expr::var("sum"),
                },
            ],
        }]
    }

    fn rate_net() -> NetworkState {
        let mut st = NetworkState::new(1.0, Some(42));
        let mut pre = PopulationState::new(3);
        pre.add_local("r", 0.0);
        pre.locals.get_mut("r").unwrap().clone_from_slice(&[1.0, 2.0, 3.0]);
        let mut post = PopulationState::new(2);
        post.add_local("_sum_exc", 0.0);
        st.pops.push(pre);
        st.pops.push(post);
        st.projs.push(ProjectionState::new(
            0,
            1,
            "exc",
            vec![0, 1],
            vec![vec![0, 2], vec![1]],
            vec![vec![0.5, 0.25], vec![2.0]],
        ));
        st
    }

    #[test]
    fn test_weighted_sum_psp() {
        let mut st = rate_net();
        let mut program = StepProgram::default();
        let mut psp = Phase::new("psp");
        psp.items.push(PhaseItem::ProjFragment {
            proj: 0,
            stmts: weighted_sum_fragment(),
        });
        program.push(psp);
        st.step(&program).unwrap();
        let sums = &st.pops[1].locals["_sum_exc"];
        assert!((sums[0] - (0.5 * 1.0 + 0.25 * 3.0)).abs() < 1e-12);
        assert!((sums[1] - 4.0).abs() < 1e-12);
        assert_eq!(st.t, 1);
    }

    #[test]
    fn test_uniform_delay_read_and_rotation() {
        let mut st = rate_net();
        st.pops[0].init_delay("r", 2);
        // Ring pre-filled with the current values, then one rotation
        // after r changed.
        st.pops[0].locals.get_mut("r").unwrap()[0] = 10.0;
        let item = PhaseItem::RotateDelays {
            pop: 0,
            vars: vec!["r".into()],
            spikes: false,
        };
        st.exec_item(&item).unwrap();
        let frame = Frame {
            rk_pre: 0,
            ..Frame::default()
        };
        let one_ago = AttrRef::pop(
            0,
            "r",
            AccessIndex::Delayed {
                base: Box::new(AccessIndex::PreNeuron),
                steps: DelaySteps::Uniform(1),
            },
        );
        let two_ago = AttrRef::pop(
            0,
            "r",
            AccessIndex::Delayed {
                base: Box::new(AccessIndex::PreNeuron),
                steps: DelaySteps::Uniform(2),
            },
        );
        let ctx = Ctx { proj: Some(0) };
        assert_eq!(read_attr(&mut st, ctx, &frame, &one_ago).unwrap(), 10.0);
        assert_eq!(read_attr(&mut st, ctx, &frame, &two_ago).unwrap(), 1.0);
    }

    #[test]
    fn test_spike_detection_reset_and_refractory() {
        let mut st = NetworkState::new(1.0, Some(1));
        let mut pop = PopulationState::new(3);
        pop.add_local("v", 0.0);
        pop.locals.get_mut("v").unwrap().clone_from_slice(&[2.0, 0.5, 3.0]);
        st.pops.push(pop);
        let rule = SpikeRule {
            predicate: Expr::attr(AttrRef::pop(0, "v", AccessIndex::Neuron)).gt(Expr::Real(1.0)),
            reset: vec![Stmt::Assign {
                target: LValue::Attr(AttrRef::pop(0, "v", AccessIndex::Neuron)),
                op: AssignOp::Set,
                value: Expr::Real(0.0),
            }],
            refractory: Some(Expr::Real(2.0)),
        };
        st.exec_item(&PhaseItem::SpikeDetect { pop: 0, rule: rule.clone() })
            .unwrap();
        assert_eq!(st.pops[0].spiked, vec![0, 2]);
        assert_eq!(st.pops[0].locals["v"][0], 0.0);
        assert_eq!(st.pops[0].last_spike[0], 0.0);
        assert_eq!(st.pops[0].refractory_remaining[2], 2.0);

        // While refractory the predicate is not even evaluated.
        st.pops[0].locals.get_mut("v").unwrap()[0] = 5.0;
        st.exec_item(&PhaseItem::SpikeDetect { pop: 0, rule }).unwrap();
        assert!(st.pops[0].spiked.is_empty());
    }

    #[test]
    fn test_global_ops() {
        let mut st = NetworkState::new(1.0, Some(1));
        let mut pop = PopulationState::new(4);
        pop.add_local("r", 0.0);
        pop.locals
            .get_mut("r")
            .unwrap()
            .clone_from_slice(&[1.0, -2.0, 3.0, 2.0]);
        st.pops.push(pop);
        st.exec_item(&PhaseItem::GlobalOps {
            pop: 0,
            ops: vec![
                ("r".into(), GlobalOp::Max),
                ("r".into(), GlobalOp::Mean),
                ("r".into(), GlobalOp::Norm1),
            ],
        })
        .unwrap();
        assert_eq!(st.pops[0].globals["_max_r"], 3.0);
        assert_eq!(st.pops[0].globals["_mean_r"], 1.0);
        assert_eq!(st.pops[0].globals["_norm1_r"], 8.0);
    }

    #[test]
    fn test_refresh_random_is_seeded() {
        let draws = |seed| {
            let mut st = NetworkState::new(1.0, Some(seed));
            let mut pop = PopulationState::new(5);
            pop.add_local("noise", 0.0);
            st.pops.push(pop);
            st.exec_item(&PhaseItem::RefreshRandom {
                target: RandomTarget::PopLocal(0),
                name: "noise".into(),
                dist: RandomDist::Uniform { min: -1.0, max: 1.0 },
            })
            .unwrap();
            st.pops[0].locals["noise"].clone()
        };
        assert_eq!(draws(7), draws(7));
        assert_ne!(draws(7), draws(8));
    }

    #[test]
    fn test_pending_spike_delivery_timing() {
        // delay = 2 steps: a spike listed at step t is enqueued while
        // stepping t+1 and delivered while stepping t+2.
        let mut st = NetworkState::new(1.0, Some(3));
        let pre = PopulationState::new(1);
        let mut post = PopulationState::new(1);
        post.add_local("g_exc", 0.0);
        st.pops.push(pre);
        st.pops.push(post);
        let mut proj =
            ProjectionState::new(0, 1, "exc", vec![0], vec![vec![0]], vec![vec![0.7]]);
        proj.set_nonuniform_delays(vec![vec![2]]);
        st.projs.push(proj);

        let fragment = vec![
            Stmt::EnqueueDelayedSpikes { pop: 0 },
            Stmt::ForPendingSpikes {
                body: vec![Stmt::Assign {
                    target: LValue::Attr(AttrRef::pop(1, "g_exc", AccessIndex::PostNeuron)),
                    op: AssignOp::Add,
                    value: syn_w(0),
                }],
            },
        ];
        let mut program = StepProgram::default();
        let mut phase = Phase::new("psp");
        phase.items.push(PhaseItem::ProjFragment {
            proj: 0,
            stmts: fragment,
        });
        program.push(phase);

        // Neuron 0 fired during the previous step.
        st.pops[0].spiked = vec![0];
        st.step(&program).unwrap();
        st.pops[0].spiked.clear();
        assert_eq!(st.pops[1].locals["g_exc"][0], 0.0);
        st.step(&program).unwrap();
        assert!((st.pops[1].locals["g_exc"][0] - 0.7).abs() < 1e-12);
        st.step(&program).unwrap();
        assert!((st.pops[1].locals["g_exc"][0] - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_structural_plasticity_statements() {
        let mut st = rate_net();
        // Create (1, 1) with probability 1, then prune every synapse
        // with w < 0.3.
        let create = vec![Stmt::ForPost {
            parallel: false,
            body: vec![Stmt::ForPreCandidates {
                pop: 0,
                body: vec![Stmt::If {
                    cond: Expr::Unary(
                        UnOp::Not,
                        Box::new(Expr::call(
                            "isConnected",
                            vec![Expr::var("i"), Expr::var("rk_pre")],
                        )),
                    ),
                    then_branch: vec![Stmt::AddSynapse {
                        weight: Expr::Real(1.0),
                        delay: None,
                    }],
                    else_branch: vec![],
                }],
            }],
        }];
        let mut frame = Frame::default();
        let ctx = Ctx { proj: Some(0) };
        exec_stmts(&mut st, ctx, &mut frame, &create).unwrap();
        assert_eq!(st.projs[0].pre_ranks[0], vec![0, 1, 2]);
        assert_eq!(st.projs[0].pre_ranks[1], vec![0, 1, 2]);

        let prune = vec![Stmt::ForPost {
            parallel: false,
            body: vec![Stmt::ForSynapses {
                body: vec![Stmt::If {
                    cond: syn_w(0).lt(Expr::Real(0.3)),
                    then_branch: vec![Stmt::RemoveSynapse],
                    else_branch: vec![],
                }],
            }],
        }];
        let mut frame = Frame::default();
        exec_stmts(&mut st, ctx, &mut frame, &prune).unwrap();
        // 0.25 pruned, everything else survives.
        assert_eq!(st.projs[0].pre_ranks[0], vec![0, 1]);
        assert_eq!(st.projs[0].w[1], vec![1.0, 2.0, 1.0]);
    }
}
