// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Projection code generation.
//!
//! The default generators here fill the per-projection fragment slots:
//! the PSP fragment (weighted-sum delivery for rate-coded types, event
//! propagation for spiking types), the synaptic-variable update, the
//! post-event path and the structural-plasticity fragments. Specialized
//! providers ([`crate::provider`]) override individual slots before the
//! defaults run.
//!
//! All behavior fragments pass through the delay-redirection pass, so a
//! delayed presynaptic read is rewritten identically in the PSP, the
//! synaptic update and the pre-event code.

use std::cell::RefCell;
use std::collections::BTreeSet;

use neurogen_config::GeneratorConfig;
use neurogen_ir::ast::{
    AccessIndex, AssignOp, AttrRef, BinOp, DelaySteps, Expr, LValue, Owner, ScalarType, Stmt,
    UnOp,
};
use neurogen_ir::eval::{GlobalOp, RandomDist};
use neurogen_ir::passes::{redirect_delays, DelayInfo};
use neurogen_ir::{Fragment, FragmentSlot};
use neurogen_model::{
    Attribute, CreatingRule, DelaySpec, EquationKind, Init, Locality, Method, Population,
    Projection, PspOperator, SynapseKind,
};
use tracing::debug;

use crate::bind::Binder;
use crate::error::{GenResult, GenerationError};
use crate::provider::provider_for;
use crate::selector::{self, ConnectivityScheme, Selection};

/// Emission order of the projection fragment slots.
pub const SLOTS: [FragmentSlot; 26] = [
    FragmentSlot::DeclareConnectivity,
    FragmentSlot::InitConnectivity,
    FragmentSlot::DeclareInverseConnectivity,
    FragmentSlot::InitInverseConnectivity,
    FragmentSlot::DeclareAttributes,
    FragmentSlot::InitAttributes,
    FragmentSlot::AccessAttributes,
    FragmentSlot::DeclareDelay,
    FragmentSlot::InitDelay,
    FragmentSlot::DeclareEventDriven,
    FragmentSlot::InitEventDriven,
    FragmentSlot::DeclareRng,
    FragmentSlot::InitRng,
    FragmentSlot::UpdateRng,
    FragmentSlot::Psp,
    FragmentSlot::UpdateSynapse,
    FragmentSlot::PostEvent,
    FragmentSlot::Creating,
    FragmentSlot::Pruning,
    FragmentSlot::StructAdditional,
    FragmentSlot::InitAdditional,
    FragmentSlot::AccessAdditional,
    FragmentSlot::SizeInBytes,
    FragmentSlot::Clear,
    FragmentSlot::Monitor,
    FragmentSlot::SaveLoad,
];

/// Everything a fragment builder needs to know about one projection.
pub struct ProjectionCx<'a> {
    pub proj: &'a Projection,
    pub pre: &'a Population,
    pub post: &'a Population,
    pub selection: Selection,
    pub config: &'a GeneratorConfig,
    /// Shared binder so reduction demands accumulate across slots.
    pub(crate) binder: RefCell<Binder<'a>>,
}

impl<'a> ProjectionCx<'a> {
    pub fn new(
        proj: &'a Projection,
        pre: &'a Population,
        post: &'a Population,
        selection: Selection,
        config: &'a GeneratorConfig,
    ) -> Self {
        Self {
            proj,
            pre,
            post,
            selection,
            config,
            binder: RefCell::new(Binder::synapse(proj, pre, post)),
        }
    }

    /// A duration in milliseconds as simulation steps, at least one.
    pub fn steps(&self, ms: f64) -> usize {
        ((ms / self.config.dt).round() as usize).max(1)
    }

    fn rows(&self) -> usize {
        self.proj.connectivity.post_ranks.len()
    }

    /// Per-projection gate flag, e.g. `_transmission`.
    fn gate(&self, name: &str) -> Expr {
        Expr::attr(AttrRef::proj(self.proj.id, name, AccessIndex::Scalar))
    }

    /// `(t - offset) % period == 0`, or `None` when the rule fires every
    /// step.
    fn period_gate(&self, period_ms: f64, offset_ms: f64) -> Option<Expr> {
        let period = self.steps(period_ms);
        if period <= 1 {
            return None;
        }
        let offset = ((offset_ms / self.config.dt).round() as i64).max(0);
        let phase = Expr::Binary(
            BinOp::Mod,
            Box::new(Expr::var("t").sub(Expr::Int(offset))),
            Box::new(Expr::Int(period as i64)),
        );
        Some(Expr::Binary(
            BinOp::Eq,
            Box::new(phase),
            Box::new(Expr::Int(0)),
        ))
    }
}

/// Semantic plan of one projection, consumed by the backends and the
/// assembler.
///
/// Structure slots default to an empty [`Fragment::Ir`], meaning "the
/// backend renders its built-in text"; [`Fragment::Disabled`] suppresses
/// the slot entirely and [`Fragment::Verbatim`] replaces it.
#[derive(Debug, Clone)]
pub struct ProjectionPlan {
    pub id: usize,
    pub fragments: Vec<(FragmentSlot, Fragment)>,
    pub selection: Selection,
    /// Reductions demanded by this projection's equations.
    pub global_ops: BTreeSet<(usize, String, GlobalOp)>,
    /// Per-step random attributes: `(name, locality, dist)`.
    pub randoms: Vec<(String, Locality, RandomDist)>,
    pub has_event_driven: bool,
}

impl ProjectionPlan {
    pub fn fragment(&self, slot: FragmentSlot) -> &Fragment {
        self.fragments
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, f)| f)
            .expect("every slot is filled at generation time")
    }
}

pub fn generate(
    proj: &Projection,
    pre: &Population,
    post: &Population,
    config: &GeneratorConfig,
) -> GenResult<ProjectionPlan> {
    debug!(projection = %proj.name, synapses = proj.connectivity.nb_synapses(),
        "generating projection plan");
    let selection = selector::select(proj, config)?;
    check_structural_rules(proj, config)?;
    check_specialization(proj)?;

    let cx = ProjectionCx::new(proj, pre, post, selection, config);
    let provider = provider_for(&proj.specialization);

    let mut fragments = Vec::with_capacity(SLOTS.len());
    for slot in SLOTS {
        fragments.push((slot, provider.fragment(slot, &cx)?));
    }

    // One redirection pass over every behavior fragment, so the PSP,
    // the synaptic update and the pre-event path agree on the delay.
    if let Some(info) = delay_info(proj, pre) {
        for (slot, fragment) in fragments.iter_mut() {
            if !matches!(slot, FragmentSlot::Psp | FragmentSlot::UpdateSynapse) {
                continue;
            }
            if let Fragment::Ir(stmts) = fragment {
                *stmts = redirect_delays(stmts, &info)
                    .map_err(|e| GenerationError::ir(format!("projection '{}'", proj.name), e))?;
            }
        }
    }

    let randoms = proj
        .synapse
        .variables
        .iter()
        .filter(|a| a.equation.is_none() && a.method == Method::None)
        .filter_map(|a| match &a.init {
            Init::Random(dist) => Some((a.name.clone(), a.locality, crate::population::to_dist(*dist))),
            Init::Constant(_) => None,
        })
        .collect();

    Ok(ProjectionPlan {
        id: proj.id,
        fragments,
        selection,
        global_ops: cx.binder.into_inner().global_ops,
        randoms,
        has_event_driven: proj.synapse.has_event_driven(),
    })
}

/// The delay context of a projection, when its reads are delayed at all.
///
/// Non-uniform spiking delays go through the pending-event ring instead
/// of read redirection; spike lists under a uniform delay are redirected
/// by the same pass (the `ForSpikes` depth is part of the rewrite).
fn delay_info(proj: &Projection, pre: &Population) -> Option<DelayInfo> {
    let steps = match &proj.connectivity.delay {
        DelaySpec::None | DelaySpec::Uniform(1) => return None,
        DelaySpec::Uniform(d) => DelaySteps::Uniform(*d),
        DelaySpec::NonUniform(_) => {
            if proj.synapse.kind == SynapseKind::Spike {
                return None;
            }
            DelaySteps::PerSynapse
        }
    };
    Some(DelayInfo {
        pre_pop: pre.id,
        delayed_vars: proj.synapse.pre_reads().into_iter().collect(),
        steps,
    })
}

fn check_structural_rules(proj: &Projection, config: &GeneratorConfig) -> GenResult<()> {
    if proj.synapse.has_structural_plasticity() && !config.structural_plasticity {
        return Err(GenerationError::unsupported(
            format!("projection '{}'", proj.name),
            "synapse type declares creating/pruning rules but structural \
             plasticity is disabled in the generator configuration",
        ));
    }
    if let Some(rule) = &proj.synapse.creating {
        if let Some(ms) = rule.delay_ms {
            let steps = ((ms / config.dt).round() as usize).max(1);
            match &proj.connectivity.delay {
                DelaySpec::NonUniform(_) => {
                    let max = proj.max_delay();
                    if steps > max {
                        return Err(GenerationError::CreationDelayTooLarge {
                            name: proj.name.clone(),
                            delay: steps,
                            max,
                        });
                    }
                }
                DelaySpec::Uniform(d) => {
                    if steps != *d {
                        return Err(GenerationError::CreationDelayNonUniform {
                            name: proj.name.clone(),
                        });
                    }
                }
                DelaySpec::None => {
                    if steps != 1 {
                        return Err(GenerationError::CreationDelayNonUniform {
                            name: proj.name.clone(),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

/// Specialized variants only cover rate-coded projections.
fn check_specialization(proj: &Projection) -> GenResult<()> {
    if proj.specialization.is_default() || proj.synapse.kind == SynapseKind::Rate {
        return Ok(());
    }
    Err(GenerationError::unsupported(
        format!("projection '{}'", proj.name),
        "transpose/shared-weight/copy variants only support rate-coded synapse types",
    ))
}

// ---------------------------------------------------------------------------
// Default fragment builders
// ---------------------------------------------------------------------------

/// Default PSP fragment. Rate-coded types accumulate into the
/// postsynaptic `_sum_<target>` array; spiking types walk the spike
/// list through the inverse connectivity.
pub fn default_psp(cx: &ProjectionCx) -> GenResult<Fragment> {
    let body = match cx.proj.synapse.kind {
        SynapseKind::Rate => rate_psp(cx, weight_ref(cx.proj.id))?,
        SynapseKind::Spike => spiking_psp(cx)?,
    };
    Ok(Fragment::Ir(vec![Stmt::If {
        cond: cx.gate("_transmission"),
        then_branch: body,
        else_branch: vec![],
    }]))
}

fn weight_ref(proj: usize) -> Expr {
    Expr::attr(AttrRef::proj(proj, "w", AccessIndex::Synapse))
}

/// Rate-coded weighted delivery, parameterized on the weight access so
/// a copy variant can read another projection's weights.
pub(crate) fn rate_psp(cx: &ProjectionCx, weight: Expr) -> GenResult<Vec<Stmt>> {
    let contrib = match &cx.proj.synapse.psp {
        Some(psp) => substitute_weight(&cx.binder.borrow_mut().bind(psp)?, cx.proj.id, &weight),
        None => {
            let pre_r = cx.binder.borrow_mut().bind(&Expr::var("pre.r"))?;
            weight.clone().mul(pre_r)
        }
    };
    let sum = || Expr::var("sum");
    let inner = match cx.proj.synapse.operation {
        PspOperator::Sum | PspOperator::Mean => vec![
            Stmt::Local {
                name: "sum".into(),
                ty: ScalarType::Real,
                init: Some(Expr::Real(0.0)),
            },
            Stmt::ForSynapses {
                body: vec![Stmt::Assign {
                    target: LValue::Var("sum".into()),
                    op: AssignOp::Add,
                    value: contrib,
                }],
            },
        ],
        // Seeded from the first synapse so an all-negative row still
        // reduces correctly.
        PspOperator::Max | PspOperator::Min => {
            let cmp = match cx.proj.synapse.operation {
                PspOperator::Max => BinOp::Gt,
                _ => BinOp::Lt,
            };
            vec![
                Stmt::Local {
                    name: "sum".into(),
                    ty: ScalarType::Real,
                    init: None,
                },
                Stmt::ForSynapses {
                    body: vec![
                        Stmt::Local {
                            name: "_psp".into(),
                            ty: ScalarType::Real,
                            init: Some(contrib),
                        },
                        Stmt::If {
                            cond: Expr::Binary(
                                BinOp::Eq,
                                Box::new(Expr::var("j")),
                                Box::new(Expr::Int(0)),
                            ),
                            then_branch: vec![Stmt::Assign {
                                target: LValue::Var("sum".into()),
                                op: AssignOp::Set,
                                value: Expr::var("_psp"),
                            }],
                            else_branch: vec![Stmt::If {
                                cond: Expr::Binary(
                                    cmp,
                                    Box::new(Expr::var("_psp")),
                                    Box::new(sum()),
                                ),
                                then_branch: vec![Stmt::Assign {
                                    target: LValue::Var("sum".into()),
                                    op: AssignOp::Set,
                                    value: Expr::var("_psp"),
                                }],
                                else_branch: vec![],
                            }],
                        },
                    ],
                },
            ]
        }
    };
    let value = match cx.proj.synapse.operation {
        PspOperator::Mean => sum().div(Expr::call("row_size", vec![])),
        _ => sum(),
    };
    let mut body = inner;
    body.push(Stmt::Assign {
        target: LValue::Attr(AttrRef::pop(
            cx.post.id,
            format!("_sum_{}", cx.proj.target),
            AccessIndex::PostNeuron,
        )),
        op: AssignOp::Add,
        value,
    });
    Ok(vec![Stmt::ForPost {
        parallel: cx.config.parallel_loops(cx.rows()),
        body,
    }])
}

/// Replace reads of this projection's `w` with another access.
fn substitute_weight(e: &Expr, proj: usize, weight: &Expr) -> Expr {
    match e {
        Expr::Attr(a) if a.owner == Owner::Proj(proj) && a.name == "w" => weight.clone(),
        Expr::Unary(op, inner) => {
            Expr::Unary(*op, Box::new(substitute_weight(inner, proj, weight)))
        }
        Expr::Binary(op, l, r) => Expr::Binary(
            *op,
            Box::new(substitute_weight(l, proj, weight)),
            Box::new(substitute_weight(r, proj, weight)),
        ),
        Expr::Call(f, args) => Expr::Call(
            f.clone(),
            args.iter()
                .map(|a| substitute_weight(a, proj, weight))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Spiking event propagation: per presynaptic spike, advance the
/// event-driven variables, increment the conductance and apply the
/// pre-spike equations of every touched synapse.
fn spiking_psp(cx: &ProjectionCx) -> GenResult<Vec<Stmt>> {
    let inner = pre_event_body(cx)?;
    let stmts = match cx.selection.scheme {
        ConnectivityScheme::NonUniformDelaySpike => vec![
            Stmt::EnqueueDelayedSpikes { pop: cx.pre.id },
            Stmt::ForPendingSpikes { body: inner },
        ],
        // The delay-redirection pass fills in the uniform depth.
        _ => vec![Stmt::ForSpikes {
            pop: cx.pre.id,
            delay: None,
            body: vec![Stmt::ForInvPost { body: inner }],
        }],
    };
    Ok(stmts)
}

fn pre_event_body(cx: &ProjectionCx) -> GenResult<Vec<Stmt>> {
    let synapse = &cx.proj.synapse;
    let mut binder = cx.binder.borrow_mut();
    let mut out = Vec::new();

    out.extend(event_driven_advances(cx, &mut binder)?);

    // Conductance increments run unconditionally; the remaining updates
    // are skipped when the postsynaptic neuron fired at the previous
    // step, since the post-event path already applied them.
    let mut guarded = Vec::new();
    for ev in &synapse.pre_spike {
        let target = binder.bind_target(&ev.target)?;
        let mut stmts = vec![Stmt::Assign {
            target: target.clone(),
            op: ev.op,
            value: binder.bind(&ev.value)?,
        }];
        if let Some(bounds) = event_target_bounds(cx, &ev.target) {
            stmts.push(Stmt::Clamp {
                target,
                min: binder.bind_opt(&bounds.min)?,
                max: binder.bind_opt(&bounds.max)?,
            });
        }
        if ev.target == "g_target" || ev.target.starts_with("g_") {
            out.extend(stmts);
        } else if ev.target == "w" {
            guarded.push(Stmt::If {
                cond: cx.gate("_plasticity"),
                then_branch: stmts,
                else_branch: vec![],
            });
        } else {
            guarded.extend(stmts);
        }
    }
    if !guarded.is_empty() {
        if !synapse.has_event_driven() && !synapse.post_spike.is_empty() {
            let post_fired = Expr::Binary(
                BinOp::Ne,
                Box::new(Expr::attr(AttrRef::pop(
                    cx.post.id,
                    "last_spike",
                    AccessIndex::PostNeuron,
                ))),
                Box::new(Expr::var("t").sub(Expr::Int(1))),
            );
            out.push(Stmt::If {
                cond: post_fired,
                then_branch: guarded,
                else_branch: vec![],
            });
        } else {
            out.append(&mut guarded);
        }
    }
    if synapse.has_event_driven() {
        out.push(last_event_stamp(cx.proj.id));
    }
    Ok(out)
}

fn event_driven_advances(
    cx: &ProjectionCx,
    binder: &mut Binder<'_>,
) -> GenResult<Vec<Stmt>> {
    let mut out = Vec::new();
    for attr in &cx.proj.synapse.variables {
        if attr.method != Method::EventDriven {
            continue;
        }
        let Some(eq) = &attr.equation else { continue };
        out.push(Stmt::Assign {
            target: LValue::Attr(AttrRef::proj(cx.proj.id, &attr.name, AccessIndex::Synapse)),
            op: AssignOp::Set,
            value: binder.bind(&eq.rhs)?,
        });
    }
    Ok(out)
}

fn last_event_stamp(proj: usize) -> Stmt {
    Stmt::Assign {
        target: LValue::Attr(AttrRef::proj(proj, "_last_event", AccessIndex::Synapse)),
        op: AssignOp::Set,
        value: Expr::var("t"),
    }
}

/// Bounds of the attribute an event equation writes, if declared.
fn event_target_bounds<'a>(
    cx: &'a ProjectionCx,
    target: &str,
) -> Option<&'a neurogen_model::Bounds> {
    let name = if target == "g_target" {
        format!("g_{}", cx.proj.target)
    } else {
        target.to_string()
    };
    if let Some(attr) = cx.proj.synapse.attribute(&name) {
        if !attr.bounds.is_none() {
            return Some(&attr.bounds);
        }
    }
    if let Some(attr) = cx.post.neuron.attribute(&name) {
        if !attr.bounds.is_none() {
            return Some(&attr.bounds);
        }
    }
    None
}

/// Default synaptic-variable update fragment (phase 7).
pub fn default_update_synapse(cx: &ProjectionCx) -> GenResult<Fragment> {
    let synapse = &cx.proj.synapse;
    let explicit: Vec<&Attribute> = synapse
        .variables
        .iter()
        .filter(|a| a.method == Method::Explicit && a.equation.is_some())
        .collect();
    if explicit.is_empty() {
        return Ok(Fragment::Ir(vec![]));
    }
    let mut binder = cx.binder.borrow_mut();

    let mut body = Vec::new();
    for attr in explicit.iter().filter(|a| a.locality == Locality::Global) {
        body.extend(synapse_update_stmts(&mut binder, cx.proj.id, attr, AccessIndex::Scalar)?);
    }
    let mut row_body = Vec::new();
    for attr in explicit
        .iter()
        .filter(|a| a.locality == Locality::Semiglobal)
    {
        row_body.extend(synapse_update_stmts(
            &mut binder,
            cx.proj.id,
            attr,
            AccessIndex::PostIndexed,
        )?);
    }
    let mut syn_body = Vec::new();
    for attr in explicit.iter().filter(|a| a.locality == Locality::Local) {
        syn_body.extend(synapse_update_stmts(
            &mut binder,
            cx.proj.id,
            attr,
            AccessIndex::Synapse,
        )?);
    }
    if !syn_body.is_empty() {
        row_body.push(Stmt::ForSynapses { body: syn_body });
    }
    if !row_body.is_empty() {
        body.push(Stmt::ForPost {
            parallel: cx.config.parallel_loops(cx.rows()),
            body: row_body,
        });
    }

    let mut cond = cx
        .gate("_transmission")
        .and(cx.gate("_update"))
        .and(cx.gate("_plasticity"));
    if let Some(gate) = cx.period_gate(synapse.update_period_ms, synapse.update_offset_ms) {
        cond = cond.and(gate);
    }
    Ok(Fragment::Ir(vec![Stmt::If {
        cond,
        then_branch: body,
        else_branch: vec![],
    }]))
}

/// Euler / assignment update of one synapse attribute plus its clamp.
fn synapse_update_stmts(
    binder: &mut Binder<'_>,
    proj: usize,
    attr: &Attribute,
    index: AccessIndex,
) -> GenResult<Vec<Stmt>> {
    let Some(eq) = &attr.equation else {
        return Ok(Vec::new());
    };
    let rhs = binder.bind(&eq.rhs)?;
    let target = LValue::Attr(AttrRef::proj(proj, &attr.name, index));
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

/// Default post-event fragment (phase 8): for every postsynaptic spike,
/// advance the event-driven variables and apply the post-spike
/// equations across the neuron's row.
pub fn default_post_event(cx: &ProjectionCx) -> GenResult<Fragment> {
    let synapse = &cx.proj.synapse;
    if synapse.post_spike.is_empty() && !synapse.has_event_driven() {
        return Ok(Fragment::Ir(vec![]));
    }
    let mut binder = cx.binder.borrow_mut();

    let mut inner = event_driven_advances(cx, &mut binder)?;
    for ev in &synapse.post_spike {
        let target = binder.bind_target(&ev.target)?;
        inner.push(Stmt::Assign {
            target: target.clone(),
            op: ev.op,
            value: binder.bind(&ev.value)?,
        });
        if let Some(bounds) = event_target_bounds(cx, &ev.target) {
            inner.push(Stmt::Clamp {
                target,
                min: binder.bind_opt(&bounds.min)?,
                max: binder.bind_opt(&bounds.max)?,
            });
        }
    }
    if synapse.has_event_driven() {
        inner.push(last_event_stamp(cx.proj.id));
    }
    let body = vec![Stmt::ForPostSpikes {
        pop: cx.post.id,
        body: vec![Stmt::ForSynapses { body: inner }],
    }];
    Ok(Fragment::Ir(vec![Stmt::If {
        cond: cx.gate("_transmission").and(cx.gate("_plasticity")),
        then_branch: body,
        else_branch: vec![],
    }]))
}

/// Default synapse-creation fragment.
pub fn default_creating(cx: &ProjectionCx) -> GenResult<Fragment> {
    let Some(rule) = &cx.proj.synapse.creating else {
        return Ok(Fragment::Ir(vec![]));
    };
    let cond = creation_condition(cx, rule)?;
    let delay = rule
        .delay_ms
        .map(|ms| Expr::Real(cx.steps(ms) as f64));
    let body = vec![Stmt::ForPost {
        parallel: false,
        body: vec![Stmt::ForPreCandidates {
            pop: cx.pre.id,
            body: vec![Stmt::If {
                cond,
                then_branch: vec![Stmt::AddSynapse {
                    weight: Expr::Real(rule.weight),
                    delay,
                }],
                else_branch: vec![],
            }],
        }],
    }];
    Ok(Fragment::Ir(vec![period_wrapped(
        cx,
        rule.period_ms,
        rule.offset_ms,
        body,
    )]))
}

fn creation_condition(cx: &ProjectionCx, rule: &CreatingRule) -> GenResult<Expr> {
    let bound = cx.binder.borrow_mut().bind(&rule.condition)?;
    // The candidate loop has no synapse index; presynaptic reads address
    // the candidate rank directly.
    let mut cond = retarget_pre_candidate(&bound, cx.pre.id).and(Expr::Unary(
        UnOp::Not,
        Box::new(Expr::call(
            "isConnected",
            vec![Expr::var("i"), Expr::var("rk_pre")],
        )),
    ));
    if let Some(p) = rule.probability {
        cond = cond.and(Expr::UniformDraw.lt(Expr::Real(p)));
    }
    Ok(cond)
}

/// Rewrite `pre_rank[i][j]`-indexed reads to the candidate rank.
fn retarget_pre_candidate(e: &Expr, pre_pop: usize) -> Expr {
    match e {
        Expr::Attr(a) if a.owner == Owner::Pop(pre_pop) && a.index == AccessIndex::PreNeuron => {
            Expr::Attr(AttrRef {
                owner: a.owner,
                name: a.name.clone(),
                index: AccessIndex::NeuronAt(Box::new(Expr::var("rk_pre"))),
            })
        }
        Expr::Unary(op, inner) => {
            Expr::Unary(*op, Box::new(retarget_pre_candidate(inner, pre_pop)))
        }
        Expr::Binary(op, l, r) => Expr::Binary(
            *op,
            Box::new(retarget_pre_candidate(l, pre_pop)),
            Box::new(retarget_pre_candidate(r, pre_pop)),
        ),
        Expr::Call(f, args) => Expr::Call(
            f.clone(),
            args.iter()
                .map(|a| retarget_pre_candidate(a, pre_pop))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Default synapse-pruning fragment.
pub fn default_pruning(cx: &ProjectionCx) -> GenResult<Fragment> {
    let Some(rule) = &cx.proj.synapse.pruning else {
        return Ok(Fragment::Ir(vec![]));
    };
    let mut cond = cx.binder.borrow_mut().bind(&rule.condition)?;
    if let Some(p) = rule.probability {
        cond = cond.and(Expr::UniformDraw.lt(Expr::Real(p)));
    }
    let body = vec![Stmt::ForPost {
        parallel: false,
        body: vec![Stmt::ForSynapses {
            body: vec![Stmt::If {
                cond,
                then_branch: vec![Stmt::RemoveSynapse],
                else_branch: vec![],
            }],
        }],
    }];
    let (period, offset) = (rule.period_ms, rule.offset_ms);
    Ok(Fragment::Ir(vec![period_wrapped(cx, period, offset, body)]))
}

fn period_wrapped(cx: &ProjectionCx, period_ms: f64, offset_ms: f64, body: Vec<Stmt>) -> Stmt {
    let cond = match cx.period_gate(period_ms, offset_ms) {
        Some(gate) => cx.gate("_plasticity").and(gate),
        None => cx.gate("_plasticity"),
    };
    Stmt::If {
        cond,
        then_branch: body,
        else_branch: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurogen_ir::{CppPrinter, RenderCtx};
    use neurogen_model::{
        Connectivity, Equation, NetworkBuildContext, NeuronType, Specialization, SpikeSpec,
        SynapseType,
    };

    fn rate_neuron() -> NeuronType {
        NeuronType {
            name: "Rate".into(),
            parameters: vec![Attribute::parameter("tau", Locality::Global, 10.0)],
            variables: vec![Attribute::variable(
                "r",
                Locality::Local,
                Equation {
                    kind: EquationKind::Assignment,
                    rhs: Expr::var("sum(exc)"),
                },
            )],
            spike: None,
        }
    }

    fn spiking_neuron() -> NeuronType {
        NeuronType {
            name: "IF".into(),
            parameters: vec![],
            variables: vec![Attribute::variable(
                "v",
                Locality::Local,
                Equation {
                    kind: EquationKind::Derivative,
                    rhs: Expr::var("g_exc").sub(Expr::var("v")),
                },
            )],
            spike: Some(SpikeSpec {
                condition: Expr::var("v").gt(Expr::Real(1.0)),
                reset: vec![neurogen_model::ResetEquation {
                    target: "v".into(),
                    value: Expr::Real(0.0),
                    unless_refractory: false,
                }],
                refractory: None,
            }),
        }
    }

    fn build(
        neuron: NeuronType,
        synapse: SynapseType,
        delay: DelaySpec,
    ) -> (NetworkBuildContext, GeneratorConfig) {
        let mut ctx = NetworkBuildContext::new(1.0);
        let a = ctx.add_population("a", vec![4], neuron.clone()).unwrap();
        let b = ctx.add_population("b", vec![4], neuron).unwrap();
        ctx.add_projection(
            "p",
            a,
            b,
            "exc",
            synapse,
            Connectivity::all_to_all(4, 4, 1.0).with_delay(delay),
            Specialization::Default,
        )
        .unwrap();
        (ctx, GeneratorConfig::default())
    }

    fn plan(ctx: &NetworkBuildContext, config: &GeneratorConfig) -> ProjectionPlan {
        generate(
            &ctx.projections[0],
            &ctx.populations[0],
            &ctx.populations[1],
            config,
        )
        .unwrap()
    }

    fn render(plan: &ProjectionPlan, slot: FragmentSlot) -> String {
        let stmts = plan.fragment(slot).stmts().unwrap();
        CppPrinter::new("double", false).stmts(stmts, &RenderCtx::for_proj(0), 0)
    }

    #[test]
    fn test_rate_psp_accumulates_into_sum() {
        let (ctx, cfg) = build(rate_neuron(), SynapseType::rate_default("d"), DelaySpec::None);
        let p = plan(&ctx, &cfg);
        let text = render(&p, FragmentSlot::Psp);
        assert!(text.contains("if (_transmission)"));
        assert!(text.contains("sum += (w[i][j] * pop0.r[pre_rank[i][j]]);"));
        assert!(text.contains("pop1._sum_exc[post_rank[i]] += sum;"));
    }

    #[test]
    fn test_uniform_delay_redirects_psp_reads() {
        let (ctx, cfg) = build(
            rate_neuron(),
            SynapseType::rate_default("d"),
            DelaySpec::Uniform(5),
        );
        let p = plan(&ctx, &cfg);
        let text = render(&p, FragmentSlot::Psp);
        assert!(text.contains("_delayed_r[4][pre_rank[i][j]]"));
    }

    #[test]
    fn test_max_operator_seeds_from_first_synapse() {
        let mut synapse = SynapseType::rate_default("d");
        synapse.operation = PspOperator::Max;
        let (ctx, cfg) = build(rate_neuron(), synapse, DelaySpec::None);
        let text = render(&plan(&ctx, &cfg), FragmentSlot::Psp);
        assert!(text.contains("if ((j == 0))"));
        assert!(text.contains("if ((_psp > sum))"));
    }

    #[test]
    fn test_mean_operator_divides_by_live_row_size() {
        let mut synapse = SynapseType::rate_default("d");
        synapse.operation = PspOperator::Mean;
        let (ctx, cfg) = build(rate_neuron(), synapse, DelaySpec::None);
        let text = render(&plan(&ctx, &cfg), FragmentSlot::Psp);
        assert!(text.contains("(sum / pre_rank[i].size())"));
    }

    #[test]
    fn test_spiking_psp_walks_inverse_connectivity() {
        let (ctx, cfg) = build(
            spiking_neuron(),
            SynapseType::spike_default("d"),
            DelaySpec::None,
        );
        let p = plan(&ctx, &cfg);
        let text = render(&p, FragmentSlot::Psp);
        assert!(text.contains("if (_transmission)"));
        assert!(text.contains("pop1.g_exc[post_rank[i]] += w[i][j];"));
    }

    #[test]
    fn test_nonuniform_spiking_uses_pending_ring() {
        let (ctx, cfg) = build(
            spiking_neuron(),
            SynapseType::spike_default("d"),
            DelaySpec::NonUniform(vec![vec![1, 2, 1, 3]; 4]),
        );
        let p = plan(&ctx, &cfg);
        assert_eq!(p.selection.scheme, ConnectivityScheme::NonUniformDelaySpike);
        let stmts = p.fragment(FragmentSlot::Psp).stmts().unwrap();
        let Stmt::If { then_branch, .. } = &stmts[0] else {
            panic!("psp is gated on _transmission");
        };
        assert!(matches!(then_branch[0], Stmt::EnqueueDelayedSpikes { .. }));
        assert!(matches!(then_branch[1], Stmt::ForPendingSpikes { .. }));
    }

    #[test]
    fn test_update_gating_and_period() {
        let mut synapse = SynapseType::rate_default("hebb");
        synapse.variables.push(Attribute::variable(
            "w",
            Locality::Local,
            Equation {
                kind: EquationKind::Derivative,
                rhs: Expr::var("pre.r").mul(Expr::var("post.r")),
            },
        ));
        synapse.update_period_ms = 10.0;
        synapse.update_offset_ms = 2.0;
        let (ctx, cfg) = build(rate_neuron(), synapse, DelaySpec::None);
        let text = render(&plan(&ctx, &cfg), FragmentSlot::UpdateSynapse);
        assert!(text.contains(
            "(((_transmission && _update) && _plasticity) && (((t - 2) % 10) == 0))"
        ));
        assert!(text.contains("w[i][j] += (dt * _w);"));
    }

    #[test]
    fn test_event_driven_pre_event_stamps_last_event() {
        let mut synapse = SynapseType::spike_default("stdp");
        synapse.variables.push(Attribute::event_driven(
            "x",
            Expr::var("x").mul(Expr::call(
                "exp",
                vec![Expr::var("t")
                    .sub(Expr::var("_last_event"))
                    .neg()
                    .div(Expr::Real(20.0))],
            )),
        ));
        synapse.pre_spike.push(neurogen_model::EventEquation {
            target: "w".into(),
            op: AssignOp::Add,
            value: Expr::var("x"),
        });
        let (ctx, cfg) = build(spiking_neuron(), synapse, DelaySpec::None);
        let p = plan(&ctx, &cfg);
        assert!(p.has_event_driven);
        let text = render(&p, FragmentSlot::Psp);
        assert!(text.contains("_last_event[i][j] = t;"));
        assert!(text.contains("if (_plasticity)"));
    }

    #[test]
    fn test_structural_plasticity_requires_config_flag() {
        let mut synapse = SynapseType::rate_default("d");
        synapse.creating = Some(CreatingRule {
            condition: Expr::var("pre.r").gt(Expr::Real(0.5)),
            probability: Some(0.1),
            weight: 1.0,
            delay_ms: None,
            period_ms: 100.0,
            offset_ms: 0.0,
        });
        let (ctx, cfg) = build(rate_neuron(), synapse, DelaySpec::None);
        let err = generate(
            &ctx.projections[0],
            &ctx.populations[0],
            &ctx.populations[1],
            &cfg,
        )
        .unwrap_err();
        assert!(matches!(err, GenerationError::Unsupported { .. }));

        let mut cfg = cfg;
        cfg.structural_plasticity = true;
        let p = plan(&ctx, &cfg);
        let text = render(&p, FragmentSlot::Creating);
        assert!(text.contains("(!isConnected(i, rk_pre))"));
        assert!(text.contains("pop0.r[rk_pre]"));
    }

    #[test]
    fn test_creation_delay_static_checks() {
        let mut synapse = SynapseType::rate_default("d");
        synapse.creating = Some(CreatingRule {
            condition: Expr::Bool(true),
            probability: None,
            weight: 1.0,
            delay_ms: Some(10.0),
            period_ms: 100.0,
            offset_ms: 0.0,
        });
        let mut cfg = GeneratorConfig::default();
        cfg.structural_plasticity = true;

        // A creation delay beyond the ring depth of a non-uniform
        // projection is fatal.
        let (ctx, _) = build(
            rate_neuron(),
            synapse.clone(),
            DelaySpec::NonUniform(vec![vec![1, 2, 1, 3]; 4]),
        );
        let err = generate(
            &ctx.projections[0],
            &ctx.populations[0],
            &ctx.populations[1],
            &cfg,
        )
        .unwrap_err();
        assert!(matches!(err, GenerationError::CreationDelayTooLarge { .. }));

        // Introducing a different delay into a uniform projection is fatal.
        let (ctx, _) = build(rate_neuron(), synapse, DelaySpec::Uniform(2));
        let err = generate(
            &ctx.projections[0],
            &ctx.populations[0],
            &ctx.populations[1],
            &cfg,
        )
        .unwrap_err();
        assert!(matches!(err, GenerationError::CreationDelayNonUniform { .. }));
    }
}
