// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Step assembly.
//!
//! Turns the per-object plans into the network-wide [`StepProgram`]: the
//! fixed phase order every backend and the in-process evaluator agree
//! on, plus the initial [`NetworkState`] the evaluator runs against.
//! Also owns the JSON save/load surface of a network state.
//!
//! Phase order of one step:
//!
//! 1. zero the rate accumulators
//! 2. weighted sums / spike propagation, per projection
//! 3. redraw the random-number attributes
//! 4. neuron updates, then spike detection
//! 5. rotate the delayed-variable and spike ring buffers
//! 6. whole-population reductions
//! 7. synaptic-variable updates
//! 8. post-synaptic events
//! 9. structural plasticity (creating, then pruning)
//!
//! The step counter increments after phase 9.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use neurogen_config::GeneratorConfig;
use neurogen_ir::eval::{
    GlobalOp, NetworkState, Phase, PhaseItem, PopulationState, ProjectionState, RandomTarget,
    StepProgram, NEVER_FIRED,
};
use neurogen_ir::{Fragment, FragmentSlot};
use neurogen_model::{
    DelaySpec, Init, Locality, NetworkBuildContext, RandomDistribution, Specialization,
};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::Distribution;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::{GenResult, GenerationError};
use crate::population::{self, PopulationPlan};
use crate::projection::{self, ProjectionPlan};

const STATE_FORMAT_VERSION: u64 = 1;

/// The fully generated network: plans, schedule and initial state.
#[derive(Debug)]
pub struct GeneratedNetwork {
    pub populations: Vec<PopulationPlan>,
    pub projections: Vec<ProjectionPlan>,
    pub program: StepProgram,
    pub state: NetworkState,
}

/// Generate every plan, schedule the step and build the initial state.
pub fn compile(
    ctx: &NetworkBuildContext,
    config: &GeneratorConfig,
) -> GenResult<GeneratedNetwork> {
    info!(
        populations = ctx.populations.len(),
        projections = ctx.projections.len(),
        paradigm = ?config.paradigm,
        "compiling network"
    );
    let mut pop_plans = Vec::with_capacity(ctx.populations.len());
    for pop in &ctx.populations {
        pop_plans.push(population::generate(pop, config)?);
    }
    let mut proj_plans = Vec::with_capacity(ctx.projections.len());
    for proj in &ctx.projections {
        let pre = &ctx.populations[proj.pre];
        let post = &ctx.populations[proj.post];
        check_copy_shape(ctx, proj)?;
        proj_plans.push(projection::generate(proj, pre, post, config)?);
    }
    let program = schedule(&pop_plans, &proj_plans, config);
    let state = initial_state(ctx, &pop_plans, &proj_plans, config);
    Ok(GeneratedNetwork {
        populations: pop_plans,
        projections: proj_plans,
        program,
        state,
    })
}

/// A copy variant indexes the source's weight matrix with its own loop
/// indices, so both connectivity lists must have the same shape.
fn check_copy_shape(
    ctx: &NetworkBuildContext,
    proj: &neurogen_model::Projection,
) -> GenResult<()> {
    let Specialization::Copy { source } = &proj.specialization else {
        return Ok(());
    };
    let src = &ctx.projections[*source];
    let same = src.connectivity.post_ranks == proj.connectivity.post_ranks
        && src.connectivity.pre_ranks == proj.connectivity.pre_ranks;
    if !same {
        return Err(GenerationError::unsupported(
            format!("projection '{}'", proj.name),
            format!(
                "copies the weights of '{}' but has a different connectivity shape",
                src.name
            ),
        ));
    }
    Ok(())
}

/// Build the phase schedule. Objects are visited in id order, so the
/// program (and everything rendered from it) is deterministic.
pub fn schedule(
    pops: &[PopulationPlan],
    projs: &[ProjectionPlan],
    config: &GeneratorConfig,
) -> StepProgram {
    let mut program = StepProgram::default();

    let mut phase = Phase::new("sum_reset");
    for plan in pops {
        if !plan.sum_targets.is_empty() {
            phase.items.push(PhaseItem::ClearSums {
                pop: plan.id,
                targets: plan.sum_targets.clone(),
            });
        }
    }
    program.push(phase);

    let mut phase = Phase::new("weighted_sums");
    for plan in projs {
        push_proj_fragment(&mut phase, plan, FragmentSlot::Psp);
    }
    program.push(phase);

    let mut phase = Phase::new("random_draws");
    for plan in pops {
        for (name, is_local, dist) in &plan.randoms {
            let target = if *is_local {
                RandomTarget::PopLocal(plan.id)
            } else {
                RandomTarget::PopGlobal(plan.id)
            };
            phase.items.push(PhaseItem::RefreshRandom {
                target,
                name: name.clone(),
                dist: *dist,
            });
        }
    }
    for plan in projs {
        for (name, locality, dist) in &plan.randoms {
            let target = match locality {
                Locality::Local => RandomTarget::ProjLocal(plan.id),
                Locality::Semiglobal => RandomTarget::ProjSemiglobal(plan.id),
                Locality::Global => RandomTarget::ProjGlobal(plan.id),
            };
            phase.items.push(PhaseItem::RefreshRandom {
                target,
                name: name.clone(),
                dist: *dist,
            });
        }
    }
    program.push(phase);

    let mut phase = Phase::new("neural_update");
    for plan in pops {
        if !plan.update.is_empty() {
            phase.items.push(PhaseItem::PopFragment {
                pop: plan.id,
                stmts: plan.update.clone(),
            });
        }
        if let Some(rule) = &plan.spike_rule {
            phase.items.push(PhaseItem::SpikeDetect {
                pop: plan.id,
                rule: rule.clone(),
            });
        }
    }
    program.push(phase);

    let mut phase = Phase::new("delayed_outputs");
    for plan in pops {
        if !plan.delayed_vars.is_empty() || plan.rotate_spikes {
            phase.items.push(PhaseItem::RotateDelays {
                pop: plan.id,
                vars: plan.delayed_vars.clone(),
                spikes: plan.rotate_spikes,
            });
        }
    }
    program.push(phase);

    let mut phase = Phase::new("global_operations");
    for (pop, ops) in grouped_global_ops(pops, projs) {
        phase.items.push(PhaseItem::GlobalOps { pop, ops });
    }
    program.push(phase);

    let mut phase = Phase::new("synaptic_update");
    for plan in projs {
        push_proj_fragment(&mut phase, plan, FragmentSlot::UpdateSynapse);
    }
    program.push(phase);

    let mut phase = Phase::new("post_events");
    for plan in projs {
        push_proj_fragment(&mut phase, plan, FragmentSlot::PostEvent);
    }
    program.push(phase);

    let mut phase = Phase::new("structural_plasticity");
    if config.structural_plasticity {
        for plan in projs {
            push_proj_fragment(&mut phase, plan, FragmentSlot::Creating);
            push_proj_fragment(&mut phase, plan, FragmentSlot::Pruning);
        }
    }
    program.push(phase);

    debug!(
        phases = program.phases.len(),
        items = program.phases.iter().map(|p| p.items.len()).sum::<usize>(),
        "assembled step program"
    );
    program
}

/// Verbatim fragments only exist for the emitted C++; the evaluator
/// schedule carries the structured ones.
fn push_proj_fragment(phase: &mut Phase, plan: &ProjectionPlan, slot: FragmentSlot) {
    if let Fragment::Ir(stmts) = plan.fragment(slot) {
        if !stmts.is_empty() {
            phase.items.push(PhaseItem::ProjFragment {
                proj: plan.id,
                stmts: stmts.clone(),
            });
        }
    }
}

/// Union of the reductions every plan demands, grouped per population.
pub(crate) fn grouped_global_ops(
    pops: &[PopulationPlan],
    projs: &[ProjectionPlan],
) -> Vec<(usize, Vec<(String, GlobalOp)>)> {
    let mut all: BTreeSet<(usize, String, GlobalOp)> = BTreeSet::new();
    for plan in pops {
        all.extend(plan.global_ops.iter().cloned());
    }
    for plan in projs {
        all.extend(plan.global_ops.iter().cloned());
    }
    let mut grouped: Vec<(usize, Vec<(String, GlobalOp)>)> = Vec::new();
    for (pop, var, op) in all {
        match grouped.last_mut() {
            Some((p, ops)) if *p == pop => ops.push((var, op)),
            _ => grouped.push((pop, vec![(var, op)])),
        }
    }
    grouped
}

/// Build the initial [`NetworkState`] from the descriptors. Random
/// initial values are drawn from the configured seed, so two builds of
/// the same network agree.
pub fn initial_state(
    ctx: &NetworkBuildContext,
    pops: &[PopulationPlan],
    projs: &[ProjectionPlan],
    config: &GeneratorConfig,
) -> NetworkState {
    let mut state = NetworkState::new(config.dt, Some(config.seed));

    for (pop, plan) in ctx.populations.iter().zip(pops) {
        let mut ps = PopulationState::new(pop.size);
        for attr in pop.neuron.parameters.iter().chain(&pop.neuron.variables) {
            match attr.locality {
                Locality::Local => match &attr.init {
                    Init::Constant(v) => ps.add_local(&attr.name, *v),
                    Init::Random(dist) => {
                        let values = (0..pop.size)
                            .map(|_| draw(&mut state.rng, dist))
                            .collect();
                        ps.locals.insert(attr.name.clone(), values);
                    }
                },
                Locality::Global | Locality::Semiglobal => {
                    let v = init_value(&mut state.rng, &attr.init);
                    ps.add_global(&attr.name, v);
                }
            }
        }
        for name in &plan.sum_targets {
            ps.add_local(name, 0.0);
        }
        for name in &plan.implicit_conductances {
            ps.add_local(name, 0.0);
        }
        for var in &plan.delayed_vars {
            ps.init_delay(var, pop.max_delay);
        }
        if plan.rotate_spikes {
            ps.init_spike_delay(pop.max_delay);
        }
        state.pops.push(ps);
    }

    for (pop, ops) in grouped_global_ops(pops, projs) {
        for (var, op) in ops {
            state.pops[pop].add_global(op.key(&var), 0.0);
        }
    }

    for (proj, plan) in ctx.projections.iter().zip(projs) {
        let conn = &proj.connectivity;
        let mut st = ProjectionState::new(
            proj.pre,
            proj.post,
            proj.target.clone(),
            conn.post_ranks.clone(),
            conn.pre_ranks.clone(),
            conn.w.clone(),
        );
        match &conn.delay {
            DelaySpec::None | DelaySpec::Uniform(1) => {}
            DelaySpec::Uniform(d) => st.set_uniform_delay(*d),
            DelaySpec::NonUniform(delays) => st.set_nonuniform_delays(delays.clone()),
        }
        for attr in proj
            .synapse
            .parameters
            .iter()
            .chain(&proj.synapse.variables)
        {
            // The weight array is seeded from the connectivity, even
            // when the synapse type declares dynamics for it.
            if attr.name == "w" {
                continue;
            }
            let v = init_value(&mut state.rng, &attr.init);
            match attr.locality {
                Locality::Local => st.add_local(&attr.name, v),
                Locality::Semiglobal => st.add_semiglobal(&attr.name, v),
                Locality::Global => st.add_global(&attr.name, v),
            }
        }
        if plan.has_event_driven {
            st.add_local("_last_event", NEVER_FIRED);
        }
        state.projs.push(st);
    }
    state
}

fn init_value(rng: &mut StdRng, init: &Init) -> f64 {
    match init {
        Init::Constant(v) => *v,
        Init::Random(dist) => draw(rng, dist),
    }
}

fn draw(rng: &mut StdRng, dist: &RandomDistribution) -> f64 {
    match dist {
        RandomDistribution::Uniform { min, max } => {
            if max > min {
                rng.gen_range(*min..*max)
            } else {
                *min
            }
        }
        RandomDistribution::Normal { mean, sd } => match rand_distr::Normal::new(*mean, *sd) {
            Ok(normal) => normal.sample(rng),
            Err(_) => *mean,
        },
    }
}

// ---------------------------------------------------------------------------
// State save/load
// ---------------------------------------------------------------------------

/// Serialize a network state to JSON.
///
/// Attribute maps are emitted in sorted key order so repeated saves of
/// the same state are byte-identical.
pub fn save_state(state: &NetworkState, path: &Path) -> GenResult<()> {
    let mut pops = Map::new();
    for (id, pop) in state.pops.iter().enumerate() {
        pops.insert(
            format!("pop{id}"),
            json!({
                "size": pop.size,
                "attributes": sorted_map(pop.locals.iter().map(|(k, v)| (k.clone(), json!(v)))),
                "globals": sorted_map(pop.globals.iter().map(|(k, v)| (k.clone(), json!(v)))),
                "last_spike": pop.last_spike,
            }),
        );
    }
    let mut projs = Map::new();
    for (id, proj) in state.projs.iter().enumerate() {
        projs.insert(
            format!("proj{id}"),
            json!({
                "post_ranks": proj.post_ranks,
                "pre_ranks": proj.pre_ranks,
                "w": proj.w,
                "attributes": sorted_map(proj.locals.iter().map(|(k, v)| (k.clone(), json!(v)))),
                "semiglobals": sorted_map(
                    proj.semiglobals.iter().map(|(k, v)| (k.clone(), json!(v)))
                ),
                "globals": sorted_map(proj.globals.iter().map(|(k, v)| (k.clone(), json!(v)))),
            }),
        );
    }
    let doc = json!({
        "version": STATE_FORMAT_VERSION,
        "t": state.t,
        "dt": state.dt,
        "populations": pops,
        "projections": projs,
    });
    let text = serde_json::to_string_pretty(&doc).map_err(|e| emit_err(path, e))?;
    fs::write(path, text).map_err(|e| emit_err(path, e))?;
    info!(path = %path.display(), "saved network state");
    Ok(())
}

/// Restore a previously saved state. Connectivity and attribute values
/// are overwritten; objects absent from the file keep their current
/// values.
pub fn load_state(state: &mut NetworkState, path: &Path) -> GenResult<()> {
    let text = fs::read_to_string(path).map_err(|e| emit_err(path, e))?;
    let doc: Value = serde_json::from_str(&text).map_err(|e| emit_err(path, e))?;
    let version = doc["version"].as_u64().unwrap_or(0);
    if version != STATE_FORMAT_VERSION {
        return Err(GenerationError::Emit {
            path: path.display().to_string(),
            message: format!("unsupported state format version {version}"),
        });
    }
    state.t = doc["t"].as_i64().unwrap_or(0);

    for (id, pop) in state.pops.iter_mut().enumerate() {
        let entry = &doc["populations"][format!("pop{id}")];
        if entry.is_null() {
            continue;
        }
        if let Some(attrs) = entry["attributes"].as_object() {
            for (name, values) in attrs {
                pop.locals.insert(name.clone(), f64_vec(values));
            }
        }
        if let Some(globals) = entry["globals"].as_object() {
            for (name, value) in globals {
                pop.globals.insert(name.clone(), value.as_f64().unwrap_or(0.0));
            }
        }
        if let Some(last) = entry.get("last_spike") {
            if !last.is_null() {
                pop.last_spike = f64_vec(last);
            }
        }
    }
    for (id, proj) in state.projs.iter_mut().enumerate() {
        let entry = &doc["projections"][format!("proj{id}")];
        if entry.is_null() {
            continue;
        }
        proj.post_ranks = usize_vec(&entry["post_ranks"]);
        proj.pre_ranks = entry["pre_ranks"]
            .as_array()
            .map(|rows| rows.iter().map(usize_vec).collect())
            .unwrap_or_default();
        proj.w = entry["w"]
            .as_array()
            .map(|rows| rows.iter().map(f64_vec).collect())
            .unwrap_or_default();
        if let Some(attrs) = entry["attributes"].as_object() {
            for (name, rows) in attrs {
                let rows = rows
                    .as_array()
                    .map(|r| r.iter().map(f64_vec).collect())
                    .unwrap_or_default();
                proj.locals.insert(name.clone(), rows);
            }
        }
        if let Some(semis) = entry["semiglobals"].as_object() {
            for (name, values) in semis {
                proj.semiglobals.insert(name.clone(), f64_vec(values));
            }
        }
        if let Some(globals) = entry["globals"].as_object() {
            for (name, value) in globals {
                proj.globals
                    .insert(name.clone(), value.as_f64().unwrap_or(0.0));
            }
        }
        proj.rebuild_inverse();
    }
    info!(path = %path.display(), "restored network state");
    Ok(())
}

fn sorted_map(entries: impl Iterator<Item = (String, Value)>) -> Map<String, Value> {
    let mut sorted: Vec<(String, Value)> = entries.collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted.into_iter().collect()
}

fn f64_vec(value: &Value) -> Vec<f64> {
    value
        .as_array()
        .map(|a| a.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect())
        .unwrap_or_default()
}

fn usize_vec(value: &Value) -> Vec<usize> {
    value
        .as_array()
        .map(|a| a.iter().map(|v| v.as_u64().unwrap_or(0) as usize).collect())
        .unwrap_or_default()
}

fn emit_err(path: &Path, e: impl std::fmt::Display) -> GenerationError {
    GenerationError::Emit {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurogen_ir::ast::Expr;
    use neurogen_model::{
        Attribute, Connectivity, Equation, EquationKind, NeuronType, SynapseType,
    };

    fn rate_network() -> NetworkBuildContext {
        let neuron = NeuronType {
            name: "Rate".into(),
            parameters: vec![Attribute::parameter("tau", Locality::Global, 10.0)],
            variables: vec![Attribute::variable(
                "r",
                Locality::Local,
                Equation {
                    kind: EquationKind::Assignment,
                    rhs: Expr::var("sum(exc)").div(Expr::var("tau")),
                },
            )],
            spike: None,
        };
        let mut ctx = NetworkBuildContext::new(1.0);
        let a = ctx.add_population("a", vec![4], neuron.clone()).unwrap();
        let b = ctx.add_population("b", vec![4], neuron).unwrap();
        ctx.add_projection(
            "ab",
            a,
            b,
            "exc",
            SynapseType::rate_default("d"),
            Connectivity::all_to_all(4, 4, 0.5),
            Specialization::Default,
        )
        .unwrap();
        ctx
    }

    #[test]
    fn test_phase_order_is_fixed() {
        let ctx = rate_network();
        let net = compile(&ctx, &GeneratorConfig::default()).unwrap();
        let names: Vec<&str> = net.program.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "sum_reset",
                "weighted_sums",
                "random_draws",
                "neural_update",
                "delayed_outputs",
                "global_operations",
                "synaptic_update",
                "post_events",
                "structural_plasticity",
            ]
        );
    }

    #[test]
    fn test_initial_state_shapes() {
        let ctx = rate_network();
        let net = compile(&ctx, &GeneratorConfig::default()).unwrap();
        let state = &net.state;
        assert_eq!(state.pops.len(), 2);
        assert_eq!(state.pops[1].locals["_sum_exc"].len(), 4);
        assert_eq!(state.pops[0].globals["tau"], 10.0);
        assert_eq!(state.projs[0].w[0], vec![0.5; 4]);
        // The rate projection reads pre.r undelayed, so no ring buffer.
        assert!(state.pops[0].delayed.is_empty());
    }

    #[test]
    fn test_seeded_random_init_is_reproducible() {
        let mut ctx = rate_network();
        ctx.populations[0].neuron.variables.push(
            Attribute::parameter("noise", Locality::Local, 0.0).with_init(Init::Random(
                RandomDistribution::Uniform { min: 0.0, max: 1.0 },
            )),
        );
        let a = compile(&ctx, &GeneratorConfig::default()).unwrap();
        let b = compile(&ctx, &GeneratorConfig::default()).unwrap();
        assert_eq!(a.state.pops[0].locals["noise"], b.state.pops[0].locals["noise"]);
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let ctx = rate_network();
        let net = compile(&ctx, &GeneratorConfig::default()).unwrap();
        let mut state = net.state;
        state.run(&net.program, 3).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_state(&state, &path).unwrap();

        let mut restored = initial_state(
            &ctx,
            &net.populations,
            &net.projections,
            &GeneratorConfig::default(),
        );
        load_state(&mut restored, &path).unwrap();
        assert_eq!(restored.t, state.t);
        assert_eq!(restored.pops[1].locals["r"], state.pops[1].locals["r"]);
        assert_eq!(restored.projs[0].w, state.projs[0].w);
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"version": 99}"#).unwrap();
        let ctx = rate_network();
        let net = compile(&ctx, &GeneratorConfig::default()).unwrap();
        let mut state = net.state;
        assert!(load_state(&mut state, &path).is_err());
    }
}
