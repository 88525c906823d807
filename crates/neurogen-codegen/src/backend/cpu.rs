// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! C++ backend, shared by the single-thread and OpenMP paradigms.
//!
//! Emits one header per population and projection (state struct, `init()`
//! seeded with the compiled initial values, accessor surface) plus
//! `simulation.cpp` holding the global instances and the nine-phase
//! `single_step()`. The OpenMP paradigm differs only in the pragmas the
//! printer attaches to parallel loops.

use std::fmt::Write as _;

use neurogen_config::{GeneratorConfig, Paradigm};
use neurogen_ir::eval::{GlobalOp, NetworkState};
use neurogen_ir::{CppPrinter, Fragment, FragmentSlot, RenderCtx};
use neurogen_model::{
    DelaySpec, Locality, NetworkBuildContext, Population, Projection, SynapseKind,
};

use crate::assembler::{grouped_global_ops, GeneratedNetwork};
use crate::error::GenResult;
use crate::population::PopulationPlan;
use crate::projection::ProjectionPlan;
use crate::selector::ConnectivityScheme;

use super::EmittedFile;

pub fn render(
    ctx: &NetworkBuildContext,
    net: &GeneratedNetwork,
    config: &GeneratorConfig,
) -> GenResult<Vec<EmittedFile>> {
    let printer = CppPrinter::new(
        config.precision.ctype(),
        config.paradigm == Paradigm::OpenMp,
    );
    let reductions = grouped_global_ops(&net.populations, &net.projections);

    let mut files = vec![EmittedFile {
        name: "network.h".into(),
        contents: network_header(config),
    }];
    for (pop, plan) in ctx.populations.iter().zip(&net.populations) {
        let ops = reductions
            .iter()
            .find(|(id, _)| *id == pop.id)
            .map(|(_, ops)| ops.as_slice())
            .unwrap_or(&[]);
        files.push(EmittedFile {
            name: format!("pop{}.hpp", pop.id),
            contents: population_header(pop, plan, ops, &net.state, config),
        });
    }
    for (proj, plan) in ctx.projections.iter().zip(&net.projections) {
        files.push(EmittedFile {
            name: format!("proj{}.hpp", proj.id),
            contents: projection_header(proj, plan, &net.state, config, &printer),
        });
    }
    files.push(EmittedFile {
        name: "simulation.cpp".into(),
        contents: simulation_source(ctx, net, config, &printer),
    });
    Ok(files)
}

fn network_header(config: &GeneratorConfig) -> String {
    let real = config.precision.ctype();
    let omp = if config.paradigm == Paradigm::OpenMp {
        "#include <omp.h>\n"
    } else {
        ""
    };
    format!(
        "#pragma once\n\
         \n\
         #include <algorithm>\n\
         #include <cmath>\n\
         #include <cstdlib>\n\
         #include <deque>\n\
         #include <iostream>\n\
         #include <map>\n\
         #include <random>\n\
         #include <vector>\n\
         {omp}\
         \n\
         extern long t;\n\
         extern double dt;\n\
         extern std::vector<std::mt19937> rng;\n\
         extern std::uniform_real_distribution<{real}> unif;\n"
    )
}

/// Names of the per-neuron arrays a population carries, in declaration
/// order; pairs with whether each is a local array or a scalar.
fn pop_attrs(pop: &Population, plan: &PopulationPlan) -> Vec<(String, bool)> {
    let mut out: Vec<(String, bool)> = pop
        .neuron
        .parameters
        .iter()
        .chain(&pop.neuron.variables)
        .map(|a| (a.name.clone(), a.locality == Locality::Local))
        .collect();
    for name in &plan.sum_targets {
        out.push((name.clone(), true));
    }
    for name in &plan.implicit_conductances {
        out.push((name.clone(), true));
    }
    out
}

fn population_header(
    pop: &Population,
    plan: &PopulationPlan,
    reductions: &[(String, GlobalOp)],
    state: &NetworkState,
    config: &GeneratorConfig,
) -> String {
    let real = config.precision.ctype();
    let id = pop.id;
    let ps = &state.pops[id];
    let kind = if pop.is_spiking() { "spiking" } else { "rate-coded" };
    let mut out = String::new();
    let _ = write!(
        out,
        "#pragma once\n\n#include \"network.h\"\n\n// PopStruct{id}: {} ({kind}, {} neurons)\nstruct PopStruct{id} {{\n    int size;\n    bool _active;\n\n",
        pop.name, pop.size
    );

    for (name, is_local) in pop_attrs(pop, plan) {
        if is_local {
            let _ = writeln!(out, "    std::vector<{real}> {name};");
        } else {
            let _ = writeln!(out, "    {real} {name};");
        }
    }
    for (var, op) in reductions {
        let _ = writeln!(out, "    {real} {};", op.key(var));
    }
    for (name, _, dist) in &plan.randoms {
        match dist {
            neurogen_ir::eval::RandomDist::Uniform { .. } => {
                let _ = writeln!(out, "    std::uniform_real_distribution<{real}> dist_{name};");
            }
            neurogen_ir::eval::RandomDist::Normal { .. } => {
                let _ = writeln!(out, "    std::normal_distribution<{real}> dist_{name};");
            }
        }
    }
    if pop.is_spiking() {
        out.push_str(
            "\n    // spike bookkeeping\n    std::vector<int> spiked;\n",
        );
        let _ = writeln!(out, "    std::vector<{real}> last_spike;");
        let _ = writeln!(out, "    std::vector<{real}> refractory_remaining;");
    }
    for var in &plan.delayed_vars {
        let _ = writeln!(out, "    std::deque<std::vector<{real}>> _delayed_{var};");
    }
    if plan.rotate_spikes {
        out.push_str("    std::deque<std::vector<int>> _delayed_spike;\n");
    }

    // init(): the compiled initial values.
    let _ = write!(out, "\n    void init() {{\n        size = {};\n        _active = true;\n", pop.size);
    for (name, is_local) in pop_attrs(pop, plan) {
        if is_local {
            let values = &ps.locals[&name];
            let _ = writeln!(
                out,
                "        {name} = std::vector<{real}>{};",
                real_list(values)
            );
        } else {
            let _ = writeln!(out, "        {name} = {:?};", ps.globals[&name]);
        }
    }
    for (var, op) in reductions {
        let _ = writeln!(out, "        {} = 0.0;", op.key(var));
    }
    for (name, _, dist) in &plan.randoms {
        match dist {
            neurogen_ir::eval::RandomDist::Uniform { min, max } => {
                let _ = writeln!(
                    out,
                    "        dist_{name} = std::uniform_real_distribution<{real}>({min:?}, {max:?});"
                );
            }
            neurogen_ir::eval::RandomDist::Normal { mean, sd } => {
                let _ = writeln!(
                    out,
                    "        dist_{name} = std::normal_distribution<{real}>({mean:?}, {sd:?});"
                );
            }
        }
    }
    if pop.is_spiking() {
        out.push_str("        spiked.clear();\n");
        let _ = writeln!(out, "        last_spike = std::vector<{real}>(size, -10000.0);");
        let _ = writeln!(out, "        refractory_remaining = std::vector<{real}>(size, 0.0);");
    }
    for var in &plan.delayed_vars {
        let _ = writeln!(out, "        _delayed_{var}.assign({}, {var});", pop.max_delay);
    }
    if plan.rotate_spikes {
        let _ = writeln!(
            out,
            "        _delayed_spike.assign({}, std::vector<int>());",
            pop.max_delay
        );
    }
    out.push_str("    }\n");

    // Accessors, one get/set pair per declared attribute.
    out.push_str("\n    // accessors\n");
    for (name, is_local) in pop_attrs(pop, plan) {
        if is_local {
            let _ = write!(
                out,
                "    std::vector<{real}> get_{name}() {{ return {name}; }}\n\
                 \x20   {real} get_single_{name}(int rk) {{ return {name}[rk]; }}\n\
                 \x20   void set_{name}(std::vector<{real}> value) {{ {name} = value; }}\n\
                 \x20   void set_single_{name}(int rk, {real} value) {{ {name}[rk] = value; }}\n"
            );
        } else {
            let _ = write!(
                out,
                "    {real} get_{name}() {{ return {name}; }}\n\
                 \x20   void set_{name}({real} value) {{ {name} = value; }}\n"
            );
        }
    }

    // Memory accounting and teardown.
    out.push_str("\n    size_t size_in_bytes() {\n        size_t bytes = 0;\n");
    for (name, is_local) in pop_attrs(pop, plan) {
        if is_local {
            let _ = writeln!(
                out,
                "        bytes += sizeof({real}) * {name}.capacity();"
            );
        } else {
            let _ = writeln!(out, "        bytes += sizeof({real}); // {name}");
        }
    }
    out.push_str("        return bytes;\n    }\n\n    void clear() {\n");
    for (name, is_local) in pop_attrs(pop, plan) {
        if is_local {
            let _ = writeln!(out, "        {name}.clear();\n        {name}.shrink_to_fit();");
        }
    }
    for var in &plan.delayed_vars {
        let _ = writeln!(out, "        _delayed_{var}.clear();");
    }
    out.push_str("    }\n};\n\n");
    let _ = writeln!(out, "extern PopStruct{id} pop{id};");
    out
}

/// Names and localities of the synaptic attributes, declaration order.
/// `w` is excluded: the weight array belongs to the connectivity section.
fn proj_attrs(proj: &Projection) -> Vec<(String, Locality)> {
    proj.synapse
        .parameters
        .iter()
        .chain(&proj.synapse.variables)
        .filter(|a| a.name != "w")
        .map(|a| (a.name.clone(), a.locality))
        .collect()
}

fn projection_header(
    proj: &Projection,
    plan: &ProjectionPlan,
    state: &NetworkState,
    config: &GeneratorConfig,
    printer: &CppPrinter,
) -> String {
    let real = config.precision.ctype();
    let id = proj.id;
    let st = &state.projs[id];
    let rctx = RenderCtx::for_proj(id);
    let spiking = proj.synapse.kind == SynapseKind::Spike;
    let scheme = plan.selection.scheme;

    let mut out = String::new();
    let _ = write!(
        out,
        "#pragma once\n\n#include \"network.h\"\n#include \"pop{}.hpp\"\n#include \"pop{}.hpp\"\n",
        proj.pre, proj.post
    );
    for dep in specialization_deps(proj) {
        let _ = writeln!(out, "#include \"proj{dep}.hpp\"");
    }
    let _ = write!(
        out,
        "\n// ProjStruct{id}: {} (pop{} -> pop{}, target {})\nstruct ProjStruct{id} {{\n",
        proj.name, proj.pre, proj.post, proj.target
    );

    // Connectivity storage.
    if let Some(text) = slot_text(plan, FragmentSlot::DeclareConnectivity, printer, &rctx, || {
        let mut s = String::from(
            "    // connectivity (list of lists)\n    std::vector<int> post_rank;\n    std::vector<std::vector<int>> pre_rank;\n",
        );
        let _ = writeln!(s, "    std::vector<std::vector<{real}>> w;");
        s
    }) {
        out.push_str(&text);
    }
    if spiking {
        if let Some(text) =
            slot_text(plan, FragmentSlot::DeclareInverseConnectivity, printer, &rctx, || {
                "    std::map<int, std::vector<std::pair<int, int>>> inv_pre_rank;\n    std::map<int, int> inv_post_rank;\n".to_string()
            })
        {
            out.push_str(&text);
        }
    }
    if let Some(text) = slot_text(plan, FragmentSlot::DeclareDelay, printer, &rctx, || {
        match scheme {
            ConnectivityScheme::FixedDelay => String::new(),
            ConnectivityScheme::UniformDelay => "    int delay;\n".to_string(),
            ConnectivityScheme::NonUniformDelayRate => {
                "    std::vector<std::vector<int>> delay;\n    int max_delay;\n".to_string()
            }
            ConnectivityScheme::NonUniformDelaySpike => {
                "    std::vector<std::vector<int>> delay;\n    int max_delay;\n    int idx_delay;\n    std::vector<std::vector<std::vector<int>>> _delayed_spikes;\n".to_string()
            }
        }
    }) {
        out.push_str(&text);
    }

    // Gates and synaptic attributes.
    out.push_str("\n    // gates\n    bool _transmission;\n    bool _update;\n    bool _plasticity;\n");
    if let Some(text) = slot_text(plan, FragmentSlot::DeclareAttributes, printer, &rctx, || {
        let mut s = String::new();
        for (name, locality) in proj_attrs(proj) {
            match locality {
                Locality::Local => {
                    let _ = writeln!(s, "    std::vector<std::vector<{real}>> {name};");
                }
                Locality::Semiglobal => {
                    let _ = writeln!(s, "    std::vector<{real}> {name};");
                }
                Locality::Global => {
                    let _ = writeln!(s, "    {real} {name};");
                }
            }
        }
        s
    }) {
        out.push_str(&text);
    }
    if plan.has_event_driven {
        if let Some(text) = slot_text(plan, FragmentSlot::DeclareEventDriven, printer, &rctx, || {
            format!("    std::vector<std::vector<{real}>> _last_event;\n")
        }) {
            out.push_str(&text);
        }
    }
    for (name, _, dist) in &plan.randoms {
        match dist {
            neurogen_ir::eval::RandomDist::Uniform { .. } => {
                let _ = writeln!(out, "    std::uniform_real_distribution<{real}> dist_{name};");
            }
            neurogen_ir::eval::RandomDist::Normal { .. } => {
                let _ = writeln!(out, "    std::normal_distribution<{real}> dist_{name};");
            }
        }
    }

    // init(): compiled connectivity and attribute values.
    out.push_str("\n    void init() {\n");
    if let Some(text) = slot_text(plan, FragmentSlot::InitConnectivity, printer, &rctx, || {
        let mut s = String::new();
        let _ = writeln!(s, "        post_rank = std::vector<int>{};", int_list(&st.post_ranks));
        let _ = writeln!(s, "        pre_rank = {};", int_matrix(&st.pre_ranks));
        let _ = writeln!(s, "        w = {};", real_matrix(&st.w, real));
        s
    }) {
        out.push_str(&text);
    }
    if let Some(text) = slot_text(plan, FragmentSlot::InitDelay, printer, &rctx, || {
        match &proj.connectivity.delay {
            DelaySpec::None => String::new(),
            DelaySpec::Uniform(d) => {
                if scheme == ConnectivityScheme::UniformDelay {
                    format!("        delay = {d};\n")
                } else {
                    String::new()
                }
            }
            DelaySpec::NonUniform(delays) => {
                let mut s = String::new();
                let _ = writeln!(s, "        delay = {};", int_matrix(delays));
                let _ = writeln!(s, "        max_delay = {};", proj.max_delay());
                if scheme == ConnectivityScheme::NonUniformDelaySpike {
                    s.push_str("        idx_delay = 0;\n        reset_ring_buffer();\n");
                }
                s
            }
        }
    }) {
        out.push_str(&text);
    }
    out.push_str("        _transmission = true;\n        _update = true;\n        _plasticity = true;\n");
    if let Some(text) = slot_text(plan, FragmentSlot::InitAttributes, printer, &rctx, || {
        let mut s = String::new();
        for (name, locality) in proj_attrs(proj) {
            match locality {
                Locality::Local => {
                    let _ = writeln!(s, "        {name} = {};", real_matrix(&st.locals[&name], real));
                }
                Locality::Semiglobal => {
                    let _ = writeln!(
                        s,
                        "        {name} = std::vector<{real}>{};",
                        real_list(&st.semiglobals[&name])
                    );
                }
                Locality::Global => {
                    let _ = writeln!(s, "        {name} = {:?};", st.globals[&name]);
                }
            }
        }
        s
    }) {
        out.push_str(&text);
    }
    if plan.has_event_driven {
        if let Some(text) = slot_text(plan, FragmentSlot::InitEventDriven, printer, &rctx, || {
            format!(
                "        _last_event = {};\n",
                real_matrix(&st.locals["_last_event"], real)
            )
        }) {
            out.push_str(&text);
        }
    }
    for (name, _, dist) in &plan.randoms {
        match dist {
            neurogen_ir::eval::RandomDist::Uniform { min, max } => {
                let _ = writeln!(
                    out,
                    "        dist_{name} = std::uniform_real_distribution<{real}>({min:?}, {max:?});"
                );
            }
            neurogen_ir::eval::RandomDist::Normal { mean, sd } => {
                let _ = writeln!(
                    out,
                    "        dist_{name} = std::normal_distribution<{real}>({mean:?}, {sd:?});"
                );
            }
        }
    }
    if spiking {
        out.push_str("        inverse_connectivity();\n");
    }
    out.push_str("    }\n");

    if spiking {
        if let Some(text) =
            slot_text(plan, FragmentSlot::InitInverseConnectivity, printer, &rctx, || {
                "\n    void inverse_connectivity() {\n        inv_pre_rank.clear();\n        inv_post_rank.clear();\n        for (int i = 0; i < pre_rank.size(); i++) {\n            for (int j = 0; j < pre_rank[i].size(); j++) {\n                inv_pre_rank[pre_rank[i][j]].push_back(std::make_pair(i, j));\n            }\n        }\n        for (int i = 0; i < post_rank.size(); i++) {\n            inv_post_rank[post_rank[i]] = i;\n        }\n    }\n".to_string()
            })
        {
            out.push_str(&text);
        }
    }

    // Behavior methods rendered from the fragments.
    for (slot, method) in [
        (FragmentSlot::Psp, "compute_psp"),
        (FragmentSlot::UpdateSynapse, "update_synapse"),
        (FragmentSlot::PostEvent, "post_event"),
        (FragmentSlot::Creating, "creating"),
        (FragmentSlot::Pruning, "pruning"),
    ] {
        let fragment = plan.fragment(slot);
        if fragment.is_empty() {
            continue;
        }
        let body = printer.fragment(fragment, &rctx, 2);
        let _ = write!(out, "\n    void {method}() {{\n{body}    }}\n");
    }

    if proj.synapse.has_structural_plasticity() {
        out.push_str(&structural_helpers(proj, plan, real, scheme));
    }

    // Accessor surface.
    if let Some(text) = slot_text(plan, FragmentSlot::AccessAttributes, printer, &rctx, || {
        let mut s = String::from("\n    // accessors\n");
        let _ = write!(
            s,
            "    std::vector<std::vector<{real}>> get_w() {{ return w; }}\n\
             \x20   {real} get_single_w(int i, int j) {{ return w[i][j]; }}\n\
             \x20   void set_w(std::vector<std::vector<{real}>> value) {{ w = value; }}\n\
             \x20   void set_single_w(int i, int j, {real} value) {{ w[i][j] = value; }}\n"
        );
        for (name, locality) in proj_attrs(proj) {
            match locality {
                Locality::Local => {
                    let _ = write!(
                        s,
                        "    std::vector<std::vector<{real}>> get_{name}() {{ return {name}; }}\n\
                         \x20   void set_{name}(std::vector<std::vector<{real}>> value) {{ {name} = value; }}\n"
                    );
                }
                Locality::Semiglobal => {
                    let _ = write!(
                        s,
                        "    std::vector<{real}> get_{name}() {{ return {name}; }}\n\
                         \x20   void set_{name}(std::vector<{real}> value) {{ {name} = value; }}\n"
                    );
                }
                Locality::Global => {
                    let _ = write!(
                        s,
                        "    {real} get_{name}() {{ return {name}; }}\n\
                         \x20   void set_{name}({real} value) {{ {name} = value; }}\n"
                    );
                }
            }
        }
        s.push_str(&delay_accessors(plan, scheme));
        s
    }) {
        out.push_str(&text);
    }

    if let Some(text) = slot_text(plan, FragmentSlot::SizeInBytes, printer, &rctx, || {
        let mut s = String::from(
            "\n    size_t size_in_bytes() {\n        size_t bytes = 0;\n        bytes += sizeof(int) * post_rank.capacity();\n        for (int i = 0; i < pre_rank.size(); i++) {\n            bytes += sizeof(int) * pre_rank[i].capacity();\n",
        );
        let _ = writeln!(s, "            bytes += sizeof({real}) * w[i].capacity();");
        s.push_str("        }\n        return bytes;\n    }\n");
        s
    }) {
        out.push_str(&text);
    }
    if let Some(text) = slot_text(plan, FragmentSlot::Clear, printer, &rctx, || {
        "\n    void clear() {\n        post_rank.clear();\n        pre_rank.clear();\n        w.clear();\n    }\n".to_string()
    }) {
        out.push_str(&text);
    }

    out.push_str("};\n\n");
    let _ = writeln!(out, "extern ProjStruct{id} proj{id};");
    out
}

/// Projections a specialized variant reads state from.
fn specialization_deps(proj: &Projection) -> Vec<usize> {
    match &proj.specialization {
        neurogen_model::Specialization::Transpose { forward } => vec![*forward],
        neurogen_model::Specialization::Copy { source } => vec![*source],
        _ => vec![],
    }
}

/// Resolve one structure slot: `None` suppresses the section, verbatim
/// text replaces it, an empty IR fragment selects the backend default.
fn slot_text(
    plan: &ProjectionPlan,
    slot: FragmentSlot,
    printer: &CppPrinter,
    rctx: &RenderCtx,
    default: impl FnOnce() -> String,
) -> Option<String> {
    match plan.fragment(slot) {
        Fragment::Disabled => None,
        Fragment::Verbatim(text) => Some(text.clone()),
        Fragment::Ir(stmts) if stmts.is_empty() => Some(default()),
        Fragment::Ir(stmts) => Some(printer.stmts(stmts, rctx, 1)),
    }
}

/// `isConnected` / `addSynapse` / `removeSynapse`, as used by the
/// structural-plasticity fragments. Insertion keeps rows sorted; a
/// delay the ring buffers cannot hold aborts the simulation.
fn structural_helpers(
    proj: &Projection,
    plan: &ProjectionPlan,
    real: &str,
    scheme: ConnectivityScheme,
) -> String {
    let spiking = proj.synapse.kind == SynapseKind::Spike;
    let mut s = String::from(
        "\n    // structural plasticity\n    bool isConnected(int row, int rank) {\n        return std::binary_search(pre_rank[row].begin(), pre_rank[row].end(), rank);\n    }\n",
    );
    let _ = write!(
        s,
        "\n    void addSynapse(int row, int rank, {real} weight, int d = 1) {{\n        if (isConnected(row, rank))\n            return;\n"
    );
    match scheme {
        ConnectivityScheme::NonUniformDelayRate | ConnectivityScheme::NonUniformDelaySpike => {
            s.push_str(
                "        if (d > max_delay) {\n            std::cerr << \"addSynapse: delay \" << d << \" exceeds max_delay \" << max_delay << std::endl;\n            exit(1);\n        }\n",
            );
        }
        ConnectivityScheme::UniformDelay => {
            s.push_str(
                "        if (d != delay) {\n            std::cerr << \"addSynapse: a uniform-delay projection cannot take delay \" << d << std::endl;\n            exit(1);\n        }\n",
            );
        }
        ConnectivityScheme::FixedDelay => {
            s.push_str(
                "        if (d > 1) {\n            std::cerr << \"addSynapse: projection has no delay ring buffer\" << std::endl;\n            exit(1);\n        }\n",
            );
        }
    }
    s.push_str(
        "        int pos = std::lower_bound(pre_rank[row].begin(), pre_rank[row].end(), rank) - pre_rank[row].begin();\n        pre_rank[row].insert(pre_rank[row].begin() + pos, rank);\n        w[row].insert(w[row].begin() + pos, weight);\n",
    );
    if matches!(
        scheme,
        ConnectivityScheme::NonUniformDelayRate | ConnectivityScheme::NonUniformDelaySpike
    ) {
        s.push_str("        delay[row].insert(delay[row].begin() + pos, d);\n");
    }
    for (name, locality) in proj_attrs(proj) {
        if locality == Locality::Local {
            let _ = writeln!(
                s,
                "        {name}[row].insert({name}[row].begin() + pos, 0.0);"
            );
        }
    }
    if plan.has_event_driven {
        s.push_str(
            "        _last_event[row].insert(_last_event[row].begin() + pos, -10000.0);\n",
        );
    }
    if spiking {
        s.push_str("        inverse_connectivity();\n");
    }
    s.push_str("    }\n\n    void removeSynapse(int row, int col) {\n        pre_rank[row].erase(pre_rank[row].begin() + col);\n        w[row].erase(w[row].begin() + col);\n");
    if matches!(
        scheme,
        ConnectivityScheme::NonUniformDelayRate | ConnectivityScheme::NonUniformDelaySpike
    ) {
        s.push_str("        delay[row].erase(delay[row].begin() + col);\n");
    }
    for (name, locality) in proj_attrs(proj) {
        if locality == Locality::Local {
            let _ = writeln!(s, "        {name}[row].erase({name}[row].begin() + col);");
        }
    }
    if plan.has_event_driven {
        s.push_str("        _last_event[row].erase(_last_event[row].begin() + col);\n");
    }
    if spiking {
        s.push_str("        inverse_connectivity();\n");
    }
    s.push_str("    }\n");
    s
}

fn delay_accessors(plan: &ProjectionPlan, scheme: ConnectivityScheme) -> String {
    let mut s = String::new();
    match scheme {
        ConnectivityScheme::FixedDelay => {}
        ConnectivityScheme::UniformDelay => {
            s.push_str(
                "    int get_delay() { return delay; }\n    int get_dendrite_delay(int rank) { return delay; }\n    void set_delay(int value) { delay = value; }\n",
            );
        }
        ConnectivityScheme::NonUniformDelayRate | ConnectivityScheme::NonUniformDelaySpike => {
            s.push_str(
                "    std::vector<std::vector<int>> get_delay() { return delay; }\n    int get_dendrite_delay(int i, int j) { return delay[i][j]; }\n    void set_delay(std::vector<std::vector<int>> value) { delay = value; }\n",
            );
        }
    }
    if plan.selection.needs_max_delay_accessors {
        s.push_str(
            "    int get_max_delay() { return max_delay; }\n",
        );
        if scheme == ConnectivityScheme::NonUniformDelaySpike {
            s.push_str(
                "    void set_max_delay(int value) { max_delay = value; reset_ring_buffer(); }\n    void update_max_delay(int value) {\n        if (value > max_delay) {\n            max_delay = value;\n            reset_ring_buffer();\n        }\n    }\n    void reset_ring_buffer() {\n        _delayed_spikes.assign(max_delay, std::vector<std::vector<int>>(post_rank.size()));\n        idx_delay = 0;\n    }\n",
            );
        } else {
            // Rate non-uniform delays read the presynaptic ring buffer;
            // only the scalar bookkeeping lives here.
            s.push_str(
                "    void set_max_delay(int value) { max_delay = value; }\n    void update_max_delay(int value) { if (value > max_delay) max_delay = value; }\n",
            );
        }
    }
    s
}

fn simulation_source(
    ctx: &NetworkBuildContext,
    net: &GeneratedNetwork,
    config: &GeneratorConfig,
    printer: &CppPrinter,
) -> String {
    let real = config.precision.ctype();
    let mut out = String::from("#include \"network.h\"\n");
    for pop in &ctx.populations {
        let _ = writeln!(out, "#include \"pop{}.hpp\"", pop.id);
    }
    for proj in &ctx.projections {
        let _ = writeln!(out, "#include \"proj{}.hpp\"", proj.id);
    }
    let _ = write!(
        out,
        "\nlong t = 0;\ndouble dt = {:?};\nstd::vector<std::mt19937> rng;\nstd::uniform_real_distribution<{real}> unif(0.0, 1.0);\n\n",
        config.dt
    );
    for pop in &ctx.populations {
        let _ = writeln!(out, "PopStruct{0} pop{0};", pop.id);
    }
    for proj in &ctx.projections {
        let _ = writeln!(out, "ProjStruct{0} proj{0};", proj.id);
    }

    let _ = write!(
        out,
        "\nvoid initialize() {{\n    t = 0;\n    rng.clear();\n    rng.push_back(std::mt19937({}));\n",
        config.seed
    );
    for pop in &ctx.populations {
        let _ = writeln!(out, "    pop{}.init();", pop.id);
    }
    for proj in &ctx.projections {
        let _ = writeln!(out, "    proj{}.init();", proj.id);
    }
    out.push_str("}\n\nvoid single_step() {\n");

    out.push_str("    // phase 1: reset the rate accumulators\n");
    for plan in &net.populations {
        for target in &plan.sum_targets {
            let _ = writeln!(
                out,
                "    std::fill(pop{0}.{target}.begin(), pop{0}.{target}.end(), 0.0);",
                plan.id
            );
        }
    }

    out.push_str("\n    // phase 2: weighted sums / spike propagation\n");
    for plan in &net.projections {
        if !plan.fragment(FragmentSlot::Psp).is_empty() {
            let _ = writeln!(out, "    proj{}.compute_psp();", plan.id);
        }
    }

    out.push_str("\n    // phase 3: random draws\n");
    for plan in &net.populations {
        for (name, is_local, _) in &plan.randoms {
            if *is_local {
                let _ = writeln!(
                    out,
                    "    for (int i = 0; i < pop{0}.size; i++)\n        pop{0}.{name}[i] = pop{0}.dist_{name}(rng[0]);",
                    plan.id
                );
            } else {
                let _ = writeln!(out, "    pop{0}.{name} = pop{0}.dist_{name}(rng[0]);", plan.id);
            }
        }
    }
    for plan in &net.projections {
        for (name, locality, _) in &plan.randoms {
            match locality {
                Locality::Local => {
                    let _ = writeln!(
                        out,
                        "    for (int i = 0; i < proj{0}.pre_rank.size(); i++)\n        for (int j = 0; j < proj{0}.pre_rank[i].size(); j++)\n            proj{0}.{name}[i][j] = proj{0}.dist_{name}(rng[0]);",
                        plan.id
                    );
                }
                Locality::Semiglobal => {
                    let _ = writeln!(
                        out,
                        "    for (int i = 0; i < proj{0}.post_rank.size(); i++)\n        proj{0}.{name}[i] = proj{0}.dist_{name}(rng[0]);",
                        plan.id
                    );
                }
                Locality::Global => {
                    let _ = writeln!(
                        out,
                        "    proj{0}.{name} = proj{0}.dist_{name}(rng[0]);",
                        plan.id
                    );
                }
            }
        }
    }

    out.push_str("\n    // phase 4: neuron updates and spike detection\n");
    for (pop, plan) in ctx.populations.iter().zip(&net.populations) {
        if !plan.update.is_empty() {
            out.push_str(&printer.stmts(&plan.update, &RenderCtx::default(), 1));
        }
        if let Some(rule) = &plan.spike_rule {
            out.push_str(&spike_gather(pop.id, rule, printer));
        }
    }

    out.push_str("\n    // phase 5: delayed outputs\n");
    for plan in &net.populations {
        for var in &plan.delayed_vars {
            let _ = writeln!(
                out,
                "    pop{0}._delayed_{var}.push_front(pop{0}.{var});\n    pop{0}._delayed_{var}.pop_back();",
                plan.id
            );
        }
        if plan.rotate_spikes {
            let _ = writeln!(
                out,
                "    pop{0}._delayed_spike.push_front(pop{0}.spiked);\n    pop{0}._delayed_spike.pop_back();",
                plan.id
            );
        }
    }

    out.push_str("\n    // phase 6: global operations\n");
    for (pop, ops) in grouped_global_ops(&net.populations, &net.projections) {
        for (var, op) in ops {
            out.push_str(&reduction_text(pop, &var, op, real));
        }
    }

    out.push_str("\n    // phase 7: synaptic variable updates\n");
    for plan in &net.projections {
        if !plan.fragment(FragmentSlot::UpdateSynapse).is_empty() {
            let _ = writeln!(out, "    proj{}.update_synapse();", plan.id);
        }
    }

    out.push_str("\n    // phase 8: post-synaptic events\n");
    for plan in &net.projections {
        if !plan.fragment(FragmentSlot::PostEvent).is_empty() {
            let _ = writeln!(out, "    proj{}.post_event();", plan.id);
        }
    }

    out.push_str("\n    // phase 9: structural plasticity\n");
    if config.structural_plasticity {
        for plan in &net.projections {
            if !plan.fragment(FragmentSlot::Creating).is_empty() {
                let _ = writeln!(out, "    proj{}.creating();", plan.id);
            }
            if !plan.fragment(FragmentSlot::Pruning).is_empty() {
                let _ = writeln!(out, "    proj{}.pruning();", plan.id);
            }
        }
    }

    out.push_str("\n    t++;\n}\n\nvoid run(int nb_steps) {\n    for (int step = 0; step < nb_steps; step++) {\n        single_step();\n    }\n}\n");
    out
}

/// The spike-gathering loop of one population: refractory neurons are
/// skipped, firing neurons are reset and time-stamped.
fn spike_gather(pop: usize, rule: &neurogen_ir::eval::SpikeRule, printer: &CppPrinter) -> String {
    let rctx = RenderCtx::default();
    let mut s = String::new();
    let _ = writeln!(s, "    pop{pop}.spiked.clear();");
    let _ = writeln!(s, "    for (int i = 0; i < pop{pop}.size; i++) {{");
    let _ = writeln!(
        s,
        "        if (pop{pop}.refractory_remaining[i] > 0.0)\n            continue;"
    );
    let _ = writeln!(s, "        if ({}) {{", printer.expr(&rule.predicate, &rctx));
    s.push_str(&printer.stmts(&rule.reset, &rctx, 3));
    let _ = writeln!(s, "            pop{pop}.spiked.push_back(i);");
    let _ = writeln!(s, "            pop{pop}.last_spike[i] = t;");
    if let Some(refractory) = &rule.refractory {
        let _ = writeln!(
            s,
            "            pop{pop}.refractory_remaining[i] = {};",
            printer.expr(refractory, &rctx)
        );
    }
    s.push_str("        }\n    }\n");
    s
}

fn reduction_text(pop: usize, var: &str, op: GlobalOp, real: &str) -> String {
    let key = op.key(var);
    let mut s = String::new();
    match op {
        GlobalOp::Min | GlobalOp::Max => {
            let cmp = if op == GlobalOp::Max { ">" } else { "<" };
            let _ = writeln!(s, "    pop{pop}.{key} = pop{pop}.{var}[0];");
            let _ = writeln!(
                s,
                "    for (int i = 1; i < pop{pop}.size; i++)\n        if (pop{pop}.{var}[i] {cmp} pop{pop}.{key})\n            pop{pop}.{key} = pop{pop}.{var}[i];"
            );
        }
        GlobalOp::Mean | GlobalOp::Sum => {
            let _ = writeln!(s, "    {{\n        {real} total = 0.0;");
            let _ = writeln!(
                s,
                "        for (int i = 0; i < pop{pop}.size; i++)\n            total += pop{pop}.{var}[i];"
            );
            if op == GlobalOp::Mean {
                let _ = writeln!(s, "        pop{pop}.{key} = total / pop{pop}.size;\n    }}");
            } else {
                let _ = writeln!(s, "        pop{pop}.{key} = total;\n    }}");
            }
        }
        GlobalOp::Norm1 => {
            let _ = writeln!(s, "    {{\n        {real} total = 0.0;");
            let _ = writeln!(
                s,
                "        for (int i = 0; i < pop{pop}.size; i++)\n            total += std::fabs(pop{pop}.{var}[i]);"
            );
            let _ = writeln!(s, "        pop{pop}.{key} = total;\n    }}");
        }
        GlobalOp::Norm2 => {
            let _ = writeln!(s, "    {{\n        {real} total = 0.0;");
            let _ = writeln!(
                s,
                "        for (int i = 0; i < pop{pop}.size; i++)\n            total += pop{pop}.{var}[i] * pop{pop}.{var}[i];"
            );
            let _ = writeln!(s, "        pop{pop}.{key} = std::sqrt(total);\n    }}");
        }
    }
    s
}

pub(crate) fn real_list(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| format!("{v:?}")).collect();
    format!("{{ {} }}", items.join(", "))
}

pub(crate) fn int_list(values: &[usize]) -> String {
    let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("{{ {} }}", items.join(", "))
}

fn real_matrix(rows: &[Vec<f64>], real: &str) -> String {
    let inner: Vec<String> = rows.iter().map(|r| real_list(r)).collect();
    format!(
        "std::vector<std::vector<{real}>>{{ {} }}",
        inner.join(", ")
    )
}

fn int_matrix(rows: &[Vec<usize>]) -> String {
    let inner: Vec<String> = rows.iter().map(|r| int_list(r)).collect();
    format!("std::vector<std::vector<int>>{{ {} }}", inner.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler;
    use neurogen_ir::ast::Expr;
    use neurogen_model::{
        Attribute, Connectivity, Equation, EquationKind, NeuronType, Specialization, SynapseType,
    };

    fn rate_network(delay: DelaySpec) -> NetworkBuildContext {
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
        let a = ctx.add_population("a", vec![3], neuron.clone()).unwrap();
        let b = ctx.add_population("b", vec![3], neuron).unwrap();
        ctx.add_projection(
            "ab",
            a,
            b,
            "exc",
            SynapseType::rate_default("d"),
            Connectivity::all_to_all(3, 3, 0.5).with_delay(delay),
            Specialization::Default,
        )
        .unwrap();
        ctx
    }

    fn files_for(ctx: &NetworkBuildContext, config: &GeneratorConfig) -> Vec<EmittedFile> {
        let net = assembler::compile(ctx, config).unwrap();
        render(ctx, &net, config).unwrap()
    }

    fn file<'a>(files: &'a [EmittedFile], name: &str) -> &'a str {
        &files
            .iter()
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("missing file {name}"))
            .contents
    }

    #[test]
    fn test_emitted_file_set() {
        let ctx = rate_network(DelaySpec::None);
        let files = files_for(&ctx, &GeneratorConfig::default());
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            ["network.h", "pop0.hpp", "pop1.hpp", "proj0.hpp", "simulation.cpp"]
        );
    }

    #[test]
    fn test_population_header_carries_init_values() {
        let ctx = rate_network(DelaySpec::None);
        let files = files_for(&ctx, &GeneratorConfig::default());
        let pop = file(&files, "pop1.hpp");
        assert!(pop.contains("std::vector<double> r;"));
        assert!(pop.contains("double tau;"));
        assert!(pop.contains("tau = 10.0;"));
        assert!(pop.contains("_sum_exc = std::vector<double>{ 0.0, 0.0, 0.0 };"));
        assert!(pop.contains("void set_single_r(int rk, double value)"));
    }

    #[test]
    fn test_step_order_in_simulation_source() {
        let ctx = rate_network(DelaySpec::None);
        let files = files_for(&ctx, &GeneratorConfig::default());
        let sim = file(&files, "simulation.cpp");
        let clear = sim.find("std::fill(pop0._sum_exc").unwrap();
        let psp = sim.find("proj0.compute_psp();").unwrap();
        let update = sim.find("pop1.r[i] =").unwrap();
        let tick = sim.find("t++;").unwrap();
        assert!(clear < psp && psp < update && update < tick);
    }

    #[test]
    fn test_uniform_delay_emits_ring_and_rotation() {
        let ctx = rate_network(DelaySpec::Uniform(4));
        let files = files_for(&ctx, &GeneratorConfig::default());
        let pop = file(&files, "pop0.hpp");
        assert!(pop.contains("std::deque<std::vector<double>> _delayed_r;"));
        assert!(pop.contains("_delayed_r.assign(4, r);"));
        let sim = file(&files, "simulation.cpp");
        assert!(sim.contains("pop0._delayed_r.push_front(pop0.r);"));
        let proj = file(&files, "proj0.hpp");
        assert!(proj.contains("_delayed_r[3][pre_rank[i][j]]"));
        assert!(proj.contains("int get_delay() { return delay; }"));
    }

    #[test]
    fn test_openmp_paradigm_adds_pragmas() {
        let mut config = GeneratorConfig::default();
        config.paradigm = Paradigm::OpenMp;
        config.num_threads = 8;
        let neuron = NeuronType {
            name: "Rate".into(),
            parameters: vec![],
            variables: vec![Attribute::variable(
                "r",
                Locality::Local,
                Equation {
                    kind: EquationKind::Assignment,
                    rhs: Expr::var("sum(exc)"),
                },
            )],
            spike: None,
        };
        let mut ctx = NetworkBuildContext::new(1.0);
        let a = ctx.add_population("a", vec![512], neuron.clone()).unwrap();
        let b = ctx.add_population("b", vec![512], neuron).unwrap();
        ctx.add_projection(
            "ab",
            a,
            b,
            "exc",
            SynapseType::rate_default("d"),
            Connectivity::all_to_all(512, 512, 0.1),
            Specialization::Default,
        )
        .unwrap();
        let files = files_for(&ctx, &config);
        assert!(file(&files, "network.h").contains("#include <omp.h>"));
        assert!(file(&files, "simulation.cpp").contains("#pragma omp parallel for"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let ctx = rate_network(DelaySpec::Uniform(3));
        let a = files_for(&ctx, &GeneratorConfig::default());
        let b = files_for(&ctx, &GeneratorConfig::default());
        for (fa, fb) in a.iter().zip(&b) {
            assert_eq!(fa.name, fb.name);
            assert_eq!(fa.contents, fb.contents);
        }
    }
}
