// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! CUDA backend.
//!
//! Rate-coded networks only; the selector already rejects spiking synapse
//! types, non-uniform delays, custom psp expressions and structural
//! plasticity for this paradigm. Connectivity is uploaded flattened
//! (`rank_pre` plus per-row `nb_synapses`/`offsets`), each projection gets
//! its own stream, and psp kernels launch one thread per postsynaptic row.
//! Random draws stay on the host and are copied in each step; host-side
//! setters mark arrays dirty and `update_device()` uploads them before the
//! next step.

use std::fmt::Write as _;

use neurogen_config::GeneratorConfig;
use neurogen_ir::eval::{NetworkState, RandomDist};
use neurogen_ir::{CppPrinter, CudaPrinter, FragmentSlot, RenderCtx, Stmt};
use neurogen_model::{DelaySpec, NetworkBuildContext, Population, Projection};

use crate::assembler::GeneratedNetwork;
use crate::error::{GenResult, GenerationError};
use crate::population::PopulationPlan;

use super::cpu::{int_list, real_list};
use super::EmittedFile;

pub fn render(
    ctx: &NetworkBuildContext,
    net: &GeneratedNetwork,
    config: &GeneratorConfig,
) -> GenResult<Vec<EmittedFile>> {
    check_device_limits(ctx, net)?;
    let cpp = CppPrinter::new(config.precision.ctype(), false);
    let cuda = CudaPrinter::new(config.precision.ctype());

    let mut files = vec![EmittedFile {
        name: "network.h".into(),
        contents: network_header(config),
    }];
    for (pop, plan) in ctx.populations.iter().zip(&net.populations) {
        files.push(EmittedFile {
            name: format!("pop{}.hpp", pop.id),
            contents: population_header(pop, plan, &net.state, config),
        });
    }
    for proj in &ctx.projections {
        files.push(EmittedFile {
            name: format!("proj{}.hpp", proj.id),
            contents: projection_header(proj, &net.state, config),
        });
    }
    files.push(EmittedFile {
        name: "simulation.cu".into(),
        contents: simulation_source(ctx, net, config, &cpp, &cuda),
    });
    Ok(files)
}

/// Combinations the kernel translation cannot express; per-projection
/// forms were already rejected by the selector.
fn check_device_limits(ctx: &NetworkBuildContext, net: &GeneratedNetwork) -> GenResult<()> {
    for (pop, plan) in ctx.populations.iter().zip(&net.populations) {
        let object = format!("population '{}'", pop.name);
        if !plan.global_ops.is_empty() {
            return Err(GenerationError::unsupported(
                object,
                "global operations (min/max/mean/norm) cannot target the CUDA backend",
            ));
        }
        // A global variable updated from within the per-neuron kernel
        // would race across threads.
        if plan
            .update
            .iter()
            .any(|s| !matches!(s, Stmt::ForNeurons { .. } | Stmt::Comment(_)))
        {
            return Err(GenerationError::unsupported(
                object,
                "global-variable equations cannot target the CUDA backend",
            ));
        }
    }
    for (proj, plan) in ctx.projections.iter().zip(&net.projections) {
        if !plan.fragment(FragmentSlot::UpdateSynapse).is_empty() {
            return Err(GenerationError::unsupported(
                format!("projection '{}'", proj.name),
                "synaptic plasticity cannot target the CUDA backend",
            ));
        }
        if !plan.global_ops.is_empty() {
            return Err(GenerationError::unsupported(
                format!("projection '{}'", proj.name),
                "global operations (min/max/mean/norm) cannot target the CUDA backend",
            ));
        }
    }
    Ok(())
}

fn network_header(config: &GeneratorConfig) -> String {
    let real = config.precision.ctype();
    format!(
        "#pragma once\n\
         \n\
         #include <algorithm>\n\
         #include <cmath>\n\
         #include <cstdlib>\n\
         #include <deque>\n\
         #include <iostream>\n\
         #include <random>\n\
         #include <vector>\n\
         \n\
         #include <cuda_runtime_api.h>\n\
         \n\
         #define __threads_per_block__ 32\n\
         \n\
         extern long t;\n\
         extern double dt;\n\
         extern std::vector<std::mt19937> rng;\n\
         extern std::uniform_real_distribution<{real}> unif;\n"
    )
}

/// Per-neuron attribute names of the population, declaration order.
fn pop_locals(pop: &Population, plan: &PopulationPlan) -> Vec<String> {
    let mut out: Vec<String> = pop
        .neuron
        .parameters
        .iter()
        .chain(&pop.neuron.variables)
        .filter(|a| a.locality == neurogen_model::Locality::Local)
        .map(|a| a.name.clone())
        .collect();
    out.extend(plan.sum_targets.iter().cloned());
    out.extend(plan.implicit_conductances.iter().cloned());
    out
}

fn pop_globals(pop: &Population) -> Vec<String> {
    pop.neuron
        .parameters
        .iter()
        .chain(&pop.neuron.variables)
        .filter(|a| a.locality != neurogen_model::Locality::Local)
        .map(|a| a.name.clone())
        .collect()
}

fn population_header(
    pop: &Population,
    plan: &PopulationPlan,
    state: &NetworkState,
    config: &GeneratorConfig,
) -> String {
    let real = config.precision.ctype();
    let id = pop.id;
    let ps = &state.pops[id];
    let locals = pop_locals(pop, plan);
    let globals = pop_globals(pop);

    let mut out = String::new();
    let _ = write!(
        out,
        "#pragma once\n\n#include \"network.h\"\n\n// PopStruct{id}: {} ({} neurons, host mirror + device buffers)\nstruct PopStruct{id} {{\n    int size;\n    bool _active;\n\n",
        pop.name, pop.size
    );
    for name in &locals {
        let _ = writeln!(out, "    std::vector<{real}> {name};");
        let _ = writeln!(out, "    {real}* gpu_{name};");
        let _ = writeln!(out, "    bool {name}_dirty;");
    }
    for name in &globals {
        let _ = writeln!(out, "    {real} {name};");
    }
    for var in &plan.delayed_vars {
        let _ = writeln!(out, "    std::deque<{real}*> gpu_delayed_{var};");
    }
    for (name, _, dist) in &plan.randoms {
        match dist {
            RandomDist::Uniform { .. } => {
                let _ = writeln!(out, "    std::uniform_real_distribution<{real}> dist_{name};");
            }
            RandomDist::Normal { .. } => {
                let _ = writeln!(out, "    std::normal_distribution<{real}> dist_{name};");
            }
        }
    }

    let _ = write!(
        out,
        "\n    void init() {{\n        size = {};\n        _active = true;\n",
        pop.size
    );
    for name in &locals {
        let values = &ps.locals[name];
        let _ = writeln!(
            out,
            "        {name} = std::vector<{real}>{};",
            real_list(values)
        );
        let _ = writeln!(out, "        cudaMalloc((void**)&gpu_{name}, size * sizeof({real}));");
        let _ = writeln!(
            out,
            "        cudaMemcpy(gpu_{name}, {name}.data(), size * sizeof({real}), cudaMemcpyHostToDevice);"
        );
        let _ = writeln!(out, "        {name}_dirty = false;");
    }
    for name in &globals {
        let _ = writeln!(out, "        {name} = {:?};", ps.globals[name]);
    }
    for var in &plan.delayed_vars {
        let _ = write!(
            out,
            "        for (int d = 0; d < {depth}; d++) {{\n            {real}* slot;\n            cudaMalloc((void**)&slot, size * sizeof({real}));\n            cudaMemcpy(slot, {var}.data(), size * sizeof({real}), cudaMemcpyHostToDevice);\n            gpu_delayed_{var}.push_back(slot);\n        }}\n",
            depth = pop.max_delay
        );
    }
    for (name, _, dist) in &plan.randoms {
        match dist {
            RandomDist::Uniform { min, max } => {
                let _ = writeln!(
                    out,
                    "        dist_{name} = std::uniform_real_distribution<{real}>({min:?}, {max:?});"
                );
            }
            RandomDist::Normal { mean, sd } => {
                let _ = writeln!(
                    out,
                    "        dist_{name} = std::normal_distribution<{real}>({mean:?}, {sd:?});"
                );
            }
        }
    }
    out.push_str("    }\n");

    // Dirty host arrays are uploaded once per step, before the kernels.
    out.push_str("\n    void update_device() {\n");
    for name in &locals {
        let _ = write!(
            out,
            "        if ({name}_dirty) {{\n            cudaMemcpy(gpu_{name}, {name}.data(), size * sizeof({real}), cudaMemcpyHostToDevice);\n            {name}_dirty = false;\n        }}\n"
        );
    }
    out.push_str("    }\n");

    // Accessors: getters read back from the device, setters mark dirty.
    out.push_str("\n    // accessors\n");
    for name in &locals {
        let _ = write!(
            out,
            "    std::vector<{real}> get_{name}() {{\n        cudaMemcpy({name}.data(), gpu_{name}, size * sizeof({real}), cudaMemcpyDeviceToHost);\n        return {name};\n    }}\n\
             \x20   void set_{name}(std::vector<{real}> value) {{ {name} = value; {name}_dirty = true; }}\n"
        );
    }
    for name in &globals {
        let _ = write!(
            out,
            "    {real} get_{name}() {{ return {name}; }}\n\
             \x20   void set_{name}({real} value) {{ {name} = value; }}\n"
        );
    }

    out.push_str("\n    size_t size_in_bytes() {\n        size_t bytes = 0;\n");
    for name in &locals {
        let _ = writeln!(
            out,
            "        bytes += 2 * sizeof({real}) * {name}.capacity();"
        );
    }
    out.push_str("        return bytes;\n    }\n\n    void clear() {\n");
    for name in &locals {
        let _ = write!(
            out,
            "        cudaFree(gpu_{name});\n        {name}.clear();\n        {name}.shrink_to_fit();\n"
        );
    }
    for var in &plan.delayed_vars {
        let _ = write!(
            out,
            "        for (auto slot : gpu_delayed_{var})\n            cudaFree(slot);\n        gpu_delayed_{var}.clear();\n"
        );
    }
    out.push_str("    }\n};\n\n");
    let _ = writeln!(out, "extern PopStruct{id} pop{id};");
    out
}

fn projection_header(proj: &Projection, state: &NetworkState, config: &GeneratorConfig) -> String {
    let real = config.precision.ctype();
    let id = proj.id;
    let st = &state.projs[id];

    // Flattened connectivity: row-major concatenation of the rank lists.
    let mut rank_pre = Vec::new();
    let mut nb_synapses = Vec::new();
    let mut offsets = Vec::new();
    let mut w_flat = Vec::new();
    for (row, ranks) in st.pre_ranks.iter().enumerate() {
        offsets.push(rank_pre.len());
        nb_synapses.push(ranks.len());
        rank_pre.extend(ranks.iter().copied());
        w_flat.extend(st.w[row].iter().copied());
    }

    let mut out = String::new();
    let _ = write!(
        out,
        "#pragma once\n\n#include \"network.h\"\n#include \"pop{}.hpp\"\n#include \"pop{}.hpp\"\n\n// ProjStruct{id}: {} (pop{} -> pop{}, target {}, flattened device copy)\nstruct ProjStruct{id} {{\n",
        proj.pre, proj.post, proj.name, proj.pre, proj.post, proj.target
    );
    out.push_str(
        "    std::vector<int> post_rank;\n    std::vector<int> rank_pre;\n    std::vector<int> nb_synapses;\n    std::vector<int> off_synapses;\n",
    );
    let _ = writeln!(out, "    std::vector<{real}> w;");
    out.push_str(
        "\n    int* gpu_pre_rank;\n    int* gpu_nb_synapses;\n    int* gpu_off_synapses;\n",
    );
    let _ = writeln!(out, "    {real}* gpu_w;");
    out.push_str("    cudaStream_t stream;\n\n    // gates\n    bool _transmission;\n    bool _update;\n    bool _plasticity;\n");

    out.push_str("\n    void init() {\n");
    let _ = writeln!(out, "        post_rank = std::vector<int>{};", int_list(&st.post_ranks));
    let _ = writeln!(out, "        rank_pre = std::vector<int>{};", int_list(&rank_pre));
    let _ = writeln!(out, "        nb_synapses = std::vector<int>{};", int_list(&nb_synapses));
    let _ = writeln!(out, "        off_synapses = std::vector<int>{};", int_list(&offsets));
    let _ = writeln!(out, "        w = std::vector<{real}>{};", real_list(&w_flat));
    out.push_str("        _transmission = true;\n        _update = true;\n        _plasticity = true;\n");
    out.push_str(
        "        cudaStreamCreate(&stream);\n        cudaMalloc((void**)&gpu_pre_rank, rank_pre.size() * sizeof(int));\n        cudaMemcpy(gpu_pre_rank, rank_pre.data(), rank_pre.size() * sizeof(int), cudaMemcpyHostToDevice);\n        cudaMalloc((void**)&gpu_nb_synapses, nb_synapses.size() * sizeof(int));\n        cudaMemcpy(gpu_nb_synapses, nb_synapses.data(), nb_synapses.size() * sizeof(int), cudaMemcpyHostToDevice);\n        cudaMalloc((void**)&gpu_off_synapses, off_synapses.size() * sizeof(int));\n        cudaMemcpy(gpu_off_synapses, off_synapses.data(), off_synapses.size() * sizeof(int), cudaMemcpyHostToDevice);\n",
    );
    let _ = write!(
        out,
        "        cudaMalloc((void**)&gpu_w, w.size() * sizeof({real}));\n        cudaMemcpy(gpu_w, w.data(), w.size() * sizeof({real}), cudaMemcpyHostToDevice);\n    }}\n"
    );

    // Accessors read back the flattened weights.
    let _ = write!(
        out,
        "\n    // accessors\n    std::vector<{real}> get_w() {{\n        cudaMemcpy(w.data(), gpu_w, w.size() * sizeof({real}), cudaMemcpyDeviceToHost);\n        return w;\n    }}\n\
         \x20   void set_w(std::vector<{real}> value) {{\n        w = value;\n        cudaMemcpy(gpu_w, w.data(), w.size() * sizeof({real}), cudaMemcpyHostToDevice);\n    }}\n"
    );
    let _ = write!(
        out,
        "\n    size_t size_in_bytes() {{\n        return sizeof(int) * (rank_pre.capacity() + nb_synapses.capacity() + off_synapses.capacity()) + 2 * sizeof({real}) * w.capacity();\n    }}\n\n    void clear() {{\n        cudaFree(gpu_pre_rank);\n        cudaFree(gpu_nb_synapses);\n        cudaFree(gpu_off_synapses);\n        cudaFree(gpu_w);\n        cudaStreamDestroy(stream);\n    }}\n}};\n\n"
    );
    let _ = writeln!(out, "extern ProjStruct{id} proj{id};");
    out
}

/// Kernel parameter list of a population's step kernel: every local as a
/// device pointer, every global by value.
fn step_kernel_params(pop: &Population, plan: &PopulationPlan, real: &str) -> String {
    let mut params = vec!["int size".to_string(), "long t".to_string(), "double dt".to_string()];
    for name in pop_locals(pop, plan) {
        params.push(format!("{real}* {name}"));
    }
    for name in pop_globals(pop) {
        params.push(format!("{real} {name}"));
    }
    params.join(", ")
}

fn step_kernel_args(pop: &Population, plan: &PopulationPlan) -> String {
    let id = pop.id;
    let mut args = vec![format!("pop{id}.size"), "t".to_string(), "dt".to_string()];
    for name in pop_locals(pop, plan) {
        args.push(format!("pop{id}.gpu_{name}"));
    }
    for name in pop_globals(pop) {
        args.push(format!("pop{id}.{name}"));
    }
    args.join(", ")
}

fn simulation_source(
    ctx: &NetworkBuildContext,
    net: &GeneratedNetwork,
    config: &GeneratorConfig,
    cpp: &CppPrinter,
    cuda: &CudaPrinter,
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
    out.push('\n');

    // Kernels: psp per projection, step per population.
    for proj in &ctx.projections {
        out.push_str(&cuda.psp_kernel_body(proj.pre, proj.post, &proj.target));
        out.push('\n');
    }
    for (pop, plan) in ctx.populations.iter().zip(&net.populations) {
        if let Some(kernel) = step_kernel(pop, plan, config, cpp) {
            out.push_str(&kernel);
            out.push('\n');
        }
    }

    let _ = write!(
        out,
        "void initialize() {{\n    t = 0;\n    rng.clear();\n    rng.push_back(std::mt19937({}));\n",
        config.seed
    );
    for pop in &ctx.populations {
        let _ = writeln!(out, "    pop{}.init();", pop.id);
    }
    for proj in &ctx.projections {
        let _ = writeln!(out, "    proj{}.init();", proj.id);
    }
    out.push_str("    cudaDeviceSynchronize();\n}\n\nvoid single_step() {\n");

    out.push_str("    // phase 0: upload host-side writes\n");
    for pop in &ctx.populations {
        let _ = writeln!(out, "    pop{}.update_device();", pop.id);
    }

    out.push_str("\n    // phase 1: reset the rate accumulators\n");
    for plan in &net.populations {
        for target in &plan.sum_targets {
            let _ = writeln!(
                out,
                "    cudaMemset(pop{0}.gpu_{target}, 0, pop{0}.size * sizeof({real}));",
                plan.id
            );
        }
    }

    out.push_str("\n    // phase 2: weighted sums\n");
    for proj in &ctx.projections {
        let delay = match &proj.connectivity.delay {
            DelaySpec::Uniform(d) if *d > 1 => Some(*d),
            _ => None,
        };
        out.push_str(&cuda.psp_kernel_call(proj.id, proj.pre, proj.post, &proj.target, delay));
    }
    out.push_str("    cudaDeviceSynchronize();\n");

    out.push_str("\n    // phase 3: random draws (host) and upload\n");
    for (pop, plan) in ctx.populations.iter().zip(&net.populations) {
        for (name, is_local, _) in &plan.randoms {
            let id = pop.id;
            if *is_local {
                let _ = write!(
                    out,
                    "    for (int i = 0; i < pop{id}.size; i++)\n        pop{id}.{name}[i] = pop{id}.dist_{name}(rng[0]);\n    cudaMemcpy(pop{id}.gpu_{name}, pop{id}.{name}.data(), pop{id}.size * sizeof({real}), cudaMemcpyHostToDevice);\n"
                );
            } else {
                let _ = writeln!(out, "    pop{id}.{name} = pop{id}.dist_{name}(rng[0]);");
            }
        }
    }

    out.push_str("\n    // phase 4: neuron updates\n");
    for (pop, plan) in ctx.populations.iter().zip(&net.populations) {
        if plan.update.is_empty() {
            continue;
        }
        let id = pop.id;
        let _ = write!(
            out,
            "    if (pop{id}._active) {{\n        int nb_blocks = ceil(double(pop{id}.size) / double(__threads_per_block__));\n        cuPop{id}_step<<< nb_blocks, __threads_per_block__ >>>( {} );\n    }}\n",
            step_kernel_args(pop, plan)
        );
    }
    out.push_str("    cudaDeviceSynchronize();\n");

    out.push_str("\n    // phase 5: delayed outputs\n");
    for (pop, plan) in ctx.populations.iter().zip(&net.populations) {
        for var in &plan.delayed_vars {
            let id = pop.id;
            let _ = write!(
                out,
                "    {{\n        {real}* oldest = pop{id}.gpu_delayed_{var}.back();\n        pop{id}.gpu_delayed_{var}.pop_back();\n        cudaMemcpy(oldest, pop{id}.gpu_{var}, pop{id}.size * sizeof({real}), cudaMemcpyDeviceToDevice);\n        pop{id}.gpu_delayed_{var}.push_front(oldest);\n    }}\n"
            );
        }
    }

    out.push_str("\n    t++;\n}\n\nvoid run(int nb_steps) {\n    for (int step = 0; step < nb_steps; step++) {\n        single_step();\n    }\n}\n");
    out
}

/// Per-population step kernel: the body of the per-neuron update loop,
/// one thread per neuron.
fn step_kernel(
    pop: &Population,
    plan: &PopulationPlan,
    config: &GeneratorConfig,
    cpp: &CppPrinter,
) -> Option<String> {
    let body: &[Stmt] = plan.update.iter().find_map(|s| match s {
        Stmt::ForNeurons { body, .. } => Some(body.as_slice()),
        _ => None,
    })?;
    let rctx = RenderCtx::for_pop(pop.id);
    let id = pop.id;
    let mut s = format!(
        "// Updates the neural variables of pop{id} ({})\n__global__ void cuPop{id}_step( {} )\n{{\n    int i = threadIdx.x + blockIdx.x * blockDim.x;\n    if (i < size) {{\n",
        pop.name,
        step_kernel_params(pop, plan, config.precision.ctype())
    );
    s.push_str(&cpp.stmts(body, &rctx, 2));
    s.push_str("    }\n}\n");
    Some(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler;
    use neurogen_config::Paradigm;
    use neurogen_ir::ast::Expr;
    use neurogen_model::{
        Attribute, Connectivity, Equation, EquationKind, Locality, NeuronType, Specialization,
        SynapseType,
    };

    fn cuda_config() -> GeneratorConfig {
        let mut config = GeneratorConfig::default();
        config.paradigm = Paradigm::Cuda;
        config
    }

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
        let a = ctx.add_population("a", vec![4], neuron.clone()).unwrap();
        let b = ctx.add_population("b", vec![4], neuron).unwrap();
        ctx.add_projection(
            "ab",
            a,
            b,
            "exc",
            SynapseType::rate_default("d"),
            Connectivity::all_to_all(4, 4, 0.5).with_delay(delay),
            Specialization::Default,
        )
        .unwrap();
        ctx
    }

    #[test]
    fn test_kernels_and_launches_are_paired() {
        let ctx = rate_network(DelaySpec::None);
        let config = cuda_config();
        let net = assembler::compile(&ctx, &config).unwrap();
        let files = render(&ctx, &net, &config).unwrap();
        let sim = &files.last().unwrap().contents;
        assert_eq!(files.last().unwrap().name, "simulation.cu");
        assert!(sim.contains("__global__ void cuPop0_Pop1_exc_psp"));
        assert!(sim.contains("__global__ void cuPop1_step"));
        assert!(sim.contains("cuPop1_step<<< nb_blocks, __threads_per_block__ >>>"));
        assert!(sim.contains("proj0.stream"));
    }

    #[test]
    fn test_uniform_delay_launches_against_ring_slot() {
        let ctx = rate_network(DelaySpec::Uniform(3));
        let config = cuda_config();
        let net = assembler::compile(&ctx, &config).unwrap();
        let files = render(&ctx, &net, &config).unwrap();
        let sim = &files.last().unwrap().contents;
        assert!(sim.contains("pop0.gpu_delayed_r[2]"));
        let pop = &files[1].contents;
        assert!(pop.contains("std::deque<double*> gpu_delayed_r;"));
    }

    #[test]
    fn test_flattened_connectivity_upload() {
        let ctx = rate_network(DelaySpec::None);
        let config = cuda_config();
        let net = assembler::compile(&ctx, &config).unwrap();
        let files = render(&ctx, &net, &config).unwrap();
        let proj = &files[3].contents;
        assert!(proj.contains("nb_synapses = std::vector<int>{ 4, 4, 4, 4 };"));
        assert!(proj.contains("off_synapses = std::vector<int>{ 0, 4, 8, 12 };"));
        assert!(proj.contains("cudaMalloc((void**)&gpu_w, w.size() * sizeof(double));"));
    }

    #[test]
    fn test_plastic_synapses_are_rejected() {
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
        let mut synapse = SynapseType::rate_default("hebb");
        synapse.variables.push(Attribute::variable(
            "w",
            Locality::Local,
            Equation {
                kind: EquationKind::Derivative,
                rhs: Expr::var("pre.r").mul(Expr::var("post.r")),
            },
        ));
        let mut ctx = NetworkBuildContext::new(1.0);
        let a = ctx.add_population("a", vec![2], neuron.clone()).unwrap();
        let b = ctx.add_population("b", vec![2], neuron).unwrap();
        ctx.add_projection(
            "ab",
            a,
            b,
            "exc",
            synapse,
            Connectivity::all_to_all(2, 2, 0.5),
            Specialization::Default,
        )
        .unwrap();
        let config = cuda_config();
        let err = assembler::compile(&ctx, &config)
            .and_then(|net| render(&ctx, &net, &config).map(|_| ()))
            .unwrap_err();
        assert!(err.to_string().contains("CUDA"));
    }
}
