// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Source emission: file set, determinism, delay redirection across
//! fragments, and state snapshots.

use neurogen::codegen::{backend, compile, load_state, save_state};
use neurogen::prelude::*;

fn relay_neuron() -> NeuronType {
    NeuronType {
        name: "Relay".into(),
        parameters: vec![Attribute::parameter("tau", Locality::Global, 10.0)],
        variables: vec![Attribute::variable(
            "r",
            Locality::Local,
            Equation {
                kind: EquationKind::Derivative,
                rhs: Expr::var("sum(exc)")
                    .sub(Expr::var("r"))
                    .div(Expr::var("tau")),
            },
        )],
        spike: None,
    }
}

/// A rate synapse whose update also reads the presynaptic rate, so both
/// the psp and the synaptic update contain delayable reads.
fn tracing_synapse() -> SynapseType {
    let mut synapse = SynapseType::rate_default("tracing");
    synapse.variables.push(Attribute::variable(
        "trace",
        Locality::Local,
        Equation {
            kind: EquationKind::Derivative,
            rhs: Expr::var("pre.r").sub(Expr::var("trace")),
        },
    ));
    synapse
}

fn delayed_net() -> NetworkBuildContext {
    let mut net = NetworkBuildContext::new(1.0);
    let a = net.add_population("a", vec![4], relay_neuron()).unwrap();
    let b = net.add_population("b", vec![4], relay_neuron()).unwrap();
    net.add_projection(
        "ab",
        a,
        b,
        "exc",
        tracing_synapse(),
        Connectivity::all_to_all(4, 4, 0.5).with_delay(DelaySpec::Uniform(4)),
        Specialization::Default,
    )
    .unwrap();
    net
}

#[test]
fn test_emit_writes_the_file_set_in_order() {
    let net = delayed_net();
    let dir = tempfile::tempdir().unwrap();
    let mut config = GeneratorConfig::default();
    config.emit_dir = dir.path().join("generate").display().to_string();

    let compiled = compile(&net, &config).unwrap();
    let written = backend::emit(&net, &compiled, &config).unwrap();

    let names: Vec<String> = written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        ["network.h", "pop0.hpp", "pop1.hpp", "proj0.hpp", "simulation.cpp"]
    );
    for path in &written {
        assert!(std::fs::read_to_string(path).unwrap().len() > 0);
    }
}

#[test]
fn test_delay_redirection_covers_psp_and_update() {
    let net = delayed_net();
    let config = GeneratorConfig::default();
    let compiled = compile(&net, &config).unwrap();
    let files = backend::render(&net, &compiled, &config).unwrap();
    let proj = &files
        .iter()
        .find(|f| f.name == "proj0.hpp")
        .unwrap()
        .contents;

    // Both the weighted sum and the trace update read the rate through
    // the same ring-buffer slot.
    assert!(proj.contains("void compute_psp()"));
    assert!(proj.contains("void update_synapse()"));
    assert_eq!(proj.matches("pop0._delayed_r[3]").count(), 2);
    assert!(!proj.contains("pop0.r[pre_rank"));
}

#[test]
fn test_rendering_is_byte_stable() {
    let net = delayed_net();
    let config = GeneratorConfig::default();
    let first = backend::render(&net, &compile(&net, &config).unwrap(), &config).unwrap();
    let second = backend::render(&net, &compile(&net, &config).unwrap(), &config).unwrap();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.contents, b.contents);
    }
}

#[test]
fn test_state_snapshot_restores_the_run() {
    let net = delayed_net();
    let config = GeneratorConfig::default();
    let compiled = compile(&net, &config).unwrap();
    let mut state = compiled.state;
    state.pops[0].locals.get_mut("r").unwrap().fill(1.0);

    state.run(&compiled.program, 3).unwrap();
    let snapshot_r = state.pops[1].locals["r"].clone();
    let snapshot_trace = state.projs[0].locals["trace"].clone();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    save_state(&state, &path).unwrap();

    state.run(&compiled.program, 4).unwrap();
    assert_ne!(state.pops[1].locals["r"], snapshot_r);

    load_state(&mut state, &path).unwrap();
    assert_eq!(state.pops[1].locals["r"], snapshot_r);
    assert_eq!(state.projs[0].locals["trace"], snapshot_trace);
}
