// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end rate-coded networks, run through the reference evaluator.

use neurogen::model::PspOperator;
use neurogen::prelude::*;

/// A population that emits a fixed rate (a local parameter, no dynamics).
fn source_neuron(rate: f64) -> NeuronType {
    NeuronType {
        name: "Source".into(),
        parameters: vec![Attribute::parameter("r", Locality::Local, rate)],
        variables: vec![],
        spike: None,
    }
}

/// `r = sum(exc)` every step.
fn relay_neuron() -> NeuronType {
    NeuronType {
        name: "Relay".into(),
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
    }
}

#[test]
fn test_rate_chain_propagates_one_stage_per_step() {
    let mut net = NetworkBuildContext::new(1.0);
    let a = net.add_population("a", vec![2], source_neuron(1.0)).unwrap();
    let b = net.add_population("b", vec![2], relay_neuron()).unwrap();
    let c = net.add_population("c", vec![2], relay_neuron()).unwrap();
    net.add_projection(
        "ab",
        a,
        b,
        "exc",
        SynapseType::rate_default("static"),
        Connectivity::all_to_all(2, 2, 0.5),
        Specialization::Default,
    )
    .unwrap();
    net.add_projection(
        "bc",
        b,
        c,
        "exc",
        SynapseType::rate_default("static"),
        Connectivity::all_to_all(2, 2, 0.5),
        Specialization::Default,
    )
    .unwrap();

    let compiled = compile(&net, &GeneratorConfig::default()).unwrap();
    let mut state = compiled.state;

    // The weighted sums of one step read the rates of the previous one,
    // so activity crosses one projection per step.
    state.run(&compiled.program, 1).unwrap();
    assert_eq!(state.pops[b].locals["r"], vec![1.0, 1.0]);
    assert_eq!(state.pops[c].locals["r"], vec![0.0, 0.0]);

    state.run(&compiled.program, 1).unwrap();
    assert_eq!(state.pops[c].locals["r"], vec![1.0, 1.0]);
}

#[test]
fn test_declared_bounds_clamp_after_every_write() {
    let clamped = NeuronType {
        name: "Clamped".into(),
        parameters: vec![],
        variables: vec![Attribute::variable(
            "r",
            Locality::Local,
            Equation {
                kind: EquationKind::Assignment,
                rhs: Expr::var("sum(exc)"),
            },
        )
        .with_bounds(Some(Expr::Real(0.0)), Some(Expr::Real(1.0)))],
        spike: None,
    };
    let mut net = NetworkBuildContext::new(1.0);
    let a = net.add_population("a", vec![2], source_neuron(2.0)).unwrap();
    let b = net.add_population("b", vec![1], clamped).unwrap();
    net.add_projection(
        "ab",
        a,
        b,
        "exc",
        SynapseType::rate_default("static"),
        Connectivity::all_to_all(2, 1, 1.0),
        Specialization::Default,
    )
    .unwrap();

    let compiled = compile(&net, &GeneratorConfig::default()).unwrap();
    let mut state = compiled.state;
    state.run(&compiled.program, 1).unwrap();

    // The raw sum is 4.0; the declared maximum wins.
    assert_eq!(state.pops[b].locals["r"], vec![1.0]);
}

#[test]
fn test_mean_operator_divides_by_row_size() {
    let mut synapse = SynapseType::rate_default("averaging");
    synapse.operation = PspOperator::Mean;

    let mut net = NetworkBuildContext::new(1.0);
    let a = net.add_population("a", vec![2], source_neuron(0.0)).unwrap();
    let b = net.add_population("b", vec![1], relay_neuron()).unwrap();
    net.add_projection(
        "ab",
        a,
        b,
        "exc",
        synapse,
        Connectivity::all_to_all(2, 1, 0.5),
        Specialization::Default,
    )
    .unwrap();

    let compiled = compile(&net, &GeneratorConfig::default()).unwrap();
    let mut state = compiled.state;
    state.pops[a].locals.get_mut("r").unwrap().copy_from_slice(&[1.0, 3.0]);
    state.run(&compiled.program, 1).unwrap();

    // (0.5 * 1.0 + 0.5 * 3.0) / 2 synapses
    assert_eq!(state.pops[b].locals["r"], vec![1.0]);
}

#[test]
fn test_population_reduction_feeds_global_variable() {
    let tracking = NeuronType {
        name: "Tracking".into(),
        parameters: vec![Attribute::parameter("r", Locality::Local, 0.0)],
        variables: vec![Attribute::variable(
            "m",
            Locality::Global,
            Equation {
                kind: EquationKind::Assignment,
                rhs: Expr::var("mean(r)"),
            },
        )],
        spike: None,
    };
    let mut net = NetworkBuildContext::new(1.0);
    let a = net.add_population("a", vec![2], tracking).unwrap();

    let compiled = compile(&net, &GeneratorConfig::default()).unwrap();
    let mut state = compiled.state;
    state.pops[a].locals.get_mut("r").unwrap().copy_from_slice(&[2.0, 4.0]);

    // Reductions run after the neural update, so `m` sees the value of
    // the previous step: zero after one step, the true mean after two.
    state.run(&compiled.program, 1).unwrap();
    assert_eq!(state.pops[a].globals["m"], 0.0);
    assert_eq!(state.pops[a].globals["_mean_r"], 3.0);

    state.run(&compiled.program, 1).unwrap();
    assert_eq!(state.pops[a].globals["m"], 3.0);
}

#[test]
fn test_uniform_delay_defers_the_read() {
    let mut net = NetworkBuildContext::new(1.0);
    let a = net.add_population("a", vec![1], source_neuron(0.0)).unwrap();
    let b = net.add_population("b", vec![1], relay_neuron()).unwrap();
    net.add_projection(
        "ab",
        a,
        b,
        "exc",
        SynapseType::rate_default("static"),
        Connectivity::all_to_all(1, 1, 1.0).with_delay(DelaySpec::Uniform(3)),
        Specialization::Default,
    )
    .unwrap();

    let compiled = compile(&net, &GeneratorConfig::default()).unwrap();
    let mut state = compiled.state;
    state.pops[a].locals.get_mut("r").unwrap()[0] = 1.0;

    // The ring buffer was prefilled with the initial rate (0.0); the
    // value written above only reaches the sum once it has aged 3 steps.
    state.run(&compiled.program, 3).unwrap();
    assert_eq!(state.pops[b].locals["r"], vec![0.0]);
    state.run(&compiled.program, 1).unwrap();
    assert_eq!(state.pops[b].locals["r"], vec![1.0]);
}
