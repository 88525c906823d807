// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Synapse creation and pruning, plus the static checks that guard them.

use neurogen::model::{Connectivity, CreatingRule, PruningRule};
use neurogen::prelude::*;

fn source_neuron() -> NeuronType {
    NeuronType {
        name: "Source".into(),
        parameters: vec![Attribute::parameter("r", Locality::Local, 1.0)],
        variables: vec![],
        spike: None,
    }
}

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

fn structural_config() -> GeneratorConfig {
    let mut config = GeneratorConfig::default();
    config.structural_plasticity = true;
    config
}

#[test]
fn test_pruning_removes_condemned_synapses() {
    let mut synapse = SynapseType::rate_default("pruned");
    synapse.pruning = Some(PruningRule {
        condition: Expr::var("w").lt(Expr::Real(0.1)),
        probability: None,
        period_ms: 1.0,
        offset_ms: 0.0,
    });

    let mut net = NetworkBuildContext::new(1.0);
    let a = net.add_population("a", vec![2], source_neuron()).unwrap();
    let b = net.add_population("b", vec![1], relay_neuron()).unwrap();
    let p = net
        .add_projection(
            "ab",
            a,
            b,
            "exc",
            synapse,
            Connectivity {
                post_ranks: vec![0],
                pre_ranks: vec![vec![0, 1]],
                w: vec![vec![0.05, 0.5]],
                delay: DelaySpec::None,
            },
            Specialization::Default,
        )
        .unwrap();

    let compiled = compile(&net, &structural_config()).unwrap();
    let mut state = compiled.state;
    state.run(&compiled.program, 1).unwrap();

    // Only the weak synapse goes.
    assert_eq!(state.projs[p].pre_ranks, vec![vec![1]]);
    assert_eq!(state.projs[p].w, vec![vec![0.5]]);
}

#[test]
fn test_creating_fills_eligible_pairs_once() {
    let mut synapse = SynapseType::rate_default("growing");
    synapse.creating = Some(CreatingRule {
        condition: Expr::Bool(true),
        probability: None,
        weight: 1.0,
        delay_ms: None,
        period_ms: 1.0,
        offset_ms: 0.0,
    });

    let mut net = NetworkBuildContext::new(1.0);
    let a = net.add_population("a", vec![2], source_neuron()).unwrap();
    let b = net.add_population("b", vec![1], relay_neuron()).unwrap();
    let p = net
        .add_projection(
            "ab",
            a,
            b,
            "exc",
            synapse,
            Connectivity {
                post_ranks: vec![0],
                pre_ranks: vec![vec![0]],
                w: vec![vec![0.5]],
                delay: DelaySpec::None,
            },
            Specialization::Default,
        )
        .unwrap();

    let compiled = compile(&net, &structural_config()).unwrap();
    let mut state = compiled.state;
    state.run(&compiled.program, 1).unwrap();

    // Rank 1 is connected with the rule weight; rank 0 is untouched.
    assert_eq!(state.projs[p].pre_ranks, vec![vec![0, 1]]);
    assert_eq!(state.projs[p].w, vec![vec![0.5, 1.0]]);

    state.run(&compiled.program, 1).unwrap();
    assert_eq!(state.projs[p].pre_ranks, vec![vec![0, 1]]);
}

#[test]
fn test_structural_rules_require_the_config_flag() {
    let mut synapse = SynapseType::rate_default("pruned");
    synapse.pruning = Some(PruningRule {
        condition: Expr::var("w").lt(Expr::Real(0.1)),
        probability: None,
        period_ms: 1.0,
        offset_ms: 0.0,
    });
    let mut net = NetworkBuildContext::new(1.0);
    let a = net.add_population("a", vec![2], source_neuron()).unwrap();
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

    let err = compile(&net, &GeneratorConfig::default()).unwrap_err();
    assert!(err.to_string().contains("structural plasticity is disabled"));
}

#[test]
fn test_creation_delay_must_match_a_uniform_delay() {
    let mut synapse = SynapseType::rate_default("growing");
    synapse.creating = Some(CreatingRule {
        condition: Expr::Bool(true),
        probability: None,
        weight: 1.0,
        delay_ms: Some(5.0),
        period_ms: 1.0,
        offset_ms: 0.0,
    });
    let mut net = NetworkBuildContext::new(1.0);
    let a = net.add_population("a", vec![2], source_neuron()).unwrap();
    let b = net.add_population("b", vec![1], relay_neuron()).unwrap();
    net.add_projection(
        "ab",
        a,
        b,
        "exc",
        synapse,
        Connectivity::all_to_all(2, 1, 0.5).with_delay(DelaySpec::Uniform(2)),
        Specialization::Default,
    )
    .unwrap();

    assert!(compile(&net, &structural_config()).is_err());
}
