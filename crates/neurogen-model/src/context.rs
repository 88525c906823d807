// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! The build context owning one network description.
//!
//! All populations and projections of a compile cycle live here, passed
//! explicitly through the generation call chain. Adding a projection
//! validates its shape and registers its demands (ring-buffer depth,
//! delayed variables, target accumulators) on the populations it
//! touches.

use std::collections::BTreeSet;

use tracing::debug;

use crate::descriptor::{NeuronType, SynapseKind, SynapseType};
use crate::error::{ModelError, ModelResult};
use crate::population::Population;
use crate::projection::{Connectivity, DelaySpec, Projection, Specialization};

#[derive(Debug, Clone)]
pub struct NetworkBuildContext {
    /// Integration step in ms; used to convert declared delays.
    pub dt: f64,
    pub populations: Vec<Population>,
    pub projections: Vec<Projection>,
}

impl NetworkBuildContext {
    pub fn new(dt: f64) -> Self {
        Self {
            dt,
            populations: Vec::new(),
            projections: Vec::new(),
        }
    }

    /// Convert a delay in ms to integration steps, minimum 1.
    pub fn delay_steps(&self, ms: f64) -> usize {
        ((ms / self.dt).round() as usize).max(1)
    }

    pub fn population(&self, id: usize) -> ModelResult<&Population> {
        self.populations
            .get(id)
            .ok_or(ModelError::UnknownPopulation { id })
    }

    pub fn projection(&self, id: usize) -> ModelResult<&Projection> {
        self.projections
            .get(id)
            .ok_or(ModelError::UnknownProjection { id })
    }

    pub fn add_population(
        &mut self,
        name: impl Into<String>,
        geometry: Vec<usize>,
        neuron: NeuronType,
    ) -> ModelResult<usize> {
        let name = name.into();
        let size: usize = geometry.iter().product();
        if geometry.is_empty() || size == 0 {
            return Err(ModelError::EmptyGeometry { name });
        }
        if self.populations.iter().any(|p| p.name == name) {
            return Err(ModelError::DuplicateName { name });
        }
        let id = self.populations.len();
        debug!(id, %name, size, neuron = %neuron.name, "adding population");
        self.populations.push(Population {
            id,
            name,
            geometry,
            size,
            neuron,
            max_delay: 1,
            delayed_variables: BTreeSet::new(),
            delayed_spikes: false,
            targets: BTreeSet::new(),
        });
        Ok(id)
    }

    pub fn add_projection(
        &mut self,
        name: impl Into<String>,
        pre: usize,
        post: usize,
        target: impl Into<String>,
        synapse: SynapseType,
        connectivity: Connectivity,
        specialization: Specialization,
    ) -> ModelResult<usize> {
        let name = name.into();
        let target = target.into();
        if self.projections.iter().any(|p| p.name == name) {
            return Err(ModelError::DuplicateName { name });
        }
        if target.is_empty() {
            return Err(ModelError::EmptyTarget { name });
        }
        let pre_size = self.population(pre)?.size;
        let post_size = self.population(post)?.size;
        validate_shape(&name, &connectivity, pre_size, post_size)?;
        if synapse.kind == SynapseKind::Spike && !self.populations[pre].is_spiking() {
            return Err(ModelError::KindMismatch {
                name,
                synapse: synapse.name.clone(),
                pre: self.populations[pre].name.clone(),
            });
        }
        match &specialization {
            Specialization::Transpose { forward: source }
            | Specialization::Copy { source } => {
                if *source >= self.projections.len() {
                    return Err(ModelError::BadSpecializationSource {
                        name,
                        source_id: *source,
                    });
                }
            }
            _ => {}
        }

        let id = self.projections.len();
        debug!(
            id,
            %name,
            pre,
            post,
            %target,
            synapses = connectivity.nb_synapses(),
            "adding projection"
        );
        self.register_demands(pre, post, &target, &synapse, &connectivity.delay);
        self.projections.push(Projection {
            id,
            name,
            pre,
            post,
            target,
            synapse,
            connectivity,
            specialization,
        });
        Ok(id)
    }

    /// Record what this projection needs from its populations.
    fn register_demands(
        &mut self,
        pre: usize,
        post: usize,
        target: &str,
        synapse: &SynapseType,
        delay: &DelaySpec,
    ) {
        self.populations[post].targets.insert(target.to_string());
        if *delay == DelaySpec::None {
            return;
        }
        let depth = delay.max_steps();
        let pre_pop = &mut self.populations[pre];
        pre_pop.max_delay = pre_pop.max_delay.max(depth);
        match synapse.kind {
            SynapseKind::Rate => {
                pre_pop.delayed_variables.extend(synapse.pre_reads());
            }
            SynapseKind::Spike => {
                // Uniform delay reads past spike lists; non-uniform
                // delay is served by the projection's own pending ring.
                if !delay.is_nonuniform() {
                    pre_pop.delayed_spikes = true;
                }
                pre_pop.delayed_variables.extend(synapse.pre_reads());
            }
        }
    }
}

fn validate_shape(
    name: &str,
    c: &Connectivity,
    pre_size: usize,
    post_size: usize,
) -> ModelResult<()> {
    if !strictly_ascending(&c.post_ranks) {
        return Err(ModelError::UnsortedRanks {
            name: name.into(),
            what: "post_ranks".into(),
        });
    }
    for &rk in &c.post_ranks {
        if rk >= post_size {
            return Err(ModelError::RankOutOfRange {
                name: name.into(),
                rank: rk,
                size: post_size,
            });
        }
    }
    if c.pre_ranks.len() != c.post_ranks.len() {
        return Err(ModelError::ShapeMismatch {
            name: name.into(),
            what: "pre_ranks".into(),
        });
    }
    for row in &c.pre_ranks {
        if !strictly_ascending(row) {
            return Err(ModelError::UnsortedRanks {
                name: name.into(),
                what: "pre_ranks".into(),
            });
        }
        for &rk in row {
            if rk >= pre_size {
                return Err(ModelError::RankOutOfRange {
                    name: name.into(),
                    rank: rk,
                    size: pre_size,
                });
            }
        }
    }
    let same_shape =
        |rows: &[Vec<f64>]| rows.len() == c.pre_ranks.len()
            && rows.iter().zip(&c.pre_ranks).all(|(a, b)| a.len() == b.len());
    if !same_shape(&c.w) {
        return Err(ModelError::ShapeMismatch {
            name: name.into(),
            what: "w".into(),
        });
    }
    if let DelaySpec::NonUniform(rows) = &c.delay {
        let ok = rows.len() == c.pre_ranks.len()
            && rows.iter().zip(&c.pre_ranks).all(|(a, b)| a.len() == b.len());
        if !ok {
            return Err(ModelError::ShapeMismatch {
                name: name.into(),
                what: "delay".into(),
            });
        }
    }
    Ok(())
}

fn strictly_ascending(ranks: &[usize]) -> bool {
    ranks.windows(2).all(|w| w[0] < w[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Attribute, Equation, EquationKind, Locality, SpikeSpec};
    use neurogen_ir::ast::Expr;

    fn rate_neuron() -> NeuronType {
        NeuronType {
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
                reset: vec![],
                refractory: None,
            }),
        }
    }

    #[test]
    fn test_delay_conversion() {
        let ctx = NetworkBuildContext::new(0.5);
        assert_eq!(ctx.delay_steps(2.0), 4);
        assert_eq!(ctx.delay_steps(0.1), 1);
    }

    #[test]
    fn test_projection_registers_demands() {
        let mut ctx = NetworkBuildContext::new(1.0);
        let a = ctx.add_population("a", vec![4], rate_neuron()).unwrap();
        let b = ctx.add_population("b", vec![2], rate_neuron()).unwrap();
        ctx.add_projection(
            "a_to_b",
            a,
            b,
            "exc",
            SynapseType::rate_default("default"),
            Connectivity::all_to_all(4, 2, 1.0).with_delay(DelaySpec::Uniform(3)),
            Specialization::Default,
        )
        .unwrap();
        assert_eq!(ctx.populations[a].max_delay, 3);
        assert!(ctx.populations[a].delayed_variables.contains("r"));
        assert!(ctx.populations[b].targets.contains("exc"));
    }

    #[test]
    fn test_spiking_synapse_requires_spiking_pre() {
        let mut ctx = NetworkBuildContext::new(1.0);
        let a = ctx.add_population("a", vec![4], rate_neuron()).unwrap();
        let b = ctx.add_population("b", vec![2], spiking_neuron()).unwrap();
        let err = ctx
            .add_projection(
                "bad",
                a,
                b,
                "exc",
                SynapseType::spike_default("default"),
                Connectivity::all_to_all(4, 2, 1.0),
                Specialization::Default,
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::KindMismatch { .. }));
        // The other way round is fine.
        ctx.add_projection(
            "good",
            b,
            a,
            "exc",
            SynapseType::spike_default("default"),
            Connectivity::all_to_all(2, 4, 1.0),
            Specialization::Default,
        )
        .unwrap();
    }

    #[test]
    fn test_shape_validation() {
        let mut ctx = NetworkBuildContext::new(1.0);
        let a = ctx.add_population("a", vec![3], rate_neuron()).unwrap();
        let b = ctx.add_population("b", vec![3], rate_neuron()).unwrap();
        let mut conn = Connectivity::one_to_one(3, 1.0);
        conn.w.pop();
        let err = ctx
            .add_projection(
                "bad",
                a,
                b,
                "exc",
                SynapseType::rate_default("default"),
                conn,
                Specialization::Default,
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_specialization_source_must_exist() {
        let mut ctx = NetworkBuildContext::new(1.0);
        let a = ctx.add_population("a", vec![3], rate_neuron()).unwrap();
        let b = ctx.add_population("b", vec![3], rate_neuron()).unwrap();
        let err = ctx
            .add_projection(
                "t",
                b,
                a,
                "exc",
                SynapseType::rate_default("default"),
                Connectivity::one_to_one(3, 1.0),
                Specialization::Transpose { forward: 7 },
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::BadSpecializationSource { .. }));
    }
}
