// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::descriptor::SynapseType;

/// Transmission delay of a projection, in integration steps.
///
/// A delay of 1 step is the minimum latency: a value produced at step
/// `t` is visible to the postsynaptic side at step `t + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelaySpec {
    /// Next-step transmission, no ring buffer needed.
    None,
    /// Same delay for every synapse.
    Uniform(usize),
    /// Per-synapse delays, same shape as the connectivity lists.
    NonUniform(Vec<Vec<usize>>),
}

impl DelaySpec {
    /// Ring-buffer depth this delay requires of the presynaptic
    /// population.
    pub fn max_steps(&self) -> usize {
        match self {
            DelaySpec::None => 1,
            DelaySpec::Uniform(d) => (*d).max(1),
            DelaySpec::NonUniform(rows) => rows
                .iter()
                .flat_map(|r| r.iter().copied())
                .max()
                .unwrap_or(1)
                .max(1),
        }
    }

    pub fn is_nonuniform(&self) -> bool {
        matches!(self, DelaySpec::NonUniform(_))
    }
}

/// Explicit list-of-lists connectivity: one row per postsynaptic
/// neuron that has at least one synapse.
#[derive(Debug, Clone, PartialEq)]
pub struct Connectivity {
    /// Postsynaptic ranks owning a row, strictly ascending.
    pub post_ranks: Vec<usize>,
    /// Presynaptic ranks per row, each strictly ascending.
    pub pre_ranks: Vec<Vec<usize>>,
    /// Initial weights, same shape as `pre_ranks`.
    pub w: Vec<Vec<f64>>,
    pub delay: DelaySpec,
}

impl Connectivity {
    /// All-to-all with one shared initial weight and no delay.
    pub fn all_to_all(pre_size: usize, post_size: usize, weight: f64) -> Self {
        let pre: Vec<usize> = (0..pre_size).collect();
        Self {
            post_ranks: (0..post_size).collect(),
            pre_ranks: vec![pre.clone(); post_size],
            w: vec![vec![weight; pre_size]; post_size],
            delay: DelaySpec::None,
        }
    }

    /// One-to-one over `size` neurons.
    pub fn one_to_one(size: usize, weight: f64) -> Self {
        Self {
            post_ranks: (0..size).collect(),
            pre_ranks: (0..size).map(|r| vec![r]).collect(),
            w: vec![vec![weight]; size],
            delay: DelaySpec::None,
        }
    }

    pub fn with_delay(mut self, delay: DelaySpec) -> Self {
        self.delay = delay;
        self
    }

    pub fn nb_synapses(&self) -> usize {
        self.pre_ranks.iter().map(Vec::len).sum()
    }
}

/// Projection variants with non-default code generation.
#[derive(Debug, Clone, PartialEq)]
pub enum Specialization {
    Default,
    /// Virtual inverted projection walking another projection's
    /// connectivity backwards and reusing its weights. Read-only;
    /// save/load is declined with a warning.
    Transpose { forward: usize },
    /// One shared weight vector per postsynaptic neuron's receptive
    /// field (convolution/pooling style) instead of per-synapse
    /// storage.
    SharedWeight { weights: Vec<f64> },
    /// Reuse the weight matrix of another projection with identical
    /// connectivity.
    Copy { source: usize },
}

impl Specialization {
    pub fn is_default(&self) -> bool {
        matches!(self, Specialization::Default)
    }
}

/// One declared pre -> post connection.
#[derive(Debug, Clone)]
pub struct Projection {
    pub id: usize,
    pub name: String,
    pub pre: usize,
    pub post: usize,
    /// Input channel on the post population this projection feeds.
    pub target: String,
    pub synapse: SynapseType,
    pub connectivity: Connectivity,
    pub specialization: Specialization,
}

impl Projection {
    pub fn max_delay(&self) -> usize {
        self.connectivity.delay.max_steps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_max_steps() {
        assert_eq!(DelaySpec::None.max_steps(), 1);
        assert_eq!(DelaySpec::Uniform(4).max_steps(), 4);
        let nu = DelaySpec::NonUniform(vec![vec![2, 3], vec![1]]);
        assert_eq!(nu.max_steps(), 3);
        assert!(nu.is_nonuniform());
    }

    #[test]
    fn test_builtin_patterns() {
        let all = Connectivity::all_to_all(3, 2, 0.5);
        assert_eq!(all.nb_synapses(), 6);
        assert_eq!(all.pre_ranks[1], vec![0, 1, 2]);
        let one = Connectivity::one_to_one(4, 1.0);
        assert_eq!(one.nb_synapses(), 4);
        assert_eq!(one.pre_ranks[2], vec![2]);
    }
}
