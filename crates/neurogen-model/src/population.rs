// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;

use crate::descriptor::NeuronType;

/// One declared neuron group.
///
/// `max_delay`, `delayed_variables` and `targets` start empty and grow
/// as projections touching this population are added to the build
/// context.
#[derive(Debug, Clone)]
pub struct Population {
    pub id: usize,
    pub name: String,
    /// Per-dimension extents; `size` is their product.
    pub geometry: Vec<usize>,
    pub size: usize,
    pub neuron: NeuronType,
    /// Ring-buffer depth in steps required by the deepest reader.
    pub max_delay: usize,
    /// Variables read through a delay by at least one projection,
    /// sorted for deterministic emission.
    pub delayed_variables: BTreeSet<String>,
    /// A spiking population whose spike lists are consumed through a
    /// delay keeps past spike lists as well.
    pub delayed_spikes: bool,
    /// Input channels (`target` labels) feeding this population; drives
    /// which `_sum_<target>` / `g_<target>` accumulators exist.
    pub targets: BTreeSet<String>,
}

impl Population {
    pub fn is_spiking(&self) -> bool {
        self.neuron.is_spiking()
    }
}
