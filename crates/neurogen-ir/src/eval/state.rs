// Copyright 2025 Neurogen Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory network state the evaluator runs against.

use std::collections::VecDeque;

use ahash::AHashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::{IrError, Result};

/// `last_event` value of a synapse that never saw a presynaptic spike.
pub const NEVER_FIRED: f64 = -10000.0;

/// One population: dense per-neuron arrays plus per-object globals.
#[derive(Debug, Clone)]
pub struct PopulationState {
    pub size: usize,
    /// Per-neuron attributes, keyed by name (`r`, `v`, `_sum_exc`, ...).
    pub locals: AHashMap<String, Vec<f64>>,
    /// Per-population attributes, including `_<op>_<var>` reduction
    /// results.
    pub globals: AHashMap<String, f64>,
    /// Ranks that fired this step, ascending.
    pub spiked: Vec<usize>,
    /// Step at which each neuron last fired (`NEVER_FIRED` initially).
    pub last_spike: Vec<f64>,
    /// Remaining refractory steps per neuron.
    pub refractory_remaining: Vec<f64>,
    /// Ring buffers of past values for variables read through a delay.
    /// `delayed[var][d - 1]` is the array as it was `d` steps ago.
    pub delayed: AHashMap<String, VecDeque<Vec<f64>>>,
    /// Past spike lists, same indexing as `delayed`.
    pub delayed_spikes: VecDeque<Vec<usize>>,
}

impl PopulationState {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            locals: AHashMap::new(),
            globals: AHashMap::new(),
            spiked: Vec::new(),
            last_spike: vec![NEVER_FIRED; size],
            refractory_remaining: vec![0.0; size],
            delayed: AHashMap::new(),
            delayed_spikes: VecDeque::new(),
        }
    }

    /// Register a per-neuron attribute initialized to `init`.
    pub fn add_local(&mut self, name: impl Into<String>, init: f64) {
        self.locals.insert(name.into(), vec![init; self.size]);
    }

    pub fn add_global(&mut self, name: impl Into<String>, init: f64) {
        self.globals.insert(name.into(), init);
    }

    /// Allocate the delay ring buffer for `name`, pre-filled with the
    /// current values so reads are defined from step 0.
    pub fn init_delay(&mut self, name: &str, depth: usize) {
        let snapshot = match self.locals.get(name) {
            Some(values) => values.clone(),
            None => vec![*self.globals.get(name).unwrap_or(&0.0)],
        };
        let mut ring = VecDeque::with_capacity(depth);
        for _ in 0..depth {
            ring.push_back(snapshot.clone());
        }
        self.delayed.insert(name.to_string(), ring);
    }

    /// Allocate the past-spike-list ring buffer.
    pub fn init_spike_delay(&mut self, depth: usize) {
        self.delayed_spikes = (0..depth).map(|_| Vec::new()).collect();
    }
}

/// One projection: LIL connectivity plus synaptic attributes.
#[derive(Debug, Clone)]
pub struct ProjectionState {
    /// Presynaptic population id (delayed reads resolve against it).
    pub pre_pop: usize,
    /// Postsynaptic population id.
    pub post_pop: usize,
    /// Postsynaptic target (`exc`, `inh`, ...).
    pub target: String,
    /// Row -> postsynaptic rank, ascending.
    pub post_ranks: Vec<usize>,
    /// Row -> presynaptic ranks, each row ascending.
    pub pre_ranks: Vec<Vec<usize>>,
    /// Weights, same shape as `pre_ranks`.
    pub w: Vec<Vec<f64>>,
    /// Per-synapse delays in steps; `None` when the delay is uniform.
    pub delays: Option<Vec<Vec<usize>>>,
    /// Uniform delay in steps (1 = next step, the minimum latency).
    pub uniform_delay: usize,
    /// Largest delay the ring buffers were sized for.
    pub max_delay: usize,
    /// Per-synapse attributes other than `w`.
    pub locals: AHashMap<String, Vec<Vec<f64>>>,
    /// Per-row attributes.
    pub semiglobals: AHashMap<String, Vec<f64>>,
    /// Per-projection attributes, including the `_transmission`,
    /// `_update` and `_plasticity` gates.
    pub globals: AHashMap<String, f64>,
    /// Presynaptic rank -> list of `(row, column)` synapse positions.
    pub inv_pre_rank: AHashMap<usize, Vec<(usize, usize)>>,
    /// Postsynaptic rank -> row.
    pub inv_post_rank: AHashMap<usize, usize>,
    /// Pending `(row, column)` deliveries per ring-buffer slot
    /// (non-uniform spiking delay only).
    pub pending: Vec<Vec<(usize, usize)>>,
    /// Current read slot of `pending`.
    pub idx_delay: usize,
}

impl ProjectionState {
    pub fn new(
        pre_pop: usize,
        post_pop: usize,
        target: impl Into<String>,
        post_ranks: Vec<usize>,
        pre_ranks: Vec<Vec<usize>>,
        w: Vec<Vec<f64>>,
    ) -> Self {
        let mut proj = Self {
            pre_pop,
            post_pop,
            target: target.into(),
            post_ranks,
            pre_ranks,
            w,
            delays: None,
            uniform_delay: 1,
            max_delay: 1,
            locals: AHashMap::new(),
            semiglobals: AHashMap::new(),
            globals: AHashMap::new(),
            inv_pre_rank: AHashMap::new(),
            inv_post_rank: AHashMap::new(),
            pending: Vec::new(),
            idx_delay: 0,
        };
        proj.globals.insert("_transmission".into(), 1.0);
        proj.globals.insert("_update".into(), 1.0);
        proj.globals.insert("_plasticity".into(), 1.0);
        proj.rebuild_inverse();
        proj
    }

    /// Attach per-synapse delays and size the pending ring buffer.
    pub fn set_nonuniform_delays(&mut self, delays: Vec<Vec<usize>>) {
        let max = delays
            .iter()
            .flat_map(|row| row.iter().copied())
            .max()
            .unwrap_or(1);
        self.max_delay = max.max(1);
        self.delays = Some(delays);
        self.pending = vec![Vec::new(); self.max_delay];
        self.idx_delay = 0;
    }

    pub fn set_uniform_delay(&mut self, steps: usize) {
        self.uniform_delay = steps.max(1);
        self.max_delay = self.uniform_delay;
    }

    /// Register a per-synapse attribute with one value per existing
    /// synapse.
    pub fn add_local(&mut self, name: impl Into<String>, init: f64) {
        let values = self
            .pre_ranks
            .iter()
            .map(|row| vec![init; row.len()])
            .collect();
        self.locals.insert(name.into(), values);
    }

    pub fn add_semiglobal(&mut self, name: impl Into<String>, init: f64) {
        self.semiglobals
            .insert(name.into(), vec![init; self.post_ranks.len()]);
    }

    pub fn add_global(&mut self, name: impl Into<String>, init: f64) {
        self.globals.insert(name.into(), init);
    }

    pub fn nb_synapses(&self) -> usize {
        self.pre_ranks.iter().map(Vec::len).sum()
    }

    pub fn is_connected(&self, row: usize, rk_pre: usize) -> bool {
        self.pre_ranks[row].binary_search(&rk_pre).is_ok()
    }

    /// Rebuild both inverse maps from the forward lists.
    pub fn rebuild_inverse(&mut self) {
        self.inv_pre_rank.clear();
        self.inv_post_rank.clear();
        for (i, row) in self.pre_ranks.iter().enumerate() {
            for (j, &rk) in row.iter().enumerate() {
                self.inv_pre_rank.entry(rk).or_default().push((i, j));
            }
        }
        for (i, &rk) in self.post_ranks.iter().enumerate() {
            self.inv_post_rank.insert(rk, i);
        }
    }

    /// Insert a synapse `(row, rk_pre)` keeping the row sorted.
    ///
    /// The delay is validated against the ring-buffer capacity *before*
    /// anything is modified; on error the connectivity is untouched.
    pub fn add_synapse(
        &mut self,
        row: usize,
        rk_pre: usize,
        weight: f64,
        delay: Option<usize>,
    ) -> Result<()> {
        match (&self.delays, delay) {
            (Some(_), Some(d)) if d > self.max_delay => {
                return Err(IrError::DelayViolation(format!(
                    "created synapse requests delay {d} but ring buffers hold {} slots",
                    self.max_delay
                )));
            }
            (None, Some(d)) if d != self.uniform_delay => {
                return Err(IrError::DelayViolation(format!(
                    "created synapse requests delay {d} in a projection with uniform delay {}",
                    self.uniform_delay
                )));
            }
            _ => {}
        }
        if self.is_connected(row, rk_pre) {
            return Ok(());
        }
        let pos = self.pre_ranks[row].partition_point(|&r| r < rk_pre);
        self.pre_ranks[row].insert(pos, rk_pre);
        self.w[row].insert(pos, weight);
        if let Some(delays) = &mut self.delays {
            delays[row].insert(pos, delay.unwrap_or(1));
        }
        for (name, values) in self.locals.iter_mut() {
            let init = if name == "_last_event" { NEVER_FIRED } else { 0.0 };
            values[row].insert(pos, init);
        }
        self.rebuild_inverse();
        Ok(())
    }

    /// Remove synapse `col` of `row` from every per-synapse array.
    pub fn remove_synapse(&mut self, row: usize, col: usize) {
        self.pre_ranks[row].remove(col);
        self.w[row].remove(col);
        if let Some(delays) = &mut self.delays {
            delays[row].remove(col);
        }
        for values in self.locals.values_mut() {
            values[row].remove(col);
        }
        self.rebuild_inverse();
    }
}

/// The whole network plus simulation clock and RNG.
#[derive(Debug)]
pub struct NetworkState {
    /// Current step.
    pub t: i64,
    /// Integration step in ms.
    pub dt: f64,
    pub pops: Vec<PopulationState>,
    pub projs: Vec<ProjectionState>,
    pub rng: StdRng,
}

impl NetworkState {
    /// `seed = None` draws the RNG seed from the OS.
    pub fn new(dt: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            t: 0,
            dt,
            pops: Vec::new(),
            projs: Vec::new(),
            rng,
        }
    }
}
