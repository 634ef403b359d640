/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! A layered proximity graph (HNSW-style) built only to find well-spread cluster
//! representatives. It borrows the base collection and is dropped once the
//! representatives are known.

use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashSet},
};

use iris_utils::{squared_l2, CancelFlag, IrisResult, VecElement, VectorCollection};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

const MAX_LEVEL: usize = 16;

/// The representative pool holds at least this many candidates per requested representative.
pub(crate) const POOL_OVERSAMPLING: usize = 16;

/// Default cap on the vectors the graph is built over.
pub const DEFAULT_MAX_GRAPH_POINTS: usize = 25_000;

/// How often construction checks for cancellation, in inserted points.
const CANCEL_CHECK_INTERVAL: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOptions {
    /// Links per node on the upper layers; layer 0 keeps twice as many.
    pub max_degree: usize,

    /// Beam width while inserting.
    pub ef_construction: usize,

    /// Build the graph over a seeded sample of at most this many vectors (never fewer
    /// than the representative pool needs). `None` builds it over the whole base.
    pub max_points: Option<usize>,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            max_degree: 16,
            ef_construction: 64,
            max_points: Some(DEFAULT_MAX_GRAPH_POINTS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f32,
    node: u32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.node.cmp(&other.node))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub(crate) struct ProximityGraph<'a, T: VecElement> {
    base: &'a VectorCollection<T>,
    /// Graph node -> base id.
    points: Vec<u32>,
    levels: Vec<usize>,
    /// `links[node][layer]`, present for layers `0..=levels[node]`.
    links: Vec<Vec<Vec<u32>>>,
    entry: u32,
    max_level: usize,
}

impl<'a, T: VecElement> ProximityGraph<'a, T> {
    /// Inserts `points` (base ids) one by one. `points` must not be empty.
    pub fn build(
        base: &'a VectorCollection<T>,
        points: Vec<u32>,
        options: &GraphOptions,
        rng: &mut impl Rng,
        cancel: &CancelFlag,
    ) -> IrisResult<Self> {
        let max_degree = options.max_degree.max(2);
        let ef_construction = options.ef_construction.max(max_degree);
        let level_mult = 1.0 / (max_degree as f64).ln();

        let levels: Vec<usize> = points
            .iter()
            .map(|_| {
                let uniform: f64 = 1.0 - rng.random::<f64>();
                ((-uniform.ln() * level_mult).floor() as usize).min(MAX_LEVEL)
            })
            .collect();
        let links = levels.iter().map(|&l| vec![Vec::new(); l + 1]).collect();

        let mut graph = Self {
            base,
            points,
            max_level: levels.first().copied().unwrap_or(0),
            levels,
            links,
            entry: 0,
        };

        for node in 1..graph.points.len() {
            if node % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }
            graph.insert(node as u32, max_degree, ef_construction);
        }

        debug!(
            num_points = graph.points.len(),
            max_level = graph.max_level,
            "built proximity graph"
        );
        Ok(graph)
    }

    fn vector(&self, node: u32) -> &[T] {
        self.base.vector(self.points[node as usize] as usize)
    }

    fn distance(&self, a: u32, b: u32) -> f32 {
        squared_l2(self.vector(a), self.vector(b))
    }

    fn insert(&mut self, node: u32, max_degree: usize, ef_construction: usize) {
        let level = self.levels[node as usize];
        let mut entry = self.entry;

        for layer in (level + 1..=self.max_level).rev() {
            entry = self.greedy_closest(node, entry, layer);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(node, entry, ef_construction, layer);
            let limit = if layer == 0 { 2 * max_degree } else { max_degree };

            let selected: Vec<u32> = candidates.iter().take(limit).map(|c| c.node).collect();
            for &neighbor in &selected {
                self.links[neighbor as usize][layer].push(node);
                if self.links[neighbor as usize][layer].len() > limit {
                    self.prune(neighbor, layer, limit);
                }
            }
            self.links[node as usize][layer] = selected;

            if let Some(best) = candidates.first() {
                entry = best.node;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry = node;
        }
    }

    /// Keeps the `limit` closest links of `node` on `layer`.
    fn prune(&mut self, node: u32, layer: usize, limit: usize) {
        let mut ranked: Vec<Candidate> = self.links[node as usize][layer]
            .iter()
            .map(|&other| Candidate {
                distance: self.distance(node, other),
                node: other,
            })
            .collect();
        ranked.sort();
        self.links[node as usize][layer] = ranked.into_iter().take(limit).map(|c| c.node).collect();
    }

    fn greedy_closest(&self, query: u32, entry: u32, layer: usize) -> u32 {
        let mut current = entry;
        let mut best = self.distance(query, current);
        loop {
            let mut improved = false;
            for &neighbor in &self.links[current as usize][layer] {
                let d = self.distance(query, neighbor);
                if d < best {
                    best = d;
                    current = neighbor;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search on one layer. Returns up to `ef` nodes, nearest first.
    fn search_layer(&self, query: u32, entry: u32, ef: usize, layer: usize) -> Vec<Candidate> {
        let start = Candidate {
            distance: self.distance(query, entry),
            node: entry,
        };
        let mut visited = HashSet::from([entry]);
        let mut frontier = BinaryHeap::from([Reverse(start)]);
        let mut results = BinaryHeap::from([start]);

        while let Some(Reverse(current)) = frontier.pop() {
            if let Some(worst) = results.peek() {
                if results.len() >= ef && current.distance > worst.distance {
                    break;
                }
            }
            for &neighbor in &self.links[current.node as usize][layer] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let candidate = Candidate {
                    distance: self.distance(query, neighbor),
                    node: neighbor,
                };
                let admit = results.len() < ef
                    || results
                        .peek()
                        .is_some_and(|worst| candidate.distance < worst.distance);
                if admit {
                    frontier.push(Reverse(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Graph nodes present on `layer`, ascending.
    fn nodes_on(&self, layer: usize) -> Vec<u32> {
        (0..self.points.len() as u32)
            .filter(|&n| self.levels[n as usize] >= layer)
            .collect()
    }

    /// Picks `count` base ids spread across the data: the highest layer holding enough
    /// nodes is the candidate pool, and representatives are chosen from it by
    /// farthest-point selection starting at the entry point.
    pub fn representatives(&self, count: usize) -> Vec<u32> {
        if count >= self.points.len() {
            return self.points.clone();
        }

        let wanted = count.saturating_mul(POOL_OVERSAMPLING);
        let layer = (1..=self.max_level)
            .rev()
            .find(|&l| self.nodes_on(l).len() >= wanted)
            .unwrap_or(0);
        let pool = self.nodes_on(layer);
        debug!(layer, pool = pool.len(), count, "selecting representatives");

        let mut chosen = vec![self.entry];
        let mut taken: Vec<bool> = pool.iter().map(|&n| n == self.entry).collect();
        let mut nearest: Vec<f32> = pool.iter().map(|&n| self.distance(n, self.entry)).collect();
        while chosen.len() < count {
            let mut best: Option<(usize, f32)> = None;
            for (i, &d) in nearest.iter().enumerate() {
                if !taken[i] && best.map_or(true, |(_, bd)| d > bd) {
                    best = Some((i, d));
                }
            }
            let Some((index, _)) = best else { break };
            let pick = pool[index];
            taken[index] = true;
            chosen.push(pick);
            for (i, &n) in pool.iter().enumerate() {
                nearest[i] = nearest[i].min(self.distance(n, pick));
            }
        }

        chosen
            .into_iter()
            .map(|node| self.points[node as usize])
            .collect()
    }
}
