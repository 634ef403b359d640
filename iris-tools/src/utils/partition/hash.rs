/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::collections::BTreeMap;

use iris_utils::{
    random::create_rnd_from_seed,
    rayon_util::{create_thread_pool, ParallelIteratorInPool},
    IrisResult, VecElement, VectorCollection,
};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    balance::{shard_sizes, spread, SizeBounds},
    PartitionOptions, PartitionStrategy, ShardAssignment, StrategyKind,
};

const BLOCK_SIZE: usize = 10_000;

/// Signatures are packed into a `u64`.
const MAX_HYPERPLANES: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LshOptions {
    /// Number of random hyperplanes. `None` picks `ceil(log2(node_count)) + 4`.
    pub num_hyperplanes: Option<usize>,
}

impl LshOptions {
    pub fn hyperplanes_for(&self, node_count: usize) -> usize {
        let default = || node_count.max(1).next_power_of_two().trailing_zeros() as usize + 4;
        self.num_hyperplanes
            .unwrap_or_else(default)
            .clamp(1, MAX_HYPERPLANES)
    }
}

/// Random-hyperplane LSH: vectors with the same sign pattern form a bucket, whole
/// buckets are packed greedily onto the emptiest node, and single vectors are then
/// moved off the largest node until sizes are within the tolerance.
#[derive(Debug, Clone)]
pub struct HashBalanced {
    options: PartitionOptions,
}

impl HashBalanced {
    pub fn new(options: PartitionOptions) -> Self {
        Self { options }
    }
}

impl<T: VecElement> PartitionStrategy<T> for HashBalanced {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HashBalanced
    }

    fn assign(&self, base: &VectorCollection<T>, node_count: usize) -> IrisResult<ShardAssignment> {
        let num_points = base.len();
        if node_count == 1 || num_points == 0 {
            return Ok(ShardAssignment::Table {
                node_count,
                shard_of: vec![0; num_points],
            });
        }

        let tolerance = self.options.balance.tolerance_for(num_points, node_count);
        SizeBounds::new(num_points, node_count, tolerance)?;

        let num_hyperplanes = self.options.lsh.hyperplanes_for(node_count);
        let mut rng = create_rnd_from_seed(self.options.seed);
        let hyperplanes: Vec<f32> = (0..num_hyperplanes * base.dim())
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect();
        let signatures = self.signatures(base, &hyperplanes)?;

        let mut buckets: BTreeMap<u64, Vec<u32>> = BTreeMap::new();
        for (id, &signature) in signatures.iter().enumerate() {
            buckets.entry(signature).or_default().push(id as u32);
        }
        let mut buckets: Vec<(u64, Vec<u32>)> = buckets.into_iter().collect();
        buckets.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(&b.0)));
        debug!(
            num_hyperplanes,
            num_buckets = buckets.len(),
            largest = buckets.first().map_or(0, |b| b.1.len()),
            "hashed base vectors"
        );

        // Each shard keeps the buckets it received, in placement order.
        let mut pieces: Vec<Vec<Vec<u32>>> = vec![Vec::new(); node_count];
        let mut sizes = vec![0usize; node_count];
        for (_, members) in buckets {
            let target = smallest(&sizes);
            sizes[target] += members.len();
            pieces[target].push(members);
        }
        let moved = level(&mut pieces, &mut sizes, tolerance);

        let mut shard_of = vec![0u32; num_points];
        for (shard, shard_pieces) in pieces.iter().enumerate() {
            for &id in shard_pieces.iter().flatten() {
                shard_of[id as usize] = shard as u32;
            }
        }
        info!(
            num_points,
            node_count,
            moved,
            sizes = ?shard_sizes(&shard_of, node_count),
            "hash-balanced partition"
        );

        Ok(ShardAssignment::Table {
            node_count,
            shard_of,
        })
    }
}

impl HashBalanced {
    fn signatures<T: VecElement>(
        &self,
        base: &VectorCollection<T>,
        hyperplanes: &[f32],
    ) -> IrisResult<Vec<u64>> {
        let dim = base.dim();
        let mut mean = vec![0.0f64; dim];
        for vector in base.iter() {
            for (m, &x) in mean.iter_mut().zip(vector) {
                *m += x.as_f32() as f64;
            }
        }
        let mean: Vec<f32> = mean
            .into_iter()
            .map(|m| (m / base.len() as f64) as f32)
            .collect();

        let pool = create_thread_pool(self.options.num_threads)?;
        let mut signatures = vec![0u64; base.len()];
        for (block, chunk) in signatures.chunks_mut(BLOCK_SIZE).enumerate() {
            self.options.cancel.check()?;
            let first = block * BLOCK_SIZE;
            chunk
                .par_iter_mut()
                .enumerate()
                .for_each_in_pool(&pool, |(offset, signature)| {
                    let vector = base.vector(first + offset);
                    *signature = hyperplanes
                        .chunks_exact(dim)
                        .enumerate()
                        .filter(|(_, plane)| {
                            let dot: f32 = vector
                                .iter()
                                .zip(&mean)
                                .zip(plane.iter())
                                .map(|((x, m), h)| (x.as_f32() - m) * h)
                                .sum();
                            dot >= 0.0
                        })
                        .fold(0u64, |bits, (bit, _)| bits | (1 << bit));
                });
        }
        Ok(signatures)
    }
}

/// Lowest index among the smallest entries.
fn smallest(sizes: &[usize]) -> usize {
    (0..sizes.len()).min_by_key(|&i| (sizes[i], i)).unwrap_or(0)
}

/// Lowest index among the largest entries.
fn largest(sizes: &[usize]) -> usize {
    (0..sizes.len())
        .min_by_key(|&i| (std::cmp::Reverse(sizes[i]), i))
        .unwrap_or(0)
}

/// Moves single vectors from the largest to the smallest shard until the spread is
/// within `tolerance`, taking them from the most recently placed bucket so the large
/// buckets stay whole. Returns the number of vectors moved.
fn level(pieces: &mut [Vec<Vec<u32>>], sizes: &mut [usize], tolerance: usize) -> usize {
    let mut moved = 0;
    while spread(sizes) > tolerance {
        let from = largest(sizes);
        let to = smallest(sizes);
        while pieces[from].last().is_some_and(|piece| piece.is_empty()) {
            pieces[from].pop();
        }
        let Some(id) = pieces[from].last_mut().and_then(|piece| piece.pop()) else {
            break;
        };
        match pieces[to].last_mut() {
            Some(piece) => piece.push(id),
            None => pieces[to].push(vec![id]),
        }
        sizes[from] -= 1;
        sizes[to] += 1;
        moved += 1;
    }
    moved
}

#[cfg(test)]
mod tests {
    use iris_utils::{ErrorKind, IrisError};
    use rstest::rstest;

    use super::*;
    use crate::utils::{partition::BalanceOptions, test_utils::clustered_collection};

    fn table(assignment: ShardAssignment) -> Vec<u32> {
        match assignment {
            ShardAssignment::Table { shard_of, .. } => shard_of,
            ShardAssignment::Replicated { .. } => panic!("expected a table"),
        }
    }

    #[rstest]
    #[case(None, 1, 4)]
    #[case(None, 2, 5)]
    #[case(None, 5, 7)]
    #[case(None, 10, 8)]
    #[case(Some(0), 4, 1)]
    #[case(Some(100), 4, 64)]
    fn hyperplane_count(
        #[case] configured: Option<usize>,
        #[case] node_count: usize,
        #[case] expected: usize,
    ) {
        let options = LshOptions {
            num_hyperplanes: configured,
        };
        assert_eq!(options.hyperplanes_for(node_count), expected);
    }

    #[test]
    fn nearby_vectors_share_a_node() {
        let base = clustered_collection(400, 8, 4);
        let shard_of = table(
            HashBalanced::new(PartitionOptions::default())
                .assign(&base, 4)
                .unwrap(),
        );
        assert!(spread(&shard_sizes(&shard_of, 4)) <= 1);

        // For every blob, count how many of its members share the most common node.
        let together: usize = (0..4)
            .map(|blob| {
                let mut counts = [0usize; 4];
                for (id, &shard) in shard_of.iter().enumerate() {
                    if id % 4 == blob {
                        counts[shard as usize] += 1;
                    }
                }
                counts.into_iter().max().unwrap_or(0)
            })
            .sum();
        assert!(together >= 250, "only {together} of 400 vectors kept together");
    }

    #[test]
    fn seeded_runs_agree() {
        let base = clustered_collection(300, 8, 5);
        let a = HashBalanced::new(PartitionOptions::default())
            .assign(&base, 3)
            .unwrap();
        let b = HashBalanced::new(PartitionOptions::default())
            .assign(&base, 3)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unreachable_tolerance_is_rejected() {
        let base = clustered_collection(101, 4, 3);
        let options = PartitionOptions {
            balance: BalanceOptions {
                tolerance: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = HashBalanced::new(options).assign(&base, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImbalanceToleranceExceeded);
    }

    #[test]
    fn honors_cancellation() {
        let base = clustered_collection(40, 4, 2);
        let options = PartitionOptions::default();
        options.cancel.cancel();
        let err = HashBalanced::new(options).assign(&base, 2).unwrap_err();
        assert!(matches!(err, IrisError::Cancelled));
    }

    #[test]
    fn levelling_keeps_big_buckets_whole() {
        let mut pieces = vec![vec![vec![0, 1, 2, 3, 4, 5], vec![6, 7]], vec![vec![8]]];
        let mut sizes = vec![8, 1];
        let moved = level(&mut pieces, &mut sizes, 1);
        assert_eq!(moved, 3);
        assert_eq!(sizes, vec![5, 4]);
        assert_eq!(pieces[0][0], vec![0, 1, 2, 3, 4]);
        assert_eq!(pieces[1][0], vec![8, 7, 6, 5]);
    }
}
