/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use iris_utils::{
    random::create_rnd_from_seed,
    rayon_util::{create_thread_pool, ParallelIteratorInPool, RayonThreadPool},
    squared_l2, CancelFlag, IrisError, IrisResult, VecElement, VectorCollection,
};
use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use super::{
    balance::{shard_sizes, spread, SizeBounds},
    graph::{ProximityGraph, POOL_OVERSAMPLING},
    PartitionOptions, PartitionStrategy, ShardAssignment, StrategyKind,
};

/// Block size for scanning the base collection.
const BLOCK_SIZE: usize = 10_000;

/// Groups nearby vectors on the same node while keeping shard sizes within a tolerance.
///
/// Representatives come from an upper layer of a proximity graph built over a seeded
/// sample of the base, every vector joins its nearest representative, and the
/// resulting clusters are then rebalanced by moving boundary vectors. Distances to the
/// representatives are recomputed when needed, so memory beyond the base stays at one
/// shard id per vector.
#[derive(Debug, Clone)]
pub struct ClusterBalanced {
    options: PartitionOptions,
}

impl ClusterBalanced {
    pub fn new(options: PartitionOptions) -> Self {
        Self { options }
    }
}

impl<T: VecElement> PartitionStrategy<T> for ClusterBalanced {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ClusterBalanced
    }

    fn assign(&self, base: &VectorCollection<T>, node_count: usize) -> IrisResult<ShardAssignment> {
        let num_points = base.len();
        if node_count == 1 {
            return Ok(ShardAssignment::Table {
                node_count,
                shard_of: vec![0; num_points],
            });
        }

        let tolerance = self.options.balance.tolerance_for(num_points, node_count);
        let bounds = SizeBounds::new(num_points, node_count, tolerance)?;
        if num_points <= node_count {
            return Ok(ShardAssignment::Table {
                node_count,
                shard_of: (0..num_points as u32).collect(),
            });
        }

        let cancel = &self.options.cancel;
        let mut rng = create_rnd_from_seed(self.options.seed);
        let points = graph_points(
            num_points,
            node_count,
            self.options.graph.max_points,
            &mut rng,
        );
        let representatives = {
            let graph = ProximityGraph::build(base, points, &self.options.graph, &mut rng, cancel)?;
            graph.representatives(node_count)
        };
        let representatives = Representatives {
            base,
            ids: representatives,
        };

        let pool = create_thread_pool(self.options.num_threads)?;
        let mut shard_of = vec![0u32; num_points];
        for (block, chunk) in shard_of.chunks_mut(BLOCK_SIZE).enumerate() {
            cancel.check()?;
            let first = block * BLOCK_SIZE;
            chunk
                .par_iter_mut()
                .enumerate()
                .for_each_in_pool(&pool, |(offset, slot)| {
                    *slot = representatives.nearest(first + offset, |_| true).unwrap_or(0) as u32;
                });
        }
        debug!(
            sizes = ?shard_sizes(&shard_of, node_count),
            "initial cluster sizes"
        );

        let passes = rebalance(
            &mut shard_of,
            &representatives,
            bounds,
            tolerance,
            self.options.balance.max_passes,
            &pool,
            cancel,
        )?;
        info!(
            num_points,
            node_count,
            passes,
            sizes = ?shard_sizes(&shard_of, node_count),
            "cluster-balanced partition"
        );

        Ok(ShardAssignment::Table {
            node_count,
            shard_of,
        })
    }
}

/// The base ids the graph is built over: all of them, or a sorted seeded sample large
/// enough for the representative pool.
fn graph_points(
    num_points: usize,
    node_count: usize,
    max_points: Option<usize>,
    rng: &mut impl Rng,
) -> Vec<u32> {
    let floor = node_count.saturating_mul(POOL_OVERSAMPLING);
    match max_points.map(|m| m.max(floor)) {
        Some(amount) if amount < num_points => {
            let mut sample: Vec<u32> = rand::seq::index::sample(rng, num_points, amount)
                .into_iter()
                .map(|i| i as u32)
                .collect();
            sample.sort_unstable();
            sample
        }
        _ => (0..num_points as u32).collect(),
    }
}

/// Distance from base vector `v` to the representative of every shard.
trait ShardDistance: Sync {
    fn shard_count(&self) -> usize;

    fn distance(&self, v: usize, shard: usize) -> f32;

    /// The closest shard accepted by `allowed`; ties go to the lower index.
    fn nearest(&self, v: usize, allowed: impl Fn(usize) -> bool) -> Option<usize> {
        (0..self.shard_count())
            .filter(|&j| allowed(j))
            .map(|j| (j, self.distance(v, j)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(j, _)| j)
    }
}

struct Representatives<'a, T: VecElement> {
    base: &'a VectorCollection<T>,
    ids: Vec<u32>,
}

impl<T: VecElement> ShardDistance for Representatives<'_, T> {
    fn shard_count(&self) -> usize {
        self.ids.len()
    }

    fn distance(&self, v: usize, shard: usize) -> f32 {
        squared_l2(
            self.base.vector(v),
            self.base.vector(self.ids[shard] as usize),
        )
    }
}

/// Moves boundary vectors until every shard size lies within `bounds` or `max_passes`
/// passes have run. Returns the number of passes used.
fn rebalance(
    shard_of: &mut [u32],
    distances: &impl ShardDistance,
    bounds: SizeBounds,
    tolerance: usize,
    max_passes: usize,
    pool: &RayonThreadPool,
    cancel: &CancelFlag,
) -> IrisResult<usize> {
    let node_count = distances.shard_count();
    let mut sizes = shard_sizes(shard_of, node_count);
    let mut passes = 0;
    while spread(&sizes) > tolerance && passes < max_passes {
        cancel.check()?;
        passes += 1;
        let mut moved = 0;
        for shard in 0..node_count {
            if sizes[shard] > bounds.hi {
                moved += shed(shard, shard_of, distances, &mut sizes, bounds, pool);
            }
        }
        for shard in 0..node_count {
            if sizes[shard] < bounds.lo {
                moved += fill(shard, shard_of, distances, &mut sizes, bounds, pool);
            }
        }
        debug!(pass = passes, moved, sizes = ?sizes, "rebalancing pass");
        if moved == 0 {
            break;
        }
    }

    let final_spread = spread(&sizes);
    if final_spread > tolerance {
        return Err(IrisError::ImbalanceToleranceExceeded {
            spread: final_spread,
            tolerance,
            passes,
        });
    }
    Ok(passes)
}

/// Moves vectors out of an over-full shard, cheapest detour first, into their nearest
/// shard that still has room.
fn shed(
    shard: usize,
    shard_of: &mut [u32],
    distances: &impl ShardDistance,
    sizes: &mut [usize],
    bounds: SizeBounds,
    pool: &RayonThreadPool,
) -> usize {
    let mut moves: Vec<(f32, u32)> = {
        let current: &[usize] = sizes;
        shard_of
            .par_iter()
            .enumerate()
            .filter(|&(_, &s)| s as usize == shard)
            .filter_map(|(v, _)| {
                distances
                    .nearest(v, |j| j != shard && current[j] < bounds.hi)
                    .map(|target| {
                        (
                            distances.distance(v, target) - distances.distance(v, shard),
                            v as u32,
                        )
                    })
            })
            .collect_in_pool(pool)
    };
    moves.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut moved = 0;
    for (_, v) in moves {
        if sizes[shard] <= bounds.hi {
            break;
        }
        // Targets fill up as vectors move, so pick again each time.
        let Some(target) = distances.nearest(v as usize, |j| j != shard && sizes[j] < bounds.hi)
        else {
            break;
        };
        shard_of[v as usize] = target as u32;
        sizes[shard] -= 1;
        sizes[target] += 1;
        moved += 1;
    }
    moved
}

/// Pulls the vectors closest to an under-full shard away from donors that can spare them.
fn fill(
    shard: usize,
    shard_of: &mut [u32],
    distances: &impl ShardDistance,
    sizes: &mut [usize],
    bounds: SizeBounds,
    pool: &RayonThreadPool,
) -> usize {
    let mut moves: Vec<(f32, u32)> = {
        let current: &[usize] = sizes;
        shard_of
            .par_iter()
            .enumerate()
            .filter(|&(_, &s)| s as usize != shard && current[s as usize] > bounds.lo)
            .map(|(v, &s)| {
                (
                    distances.distance(v, shard) - distances.distance(v, s as usize),
                    v as u32,
                )
            })
            .collect_in_pool(pool)
    };
    moves.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut moved = 0;
    for (_, v) in moves {
        if sizes[shard] >= bounds.lo {
            break;
        }
        let donor = shard_of[v as usize] as usize;
        if sizes[donor] <= bounds.lo {
            continue;
        }
        shard_of[v as usize] = shard as u32;
        sizes[donor] -= 1;
        sizes[shard] += 1;
        moved += 1;
    }
    moved
}

#[cfg(test)]
mod tests {
    use iris_utils::{
        random::create_rnd_in_tests, rayon_util::create_thread_pool_for_test, ErrorKind,
    };

    use super::*;
    use crate::utils::{
        partition::{BalanceOptions, GraphOptions, ShardMembers, DEFAULT_MAX_GRAPH_POINTS},
        test_utils::{clustered_collection, skewed_collection},
    };

    fn table(assignment: ShardAssignment) -> Vec<u32> {
        match assignment {
            ShardAssignment::Table { shard_of, .. } => shard_of,
            ShardAssignment::Replicated { .. } => panic!("expected a table"),
        }
    }

    #[test]
    fn separated_clusters_stay_together() {
        let base = clustered_collection(400, 8, 4);
        let strategy = ClusterBalanced::new(PartitionOptions::default());
        let shards = strategy.partition(&base, "blobs", 4).unwrap();

        for shard in &shards {
            let ShardMembers::Subset(ids) = &shard.members else {
                panic!("expected a subset");
            };
            assert_eq!(ids.len(), 100);
            let cluster = ids[0] % 4;
            assert!(ids.iter().all(|id| id % 4 == cluster));
        }
    }

    #[test]
    fn skewed_clusters_are_rebalanced() {
        let base = skewed_collection(&[250, 50, 50, 50], 8);
        let strategy = ClusterBalanced::new(PartitionOptions::default());
        let shard_of = table(strategy.assign(&base, 4).unwrap());

        let sizes = shard_sizes(&shard_of, 4);
        assert!(spread(&sizes) <= 1, "sizes {sizes:?}");
        assert_eq!(sizes.iter().sum::<usize>(), 400);
    }

    #[test]
    fn rebalancing_is_bounded_by_max_passes() {
        let base = skewed_collection(&[250, 50, 50, 50], 8);
        let options = PartitionOptions {
            balance: BalanceOptions {
                tolerance: Some(1),
                max_passes: 0,
            },
            ..Default::default()
        };
        let err = ClusterBalanced::new(options).assign(&base, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImbalanceToleranceExceeded);
    }

    #[test]
    fn unreachable_tolerance_fails_up_front() {
        let base = clustered_collection(101, 4, 2);
        let options = PartitionOptions {
            balance: BalanceOptions {
                tolerance: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = ClusterBalanced::new(options).assign(&base, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImbalanceToleranceExceeded);
    }

    #[test]
    fn sampled_graph_still_assigns_every_vector() {
        let base = clustered_collection(600, 8, 3);
        let options = PartitionOptions {
            graph: GraphOptions {
                max_points: Some(60),
                ..Default::default()
            },
            ..Default::default()
        };
        let strategy = ClusterBalanced::new(options);
        let shard_of = table(strategy.assign(&base, 3).unwrap());
        assert_eq!(shard_of.len(), 600);
        assert_eq!(shard_sizes(&shard_of, 3), vec![200, 200, 200]);
    }

    #[test]
    fn fewer_points_than_nodes() {
        let base = clustered_collection(3, 4, 3);
        let shard_of = table(
            ClusterBalanced::new(PartitionOptions::default())
                .assign(&base, 5)
                .unwrap(),
        );
        assert_eq!(shard_of, vec![0, 1, 2]);
    }

    #[test]
    fn seeded_runs_agree() {
        let base = skewed_collection(&[120, 40, 40], 8);
        let a = ClusterBalanced::new(PartitionOptions::default())
            .assign(&base, 2)
            .unwrap();
        let b = ClusterBalanced::new(PartitionOptions::default())
            .assign(&base, 2)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn honors_cancellation() {
        let base = clustered_collection(50, 4, 2);
        let options = PartitionOptions::default();
        options.cancel.cancel();
        let err = ClusterBalanced::new(options).assign(&base, 2).unwrap_err();
        assert!(matches!(err, IrisError::Cancelled));
    }

    /// Row-major `vectors x shards` distances.
    struct Table {
        width: usize,
        values: Vec<f32>,
    }

    impl ShardDistance for Table {
        fn shard_count(&self) -> usize {
            self.width
        }

        fn distance(&self, v: usize, shard: usize) -> f32 {
            self.values[v * self.width + shard]
        }
    }

    #[test]
    fn rebalance_moves_the_cheapest_vectors() {
        // Three vectors in shard 0, none in shard 1; vector 2 is the closest to shard 1.
        let distances = Table {
            width: 2,
            values: vec![0.0, 9.0, 0.0, 8.0, 0.0, 1.0],
        };
        let mut shard_of = vec![0, 0, 0];
        let bounds = SizeBounds::new(3, 2, 1).unwrap();
        let pool = create_thread_pool_for_test();
        let passes = rebalance(
            &mut shard_of,
            &distances,
            bounds,
            1,
            10,
            &pool,
            &CancelFlag::new(),
        )
        .unwrap();
        assert_eq!(passes, 1);
        assert_eq!(shard_of, vec![0, 0, 1]);
    }

    #[test]
    fn default_graph_is_built_over_a_bounded_sample() {
        let mut rng = create_rnd_in_tests();
        let default_cap = GraphOptions::default().max_points;
        assert_eq!(default_cap, Some(DEFAULT_MAX_GRAPH_POINTS));

        let points = graph_points(1_000_000, 10, default_cap, &mut rng);
        assert_eq!(points.len(), DEFAULT_MAX_GRAPH_POINTS);
        assert!(points.windows(2).all(|w| w[0] < w[1]));

        // Never fewer than the representative pool needs, and all of a small base.
        assert_eq!(graph_points(10_000, 100, Some(10), &mut rng).len(), 1_600);
        assert_eq!(graph_points(500, 4, default_cap, &mut rng).len(), 500);
        assert_eq!(graph_points(500, 4, None, &mut rng).len(), 500);
    }
}
