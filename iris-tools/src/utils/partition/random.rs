/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use iris_utils::{random::create_rnd_from_seed, IrisResult, VecElement, VectorCollection};
use rand::seq::SliceRandom;
use tracing::debug;

use super::{PartitionStrategy, ShardAssignment, StrategyKind};

/// Seeded uniform shuffle followed by a split into `node_count` contiguous blocks of
/// `N / node_count` vectors. The last block also takes the `N % node_count` leftovers.
#[derive(Debug, Clone, Copy)]
pub struct RandomPartitioner {
    seed: u64,
}

impl RandomPartitioner {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl<T: VecElement> PartitionStrategy<T> for RandomPartitioner {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Random
    }

    fn assign(&self, base: &VectorCollection<T>, node_count: usize) -> IrisResult<ShardAssignment> {
        let num_points = base.len();
        let mut order: Vec<u32> = (0..num_points as u32).collect();
        order.shuffle(&mut create_rnd_from_seed(self.seed));

        let block = num_points / node_count;
        let last = node_count - 1;
        let mut shard_of = vec![0u32; num_points];
        for (position, &id) in order.iter().enumerate() {
            let shard = if block == 0 {
                last
            } else {
                (position / block).min(last)
            };
            shard_of[id as usize] = shard as u32;
        }

        debug!(
            num_points,
            node_count,
            block,
            remainder = num_points % node_count,
            "random split"
        );
        Ok(ShardAssignment::Table {
            node_count,
            shard_of,
        })
    }
}
