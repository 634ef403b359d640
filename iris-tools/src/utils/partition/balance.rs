/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use iris_utils::{IrisError, IrisResult};
use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};

/// Balance requirements of the cluster- and hash-balanced strategies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceOptions {
    /// Largest allowed difference, in vectors, between the biggest and the smallest shard.
    /// `None` uses [`default_tolerance`].
    pub tolerance: Option<usize>,

    /// Upper bound on rebalancing passes.
    pub max_passes: usize,
}

impl Default for BalanceOptions {
    fn default() -> Self {
        Self {
            tolerance: None,
            max_passes: 10,
        }
    }
}

impl BalanceOptions {
    pub fn tolerance_for(&self, num_points: usize, node_count: usize) -> usize {
        self.tolerance
            .unwrap_or_else(|| default_tolerance(num_points, node_count))
    }
}

/// One percent of the ideal shard size, and never less than one vector.
pub fn default_tolerance(num_points: usize, node_count: usize) -> usize {
    (num_points / node_count.max(1) / 100).max(1)
}

/// `max(size) - min(size)`.
pub fn spread(sizes: &[usize]) -> usize {
    match sizes.iter().minmax() {
        MinMaxResult::NoElements | MinMaxResult::OneElement(_) => 0,
        MinMaxResult::MinMax(min, max) => max - min,
    }
}

/// Number of vectors per shard in an assignment table.
pub fn shard_sizes(shard_of: &[u32], node_count: usize) -> Vec<usize> {
    let mut sizes = vec![0; node_count];
    for &shard in shard_of {
        sizes[shard as usize] += 1;
    }
    sizes
}

/// Inclusive per-shard size window. Any assignment whose shard sizes all lie in
/// `lo..=hi` has a spread within the tolerance it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SizeBounds {
    pub lo: usize,
    pub hi: usize,
}

impl SizeBounds {
    /// Fails when `tolerance` is below the smallest achievable spread, which is 1 whenever
    /// `num_points` does not divide evenly over `node_count` shards.
    pub fn new(num_points: usize, node_count: usize, tolerance: usize) -> IrisResult<Self> {
        let base = num_points / node_count;
        let min_spread = usize::from(num_points % node_count != 0);
        if tolerance < min_spread {
            return Err(IrisError::ImbalanceToleranceExceeded {
                spread: min_spread,
                tolerance,
                passes: 0,
            });
        }

        let hi = base + min_spread + (tolerance - min_spread) / 2;
        Ok(Self {
            lo: hi.saturating_sub(tolerance),
            hi,
        })
    }
}
