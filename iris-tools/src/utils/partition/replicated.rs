/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use iris_utils::{IrisResult, VecElement, VectorCollection};

use super::{PartitionStrategy, ShardAssignment, StrategyKind};

/// Every node stores the entire collection, as a standalone SSD-backed index would.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullReplication;

impl<T: VecElement> PartitionStrategy<T> for FullReplication {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FullReplication
    }

    fn assign(&self, _base: &VectorCollection<T>, node_count: usize) -> IrisResult<ShardAssignment> {
        Ok(ShardAssignment::Replicated { node_count })
    }
}
