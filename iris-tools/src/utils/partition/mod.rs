/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Strategies that split a base collection into per-node shards.
//!
//! Every strategy produces a flat vector-to-shard lookup table (or declares full
//! replication); [`ShardAssignment::into_shards`] turns that table into named
//! [`Shard`]s, and [`Shard::write`] streams each shard's records straight from the base
//! collection.

use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use iris_utils::{io, CancelFlag, IrisError, IrisResult, VecElement, VectorCollection};
use tracing::info;

mod balance;
mod cluster;
mod graph;
mod hash;
mod random;
mod replicated;

pub use balance::{default_tolerance, shard_sizes, spread, BalanceOptions};
pub use cluster::ClusterBalanced;
pub use graph::{GraphOptions, DEFAULT_MAX_GRAPH_POINTS};
pub use hash::{HashBalanced, LshOptions};
pub use random::RandomPartitioner;
pub use replicated::FullReplication;

/// The partition strategies a job can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StrategyKind {
    /// Every node holds the whole collection.
    FullReplication,
    /// Uniform random split into equal blocks.
    Random,
    /// Proximity-graph clusters, rebalanced to near-equal sizes.
    ClusterBalanced,
    /// Random-hyperplane hash buckets packed into near-equal shards.
    HashBalanced,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::FullReplication,
        StrategyKind::Random,
        StrategyKind::ClusterBalanced,
        StrategyKind::HashBalanced,
    ];

    /// Canonical name, used in shard file names.
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::FullReplication => "full_replication",
            StrategyKind::Random => "random",
            StrategyKind::ClusterBalanced => "cluster_balanced",
            StrategyKind::HashBalanced => "hash_balanced",
        }
    }

    /// Builds the strategy for collections of `T`.
    pub fn build<T: VecElement>(&self, options: &PartitionOptions) -> Box<dyn PartitionStrategy<T>> {
        match self {
            StrategyKind::FullReplication => Box::new(FullReplication),
            StrategyKind::Random => Box::new(RandomPartitioner::new(options.seed)),
            StrategyKind::ClusterBalanced => Box::new(ClusterBalanced::new(options.clone())),
            StrategyKind::HashBalanced => Box::new(HashBalanced::new(options.clone())),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = IrisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full_replication" | "ssd" => Ok(StrategyKind::FullReplication),
            "random" => Ok(StrategyKind::Random),
            "cluster_balanced" | "hnsw" => Ok(StrategyKind::ClusterBalanced),
            "hash_balanced" | "lsh" => Ok(StrategyKind::HashBalanced),
            _ => Err(IrisError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Knobs shared by all strategies.
#[derive(Debug, Clone)]
pub struct PartitionOptions {
    pub seed: u64,
    /// Worker threads; 0 uses every logical CPU.
    pub num_threads: usize,
    pub balance: BalanceOptions,
    pub graph: GraphOptions,
    pub lsh: LshOptions,
    pub cancel: CancelFlag,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            seed: iris_utils::random::DEFAULT_SEED,
            num_threads: 0,
            balance: BalanceOptions::default(),
            graph: GraphOptions::default(),
            lsh: LshOptions::default(),
            cancel: CancelFlag::default(),
        }
    }
}

/// Which shard every vector belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardAssignment {
    /// Every shard holds every vector.
    Replicated { node_count: usize },
    /// `shard_of[v]` is the 0-based shard of vector `v`.
    Table {
        node_count: usize,
        shard_of: Vec<u32>,
    },
}

impl ShardAssignment {
    pub fn node_count(&self) -> usize {
        match self {
            ShardAssignment::Replicated { node_count }
            | ShardAssignment::Table { node_count, .. } => *node_count,
        }
    }

    /// Expands the assignment into `node_count` shards. Shard members are listed in
    /// ascending id order.
    pub fn into_shards(self, dataset: &str, strategy: StrategyKind) -> Vec<Shard> {
        let node_count = self.node_count();
        let members: Vec<ShardMembers> = match self {
            ShardAssignment::Replicated { .. } => vec![ShardMembers::All; node_count],
            ShardAssignment::Table { shard_of, .. } => {
                let mut buckets = vec![Vec::new(); node_count];
                for (id, &shard) in shard_of.iter().enumerate() {
                    buckets[shard as usize].push(id as u32);
                }
                buckets.into_iter().map(ShardMembers::Subset).collect()
            }
        };

        members
            .into_iter()
            .enumerate()
            .map(|(node_index, members)| Shard {
                dataset: dataset.to_string(),
                strategy,
                node_count,
                node_index,
                members,
            })
            .collect()
    }
}

/// The vectors one node holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardMembers {
    All,
    Subset(Vec<u32>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub dataset: String,
    pub strategy: StrategyKind,
    pub node_count: usize,
    /// 0-based; file names use `node_index + 1`.
    pub node_index: usize,
    pub members: ShardMembers,
}

impl Shard {
    /// Number of vectors in the shard, given the size of the base it came from.
    pub fn len(&self, base_len: usize) -> usize {
        match &self.members {
            ShardMembers::All => base_len,
            ShardMembers::Subset(ids) => ids.len(),
        }
    }

    pub fn file_name(&self, extension: &str) -> String {
        shard_file_name(
            &self.dataset,
            self.strategy,
            self.node_count,
            self.node_index,
            extension,
        )
    }

    /// Writes the shard's records into `dir`. Returns the path written.
    pub fn write<T: VecElement>(
        &self,
        base: &VectorCollection<T>,
        dir: &Path,
    ) -> IrisResult<PathBuf> {
        let path = dir.join(self.file_name(T::EXTENSION));
        match &self.members {
            ShardMembers::All => io::write(&path, base)?,
            ShardMembers::Subset(ids) => io::write_records(&path, base, ids)?,
        };
        Ok(path)
    }
}

/// `{dataset}_{strategy}.{ext}` for full replication, where every node shares one file;
/// `{dataset}_{strategy}_{n}nodes_node{i}.{ext}` with a 1-based `i` otherwise.
pub fn shard_file_name(
    dataset: &str,
    strategy: StrategyKind,
    node_count: usize,
    node_index: usize,
    extension: &str,
) -> String {
    match strategy {
        StrategyKind::FullReplication => format!("{dataset}_{strategy}.{extension}"),
        _ => format!(
            "{dataset}_{strategy}_{node_count}nodes_node{}.{extension}",
            node_index + 1
        ),
    }
}

/// Writes every shard into `dir`, writing shared files (full replication) once.
/// Returns the distinct paths written, in shard order.
pub fn write_shards<T: VecElement>(
    shards: &[Shard],
    base: &VectorCollection<T>,
    dir: &Path,
    cancel: &CancelFlag,
) -> IrisResult<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut written = Vec::new();
    for shard in shards {
        if !seen.insert(shard.file_name(T::EXTENSION)) {
            continue;
        }
        cancel.check()?;
        let path = shard.write(base, dir)?;
        info!(
            path = %path.display(),
            num_vectors = shard.len(base.len()),
            "wrote shard"
        );
        written.push(path);
    }
    Ok(written)
}

/// A way of distributing a base collection over `node_count` nodes.
pub trait PartitionStrategy<T: VecElement>: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Decides the shard of every vector.
    fn assign(&self, base: &VectorCollection<T>, node_count: usize) -> IrisResult<ShardAssignment>;

    /// Splits `base` into exactly `node_count` shards named after `dataset`.
    fn partition(
        &self,
        base: &VectorCollection<T>,
        dataset: &str,
        node_count: usize,
    ) -> IrisResult<Vec<Shard>> {
        if node_count == 0 {
            return Err(IrisError::invalid_parameter("node count must be positive"));
        }
        let assignment = self.assign(base, node_count)?;
        Ok(assignment.into_shards(dataset, self.kind()))
    }
}
