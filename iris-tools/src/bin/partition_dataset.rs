/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
use std::path::PathBuf;

use clap::Parser;
use iris_tools::utils::{
    init_subscriber, partition::BalanceOptions, write_shards, DataType, PartitionOptions,
    StrategyKind,
};
use iris_utils::{io, random::DEFAULT_SEED, IrisResult, LoadMode, Timer, VecElement};
use tracing::info;

#[derive(Debug, Parser)]
struct PartitionDatasetArgs {
    /// data type <float/int>
    #[arg(long = "data_type", value_enum, default_value = "float")]
    pub data_type: DataType,

    /// File containing the base vectors (.fvecs / .ivecs)
    #[arg(long = "base_file", required = true)]
    pub base_file: PathBuf,

    /// Prefix of the shard file names
    #[arg(long = "dataset_name", required = true)]
    pub dataset_name: String,

    /// full_replication, random, cluster_balanced or hash_balanced
    #[arg(long = "strategy", required = true)]
    pub strategy: String,

    /// Number of nodes to partition for
    #[arg(long = "nodes", short = 'n', required = true)]
    pub nodes: usize,

    #[arg(long = "output_dir", required = true)]
    pub output_dir: PathBuf,

    #[arg(long = "seed", default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Largest allowed shard size difference; defaults to 1% of the mean shard size
    #[arg(long = "tolerance")]
    pub tolerance: Option<usize>,

    #[arg(long = "max_passes", default_value_t = 10)]
    pub max_passes: usize,

    /// Worker threads, 0 for all cores
    #[arg(long = "num_threads", short = 'T', default_value_t = 0)]
    pub num_threads: usize,
}

fn main() -> IrisResult<()> {
    init_subscriber();
    let timer = Timer::new();
    let args = PartitionDatasetArgs::parse();

    let kind: StrategyKind = args.strategy.parse()?;
    let options = PartitionOptions {
        seed: args.seed,
        num_threads: args.num_threads,
        balance: BalanceOptions {
            tolerance: args.tolerance,
            max_passes: args.max_passes,
        },
        ..Default::default()
    };

    std::fs::create_dir_all(&args.output_dir)?;
    let written = match args.data_type {
        DataType::Float => partition::<f32>(&args, kind, &options)?,
        DataType::Int => partition::<i32>(&args, kind, &options)?,
    };

    for path in &written {
        println!("{}", path.display());
    }
    info!(
        "Wrote {} shard files in {:?}",
        written.len(),
        timer.elapsed()
    );
    Ok(())
}

fn partition<T: VecElement>(
    args: &PartitionDatasetArgs,
    kind: StrategyKind,
    options: &PartitionOptions,
) -> IrisResult<Vec<PathBuf>> {
    let base = io::load::<T>(&args.base_file, LoadMode::Auto, io::DEFAULT_IN_MEMORY_LIMIT)?;
    let strategy = kind.build::<T>(options);
    let shards = strategy.partition(&base, &args.dataset_name, args.nodes)?;
    write_shards(&shards, &base, &args.output_dir, &options.cancel)
}
