/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
use std::path::PathBuf;

use clap::Parser;
use iris_tools::utils::{
    compute_ground_truth_from_files, init_subscriber, DataType, GroundTruthOptions,
    DEFAULT_RECALL_AT,
};
use iris_utils::{IrisResult, LoadMode, Timer};

fn main() -> IrisResult<()> {
    init_subscriber();
    let timer = Timer::new();

    let args = ComputeGroundTruthArgs::parse();

    tracing::info!("Computing ground truth file");

    let load_mode = if args.mapped {
        LoadMode::Mapped
    } else {
        LoadMode::Auto
    };
    let options = GroundTruthOptions {
        num_threads: args.num_threads,
        ..Default::default()
    };

    let result = match args.data_type {
        DataType::Float => compute_ground_truth_from_files::<f32>(
            &args.base_file,
            &args.query_file,
            &args.ground_truth_file,
            args.recall_at,
            load_mode,
            &options,
        ),
        DataType::Int => compute_ground_truth_from_files::<i32>(
            &args.base_file,
            &args.query_file,
            &args.ground_truth_file,
            args.recall_at,
            load_mode,
            &options,
        ),
    };

    match result {
        Ok(_) => {
            tracing::info!(
                "Compute ground-truth completed successfully in {:?}",
                timer.elapsed()
            );
            Ok(())
        }
        Err(err) => {
            tracing::error!("Error: {:?}", err);
            Err(err)
        }
    }
}

#[derive(Debug, Parser)]
struct ComputeGroundTruthArgs {
    /// data type <float/int>
    #[arg(long = "data_type", value_enum, default_value = "float")]
    pub data_type: DataType,

    /// File containing the base vectors (.fvecs / .ivecs)
    #[arg(long = "base_file", short, required = true)]
    pub base_file: PathBuf,

    /// File containing the query vectors (.fvecs / .ivecs)
    #[arg(long = "query_file", short, required = true)]
    pub query_file: PathBuf,

    /// Path of the .ivecs file to write the ground truth to
    #[arg(long = "gt_file", short, required = true)]
    pub ground_truth_file: PathBuf,

    /// Number of ground truth nearest neighbors to compute
    #[arg(long = "recall_at", short = 'K', default_value_t = DEFAULT_RECALL_AT)]
    pub recall_at: usize,

    /// Always memory-map the base file instead of reading it into memory
    #[arg(long = "mapped")]
    pub mapped: bool,

    /// Worker threads, 0 for all cores
    #[arg(long = "num_threads", short = 'T', default_value_t = 0)]
    pub num_threads: usize,
}
