/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
use std::path::PathBuf;

use clap::Parser;
use iris_tools::utils::{filter_ground_truth, init_subscriber, AttributeAssignment, GroundTruth};
use iris_utils::IrisResult;
use tracing::info;

#[derive(Debug, Parser)]
struct FilterGroundTruthArgs {
    /// Ground truth (.ivecs) of the unfiltered queries
    #[arg(long = "gt_file", required = true)]
    pub ground_truth_file: PathBuf,

    /// One attribute per base vector
    #[arg(long = "attributes_file", required = true)]
    pub attributes_file: PathBuf,

    /// One predicate per query
    #[arg(long = "predicates_file", required = true)]
    pub predicates_file: PathBuf,

    /// Matched base id of every satisfied query, one per line
    #[arg(long = "output_file", required = true)]
    pub output_file: PathBuf,

    /// Ids of the queries with no match in their ground truth row
    #[arg(long = "unsatisfied_file")]
    pub unsatisfied_file: Option<PathBuf>,
}

fn main() -> IrisResult<()> {
    init_subscriber();
    let args = FilterGroundTruthArgs::parse();

    let ground_truth = GroundTruth::read_ivecs(&args.ground_truth_file)?;
    let attributes = AttributeAssignment::read_csv(&args.attributes_file)?;
    let predicates = AttributeAssignment::read_csv(&args.predicates_file)?;

    let filtered = filter_ground_truth(&ground_truth, &attributes, &predicates)?;
    filtered.write_csv(&args.output_file)?;
    if let Some(path) = &args.unsatisfied_file {
        filtered.write_unsatisfied_csv(path)?;
    }

    info!(
        "{} of {} queries satisfied, written to {}",
        filtered.num_satisfied(),
        filtered.num_queries(),
        args.output_file.display()
    );
    Ok(())
}
