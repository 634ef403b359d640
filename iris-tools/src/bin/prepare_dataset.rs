/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use iris_tools::utils::{
    init_subscriber, prepare_dataset, storage_requirement_bytes, DefaultOutput, PrepareJob,
};
use iris_utils::{CancelFlag, Timer};
use tracing::{error, info};

/// Prepare a dataset for a distributed benchmark sweep: ground truth, attributes,
/// filtered ground truth, and shard files for every configuration in the job.
///
/// Exits with 0 when every step succeeded, 2 when some failed, and 1 when nothing
/// could be prepared.
#[derive(Debug, Parser)]
struct PrepareDatasetArgs {
    /// JSON job file
    #[arg(long = "config", required_unless_present = "example")]
    pub config: Option<PathBuf>,

    /// Print an example job file and exit
    #[arg(long = "example")]
    pub example: bool,

    /// Print the scratch storage the job needs, in bytes, and exit
    #[arg(long = "storage_requirement", requires = "config")]
    pub storage_requirement: bool,
}

fn main() -> ExitCode {
    init_subscriber();
    let timer = Timer::new();
    let args = PrepareDatasetArgs::parse();

    if args.example {
        return match serde_json::to_string_pretty(&PrepareJob::example()) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                error!("Error: {err}");
                ExitCode::FAILURE
            }
        };
    }

    let Some(config) = args.config else {
        error!("Error: --config is required");
        return ExitCode::FAILURE;
    };
    let job = match PrepareJob::load(&config) {
        Ok(job) => job,
        Err(err) => {
            error!("Error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    if args.storage_requirement {
        return match storage_requirement_bytes(&job) {
            Ok(bytes) => {
                println!("{bytes}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                error!(kind = %err.kind(), "Error: {err}");
                ExitCode::FAILURE
            }
        };
    }

    let mut output = DefaultOutput::new();
    match prepare_dataset(&job, &mut output, &CancelFlag::new()) {
        Ok(report) => {
            let outcome = report.outcome();
            for failure in &report.failures {
                error!(
                    step = %failure.step,
                    kind = %failure.kind(),
                    "{}",
                    failure.error
                );
            }
            info!(
                "Prepared {} with outcome {:?} in {:?}",
                job.dataset_name,
                outcome,
                timer.elapsed()
            );
            ExitCode::from(outcome.exit_code() as u8)
        }
        Err(err) => {
            error!(kind = %err.kind(), "Error: {err}");
            ExitCode::FAILURE
        }
    }
}
