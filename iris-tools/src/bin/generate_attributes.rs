/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
use std::path::PathBuf;

use clap::Parser;
use iris_tools::utils::{generate_attribute_file, init_subscriber, AttributeDomain};
use iris_utils::{random::DEFAULT_SEED, IrisError, IrisResult};
use tracing::{error, info};

#[derive(Debug, Parser)]
struct GenerateAttributesArgs {
    /// Filename for saving the attribute file
    #[arg(long = "output_file", required = true)]
    pub output_file: PathBuf,

    /// Number of vectors
    #[arg(long = "npts", short = 'N', required = true)]
    pub number_of_vectors: usize,

    /// Smallest attribute value
    #[arg(long = "min_value", default_value_t = 1)]
    pub min_value: i32,

    /// Largest attribute value, inclusive
    #[arg(long = "max_value", default_value_t = 12)]
    pub max_value: i32,

    #[arg(long = "seed", default_value_t = DEFAULT_SEED)]
    pub seed: u64,
}

fn main() -> IrisResult<()> {
    init_subscriber();
    let args = GenerateAttributesArgs::parse();

    if args.number_of_vectors == 0 {
        return Err(IrisError::invalid_parameter(
            "Error: npts must be greater than 0",
        ));
    }
    let domain = AttributeDomain::from_range(args.min_value..=args.max_value)?;

    info!(
        "Generating attributes for {} points from {}..={}.",
        args.number_of_vectors, args.min_value, args.max_value
    );

    match generate_attribute_file(&args.output_file, args.number_of_vectors, &domain, args.seed) {
        Ok(_) => {
            info!("Successfully generated attributes");
            Ok(())
        }
        Err(err) => {
            error!("Attribute generation failed: {:?}", err);
            Err(err)
        }
    }
}
