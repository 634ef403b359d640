/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::path::PathBuf;

use clap::Parser;
use iris_tools::utils::{init_subscriber, write_random_data, DataType};
use iris_utils::{random::DEFAULT_SEED, IrisError, IrisResult};

#[derive(Debug, Parser)]
struct RandomDataGeneratorArgs {
    /// data type <float/int>
    #[arg(long = "data_type", value_enum, required = true)]
    pub data_type: DataType,

    /// File name for saving the random vectors
    #[arg(long = "output_file", required = true)]
    pub output_file: PathBuf,

    /// Dimensionality of the vector
    #[arg(long = "ndims", short = 'D', required = true)]
    pub number_of_dimensions: usize,

    /// Number of vectors
    #[arg(long = "npts", short = 'N', required = true)]
    pub number_of_vectors: u64,

    /// Norm of the vectors.  Vectors are random points on a sphere and 'norm' is its radius.
    /// If 'norm' is too small, integer data can round to all zeros.
    #[arg(long = "norm", default_value_t = 150.0)]
    pub norm: f32,

    #[arg(long = "seed", default_value_t = DEFAULT_SEED)]
    pub seed: u64,
}

fn main() -> IrisResult<()> {
    init_subscriber();
    let args: RandomDataGeneratorArgs = RandomDataGeneratorArgs::parse();

    if args.norm <= 0.0 || !args.norm.is_finite() {
        return Err(IrisError::invalid_parameter(
            "Error: Norm must be a positive number",
        ));
    }

    match write_random_data(
        &args.output_file,
        args.data_type,
        args.number_of_dimensions,
        args.number_of_vectors,
        args.norm,
        args.seed,
    ) {
        Ok(_) => {
            tracing::info!("Successfully generated random data");
            Ok(())
        }
        Err(err) => {
            tracing::error!("Error: {:?}", err);
            Err(err)
        }
    }
}
