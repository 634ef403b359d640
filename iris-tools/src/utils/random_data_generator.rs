/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{io::Write, path::Path};

use byteorder::{LittleEndian, WriteBytesExt};
use iris_utils::{io::write_atomically, random::create_rnd_from_seed, IrisError, IrisResult};
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::debug;

use crate::utils::DataType;

const BLOCK_SIZE: u64 = 131_072;

/**
Generate random points on a sphere with the specified radius and write them to a vector
file of the given element type.

Integer files round every coordinate, so a small radius can produce all-zero vectors,
which is reported as an error. Nothing is left at `output_file` on failure.
 */
pub fn write_random_data(
    output_file: impl AsRef<Path>,
    data_type: DataType,
    number_of_dimensions: usize,
    number_of_vectors: u64,
    radius: f32,
    seed: u64,
) -> IrisResult<()> {
    if number_of_dimensions == 0 || number_of_dimensions > u32::MAX as usize {
        return Err(IrisError::invalid_parameter(format!(
            "cannot generate {number_of_dimensions}-dimensional vectors"
        )));
    }
    if number_of_vectors > u32::MAX as u64 {
        return Err(IrisError::invalid_parameter(format!(
            "{number_of_vectors} vectors exceed the 32-bit id space"
        )));
    }

    let mut rng = create_rnd_from_seed(seed);
    write_atomically(output_file, |writer| {
        let mut found_nonzero = false;
        let mut vector = vec![0.0f32; number_of_dimensions];
        let nblks = u64::div_ceil(number_of_vectors, BLOCK_SIZE);
        for blk in 0..nblks {
            let cblk_size = std::cmp::min(number_of_vectors - blk * BLOCK_SIZE, BLOCK_SIZE);
            for _ in 0..cblk_size {
                fill_on_sphere(&mut vector, radius, &mut rng);
                writer.write_u32::<LittleEndian>(number_of_dimensions as u32)?;
                found_nonzero |= write_vector(writer, data_type, &vector)?;
            }
            debug!(block = blk + 1, of = nblks, "generated random vectors");
        }

        if found_nonzero || number_of_vectors == 0 {
            Ok(())
        } else {
            Err(IrisError::invalid_parameter(format!(
                "generated all-zero vectors with radius {radius}, try increasing radius"
            )))
        }
    })
}

fn fill_on_sphere(vector: &mut [f32], radius: f32, rng: &mut impl Rng) {
    for value in vector.iter_mut() {
        *value = rng.sample(StandardNormal);
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    let scale = if norm > 0.0 { radius / norm } else { 0.0 };
    for value in vector.iter_mut() {
        *value *= scale;
    }
}

/// Writes the coordinates in the file's element type. Returns whether any of them is
/// non-zero once converted.
fn write_vector<W: Write>(writer: &mut W, data_type: DataType, vector: &[f32]) -> IrisResult<bool> {
    let mut found_nonzero = false;
    match data_type {
        DataType::Float => {
            for &value in vector {
                writer.write_f32::<LittleEndian>(value)?;
                found_nonzero |= value != 0.0 && value.is_finite();
            }
        }
        DataType::Int => {
            for value in vector.iter().map(|v| v.round() as i32) {
                writer.write_i32::<LittleEndian>(value)?;
                found_nonzero |= value != 0;
            }
        }
    }
    Ok(found_nonzero)
}
