/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::path::{Path, PathBuf};

use iris_utils::{io, random::create_rnd_from_seed, VecElement, VectorCollection};
use rand::Rng;

pub mod size_constants {
    /// The recommended dataset size for end-to-end tests.
    pub const TEST_DATASET_SIZE_RECOMMENDED: usize = 1000;

    /// The small dataset size for testing the library.
    /// A prime number is used to avoid any accidental patterns in the data.
    pub const TEST_DATASET_SIZE_SMALL: usize = 101;

    /// The recommended query size for end-to-end tests.
    pub const TEST_QUERYSET_SIZE_RECOMMENDED: usize = 10;

    /// The recommended number of dimensions for testing the library.
    pub const TEST_NUM_DIMENSIONS_RECOMMENDED: usize = 8;
}

/// Distance of every cluster center from the origin.
const CLUSTER_SEPARATION: f32 = 100.0;

/// Half-width of the uniform noise around a cluster center.
const CLUSTER_NOISE: f32 = 0.5;

fn push_cluster_point(data: &mut Vec<f32>, cluster: usize, dim: usize, rng: &mut impl Rng) {
    for d in 0..dim {
        let center = if d == cluster % dim {
            CLUSTER_SEPARATION
        } else {
            0.0
        };
        data.push(center + rng.random_range(-CLUSTER_NOISE..CLUSTER_NOISE));
    }
}

/// `num_points` vectors spread over `num_clusters` tight, well separated clusters.
/// Vector `i` belongs to cluster `i % num_clusters`; cluster `c` is centered on axis
/// `c % dim`.
#[allow(clippy::unwrap_used)]
pub fn clustered_collection(
    num_points: usize,
    dim: usize,
    num_clusters: usize,
) -> VectorCollection<f32> {
    let mut rng = create_rnd_from_seed(0);
    let mut data = Vec::with_capacity(num_points * dim);
    for i in 0..num_points {
        push_cluster_point(&mut data, i % num_clusters, dim, &mut rng);
    }
    VectorCollection::from_flat(dim, &data).unwrap()
}

/// Clusters of the given sizes, stored one cluster after another.
#[allow(clippy::unwrap_used)]
pub fn skewed_collection(cluster_sizes: &[usize], dim: usize) -> VectorCollection<f32> {
    let mut rng = create_rnd_from_seed(1);
    let mut data = Vec::new();
    for (cluster, &size) in cluster_sizes.iter().enumerate() {
        for _ in 0..size {
            push_cluster_point(&mut data, cluster, dim, &mut rng);
        }
    }
    VectorCollection::from_flat(dim, &data).unwrap()
}

/// Writes `collection` to `dir/name` and returns the path.
#[allow(clippy::unwrap_used)]
pub fn write_collection<T: VecElement>(
    dir: &Path,
    name: &str,
    collection: &VectorCollection<T>,
) -> PathBuf {
    let path = dir.join(name);
    io::write(&path, collection).unwrap();
    path
}
