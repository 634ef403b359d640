/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use iris_utils::{
    io::{self, LoadMode},
    rayon_util::{create_thread_pool, ParallelIteratorInPool},
    squared_l2, CancelFlag, IrisError, IrisResult, Timer, VecElement, VectorCollection,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use crate::utils::neighbor::{Neighbor, NeighborQueue};

/// Number of base vectors scanned per block.
pub const BASE_BLOCK_SIZE: usize = 10_000;

/// Number of neighbors computed per query unless told otherwise.
pub const DEFAULT_RECALL_AT: usize = 100;

#[derive(Debug, Clone)]
pub struct GroundTruthOptions {
    /// Worker threads; 0 uses every logical CPU.
    pub num_threads: usize,
    pub block_size: usize,
    pub cancel: CancelFlag,
}

impl Default for GroundTruthOptions {
    fn default() -> Self {
        Self {
            num_threads: 0,
            block_size: BASE_BLOCK_SIZE,
            cancel: CancelFlag::default(),
        }
    }
}

/// The exact `k` nearest base ids of every query, row-major.
///
/// Distances are present when the matrix was computed and absent when it was read back
/// from an `.ivecs` file.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth {
    num_queries: usize,
    k: usize,
    ids: Vec<u32>,
    distances: Option<Vec<f32>>,
}

impl GroundTruth {
    pub fn new(
        num_queries: usize,
        k: usize,
        ids: Vec<u32>,
        distances: Option<Vec<f32>>,
    ) -> IrisResult<Self> {
        let expected = num_queries * k;
        if ids.len() != expected {
            return Err(IrisError::dimension_mismatch(
                "ground truth ids",
                expected,
                ids.len(),
            ));
        }
        if let Some(distances) = &distances {
            if distances.len() != expected {
                return Err(IrisError::dimension_mismatch(
                    "ground truth distances",
                    expected,
                    distances.len(),
                ));
            }
        }

        Ok(Self {
            num_queries,
            k,
            ids,
            distances,
        })
    }

    pub fn num_queries(&self) -> usize {
        self.num_queries
    }

    /// Neighbors per query.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Ranked neighbor ids of query `q`, nearest first.
    pub fn row(&self, q: usize) -> &[u32] {
        &self.ids[q * self.k..(q + 1) * self.k]
    }

    pub fn distances(&self, q: usize) -> Option<&[f32]> {
        self.distances
            .as_ref()
            .map(|d| &d[q * self.k..(q + 1) * self.k])
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[u32]> + '_ {
        (0..self.num_queries).map(move |q| self.row(q))
    }

    /// Fails if any id does not name one of `num_base` base vectors.
    pub fn validate_ids(&self, num_base: usize) -> IrisResult<()> {
        match self.ids.iter().position(|&id| id as usize >= num_base) {
            Some(pos) => Err(IrisError::invalid_parameter(format!(
                "ground truth row {} references base id {} but the base holds {} vectors",
                pos / self.k.max(1),
                self.ids[pos],
                num_base
            ))),
            None => Ok(()),
        }
    }

    /// Writes one `k`-dimensional `.ivecs` record per query.
    pub fn write_ivecs(&self, path: impl AsRef<Path>) -> IrisResult<u64> {
        let path = path.as_ref();
        if self.num_queries == 0 || self.k == 0 {
            return Err(IrisError::invalid_parameter(format!(
                "refusing to write an empty ground truth to {}",
                path.display()
            )));
        }
        let ids: &[i32] = bytemuck::cast_slice(&self.ids);
        let collection = VectorCollection::from_flat(self.k, ids)?;
        io::write(path, &collection)
    }

    pub fn read_ivecs(path: impl AsRef<Path>) -> IrisResult<Self> {
        let collection = io::read::<i32>(path)?;
        let mut ids = Vec::with_capacity(collection.len() * collection.dim());
        for row in collection.iter() {
            ids.extend_from_slice(bytemuck::cast_slice::<i32, u32>(row));
        }
        Self::new(collection.len(), collection.dim(), ids, None)
    }
}

/// Records sampled into the base checksum of a [`GroundTruthProvenance`].
const BASE_CHECKSUM_SAMPLES: usize = 1024;

/// The inputs a ground-truth matrix was computed from. Stored as JSON next to the
/// `.ivecs` file; a matrix is only reused when its provenance matches the current inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruthProvenance {
    pub base_file: PathBuf,
    /// Size of the base file on disk.
    pub base_file_bytes: u64,
    /// Vectors taken from the front of the base file.
    pub num_base: usize,
    /// xxh3 over evenly spaced base records.
    pub base_checksum: u64,
    pub query_file: PathBuf,
    pub num_queries: usize,
    /// xxh3 over every query record.
    pub query_checksum: u64,
    pub recall_at: usize,
}

impl GroundTruthProvenance {
    pub fn describe<T: VecElement>(
        base_file: &Path,
        base: &VectorCollection<T>,
        query_file: &Path,
        queries: &VectorCollection<T>,
        recall_at: usize,
    ) -> IrisResult<Self> {
        Ok(Self {
            base_file: base_file.to_path_buf(),
            base_file_bytes: std::fs::metadata(base_file)?.len(),
            num_base: base.len(),
            base_checksum: sampled_checksum(base),
            query_file: query_file.to_path_buf(),
            num_queries: queries.len(),
            query_checksum: xxh3_64(queries.as_bytes()),
            recall_at,
        })
    }

    /// `{ground_truth_stem}.json` next to the ground-truth file.
    pub fn path_for(ground_truth_file: &Path) -> PathBuf {
        ground_truth_file.with_extension("json")
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> IrisResult<()> {
        io::write_atomically(path, |writer| {
            serde_json::to_writer_pretty(&mut *writer, self)?;
            Ok(())
        })
    }

    pub fn read_json(path: impl AsRef<Path>) -> IrisResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn sampled_checksum<T: VecElement>(collection: &VectorCollection<T>) -> u64 {
    let mut hasher = Xxh3::new();
    let step = collection.len().div_ceil(BASE_CHECKSUM_SAMPLES).max(1);
    for i in (0..collection.len()).step_by(step) {
        hasher.update(bytemuck::cast_slice(collection.record(i)));
    }
    if let Some(last) = collection.len().checked_sub(1) {
        hasher.update(bytemuck::cast_slice(collection.record(last)));
    }
    hasher.digest()
}

/// Computes the exact `k` nearest neighbors of every query by brute force.
///
/// The base is scanned in blocks of `options.block_size` vectors; each block is
/// processed in parallel over queries. If `k` exceeds the base size the result is
/// clamped to the base size.
pub fn compute_ground_truth<T: VecElement>(
    base: &VectorCollection<T>,
    queries: &VectorCollection<T>,
    k: usize,
    options: &GroundTruthOptions,
) -> IrisResult<GroundTruth> {
    if base.dim() != queries.dim() {
        return Err(IrisError::dimension_mismatch(
            "query vectors",
            base.dim(),
            queries.dim(),
        ));
    }
    if k == 0 {
        return Err(IrisError::invalid_parameter("recall_at must be positive"));
    }
    if base.is_empty() {
        return Err(IrisError::invalid_parameter(
            "cannot compute ground truth over an empty base",
        ));
    }
    if options.block_size == 0 {
        return Err(IrisError::invalid_parameter("block_size must be positive"));
    }

    let k = if k > base.len() {
        warn!(
            requested = k,
            num_base = base.len(),
            "recall_at exceeds the base size, clamping"
        );
        base.len()
    } else {
        k
    };

    let pool = create_thread_pool(options.num_threads)?;
    let mut queues: Vec<NeighborQueue> =
        (0..queries.len()).map(|_| NeighborQueue::new(k)).collect();

    let num_blocks = base.len().div_ceil(options.block_size);
    for block in 0..num_blocks {
        options.cancel.check()?;
        let start = block * options.block_size;
        let end = (start + options.block_size).min(base.len());

        queues
            .par_iter_mut()
            .enumerate()
            .for_each_in_pool(&pool, |(q, queue)| {
                let query = queries.vector(q);
                for id in start..end {
                    let distance = squared_l2(query, base.vector(id));
                    queue.insert(Neighbor::new(id as u32, distance));
                }
            });
        debug!(block = block + 1, num_blocks, "scanned base block");
    }

    let mut ids = Vec::with_capacity(queries.len() * k);
    let mut distances = Vec::with_capacity(queries.len() * k);
    for queue in queues {
        for nbr in queue.into_vec() {
            ids.push(nbr.id);
            distances.push(nbr.distance);
        }
    }
    GroundTruth::new(queries.len(), k, ids, Some(distances))
}

/// Computes the true nearest neighbors for a set of queries and writes them to a file.
///
/// # Arguments
///
/// * `base_file` - The file containing the base vectors.
/// * `query_file` - The file containing the query vectors.
/// * `ground_truth_file` - The `.ivecs` file to write the ground truth to.
/// * `recall_at` - The number of neighbors to compute for each query.
/// * `load_mode` - How to bring the base file into memory.
pub fn compute_ground_truth_from_files<T: VecElement>(
    base_file: &Path,
    query_file: &Path,
    ground_truth_file: &Path,
    recall_at: usize,
    load_mode: LoadMode,
    options: &GroundTruthOptions,
) -> IrisResult<GroundTruth> {
    let timer = Timer::new();
    let base = io::load::<T>(base_file, load_mode, io::DEFAULT_IN_MEMORY_LIMIT)?;
    let queries = io::read::<T>(query_file)?;
    info!(
        num_base = base.len(),
        num_queries = queries.len(),
        dim = base.dim(),
        recall_at,
        "computing ground truth"
    );

    let ground_truth = compute_ground_truth(&base, &queries, recall_at, options)?;
    ground_truth.write_ivecs(ground_truth_file)?;
    GroundTruthProvenance::describe(base_file, &base, query_file, &queries, recall_at)?
        .write_json(GroundTruthProvenance::path_for(ground_truth_file))?;
    info!(
        path = %ground_truth_file.display(),
        elapsed_seconds = timer.elapsed_seconds(),
        "wrote ground truth"
    );
    Ok(ground_truth)
}

#[cfg(test)]
mod tests {
    use iris_utils::random::create_rnd_in_tests;
    use rand::Rng;
    use rstest::rstest;

    use super::*;

    fn brute_force(base: &VectorCollection<f32>, query: &[f32], k: usize) -> Vec<u32> {
        let mut all: Vec<Neighbor> = base
            .iter()
            .enumerate()
            .map(|(id, v)| Neighbor::new(id as u32, squared_l2(query, v)))
            .collect();
        all.sort_by(|a, b| a.rank(b));
        all.into_iter().take(k).map(|n| n.id).collect()
    }

    fn random_collection(len: usize, dim: usize, rng: &mut impl Rng) -> VectorCollection<f32> {
        let data: Vec<f32> = (0..len * dim).map(|_| rng.random_range(-1.0..1.0)).collect();
        VectorCollection::from_flat(dim, &data).unwrap()
    }

    #[rstest]
    #[case::single_block(BASE_BLOCK_SIZE)]
    #[case::many_blocks(7)]
    fn matches_sorted_scan(#[case] block_size: usize) {
        let mut rng = create_rnd_in_tests();
        let base = random_collection(100, 4, &mut rng);
        let queries = random_collection(5, 4, &mut rng);
        let options = GroundTruthOptions {
            num_threads: 2,
            block_size,
            ..Default::default()
        };

        let gt = compute_ground_truth(&base, &queries, 10, &options).unwrap();
        assert_eq!(gt.num_queries(), 5);
        assert_eq!(gt.k(), 10);
        for (q, query) in queries.iter().enumerate() {
            assert_eq!(gt.row(q), brute_force(&base, query, 10).as_slice());
            let distances = gt.distances(q).unwrap();
            assert!(distances.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn ties_resolve_to_lower_ids() {
        // Four copies of the same point at ids 3, 1, 7, 5 of an otherwise distant base.
        let mut data = vec![100.0f32; 10 * 4];
        for id in [1usize, 3, 5, 7] {
            data[id * 4..(id + 1) * 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        }
        let base = VectorCollection::from_flat(4, &data).unwrap();
        let queries = VectorCollection::from_flat(4, &[1.0f32, 1.0, 1.0, 1.0]).unwrap();
        let options = GroundTruthOptions {
            block_size: 3,
            ..Default::default()
        };

        let gt = compute_ground_truth(&base, &queries, 3, &options).unwrap();
        assert_eq!(gt.row(0), &[1, 3, 5]);
        assert_eq!(gt.distances(0).unwrap(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn k_larger_than_base_is_clamped() {
        let base = VectorCollection::from_flat(2, &[0i32, 0, 1, 1, 5, 5]).unwrap();
        let queries = VectorCollection::from_flat(2, &[4i32, 4]).unwrap();
        let gt = compute_ground_truth(&base, &queries, 10, &GroundTruthOptions::default()).unwrap();
        assert_eq!(gt.k(), 3);
        assert_eq!(gt.row(0), &[2, 1, 0]);
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let base = VectorCollection::from_flat(2, &[0.0f32; 8]).unwrap();
        let queries = VectorCollection::from_flat(4, &[0.0f32; 4]).unwrap();
        let err = compute_ground_truth(&base, &queries, 1, &GroundTruthOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            IrisError::DimensionMismatch {
                expected: 2,
                found: 4,
                ..
            }
        ));
    }

    #[test]
    fn honors_cancellation() {
        let base = VectorCollection::from_flat(1, &[0.0f32; 16]).unwrap();
        let queries = VectorCollection::from_flat(1, &[0.0f32]).unwrap();
        let options = GroundTruthOptions::default();
        options.cancel.cancel();
        let err = compute_ground_truth(&base, &queries, 1, &options).unwrap_err();
        assert!(matches!(err, IrisError::Cancelled));
    }

    #[test]
    fn ivecs_round_trip_drops_distances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gt.ivecs");
        let gt = GroundTruth::new(2, 3, vec![0, 1, 2, 5, 4, 3], Some(vec![0.0; 6])).unwrap();

        gt.write_ivecs(&path).unwrap();
        let loaded = GroundTruth::read_ivecs(&path).unwrap();
        assert_eq!(loaded.num_queries(), 2);
        assert_eq!(loaded.k(), 3);
        assert_eq!(loaded.row(1), &[5, 4, 3]);
        assert!(loaded.distances(0).is_none());
        assert!(loaded.validate_ids(6).is_ok());
        assert!(loaded.validate_ids(5).is_err());
    }

    #[test]
    fn from_files_writes_the_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = create_rnd_in_tests();
        let base_file = dir.path().join("base.fvecs");
        let query_file = dir.path().join("query.fvecs");
        let gt_file = dir.path().join("gt.ivecs");
        io::write(&base_file, &random_collection(50, 3, &mut rng)).unwrap();
        io::write(&query_file, &random_collection(4, 3, &mut rng)).unwrap();

        let gt = compute_ground_truth_from_files::<f32>(
            &base_file,
            &query_file,
            &gt_file,
            5,
            LoadMode::Mapped,
            &GroundTruthOptions::default(),
        )
        .unwrap();
        let loaded = GroundTruth::read_ivecs(&gt_file).unwrap();
        assert_eq!(loaded.rows().collect::<Vec<_>>(), gt.rows().collect::<Vec<_>>());

        let provenance =
            GroundTruthProvenance::read_json(dir.path().join("gt.json")).unwrap();
        assert_eq!(provenance.base_file, base_file);
        assert_eq!(provenance.num_base, 50);
        assert_eq!(provenance.num_queries, 4);
        assert_eq!(provenance.recall_at, 5);
    }

    #[test]
    fn provenance_tracks_input_contents() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = create_rnd_in_tests();
        let base_file = dir.path().join("base.fvecs");
        let query_file = dir.path().join("query.fvecs");
        let base = random_collection(40, 3, &mut rng);
        let queries = random_collection(6, 3, &mut rng);
        io::write(&base_file, &base).unwrap();
        io::write(&query_file, &queries).unwrap();

        let describe = |base: &VectorCollection<f32>, queries: &VectorCollection<f32>, k| {
            GroundTruthProvenance::describe(&base_file, base, &query_file, queries, k).unwrap()
        };
        let original = describe(&base, &queries, 10);
        let path = GroundTruthProvenance::path_for(&dir.path().join("demo_groundtruth.ivecs"));
        assert_eq!(path, dir.path().join("demo_groundtruth.json"));
        original.write_json(&path).unwrap();
        assert_eq!(GroundTruthProvenance::read_json(&path).unwrap(), original);
        assert_eq!(describe(&base, &queries, 10), original);

        // Same shapes, different contents.
        let other_queries = random_collection(6, 3, &mut rng);
        assert_ne!(describe(&base, &other_queries, 10), original);
        let other_base = random_collection(40, 3, &mut rng);
        assert_ne!(describe(&other_base, &queries, 10), original);

        assert_ne!(describe(&base.prefix(20).unwrap(), &queries, 10), original);
        assert_ne!(describe(&base, &queries, 5), original);
    }
}
