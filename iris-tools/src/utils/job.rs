/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::Context;
use iris_utils::{
    io::{self, LoadMode, DEFAULT_IN_MEMORY_LIMIT},
    random::{create_rnd_provider_from_seed, RandomProvider, StandardRng, DEFAULT_SEED},
    CancelFlag, IrisError, IrisResult, VecElement,
};
use serde::{Deserialize, Serialize};

use crate::utils::{
    attributes::AttributeDomain,
    data_type::DataType,
    ground_truth::{GroundTruthProvenance, DEFAULT_RECALL_AT},
    partition::{
        BalanceOptions, GraphOptions, LshOptions, PartitionOptions, StrategyKind,
    },
};

/// Everything needed to prepare one dataset for a distributed benchmark sweep.
///
/// Loaded from JSON; only the dataset name and the three paths are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrepareJob {
    /// Prefix of every generated file.
    pub dataset_name: String,
    pub base_file: PathBuf,
    pub query_file: PathBuf,
    pub output_directory: PathBuf,

    #[serde(default)]
    pub data_type: DataType,

    /// Prepare these leading subsets of the base instead of the whole file. Each subset
    /// is its own dataset, named `{dataset_name}{size}` with sizes such as `1M`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subset_sizes: Vec<usize>,

    /// Set on the per-subset jobs returned by [`PrepareJob::datasets`].
    #[serde(skip)]
    pub base_limit: Option<usize>,

    /// Partition strategy names, parsed per configuration.
    #[serde(default = "default_architectures")]
    pub architectures: Vec<String>,

    /// Node counts to partition for.
    #[serde(default = "default_cluster_sizes")]
    pub cluster_sizes: Vec<usize>,

    #[serde(default = "default_recall_at")]
    pub recall_at: usize,

    #[serde(default)]
    pub attribute_domain: AttributeDomain,

    #[serde(default)]
    pub load_mode: LoadMode,

    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: u64,

    /// Keep an existing ground-truth file if it matches the queries and `recall_at`.
    #[serde(default = "default_true")]
    pub reuse_ground_truth: bool,

    /// Run partition configurations concurrently.
    #[serde(default)]
    pub parallel_sweep: bool,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Worker threads; 0 uses every logical CPU.
    #[serde(default)]
    pub num_threads: usize,

    #[serde(default)]
    pub balance: BalanceOptions,

    #[serde(default)]
    pub graph: GraphOptions,

    #[serde(default)]
    pub lsh: LshOptions,
}

fn default_architectures() -> Vec<String> {
    StrategyKind::ALL.iter().map(|k| k.name().to_string()).collect()
}

fn default_cluster_sizes() -> Vec<usize> {
    vec![1, 2, 5, 10]
}

fn default_recall_at() -> usize {
    DEFAULT_RECALL_AT
}

fn default_memory_limit() -> u64 {
    DEFAULT_IN_MEMORY_LIMIT
}

fn default_true() -> bool {
    true
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

/// Random streams derived from the job seed.
pub const ATTRIBUTE_STREAM: u64 = 1;
pub const PREDICATE_STREAM: u64 = 2;
pub const PARTITION_STREAM: u64 = 3;

/// One point of the sweep: a strategy name and a node count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigKey {
    pub architecture: String,
    pub cluster_size: usize,
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} nodes", self.architecture, self.cluster_size)
    }
}

impl PrepareJob {
    /// Load and validate a job from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("while opening job file {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let job: Self = serde_json::from_reader(reader)
            .with_context(|| format!("while parsing job file {}", path.display()))?;
        job.validate()
            .with_context(|| format!("while validating job file {}", path.display()))?;
        Ok(job)
    }

    /// A job with every field spelled out, for `--example`.
    pub fn example() -> Self {
        Self {
            dataset_name: "sift".to_string(),
            base_file: PathBuf::from("data/sift/sift_base.fvecs"),
            query_file: PathBuf::from("data/sift/sift_query.fvecs"),
            output_directory: PathBuf::from("prepared/sift"),
            data_type: DataType::Float,
            subset_sizes: Vec::new(),
            base_limit: None,
            architectures: default_architectures(),
            cluster_sizes: default_cluster_sizes(),
            recall_at: DEFAULT_RECALL_AT,
            attribute_domain: AttributeDomain::default(),
            load_mode: LoadMode::Auto,
            memory_limit_bytes: DEFAULT_IN_MEMORY_LIMIT,
            reuse_ground_truth: true,
            parallel_sweep: false,
            seed: DEFAULT_SEED,
            num_threads: 0,
            balance: BalanceOptions::default(),
            graph: GraphOptions::default(),
            lsh: LshOptions::default(),
        }
    }

    /// Checks the fields that would otherwise fail every configuration. Strategy names
    /// are not checked here; an unknown one only fails its own configurations.
    pub fn validate(&self) -> IrisResult<()> {
        if self.dataset_name.is_empty()
            || self
                .dataset_name
                .contains(|c: char| c == '/' || c == '\\')
        {
            return Err(IrisError::invalid_parameter(format!(
                "dataset_name \"{}\" must be a non-empty file name prefix",
                self.dataset_name
            )));
        }
        if self.cluster_sizes.is_empty() || self.cluster_sizes.contains(&0) {
            return Err(IrisError::invalid_parameter(
                "cluster_sizes must list at least one positive node count",
            ));
        }
        if self.recall_at == 0 {
            return Err(IrisError::invalid_parameter("recall_at must be positive"));
        }
        if self.subset_sizes.contains(&0) {
            return Err(IrisError::invalid_parameter(
                "subset_sizes must be positive",
            ));
        }
        let mut labels: Vec<String> = self.subset_sizes.iter().map(|&n| size_label(n)).collect();
        labels.sort_unstable();
        if let Some(pair) = labels.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(IrisError::invalid_parameter(format!(
                "subset size {} is listed twice",
                pair[0]
            )));
        }
        Ok(())
    }

    /// The datasets this job prepares: the job itself, or one job per subset size with
    /// its own name and base limit.
    pub fn datasets(&self) -> Vec<PrepareJob> {
        if self.subset_sizes.is_empty() {
            return vec![self.clone()];
        }
        self.subset_sizes
            .iter()
            .map(|&size| PrepareJob {
                dataset_name: format!("{}{}", self.dataset_name, size_label(size)),
                subset_sizes: Vec::new(),
                base_limit: Some(size),
                ..self.clone()
            })
            .collect()
    }

    /// Every architecture x cluster size, in the order they are listed.
    pub fn configurations(&self) -> Vec<ConfigKey> {
        self.architectures
            .iter()
            .flat_map(|architecture| {
                self.cluster_sizes.iter().map(move |&cluster_size| ConfigKey {
                    architecture: architecture.clone(),
                    cluster_size,
                })
            })
            .collect()
    }

    pub fn random_provider(&self) -> RandomProvider<StandardRng> {
        create_rnd_provider_from_seed(self.seed)
    }

    pub fn partition_options(&self, cancel: &CancelFlag) -> PartitionOptions {
        PartitionOptions {
            seed: self.random_provider().derive_seed(PARTITION_STREAM),
            num_threads: self.num_threads,
            balance: self.balance.clone(),
            graph: self.graph.clone(),
            lsh: self.lsh.clone(),
            cancel: cancel.clone(),
        }
    }

    pub fn ground_truth_path(&self) -> PathBuf {
        self.output_directory
            .join(format!("{}_groundtruth.ivecs", self.dataset_name))
    }

    /// Inputs the ground truth was computed from, next to it.
    pub fn ground_truth_provenance_path(&self) -> PathBuf {
        GroundTruthProvenance::path_for(&self.ground_truth_path())
    }

    pub fn filtered_ground_truth_path(&self) -> PathBuf {
        self.output_directory
            .join(format!("{}_filtered_groundtruth.csv", self.dataset_name))
    }

    pub fn unsatisfied_queries_path(&self) -> PathBuf {
        self.output_directory
            .join(format!("{}_unsatisfied_queries.csv", self.dataset_name))
    }

    /// `{base_stem}.csv` in the output directory, prefixed with the dataset name for
    /// subsets.
    pub fn attributes_path(&self) -> PathBuf {
        self.output_directory
            .join(format!("{}.csv", self.output_stem(&self.base_file)))
    }

    /// `{query_stem}.csv` in the output directory, prefixed with the dataset name for
    /// subsets.
    pub fn predicates_path(&self) -> PathBuf {
        self.output_directory
            .join(format!("{}.csv", self.output_stem(&self.query_file)))
    }

    /// The copy of the base vectors (or of the subset) in the output directory.
    pub fn base_copy_path(&self) -> PathBuf {
        self.output_directory.join(format!(
            "{}.{}",
            self.output_stem(&self.base_file),
            self.data_type.extension()
        ))
    }

    /// The query file's copy in the output directory.
    pub fn query_copy_path(&self) -> PathBuf {
        match self.query_file.file_name() {
            Some(name) => self.output_directory.join(name),
            None => self.output_directory.join(format!(
                "{}_query.{}",
                self.dataset_name,
                self.data_type.extension()
            )),
        }
    }
}

impl PrepareJob {
    fn output_stem(&self, source: &Path) -> String {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "vectors".to_string());
        match self.base_limit {
            Some(_) => format!("{}_{stem}", self.dataset_name),
            None => stem,
        }
    }
}

/// `1000000` -> `1M`, `2500` -> `2500`: the largest of K, M, B that divides `size`.
pub fn size_label(size: usize) -> String {
    [(1_000_000_000, "B"), (1_000_000, "M"), (1_000, "K")]
        .iter()
        .find(|(unit, _)| size >= *unit && size % unit == 0)
        .map(|(unit, suffix)| format!("{}{suffix}", size / unit))
        .unwrap_or_else(|| size.to_string())
}

/// Scratch storage the job needs, in bytes: the base and query files, and for every
/// prepared dataset a copy of its base and of the queries, every shard file, the ground
/// truth, and the attribute files.
///
/// This is the only figure a provisioning descriptor needs from a job.
pub fn storage_requirement_bytes(job: &PrepareJob) -> IrisResult<u64> {
    match job.data_type {
        DataType::Float => storage_requirement::<f32>(job),
        DataType::Int => storage_requirement::<i32>(job),
    }
}

fn storage_requirement<T: VecElement>(job: &PrepareJob) -> IrisResult<u64> {
    let base = io::read_mapped::<T>(&job.base_file)?;
    let queries = io::read_mapped::<T>(&job.query_file)?;
    let query_bytes = queries.size_in_bytes();

    // Subsets share one copy of the queries.
    let mut total = base.size_in_bytes() + 2 * query_bytes;
    for dataset in job.datasets() {
        let num_base = dataset.base_limit.unwrap_or(base.len()).min(base.len());
        let base_bytes = base.prefix(num_base)?.size_in_bytes();
        total += base_bytes + dataset_artifact_bytes(&dataset, num_base, queries.len(), base_bytes);
    }
    Ok(total)
}

/// Shards, ground truth, attributes, and filtered ground truth of one dataset.
fn dataset_artifact_bytes(
    job: &PrepareJob,
    num_base: usize,
    num_queries: usize,
    base_bytes: u64,
) -> u64 {
    // Every partitioned configuration stores each base record exactly once; full
    // replication writes a single file shared by all cluster sizes.
    let mut shard_bytes = 0u64;
    for architecture in &job.architectures {
        match architecture.parse::<StrategyKind>() {
            Ok(StrategyKind::FullReplication) => shard_bytes += base_bytes,
            Ok(_) => shard_bytes += base_bytes * job.cluster_sizes.len() as u64,
            Err(_) => {}
        }
    }

    let k = job.recall_at.min(num_base) as u64;
    let ground_truth_bytes = num_queries as u64 * (k + 1) * 4;

    let widest_value = job
        .attribute_domain
        .values()
        .iter()
        .map(|v| v.to_string().len())
        .max()
        .unwrap_or(1) as u64;
    let attribute_bytes = (num_base + num_queries) as u64 * (widest_value + 1);
    let filtered_bytes = num_queries as u64 * (u32::MAX.to_string().len() as u64 + 1);

    shard_bytes + ground_truth_bytes + attribute_bytes + filtered_bytes
}

#[cfg(test)]
mod tests {
    use iris_utils::{ErrorKind, VectorCollection};
    use rstest::rstest;

    use super::*;
    use crate::utils::test_utils::write_collection;

    fn minimal_json() -> &'static str {
        r#"{
            "dataset_name": "demo",
            "base_file": "base.fvecs",
            "query_file": "query.fvecs",
            "output_directory": "out"
        }"#
    }

    #[test]
    fn optional_fields_take_defaults() {
        let job: PrepareJob = serde_json::from_str(minimal_json()).unwrap();
        assert_eq!(job.cluster_sizes, vec![1, 2, 5, 10]);
        assert_eq!(job.recall_at, 100);
        assert_eq!(job.architectures.len(), 4);
        assert_eq!(job.attribute_domain, AttributeDomain::default());
        assert_eq!(job.load_mode, LoadMode::Auto);
        assert!(job.reuse_ground_truth);
        assert!(!job.parallel_sweep);
        assert_eq!(job.seed, DEFAULT_SEED);
        job.validate().unwrap();
    }

    #[test]
    fn example_round_trips() {
        let text = serde_json::to_string_pretty(&PrepareJob::example()).unwrap();
        let back: PrepareJob = serde_json::from_str(&text).unwrap();
        assert_eq!(back, PrepareJob::example());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let text = minimal_json().replace("\"dataset_name\"", "\"bogus\": 1, \"dataset_name\"");
        assert!(serde_json::from_str::<PrepareJob>(&text).is_err());
    }

    #[test]
    fn load_reports_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = PrepareJob::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("job.json"));

        std::fs::write(&path, minimal_json()).unwrap();
        assert_eq!(PrepareJob::load(&path).unwrap().dataset_name, "demo");
    }

    #[rstest]
    #[case::empty_name(r#""dataset_name": """#)]
    #[case::path_name(r#""dataset_name": "a/b""#)]
    #[case::zero_nodes(r#""cluster_sizes": [1, 0]"#)]
    #[case::no_nodes(r#""cluster_sizes": []"#)]
    #[case::zero_k(r#""recall_at": 0"#)]
    fn invalid_jobs(#[case] field: &str) {
        let mut job: serde_json::Value = serde_json::from_str(minimal_json()).unwrap();
        let patch: serde_json::Value = serde_json::from_str(&format!("{{{field}}}")).unwrap();
        for (key, value) in patch.as_object().unwrap() {
            job[key] = value.clone();
        }
        let job: PrepareJob = serde_json::from_value(job).unwrap();
        assert_eq!(job.validate().unwrap_err().kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn configurations_cover_the_grid() {
        let mut job = PrepareJob::example();
        job.architectures = vec!["random".into(), "kmeans".into()];
        job.cluster_sizes = vec![2, 5];
        let keys: Vec<String> = job.configurations().iter().map(|k| k.to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "random x 2 nodes",
                "random x 5 nodes",
                "kmeans x 2 nodes",
                "kmeans x 5 nodes"
            ]
        );
    }

    #[test]
    fn derived_paths() {
        let job = PrepareJob::example();
        let out = Path::new("prepared/sift");
        assert_eq!(job.ground_truth_path(), out.join("sift_groundtruth.ivecs"));
        assert_eq!(job.attributes_path(), out.join("sift_base.csv"));
        assert_eq!(job.predicates_path(), out.join("sift_query.csv"));
        assert_eq!(job.query_copy_path(), out.join("sift_query.fvecs"));
        assert_eq!(job.base_copy_path(), out.join("sift_base.fvecs"));
        assert_eq!(
            job.ground_truth_provenance_path(),
            out.join("sift_groundtruth.json")
        );
        assert_eq!(
            job.filtered_ground_truth_path(),
            out.join("sift_filtered_groundtruth.csv")
        );
    }

    #[test]
    fn storage_requirement_counts_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let base = VectorCollection::from_flat(2, &[0.0f32; 20]).unwrap();
        let queries = VectorCollection::from_flat(2, &[0.0f32; 4]).unwrap();
        let mut job = PrepareJob::example();
        job.base_file = write_collection(dir.path(), "b.fvecs", &base);
        job.query_file = write_collection(dir.path(), "q.fvecs", &queries);
        job.architectures = vec!["full_replication".into(), "random".into(), "nope".into()];
        job.cluster_sizes = vec![2, 5];
        job.recall_at = 3;

        // 10 base records of 12 bytes, 2 query records.
        let base_bytes = 120;
        let query_bytes = 24;
        let shards = base_bytes + 2 * base_bytes;
        let ground_truth = 2 * 4 * 4;
        let attributes = 12 * 3;
        let filtered = 2 * 11;
        assert_eq!(
            storage_requirement_bytes(&job).unwrap(),
            2 * base_bytes + 2 * query_bytes + shards + ground_truth + attributes + filtered
        );

        // A 4-vector subset: 48 base bytes, its own copy, shards and outputs.
        job.subset_sizes = vec![4];
        let subset_bytes = 48;
        let subset = subset_bytes + 3 * subset_bytes + 2 * 4 * 4 + 6 * 3 + filtered;
        assert_eq!(
            storage_requirement_bytes(&job).unwrap(),
            base_bytes + 2 * query_bytes + subset
        );
    }

    #[rstest]
    #[case(1_000_000, "1M")]
    #[case(10_000_000, "10M")]
    #[case(2_000_000_000, "2B")]
    #[case(5_000, "5K")]
    #[case(1_500_000, "1500K")]
    #[case(2_500, "2500")]
    #[case(999, "999")]
    fn subset_labels(#[case] size: usize, #[case] label: &str) {
        assert_eq!(size_label(size), label);
    }

    #[test]
    fn subsets_become_datasets() {
        let mut job = PrepareJob::example();
        assert_eq!(job.datasets(), vec![job.clone()]);

        job.dataset_name = "deep".into();
        job.base_file = PathBuf::from("data/deep1M_learn.fvecs");
        job.subset_sizes = vec![1_000_000, 10_000_000];
        job.validate().unwrap();
        let datasets = job.datasets();
        let names: Vec<&str> = datasets.iter().map(|d| d.dataset_name.as_str()).collect();
        assert_eq!(names, vec!["deep1M", "deep10M"]);
        assert_eq!(datasets[1].base_limit, Some(10_000_000));
        assert!(datasets[1].subset_sizes.is_empty());

        let out = Path::new("prepared/sift");
        assert_eq!(
            datasets[0].ground_truth_path(),
            out.join("deep1M_groundtruth.ivecs")
        );
        assert_eq!(
            datasets[0].ground_truth_provenance_path(),
            out.join("deep1M_groundtruth.json")
        );
        assert_eq!(
            datasets[0].attributes_path(),
            out.join("deep1M_deep1M_learn.csv")
        );
        assert_eq!(
            datasets[0].base_copy_path(),
            out.join("deep1M_deep1M_learn.fvecs")
        );
        assert_eq!(datasets[0].query_copy_path(), job.query_copy_path());

        job.subset_sizes = vec![1_000_000, 0];
        assert!(job.validate().is_err());
        job.subset_sizes = vec![1_000_000, 1_000_000];
        assert!(job.validate().is_err());
    }
}
