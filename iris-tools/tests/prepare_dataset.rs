/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::path::Path;

use iris_tools::utils::{
    init_test_subscriber, knn_recall, prepare_dataset, size_constants::*, write_random_data,
    AttributeAssignment, DataType, GroundTruth, GroundTruthProvenance, KRecallAtN, Memory,
    PrepareJob, SweepOutcome,
};
use iris_utils::{io, CancelFlag};

const DATASET: &str = "synthetic";

fn synthetic_job(dir: &Path) -> PrepareJob {
    let base_file = dir.join("synthetic_base.fvecs");
    let query_file = dir.join("synthetic_query.fvecs");
    write_random_data(
        &base_file,
        DataType::Float,
        TEST_NUM_DIMENSIONS_RECOMMENDED,
        TEST_DATASET_SIZE_RECOMMENDED as u64,
        100.0,
        1,
    )
    .unwrap();
    write_random_data(
        &query_file,
        DataType::Float,
        TEST_NUM_DIMENSIONS_RECOMMENDED,
        TEST_QUERYSET_SIZE_RECOMMENDED as u64,
        100.0,
        2,
    )
    .unwrap();

    let mut job = PrepareJob::example();
    job.dataset_name = DATASET.to_string();
    job.base_file = base_file;
    job.query_file = query_file;
    job.output_directory = dir.join("prepared");
    job.architectures = vec!["full_replication".into(), "random".into()];
    job.cluster_sizes = vec![1, 5];
    job.recall_at = 100;
    job.num_threads = 2;
    job
}

fn read_lines(path: &Path) -> Vec<u32> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| line.trim().parse().unwrap())
        .collect()
}

#[test]
fn end_to_end_preparation() {
    let _guard = init_test_subscriber();
    let dir = tempfile::tempdir().unwrap();
    let job = synthetic_job(dir.path());
    let out = job.output_directory.clone();

    let mut output = Memory::new();
    let report = prepare_dataset(&job, &mut output, &CancelFlag::new()).unwrap();
    assert_eq!(report.outcome(), SweepOutcome::Success, "{}", output.text());

    // Full replication: one file, byte-identical to the base.
    assert_eq!(
        std::fs::read(out.join("synthetic_full_replication.fvecs")).unwrap(),
        std::fs::read(&job.base_file).unwrap()
    );

    // Random over five nodes: five files covering the base, sizes within one vector.
    let sizes: Vec<usize> = (1..=5)
        .map(|i| {
            let path = out.join(format!("synthetic_random_5nodes_node{i}.fvecs"));
            io::read::<f32>(path).unwrap().len()
        })
        .collect();
    assert_eq!(sizes.iter().sum::<usize>(), TEST_DATASET_SIZE_RECOMMENDED);
    let (min, max) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
    assert!(max - min <= 1, "sizes {sizes:?}");

    // Ground truth: one 100-wide row per query, scoring full recall against itself.
    let gt = GroundTruth::read_ivecs(job.ground_truth_path()).unwrap();
    assert_eq!(gt.num_queries(), TEST_QUERYSET_SIZE_RECOMMENDED);
    assert_eq!(gt.k(), 100);
    gt.validate_ids(TEST_DATASET_SIZE_RECOMMENDED).unwrap();
    let results: Vec<Vec<u32>> = gt.rows().map(|r| r.to_vec()).collect();
    let recall = knn_recall(&gt, &results, KRecallAtN::new(10, 100).unwrap()).unwrap();
    assert_eq!(recall, 100.0);

    // The inputs are copied next to the artifacts, and the ground truth records them.
    assert_eq!(
        std::fs::read(job.base_copy_path()).unwrap(),
        std::fs::read(&job.base_file).unwrap()
    );
    let provenance = GroundTruthProvenance::read_json(job.ground_truth_provenance_path()).unwrap();
    assert_eq!(provenance.num_base, TEST_DATASET_SIZE_RECOMMENDED);
    assert_eq!(provenance.num_queries, TEST_QUERYSET_SIZE_RECOMMENDED);
    assert_eq!(provenance.recall_at, 100);

    // Attributes and predicates come from the 1..=12 domain.
    let attributes = AttributeAssignment::read_csv(job.attributes_path()).unwrap();
    let predicates = AttributeAssignment::read_csv(job.predicates_path()).unwrap();
    assert_eq!(attributes.len(), TEST_DATASET_SIZE_RECOMMENDED);
    assert_eq!(predicates.len(), TEST_QUERYSET_SIZE_RECOMMENDED);
    assert!(attributes
        .values()
        .iter()
        .chain(predicates.values())
        .all(|v| (1..=12).contains(v)));

    // Every query is either matched or listed as unsatisfied, and every match is the
    // best-ranked neighbor carrying the query's predicate.
    let matched = read_lines(&job.filtered_ground_truth_path());
    let unsatisfied = read_lines(&job.unsatisfied_queries_path());
    assert_eq!(matched.len() + unsatisfied.len(), TEST_QUERYSET_SIZE_RECOMMENDED);
    let mut matches = matched.iter();
    for q in 0..TEST_QUERYSET_SIZE_RECOMMENDED {
        let predicate = predicates.get(q).unwrap();
        let expected = gt
            .row(q)
            .iter()
            .copied()
            .find(|&id| attributes.get(id as usize) == Some(predicate));
        match expected {
            Some(id) => assert_eq!(matches.next(), Some(&id), "query {q}"),
            None => assert!(unsatisfied.contains(&(q as u32)), "query {q}"),
        }
    }
    assert!(matches.next().is_none());

    // The query file travels with the prepared dataset.
    assert_eq!(
        std::fs::read(job.query_copy_path()).unwrap(),
        std::fs::read(&job.query_file).unwrap()
    );
    assert_eq!(
        std::fs::read_to_string(out.join(".gitignore")).unwrap(),
        "**/*\n!.gitignore\n"
    );
}

#[test]
fn reruns_are_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let mut job = synthetic_job(dir.path());
    job.architectures = vec!["random".into(), "hash_balanced".into()];

    prepare_dataset(&job, &mut Memory::new(), &CancelFlag::new()).unwrap();
    let shard = job
        .output_directory
        .join("synthetic_hash_balanced_5nodes_node2.fvecs");
    let first_shard = std::fs::read(&shard).unwrap();
    let first_attributes = std::fs::read(job.attributes_path()).unwrap();

    job.reuse_ground_truth = false;
    let report = prepare_dataset(&job, &mut Memory::new(), &CancelFlag::new()).unwrap();
    assert_eq!(report.outcome(), SweepOutcome::Success);
    assert_eq!(std::fs::read(&shard).unwrap(), first_shard);
    assert_eq!(std::fs::read(job.attributes_path()).unwrap(), first_attributes);
}
