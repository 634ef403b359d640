/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Recall of approximate search results against exact ground truth.

use std::collections::HashSet;

use thiserror::Error;

use crate::utils::{filtered_ground_truth::FilteredGroundTruth, ground_truth::GroundTruth};

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ComputeRecallError {
    #[error("recall values k and n must both be non-zero (k = {k}, n = {n})")]
    ArgumentIsZero { k: usize, n: usize },
    #[error("recall value k ({k}) must be less than or equal to n ({n})")]
    KGreaterThanN { k: usize, n: usize },
    #[error("got {results} result rows for {ground_truth} ground truth rows")]
    RowsMismatch { results: usize, ground_truth: usize },
    #[error("ground truth holds {available} neighbors per query, recall needs {k}")]
    NotEnoughGroundTruth { k: usize, available: usize },
    #[error("result row {row} holds {available} ids, recall needs {n}")]
    NotEnoughResults { row: usize, n: usize, available: usize },
}

/// Recall of the true top `k` within the top `n` returned results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KRecallAtN {
    k: usize,
    n: usize,
}

impl KRecallAtN {
    pub fn new(k: usize, n: usize) -> Result<Self, ComputeRecallError> {
        if k == 0 || n == 0 {
            Err(ComputeRecallError::ArgumentIsZero { k, n })
        } else if k > n {
            Err(ComputeRecallError::KGreaterThanN { k, n })
        } else {
            Ok(Self { k, n })
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn n(&self) -> usize {
        self.n
    }
}

fn check_results(
    results: &[Vec<u32>],
    num_queries: usize,
    n: usize,
) -> Result<(), ComputeRecallError> {
    if results.len() != num_queries {
        return Err(ComputeRecallError::RowsMismatch {
            results: results.len(),
            ground_truth: num_queries,
        });
    }
    if let Some((row, r)) = results.iter().enumerate().find(|(_, r)| r.len() < n) {
        return Err(ComputeRecallError::NotEnoughResults {
            row,
            n,
            available: r.len(),
        });
    }
    Ok(())
}

/// Average percentage of each query's true top `k` found in its first `n` results.
///
/// When the ground truth carries distances, neighbors tied with the `k`-th distance are
/// also accepted as correct answers.
pub fn knn_recall(
    ground_truth: &GroundTruth,
    results: &[Vec<u32>],
    bounds: KRecallAtN,
) -> Result<f64, ComputeRecallError> {
    let (k, n) = (bounds.k(), bounds.n());
    if ground_truth.k() < k {
        return Err(ComputeRecallError::NotEnoughGroundTruth {
            k,
            available: ground_truth.k(),
        });
    }
    check_results(results, ground_truth.num_queries(), n)?;
    if results.is_empty() {
        return Ok(100.0);
    }

    let mut gt: HashSet<u32> = HashSet::new();
    let mut total_recall = 0.0;
    for (q, result) in results.iter().enumerate() {
        let row = ground_truth.row(q);
        let mut window = k;
        if let Some(distances) = ground_truth.distances(q) {
            while window < row.len() && distances[window] == distances[k - 1] {
                window += 1;
            }
        }

        gt.clear();
        gt.extend(&row[..window]);
        let hits = result[..n]
            .iter()
            .filter(|&&id| gt.contains(&id))
            .count()
            .min(k);
        total_recall += 100.0 * hits as f64 / k as f64;
    }
    Ok(total_recall / results.len() as f64)
}

/// Percentage of satisfied filtered queries whose matched base id appears in the first
/// `n` results. Unsatisfied queries are skipped.
pub fn filtered_recall(
    filtered: &FilteredGroundTruth,
    results: &[Vec<u32>],
    n: usize,
) -> Result<f64, ComputeRecallError> {
    if n == 0 {
        return Err(ComputeRecallError::ArgumentIsZero { k: 1, n });
    }
    check_results(results, filtered.num_queries(), n)?;

    let satisfied = filtered.num_satisfied();
    if satisfied == 0 {
        return Ok(100.0);
    }
    let hits = filtered
        .positives()
        .filter(|&(q, id)| results[q][..n].contains(&id))
        .count();
    Ok(100.0 * hits as f64 / satisfied as f64)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::utils::{attributes::AttributeAssignment, filtered_ground_truth::filter_ground_truth};

    fn ground_truth() -> GroundTruth {
        GroundTruth::new(
            2,
            4,
            vec![0, 1, 2, 3, 10, 11, 12, 13],
            Some(vec![0.0, 1.0, 2.0, 2.0, 0.0, 1.0, 4.0, 9.0]),
        )
        .unwrap()
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 0)]
    #[case(3, 2)]
    fn invalid_bounds(#[case] k: usize, #[case] n: usize) {
        assert!(KRecallAtN::new(k, n).is_err());
    }

    #[test]
    fn perfect_and_partial_recall() {
        let gt = ground_truth();
        let bounds = KRecallAtN::new(2, 2).unwrap();
        let perfect = vec![vec![1, 0], vec![10, 11]];
        assert_eq!(knn_recall(&gt, &perfect, bounds).unwrap(), 100.0);

        let half = vec![vec![0, 7], vec![11, 8]];
        assert_eq!(knn_recall(&gt, &half, bounds).unwrap(), 50.0);
    }

    #[test]
    fn distance_ties_count_as_hits() {
        let gt = ground_truth();
        // Ids 2 and 3 are tied at the third distance, so either satisfies recall 3@3.
        let results = vec![vec![0, 1, 3], vec![10, 11, 12]];
        let recall = knn_recall(&gt, &results, KRecallAtN::new(3, 3).unwrap()).unwrap();
        assert_eq!(recall, 100.0);
    }

    #[test]
    fn shape_errors() {
        let gt = ground_truth();
        let bounds = KRecallAtN::new(1, 2).unwrap();
        assert_eq!(
            knn_recall(&gt, &[vec![0, 1]], bounds),
            Err(ComputeRecallError::RowsMismatch {
                results: 1,
                ground_truth: 2
            })
        );
        assert_eq!(
            knn_recall(&gt, &[vec![0, 1], vec![10]], bounds),
            Err(ComputeRecallError::NotEnoughResults {
                row: 1,
                n: 2,
                available: 1
            })
        );
        assert!(matches!(
            knn_recall(&gt, &[vec![0; 5], vec![0; 5]], KRecallAtN::new(5, 5).unwrap()),
            Err(ComputeRecallError::NotEnoughGroundTruth { k: 5, available: 4 })
        ));
    }

    #[test]
    fn filtered_recall_skips_unsatisfied_queries() {
        let gt = ground_truth();
        let mut attributes = vec![0; 14];
        attributes[2] = 5;
        let filtered = filter_ground_truth(
            &gt,
            &AttributeAssignment::new(attributes),
            &AttributeAssignment::new(vec![5, 6]),
        )
        .unwrap();

        let results = vec![vec![2, 0], vec![10, 11]];
        assert_eq!(filtered_recall(&filtered, &results, 2).unwrap(), 100.0);
        let results = vec![vec![0, 1], vec![10, 11]];
        assert_eq!(filtered_recall(&filtered, &results, 2).unwrap(), 0.0);
    }
}
