/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Ground truth for equality-filtered queries.
//!
//! The filtered answer of a query is its nearest base vector whose attribute equals the
//! query's predicate. It is looked up inside the query's unfiltered top-K list only, so
//! a query whose matching vectors all rank below K is reported as unsatisfied even though
//! a match exists further out. Raising K narrows that gap.

use std::{collections::BTreeSet, io::Write, path::Path};

use iris_utils::{io::write_atomically, IrisError, IrisResult};
use tracing::{info, warn};

use crate::utils::{
    attributes::{AttributeAssignment, PredicateAssignment},
    ground_truth::GroundTruth,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredGroundTruth {
    matches: Vec<Option<u32>>,
    unsatisfied: BTreeSet<usize>,
}

impl FilteredGroundTruth {
    pub fn num_queries(&self) -> usize {
        self.matches.len()
    }

    /// The filtered nearest neighbor of query `q`, if one was found.
    pub fn get(&self, q: usize) -> Option<u32> {
        self.matches.get(q).copied().flatten()
    }

    pub fn matches(&self) -> &[Option<u32>] {
        &self.matches
    }

    /// `(query id, matched base id)` for every satisfied query, in query order.
    pub fn positives(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.matches
            .iter()
            .enumerate()
            .filter_map(|(q, m)| m.map(|id| (q, id)))
    }

    /// Query ids with no match in their top-K window, ascending.
    pub fn unsatisfied(&self) -> &BTreeSet<usize> {
        &self.unsatisfied
    }

    pub fn is_unsatisfied(&self, q: usize) -> bool {
        self.unsatisfied.contains(&q)
    }

    pub fn num_satisfied(&self) -> usize {
        self.matches.len() - self.unsatisfied.len()
    }

    /// Writes the matched base id of every satisfied query, one per line, in query order.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> IrisResult<()> {
        write_atomically(path, |writer| {
            for (_, id) in self.positives() {
                writeln!(writer, "{id}")?;
            }
            Ok(())
        })
    }

    /// Writes the id of every unsatisfied query, one per line, ascending.
    pub fn write_unsatisfied_csv(&self, path: impl AsRef<Path>) -> IrisResult<()> {
        write_atomically(path, |writer| {
            for q in &self.unsatisfied {
                writeln!(writer, "{q}")?;
            }
            Ok(())
        })
    }
}

/// Finds, for every query, the best-ranked neighbor in its ground-truth row whose
/// attribute equals the query's predicate.
pub fn filter_ground_truth(
    ground_truth: &GroundTruth,
    attributes: &AttributeAssignment,
    predicates: &PredicateAssignment,
) -> IrisResult<FilteredGroundTruth> {
    if predicates.len() != ground_truth.num_queries() {
        return Err(IrisError::dimension_mismatch(
            "query predicates",
            ground_truth.num_queries(),
            predicates.len(),
        ));
    }

    let mut matches = Vec::with_capacity(ground_truth.num_queries());
    let mut unsatisfied = BTreeSet::new();
    for (q, row) in ground_truth.rows().enumerate() {
        let predicate = predicates.values()[q];
        let mut found = None;
        for &id in row {
            let attribute = attributes.get(id as usize).ok_or_else(|| IrisError::Format {
                path: "attribute table".to_string(),
                reason: format!(
                    "ground truth of query {q} references base id {id} but only {} attributes exist",
                    attributes.len()
                ),
            })?;
            if attribute == predicate {
                found = Some(id);
                break;
            }
        }
        if found.is_none() {
            unsatisfied.insert(q);
        }
        matches.push(found);
    }

    let filtered = FilteredGroundTruth {
        matches,
        unsatisfied,
    };
    if filtered.num_satisfied() == 0 && filtered.num_queries() > 0 {
        warn!(
            num_queries = filtered.num_queries(),
            k = ground_truth.k(),
            "no query found a match in its top-K window"
        );
    }
    info!(
        satisfied = filtered.num_satisfied(),
        unsatisfied = filtered.unsatisfied.len(),
        "filtered ground truth computed"
    );
    Ok(filtered)
}
