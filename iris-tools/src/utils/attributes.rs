/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Categorical attributes for base vectors and equality predicates for queries.

use std::{io::Write, ops::RangeInclusive, path::Path};

use csv::ReaderBuilder;
use iris_utils::{
    io::write_atomically,
    random::{create_rnd_from_seed, StandardRng},
    IrisError, IrisResult,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Attribute values drawn when nothing else is configured.
pub const DEFAULT_ATTRIBUTE_RANGE: RangeInclusive<i32> = 1..=12;

/// The finite set of values an attribute (or predicate) can take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<i32>", into = "Vec<i32>")]
pub struct AttributeDomain(Vec<i32>);

impl AttributeDomain {
    pub fn new(values: Vec<i32>) -> IrisResult<Self> {
        if values.is_empty() {
            return Err(IrisError::invalid_parameter(
                "attribute domain must not be empty",
            ));
        }
        Ok(Self(values))
    }

    pub fn from_range(range: RangeInclusive<i32>) -> IrisResult<Self> {
        Self::new(range.collect())
    }

    pub fn values(&self) -> &[i32] {
        &self.0
    }

    pub fn contains(&self, value: i32) -> bool {
        self.0.contains(&value)
    }

    fn draw(&self, rng: &mut impl Rng) -> i32 {
        self.0[rng.random_range(0..self.0.len())]
    }
}

impl Default for AttributeDomain {
    fn default() -> Self {
        Self(DEFAULT_ATTRIBUTE_RANGE.collect())
    }
}

impl TryFrom<Vec<i32>> for AttributeDomain {
    type Error = IrisError;

    fn try_from(values: Vec<i32>) -> IrisResult<Self> {
        Self::new(values)
    }
}

impl From<AttributeDomain> for Vec<i32> {
    fn from(domain: AttributeDomain) -> Self {
        domain.0
    }
}

/// One attribute value per vector; the index is the vector id.
///
/// Query predicates use the same representation, see [`PredicateAssignment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeAssignment(Vec<i32>);

/// One predicate value per query; the index is the query id.
pub type PredicateAssignment = AttributeAssignment;

impl AttributeAssignment {
    pub fn new(values: Vec<i32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<i32> {
        self.0.get(i).copied()
    }

    pub fn values(&self) -> &[i32] {
        &self.0
    }

    /// Writes one value per line, in index order.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> IrisResult<()> {
        let path = path.as_ref();
        write_atomically(path, |writer| {
            for value in &self.0 {
                writeln!(writer, "{value}")?;
            }
            Ok(())
        })?;
        debug!(path = %path.display(), count = self.0.len(), "wrote attribute file");
        Ok(())
    }

    pub fn read_csv(path: impl AsRef<Path>) -> IrisResult<Self> {
        let path = path.as_ref();
        let mut reader = ReaderBuilder::new().has_headers(false).from_path(path)?;

        let mut values = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let field = record.get(0).unwrap_or_default().trim();
            let value = field.parse::<i32>().map_err(|err| {
                IrisError::format(path, format!("line {}: \"{field}\": {err}", line + 1))
            })?;
            values.push(value);
        }
        Ok(Self(values))
    }
}

/// Draws an attribute for each of `base_count` base vectors, uniformly from `domain`.
pub fn assign_attributes(
    base_count: usize,
    domain: &AttributeDomain,
    seed: u64,
) -> AttributeAssignment {
    assign_with_rng(base_count, domain, &mut create_rnd_from_seed(seed))
}

/// Draws a predicate value for each of `query_count` queries, uniformly from `domain`.
pub fn assign_predicates(
    query_count: usize,
    domain: &AttributeDomain,
    seed: u64,
) -> PredicateAssignment {
    assign_with_rng(query_count, domain, &mut create_rnd_from_seed(seed))
}

/// Draws `count` values from `domain` using a caller-provided generator.
pub fn assign_with_rng(
    count: usize,
    domain: &AttributeDomain,
    rng: &mut StandardRng,
) -> AttributeAssignment {
    AttributeAssignment((0..count).map(|_| domain.draw(rng)).collect())
}

/// Generates attributes for `count` vectors and writes them to `output_file`.
pub fn generate_attribute_file(
    output_file: &Path,
    count: usize,
    domain: &AttributeDomain,
    seed: u64,
) -> IrisResult<AttributeAssignment> {
    let assignment = assign_attributes(count, domain, seed);
    assignment.write_csv(output_file)?;
    info!("Attributes written to {}.", output_file.display());
    Ok(assignment)
}
