/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! CSV summaries consumed by the plotting scripts. Column names are part of the file
//! format and must not change.

use std::path::Path;

use iris_utils::{io::write_atomically, IrisResult};
use serde::{Deserialize, Serialize};

/// A row of an evaluation summary. Fields serialize in the order of `HEADERS`.
pub trait SummaryRow: Serialize {
    const HEADERS: &'static [&'static str];
}

/// One point of a latency/throughput curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyThroughputRow {
    pub latency_ms: f64,
    pub throughput_qps: f64,
}

impl SummaryRow for LatencyThroughputRow {
    const HEADERS: &'static [&'static str] = &["Latency (ms)", "Throughput (queries/s)"];
}

/// One sweep point comparing the filtered-search systems.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemComparisonRow {
    pub acorn_latency_us: f64,
    pub acorn_queries_per_us: f64,
    pub acorn_recall_at_10: f64,
    pub oak_latency_us: f64,
    pub oak_queries_per_us: f64,
    pub oak_recall_at_10: f64,
    pub sub_latency_us: f64,
    pub sub_queries_per_us: f64,
    pub sub_recall_at_10: f64,
}

impl SummaryRow for SystemComparisonRow {
    const HEADERS: &'static [&'static str] = &[
        "ACORN Latency (microseconds)",
        "ACORN Queries per microsecond",
        "ACORN Recall@10",
        "OAK Latency (microseconds)",
        "OAK Queries per microsecond",
        "OAK Recall@10",
        "SUB Latency (microseconds)",
        "SUB Queries per microsecond",
        "SUB Recall@10",
    ];
}

/// Writes `rows` under the fixed header line of `R`.
pub fn write_summary<R: SummaryRow>(path: impl AsRef<Path>, rows: &[R]) -> IrisResult<()> {
    write_atomically(path, |writer| {
        let mut csv = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        csv.write_record(R::HEADERS)?;
        for row in rows {
            csv.serialize(row)?;
        }
        csv.flush()?;
        Ok(())
    })
}
