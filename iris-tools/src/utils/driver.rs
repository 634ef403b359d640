/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Prepares one dataset (or one per requested subset of the base) for a distributed
//! benchmark: ground truth, attribute and predicate files, the filtered ground truth,
//! and the shard files of every architecture x cluster size configuration.
//!
//! Only failures that leave nothing to do (the output directory cannot be created, the
//! base cannot be loaded) abort the run. Everything else is recorded against the step
//! that failed and the remaining steps still run.

use std::{fmt, io::Write, path::PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use iris_utils::{
    io,
    rayon_util::{create_thread_pool, ParallelIteratorInPool},
    CancelFlag, ErrorKind, IrisError, IrisResult, Timer, VecElement, VectorCollection,
};
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::utils::{
    attributes::assign_with_rng,
    data_type::DataType,
    filtered_ground_truth::filter_ground_truth,
    ground_truth::{compute_ground_truth, GroundTruth, GroundTruthOptions, GroundTruthProvenance},
    job::{ConfigKey, PrepareJob, ATTRIBUTE_STREAM, PREDICATE_STREAM},
    output::Output,
    partition::{write_shards, StrategyKind},
};

const GITIGNORE: &str = "**/*\n!.gitignore\n";

/// A unit of work whose failure is reported on its own, named after its dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepStep {
    /// Ground truth, attributes, predicates, filtered ground truth, and the input copies.
    GroundTruth { dataset: String },
    Partition { dataset: String, key: ConfigKey },
}

impl SweepStep {
    pub fn ground_truth(dataset: &str) -> Self {
        SweepStep::GroundTruth {
            dataset: dataset.to_string(),
        }
    }

    pub fn partition(dataset: &str, key: ConfigKey) -> Self {
        SweepStep::Partition {
            dataset: dataset.to_string(),
            key,
        }
    }
}

impl fmt::Display for SweepStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepStep::GroundTruth { dataset } => write!(f, "{dataset} ground truth"),
            SweepStep::Partition { dataset, key } => write!(f, "{dataset} {key}"),
        }
    }
}

#[derive(Debug)]
pub struct StepFailure {
    pub step: SweepStep,
    pub error: IrisError,
}

impl StepFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Success,
    Partial,
    Failure,
}

impl SweepOutcome {
    /// 0 on success, 1 when nothing succeeded, 2 on partial success.
    pub fn exit_code(self) -> i32 {
        match self {
            SweepOutcome::Success => 0,
            SweepOutcome::Failure => 1,
            SweepOutcome::Partial => 2,
        }
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub completed: Vec<SweepStep>,
    pub failures: Vec<StepFailure>,
    /// Every file written, in the order the steps completed.
    pub artifacts: Vec<PathBuf>,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.completed.len() + self.failures.len()
    }

    pub fn outcome(&self) -> SweepOutcome {
        if self.failures.is_empty() {
            SweepOutcome::Success
        } else if self.completed.is_empty() {
            SweepOutcome::Failure
        } else {
            SweepOutcome::Partial
        }
    }

    pub fn failure(&self, step: &SweepStep) -> Option<&StepFailure> {
        self.failures.iter().find(|f| &f.step == step)
    }

    /// `Err(PartialSweepFailure)` unless every step completed.
    pub fn into_result(self) -> IrisResult<Self> {
        match self.outcome() {
            SweepOutcome::Success => Ok(self),
            SweepOutcome::Partial | SweepOutcome::Failure => Err(IrisError::PartialSweepFailure {
                failed: self.failures.len(),
                total: self.total(),
            }),
        }
    }

    fn record(&mut self, step: SweepStep, result: IrisResult<Vec<PathBuf>>) {
        match result {
            Ok(paths) => {
                info!(step = %step, files = paths.len(), "step completed");
                self.artifacts.extend(paths);
                self.completed.push(step);
            }
            Err(error) => {
                error!(step = %step, kind = %error.kind(), "step failed: {error}");
                self.failures.push(StepFailure { step, error });
            }
        }
    }
}

/// Runs every step of `job`. See the module documentation for how failures are handled.
pub fn prepare_dataset(
    job: &PrepareJob,
    output: &mut dyn Output,
    cancel: &CancelFlag,
) -> IrisResult<SweepReport> {
    match job.data_type {
        DataType::Float => prepare::<f32>(job, output, cancel),
        DataType::Int => prepare::<i32>(job, output, cancel),
    }
}

fn prepare<T: VecElement>(
    job: &PrepareJob,
    output: &mut dyn Output,
    cancel: &CancelFlag,
) -> IrisResult<SweepReport> {
    let timer = Timer::new();
    job.validate()?;
    std::fs::create_dir_all(&job.output_directory)?;
    std::fs::write(job.output_directory.join(".gitignore"), GITIGNORE)?;

    let full_base = io::load::<T>(&job.base_file, job.load_mode, job.memory_limit_bytes)?;
    info!(
        path = %job.base_file.display(),
        num_base = full_base.len(),
        dim = full_base.dim(),
        mapped = full_base.is_mapped(),
        "loaded base vectors"
    );

    let mut report = SweepReport::default();
    for dataset in job.datasets() {
        let base = match dataset.base_limit {
            Some(limit) => full_base.prefix(limit),
            None => Ok(full_base.clone()),
        };
        let base = match base {
            Ok(base) => base,
            Err(err) => {
                // Nothing of this dataset can be prepared; its other steps are not run.
                let result = Err(err);
                let step = SweepStep::ground_truth(&dataset.dataset_name);
                report_line(output, &step, &result)?;
                report.record(step, result);
                continue;
            }
        };

        writeln!(
            output.sink(),
            "Preparing {} ({} vectors of dimension {})",
            dataset.dataset_name,
            base.len(),
            base.dim()
        )?;
        let result = ground_truth_track(&dataset, &base, cancel);
        let step = SweepStep::ground_truth(&dataset.dataset_name);
        report_line(output, &step, &result)?;
        report.record(step, result);

        sweep(&dataset, &base, output, cancel, &mut report)?;
    }

    writeln!(
        output.sink(),
        "{} of {} steps completed in {:.1}s",
        report.completed.len(),
        report.total(),
        timer.elapsed_seconds()
    )?;
    Ok(report)
}

fn report_line(
    output: &mut dyn Output,
    step: &SweepStep,
    result: &IrisResult<Vec<PathBuf>>,
) -> IrisResult<()> {
    match result {
        Ok(paths) => writeln!(output.sink(), "  ok    {step}: {} files", paths.len())?,
        Err(err) => writeln!(output.sink(), "  FAIL  {step}: [{}] {err}", err.kind())?,
    }
    Ok(())
}

fn ground_truth_track<T: VecElement>(
    job: &PrepareJob,
    base: &VectorCollection<T>,
    cancel: &CancelFlag,
) -> IrisResult<Vec<PathBuf>> {
    let queries = io::read::<T>(&job.query_file)?;
    let mut written = Vec::new();

    let gt_path = job.ground_truth_path();
    let provenance = GroundTruthProvenance::describe(
        &job.base_file,
        base,
        &job.query_file,
        &queries,
        job.recall_at,
    )?;
    let ground_truth = match reusable_ground_truth(job, &provenance, base.len()) {
        Some(existing) => existing,
        None => {
            let options = GroundTruthOptions {
                num_threads: job.num_threads,
                cancel: cancel.clone(),
                ..Default::default()
            };
            let computed = compute_ground_truth(base, &queries, job.recall_at, &options)?;
            computed.write_ivecs(&gt_path)?;
            provenance.write_json(job.ground_truth_provenance_path())?;
            computed
        }
    };
    written.push(gt_path);
    written.push(job.ground_truth_provenance_path());
    cancel.check()?;

    let provider = job.random_provider();
    let attributes = assign_with_rng(
        base.len(),
        &job.attribute_domain,
        &mut provider.create_rnd_from_seed(ATTRIBUTE_STREAM),
    );
    let predicates = assign_with_rng(
        queries.len(),
        &job.attribute_domain,
        &mut provider.create_rnd_from_seed(PREDICATE_STREAM),
    );
    attributes.write_csv(job.attributes_path())?;
    written.push(job.attributes_path());
    predicates.write_csv(job.predicates_path())?;
    written.push(job.predicates_path());

    let filtered = filter_ground_truth(&ground_truth, &attributes, &predicates)?;
    filtered.write_csv(job.filtered_ground_truth_path())?;
    written.push(job.filtered_ground_truth_path());
    filtered.write_unsatisfied_csv(job.unsatisfied_queries_path())?;
    written.push(job.unsatisfied_queries_path());

    io::write(job.base_copy_path(), base)?;
    written.push(job.base_copy_path());
    io::write(job.query_copy_path(), &queries)?;
    written.push(job.query_copy_path());
    Ok(written)
}

/// The existing ground-truth file, if reuse is enabled and it was computed from exactly
/// the current inputs.
fn reusable_ground_truth(
    job: &PrepareJob,
    current: &GroundTruthProvenance,
    num_base: usize,
) -> Option<GroundTruth> {
    let path = job.ground_truth_path();
    if !job.reuse_ground_truth || !path.exists() {
        return None;
    }

    match GroundTruthProvenance::read_json(job.ground_truth_provenance_path()) {
        Ok(recorded) if &recorded == current => {}
        Ok(recorded) => {
            warn!(
                path = %path.display(),
                recorded = ?recorded,
                current = ?current,
                "ground truth was computed from different inputs, recomputing"
            );
            return None;
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                "cannot read ground truth provenance ({err}), recomputing"
            );
            return None;
        }
    }

    let expected_k = job.recall_at.min(num_base);
    match GroundTruth::read_ivecs(&path) {
        Ok(existing)
            if existing.num_queries() == current.num_queries
                && existing.k() == expected_k
                && existing.validate_ids(num_base).is_ok() =>
        {
            info!(path = %path.display(), "reusing existing ground truth");
            Some(existing)
        }
        Ok(existing) => {
            warn!(
                path = %path.display(),
                num_queries = existing.num_queries(),
                k = existing.k(),
                "existing ground truth does not match the inputs, recomputing"
            );
            None
        }
        Err(err) => {
            warn!(path = %path.display(), "cannot reuse ground truth ({err}), recomputing");
            None
        }
    }
}

fn sweep<T: VecElement>(
    job: &PrepareJob,
    base: &VectorCollection<T>,
    output: &mut dyn Output,
    cancel: &CancelFlag,
    report: &mut SweepReport,
) -> IrisResult<()> {
    let configurations = job.configurations();
    let progress = ProgressBar::with_draw_target(
        Some(configurations.len() as u64),
        output.draw_target(),
    );
    progress.set_style(
        ProgressStyle::with_template("{msg:>28} [{bar:40}] {pos}/{len} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    // Every cluster size of full replication maps to the same file, so those
    // configurations run one after another and write it once.
    let (replicated, partitioned): (Vec<ConfigKey>, Vec<ConfigKey>) = configurations
        .into_iter()
        .partition(|key| {
            matches!(
                key.architecture.parse::<StrategyKind>(),
                Ok(StrategyKind::FullReplication)
            )
        });

    let mut replica: Option<PathBuf> = None;
    for key in replicated {
        progress.set_message(key.to_string());
        let result = match &replica {
            Some(path) => Ok(vec![path.clone()]),
            None => run_configuration(job, base, &key, cancel),
        };
        if let Ok(paths) = &result {
            replica = paths.first().cloned();
        }
        let step = SweepStep::partition(&job.dataset_name, key);
        report_line(output, &step, &result)?;
        report.record(step, result);
        progress.inc(1);
    }

    let results: Vec<(ConfigKey, IrisResult<Vec<PathBuf>>)> = if job.parallel_sweep {
        let pool = create_thread_pool(job.num_threads)?;
        partitioned
            .into_par_iter()
            .map(|key| {
                let result = run_configuration(job, base, &key, cancel);
                progress.inc(1);
                (key, result)
            })
            .collect_in_pool(&pool)
    } else {
        partitioned
            .into_iter()
            .map(|key| {
                progress.set_message(key.to_string());
                let result = run_configuration(job, base, &key, cancel);
                progress.inc(1);
                (key, result)
            })
            .collect()
    };
    progress.finish_and_clear();

    for (key, result) in results {
        let step = SweepStep::partition(&job.dataset_name, key);
        report_line(output, &step, &result)?;
        report.record(step, result);
    }
    Ok(())
}

fn run_configuration<T: VecElement>(
    job: &PrepareJob,
    base: &VectorCollection<T>,
    key: &ConfigKey,
    cancel: &CancelFlag,
) -> IrisResult<Vec<PathBuf>> {
    let timer = Timer::new();
    let kind: StrategyKind = key.architecture.parse()?;
    let strategy = kind.build::<T>(&job.partition_options(cancel));
    let shards = strategy.partition(base, &job.dataset_name, key.cluster_size)?;
    let written = write_shards(&shards, base, &job.output_directory, cancel)?;
    info!(
        configuration = %key,
        files = written.len(),
        elapsed_seconds = timer.elapsed_seconds(),
        "partitioned"
    );
    Ok(written)
}
