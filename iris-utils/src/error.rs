/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! The error type shared by every Iris component.

use std::{fmt, path::Path};

use thiserror::Error;

/// Result alias used throughout the Iris crates.
pub type IrisResult<T> = Result<T, IrisError>;

/// Every failure an Iris operation can report.
///
/// The sweep driver records failures per configuration and reports them by
/// [`ErrorKind`], so each variant maps onto exactly one kind.
#[derive(Debug, Error)]
pub enum IrisError {
    #[error("malformed vector file {path}: {reason}")]
    Format { path: String, reason: String },

    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error(
        "{path} needs {required} bytes in memory but the in-memory limit is {limit} bytes; \
         load it memory-mapped instead"
    )]
    OutOfMemory {
        path: String,
        required: u64,
        limit: u64,
    },

    #[error("unknown partition strategy \"{0}\"")]
    UnknownStrategy(String),

    #[error("shard sizes differ by {spread} after {passes} balancing passes (tolerance {tolerance})")]
    ImbalanceToleranceExceeded {
        spread: usize,
        tolerance: usize,
        passes: usize,
    },

    #[error("{failed} of {total} sweep steps failed")]
    PartialSweepFailure { failed: usize, total: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl IrisError {
    pub fn format(path: &Path, reason: impl Into<String>) -> Self {
        IrisError::Format {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    pub fn dimension_mismatch(context: impl Into<String>, expected: usize, found: usize) -> Self {
        IrisError::DimensionMismatch {
            context: context.into(),
            expected,
            found,
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        IrisError::InvalidParameter(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IrisError::Format { .. } => ErrorKind::Format,
            IrisError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            IrisError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            IrisError::UnknownStrategy(_) => ErrorKind::UnknownStrategy,
            IrisError::ImbalanceToleranceExceeded { .. } => ErrorKind::ImbalanceToleranceExceeded,
            IrisError::PartialSweepFailure { .. } => ErrorKind::PartialSweepFailure,
            IrisError::InvalidParameter(_) | IrisError::ThreadPool(_) => {
                ErrorKind::InvalidParameter
            }
            IrisError::Cancelled => ErrorKind::Cancelled,
            IrisError::Io(_) => ErrorKind::Io,
            IrisError::Csv(_) => ErrorKind::Csv,
            IrisError::Json(_) => ErrorKind::Json,
        }
    }
}

/// Coarse classification of an [`IrisError`], used in sweep reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Format,
    DimensionMismatch,
    OutOfMemory,
    UnknownStrategy,
    ImbalanceToleranceExceeded,
    PartialSweepFailure,
    InvalidParameter,
    Cancelled,
    Io,
    Csv,
    Json,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Format => "FormatError",
            ErrorKind::DimensionMismatch => "DimensionMismatch",
            ErrorKind::OutOfMemory => "OutOfMemory",
            ErrorKind::UnknownStrategy => "UnknownStrategy",
            ErrorKind::ImbalanceToleranceExceeded => "ImbalanceToleranceExceeded",
            ErrorKind::PartialSweepFailure => "PartialSweepFailure",
            ErrorKind::InvalidParameter => "InvalidParameter",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Io => "IoError",
            ErrorKind::Csv => "CsvError",
            ErrorKind::Json => "JsonError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
