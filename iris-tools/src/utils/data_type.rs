/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Element type of a vector file, chosen at run time.
#[derive(
    Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// 32 bit float (`.fvecs`).
    #[default]
    Float,

    /// 32 bit signed integer (`.ivecs`).
    Int,
}

impl DataType {
    pub fn extension(&self) -> &'static str {
        match self {
            DataType::Float => "fvecs",
            DataType::Int => "ivecs",
        }
    }
}
