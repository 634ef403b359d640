/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
pub mod data_type;
pub use data_type::*;

pub mod neighbor;
pub use neighbor::*;

pub mod ground_truth;
pub use ground_truth::*;

pub mod attributes;
pub use attributes::*;

pub mod filtered_ground_truth;
pub use filtered_ground_truth::*;

pub mod recall;
pub use recall::*;

pub mod partition;
pub use partition::{
    shard_file_name, write_shards, PartitionOptions, PartitionStrategy, Shard, ShardAssignment,
    ShardMembers, StrategyKind,
};

pub mod random_data_generator;
pub use random_data_generator::*;

pub mod summary;
pub use summary::*;

pub mod output;
pub use output::{DefaultOutput, Memory, Output};

pub mod job;
pub use job::*;

pub mod driver;
pub use driver::*;

pub mod test_utils;
pub use test_utils::*;

pub mod tracing;
pub use self::tracing::{init_subscriber, init_test_subscriber};
