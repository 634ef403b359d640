/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
#![cfg_attr(
    not(test),
    warn(clippy::panic, clippy::unwrap_used, clippy::expect_used)
)]

pub mod cancel;
pub mod collection;
pub mod element;
pub mod error;
pub mod io;
pub mod random;
pub mod rayon_util;
pub mod timer;

pub use cancel::CancelFlag;
pub use collection::{Storage, VectorCollection};
pub use element::{squared_l2, VecElement};
pub use error::{ErrorKind, IrisError, IrisResult};
pub use io::LoadMode;
pub use timer::Timer;
