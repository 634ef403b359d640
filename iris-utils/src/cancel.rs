/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::{IrisError, IrisResult};

/// Cooperative cancellation shared between a caller and long-running work.
///
/// Work checks the flag between blocks; clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns [`IrisError::Cancelled`] once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> IrisResult<()> {
        if self.is_cancelled() {
            Err(IrisError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(flag.check().is_ok());
        other.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(IrisError::Cancelled)));
    }
}
