/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
use rayon::prelude::ParallelIterator;

use crate::error::{IrisError, IrisResult};

/// Creates a new thread pool with the specified number of threads.
/// If `num_threads` is 0, it defaults to the number of logical CPUs.
pub fn create_thread_pool(num_threads: usize) -> IrisResult<RayonThreadPool> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|err| IrisError::ThreadPool(err.to_string()))?;
    Ok(RayonThreadPool(pool))
}

/// Creates a thread pool with a configurable number of threads for testing purposes.
/// The number of threads can be set using the environment variable `IRIS_TEST_POOL_THREADS`.
/// If the environment variable is not set or cannot be parsed, it defaults to 3 threads.
#[allow(clippy::unwrap_used)]
pub fn create_thread_pool_for_test() -> RayonThreadPool {
    let num_threads = std::env::var("IRIS_TEST_POOL_THREADS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(3);

    create_thread_pool(num_threads).unwrap()
}

pub struct RayonThreadPool(rayon::ThreadPool);

impl RayonThreadPool {
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.0.install(op)
    }

    pub fn current_num_threads(&self) -> usize {
        self.0.current_num_threads()
    }
}

/// Parallel operations that always run inside an explicit [`RayonThreadPool`], never on
/// the implicit global pool.
pub trait ParallelIteratorInPool: ParallelIterator + Sized {
    fn for_each_in_pool<OP>(self, pool: &RayonThreadPool, op: OP)
    where
        OP: Fn(Self::Item) + Sync + Send,
    {
        pool.install(|| self.for_each(op));
    }

    fn try_for_each_in_pool<OP, E>(self, pool: &RayonThreadPool, op: OP) -> Result<(), E>
    where
        OP: Fn(Self::Item) -> Result<(), E> + Sync + Send,
        E: Send,
    {
        pool.install(|| self.try_for_each(op))
    }

    fn collect_in_pool<C>(self, pool: &RayonThreadPool) -> C
    where
        C: rayon::iter::FromParallelIterator<Self::Item> + Send,
    {
        pool.install(|| self.collect())
    }
}

impl<T> ParallelIteratorInPool for T where T: ParallelIterator {}

#[cfg(test)]
mod tests {
    use rayon::prelude::*;

    use super::*;

    #[test]
    fn explicit_thread_count_is_honored() {
        let pool = create_thread_pool(2).unwrap();
        assert_eq!(pool.current_num_threads(), 2);
    }

    #[test]
    fn zero_means_all_cores() {
        let pool = create_thread_pool(0).unwrap();
        assert!(pool.current_num_threads() >= 1);
    }

    #[test]
    fn operations_run_in_the_pool() {
        let pool = create_thread_pool_for_test();
        let squares: Vec<usize> = (0..100usize).into_par_iter().map(|x| x * x).collect_in_pool(&pool);
        assert_eq!(squares[9], 81);

        let mut values = vec![1usize; 64];
        values
            .par_iter_mut()
            .enumerate()
            .for_each_in_pool(&pool, |(i, v)| *v += i);
        assert_eq!(values[63], 64);

        let result: Result<(), usize> = (0..10usize)
            .into_par_iter()
            .try_for_each_in_pool(&pool, |x| if x == 7 { Err(x) } else { Ok(()) });
        assert_eq!(result, Err(7));
    }
}
