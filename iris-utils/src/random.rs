/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */
use rand::{Rng, SeedableRng};

/// The default seed for tests and for jobs that do not name one.
/// Don't change this constant: shard layouts and attribute files produced with it are
/// expected to be reproducible across releases.
pub const DEFAULT_SEED: u64 = 42;

/// The random number generator used by default in Iris.
///
/// Users are encouraged to avoid relying too heavily on the exact type.
pub type StandardRng = rand::rngs::StdRng;

/// Creates a pseudo-random number generator from a seed.
pub fn create_rnd_from_seed(seed: u64) -> StandardRng {
    rand::rngs::StdRng::seed_from_u64(seed)
}

/// Creates a pseudo-random number generator from the default seed.
/// All tests should use this function to create a random number generator to ensure reproducibility.
pub fn create_rnd_in_tests() -> StandardRng {
    create_rnd_from_seed(DEFAULT_SEED)
}

/// Creates a pseudo-random number generator provider from a seed.
pub fn create_rnd_provider_from_seed(seed: u64) -> RandomProvider<StandardRng> {
    RandomProvider {
        seed,
        factory: rand::rngs::StdRng::seed_from_u64,
    }
}

/// The random generator provider.
///
/// A job carries a single seed, while each of its components (attribute draws,
/// predicate draws, partitioners) needs its own independent stream. The provider hands
/// out one generator per component, derived from the job seed and a per-component
/// stream id.
pub struct RandomProvider<T: Rng + 'static> {
    seed: u64,
    factory: fn(u64) -> T,
}

impl<T: Rng + 'static> RandomProvider<T> {
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Creates a new random generator from the provider seed.
    pub fn create_rnd(&self) -> T {
        (self.factory)(self.seed)
    }

    /// Derives the seed of stream `additional_seed`.
    pub fn derive_seed(&self, additional_seed: u64) -> u64 {
        self.seed.wrapping_add(additional_seed)
    }

    /// Creates a new random generator with an additional seed.
    pub fn create_rnd_from_seed(&self, additional_seed: u64) -> T {
        (self.factory)(self.derive_seed(additional_seed))
    }
}
