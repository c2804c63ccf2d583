//! Uniform random source for sampling.
//!
//! Backed by `rand`'s thread-local generator, which is a CSPRNG reseeded from
//! the OS. Used for eviction sampling and for picking which shards a cleanup
//! pass visits.

use rand::Rng;
use rand::seq::index;

/// Uniform index in `0..bound`. `bound` must be non-zero.
#[inline]
pub fn uniform_index(bound: usize) -> usize {
    debug_assert!(bound > 0, "uniform_index called with empty range");
    rand::rng().random_range(0..bound)
}

/// `amount` distinct indices from `0..length`, in random order.
///
/// Returns all indices when `amount >= length`.
pub fn distinct_indices(length: usize, amount: usize) -> Vec<usize> {
    let amount = amount.min(length);
    index::sample(&mut rand::rng(), length, amount).into_vec()
}
