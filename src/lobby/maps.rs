//! Map pool sampling for the final map vote

use rand::seq::IndexedRandom;
use rand::Rng;

/// Pick up to `count` distinct maps from a pool, in random order
pub fn sample_maps<R: Rng + ?Sized>(pool: &[String], count: usize, rng: &mut R) -> Vec<String> {
    pool.choose_multiple(rng, count.min(pool.len()))
        .cloned()
        .collect()
}
