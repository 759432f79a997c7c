use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::clock::GameDate;

/// Randomness handed to command handlers.
///
/// Object-safe so handlers take `&mut dyn RandomSource` and tests can
/// substitute a scripted source.
pub trait RandomSource: Send {
    /// Uniform float in `[0, 1)`.
    fn next_f64(&mut self) -> f64;

    /// Uniform integer in `[low, high]`. Returns `low` when the range is empty.
    fn range(&mut self, low: i64, high: i64) -> i64;

    /// `true` with the given probability, clamped to `[0, 1]`.
    fn chance(&mut self, probability: f64) -> bool {
        self.next_f64() < probability.clamp(0.0, 1.0)
    }

    /// Index drawn proportionally to `weights`. Non-positive weights never win.
    /// Returns `None` if no weight is positive.
    fn choice_weighted(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return None;
        }
        let mut pick = self.next_f64() * total;
        let mut last = None;
        for (idx, &weight) in weights.iter().enumerate() {
            if weight <= 0.0 {
                continue;
            }
            if pick < weight {
                return Some(idx);
            }
            pick -= weight;
            last = Some(idx);
        }
        last
    }
}

/// Deterministic `RandomSource` backed by `SmallRng`.
pub struct SeededRandom {
    rng: SmallRng,
}

impl SeededRandom {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Source for one general's turn: the same session seed, general and
    /// date always yield the same draws.
    pub fn for_turn(hidden_seed: u64, general_id: i64, date: GameDate) -> Self {
        let mut seed = mix(hidden_seed);
        seed = mix(seed ^ general_id as u64);
        seed = mix(seed ^ date.as_months() as u64);
        Self::from_seed(seed)
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    fn range(&mut self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        self.rng.random_range(low..=high)
    }
}

/// SplitMix64 finalizer.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
