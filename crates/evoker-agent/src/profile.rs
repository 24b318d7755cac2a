//! Behavior profiles, the checkpoint payload of the synthetic stack.
//!
//! A profile is a short vector of weights in `[0, 1]` standing in for a
//! full model checkpoint. Creation, crossover, and training all reduce to
//! vector operations here, which keeps the whole population loop cheap and
//! deterministic under a seeded generator.

use rand::Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

/// Number of behavior weights in a profile.
pub const PROFILE_LEN: usize = 8;

const INIT_MIN: f32 = 0.15;
const INIT_MAX: f32 = 0.45;
const BLEND_ALPHA: f32 = 0.2;

/// Checkpoint payload of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    weights: Vec<f32>,
}

impl Profile {
    /// Wraps an explicit weight vector.
    #[must_use]
    pub fn from_weights(weights: Vec<f32>) -> Self {
        Self { weights }
    }

    /// Creates a freshly initialized profile with uniform random weights.
    pub fn random<R>(rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let weights = (0..PROFILE_LEN)
            .map(|_| rng.random_range(INIT_MIN..=INIT_MAX))
            .collect();
        Self { weights }
    }

    /// Blends two parent profiles into a child profile.
    ///
    /// Each child weight is sampled uniformly from the parents' range at
    /// that position, expanded by a small exploration margin and clamped
    /// to `[0, 1]`.
    ///
    /// # Panics
    ///
    /// Panics if the parents have different weight counts.
    pub fn blend<R>(main: &Self, secondary: &Self, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        assert_eq!(main.weights.len(), secondary.weights.len());
        let weights = main
            .weights
            .iter()
            .zip(&secondary.weights)
            .map(|(&a, &b)| {
                let lo = f32::min(a, b);
                let hi = f32::max(a, b);
                let margin = BLEND_ALPHA * (hi - lo);
                rng.random_range((lo - margin)..=(hi + margin)).clamp(0.0, 1.0)
            })
            .collect();
        Self { weights }
    }

    /// Shifts every weight by a Gaussian step, clamped to `[0, 1]`.
    pub fn perturb<R>(&mut self, mean: f32, sigma: f32, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        let normal = Normal::new(mean, sigma).unwrap();
        for w in &mut self.weights {
            *w = (*w + rng.sample(normal)).clamp(0.0, 1.0);
        }
    }

    /// Overall playing strength, the mean of all weights.
    #[expect(clippy::cast_precision_loss)]
    #[must_use]
    pub fn strength(&self) -> f32 {
        if self.weights.is_empty() {
            return 0.0;
        }
        self.weights.iter().sum::<f32>() / self.weights.len() as f32
    }

    #[must_use]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }
}
