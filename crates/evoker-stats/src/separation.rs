//! Separation analysis for measured win rates.
//!
//! Two agents are compared through their measured win rates and the
//! statistical uncertainty of those measurements. The separation factor
//! scales the observed difference by the combined uncertainty; a pair
//! counts as separated once the factor reaches `1.0`, meaning the gap is
//! wider than the allowed noise band.

/// Condensed measurement of one agent over a round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerfSummary {
    /// Final cumulative win rate over the round.
    pub win_rate: f32,
    /// Standard deviation of the estimated win rate, if the round produced
    /// enough intervals to estimate it.
    pub mean_stdev: Option<f32>,
}

/// Computes the separation factor between two measurements.
///
/// The factor is `|a - b| / (n_stdev * (stdev_a + stdev_b))`, where the
/// stdev terms are the mean-stdevs of the two measurements. Degenerate
/// input, a missing mean-stdev or a zero denominator, yields `0.0` so
/// that noisy or too-short measurements never count as separated.
///
/// # Arguments
///
/// * `a` - First measurement
/// * `b` - Second measurement
/// * `n_stdev` - Width of the noise band, in combined standard deviations
///
/// # Examples
///
/// ```
/// use evoker_stats::separation::{PerfSummary, separation_factor};
///
/// let a = PerfSummary { win_rate: 120.0, mean_stdev: Some(4.0) };
/// let b = PerfSummary { win_rate: 80.0, mean_stdev: Some(4.0) };
/// assert_eq!(separation_factor(a, b, 2.0), 2.5);
///
/// let unknown = PerfSummary { win_rate: 120.0, mean_stdev: None };
/// assert_eq!(separation_factor(unknown, b, 2.0), 0.0);
/// ```
#[must_use]
pub fn separation_factor(a: PerfSummary, b: PerfSummary, n_stdev: f32) -> f32 {
    let (Some(stdev_a), Some(stdev_b)) = (a.mean_stdev, b.mean_stdev) else {
        return 0.0;
    };
    let denominator = n_stdev * (stdev_a + stdev_b);
    if denominator <= 0.0 {
        return 0.0;
    }
    (a.win_rate - b.win_rate).abs() / denominator
}

/// Returns `true` when the pair's separation factor reaches `1.0`.
#[must_use]
pub fn separated(a: PerfSummary, b: PerfSummary, n_stdev: f32) -> bool {
    separation_factor(a, b, n_stdev) >= 1.0
}

/// Separation factors for a batch of measurement pairs.
#[derive(Debug, Clone)]
pub struct SeparationReport {
    factors: Vec<f32>,
}

impl SeparationReport {
    /// Computes the separation factor for every pair.
    #[must_use]
    pub fn new(pairs: &[(PerfSummary, PerfSummary)], n_stdev: f32) -> Self {
        let factors = pairs
            .iter()
            .map(|&(a, b)| separation_factor(a, b, n_stdev))
            .collect();
        Self { factors }
    }

    /// Returns the per-pair separation factors in input order.
    #[must_use]
    pub fn factors(&self) -> &[f32] {
        &self.factors
    }

    /// Returns the number of separated pairs.
    #[must_use]
    pub fn separated_count(&self) -> usize {
        self.factors.iter().filter(|&&f| f >= 1.0).count()
    }

    /// Returns the fraction of separated pairs.
    ///
    /// An empty batch is vacuously fully separated and reports `1.0`.
    #[expect(clippy::cast_precision_loss)]
    #[must_use]
    pub fn fraction(&self) -> f32 {
        if self.factors.is_empty() {
            return 1.0;
        }
        self.separated_count() as f32 / self.factors.len() as f32
    }
}

/// Sorts scored items from the highest score to the lowest.
///
/// The sort is stable, so items with equal scores keep their input order.
///
/// # Examples
///
/// ```
/// use evoker_stats::separation::rank_descending;
///
/// let ranked = rank_descending(vec![("weak", 1.0), ("strong", 9.0), ("mid", 4.0)]);
/// let names: Vec<_> = ranked.iter().map(|(name, _)| *name).collect();
/// assert_eq!(names, ["strong", "mid", "weak"]);
/// ```
#[must_use]
pub fn rank_descending<T>(mut items: Vec<(T, f32)>) -> Vec<(T, f32)> {
    items.sort_by(|a, b| b.1.total_cmp(&a.1));
    items
}
