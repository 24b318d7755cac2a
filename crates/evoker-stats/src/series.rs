use crate::separation::PerfSummary;

/// Incrementally accumulated win-rate samples for one measured agent.
///
/// The simulation engine reports one win-rate sample per measurement
/// interval. The series keeps the raw samples together with the running
/// cumulative mean after each interval, which is the value used for
/// ranking and separation checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSeries {
    samples: Vec<f32>,
    running_means: Vec<f32>,
    sum: f32,
}

impl SampleSeries {
    /// Creates an empty series.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            samples: Vec::new(),
            running_means: Vec::new(),
            sum: 0.0,
        }
    }

    /// Appends one per-interval win-rate sample.
    #[expect(clippy::cast_precision_loss)]
    pub fn push(&mut self, sample: f32) {
        self.samples.push(sample);
        self.sum += sample;
        self.running_means.push(self.sum / self.samples.len() as f32);
    }

    /// Returns the number of accumulated samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if no samples have been accumulated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the raw per-interval samples in arrival order.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Returns the cumulative mean after each interval.
    ///
    /// The last element is the overall mean of the series.
    #[must_use]
    pub fn running_means(&self) -> &[f32] {
        &self.running_means
    }

    /// Returns the mean over all accumulated samples.
    ///
    /// # Returns
    ///
    /// * `Some(mean)` - if at least one sample has been accumulated
    /// * `None` - if the series is empty
    #[must_use]
    pub fn mean(&self) -> Option<f32> {
        self.running_means.last().copied()
    }

    /// Returns the sample standard deviation of the samples.
    ///
    /// Uses the `n - 1` denominator, so the estimate is unbiased toward
    /// the short series the early-stop check runs on.
    ///
    /// # Returns
    ///
    /// * `Some(stdev)` - if at least two samples have been accumulated
    /// * `None` - if the spread cannot be estimated yet
    #[expect(clippy::cast_precision_loss)]
    #[must_use]
    pub fn stdev(&self) -> Option<f32> {
        if self.samples.len() < 2 {
            return None;
        }
        let mean = self.mean()?;
        let sum_sq: f32 = self.samples.iter().map(|s| (s - mean).powi(2)).sum();
        let variance = sum_sq / (self.samples.len() - 1) as f32;
        Some(variance.sqrt())
    }

    /// Returns the standard deviation of the estimated mean
    /// (`stdev / sqrt(n)`).
    ///
    /// The spread of a single sample carries no information about the
    /// stability of the mean, so fewer than two samples yield `None`.
    ///
    /// # Examples
    ///
    /// ```
    /// use evoker_stats::series::SampleSeries;
    ///
    /// let mut series = SampleSeries::new();
    /// series.push(10.0);
    /// assert_eq!(series.mean_stdev(), None);
    /// series.push(14.0);
    /// assert_eq!(series.mean_stdev(), Some(2.0));
    /// ```
    #[expect(clippy::cast_precision_loss)]
    #[must_use]
    pub fn mean_stdev(&self) -> Option<f32> {
        let stdev = self.stdev()?;
        Some(stdev / (self.samples.len() as f32).sqrt())
    }

    /// Condenses the series into the summary used for ranking and
    /// separation checks.
    ///
    /// # Returns
    ///
    /// * `Some(summary)` - if at least one sample has been accumulated
    /// * `None` - if the series is empty
    #[must_use]
    pub fn summary(&self) -> Option<PerfSummary> {
        Some(PerfSummary {
            win_rate: self.mean()?,
            mean_stdev: self.mean_stdev(),
        })
    }
}
