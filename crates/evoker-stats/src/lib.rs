//! Statistical utilities for the Evoker project.
//!
//! This crate provides the numeric core shared by the simulation engine and
//! the training scheduler:
//!
//! - **Interval series**: Accumulate per-interval win-rate samples and track
//!   running cumulative means
//! - **Separation analysis**: Decide whether two measured win rates differ by
//!   more than their combined statistical noise
//! - **Ranking**: Order scored items from strongest to weakest
//!
//! # Modules
//!
//! - [`series`]: Incremental win-rate sample series
//! - [`separation`]: Separation factors and pairwise separation reports
//!
//! # Examples
//!
//! ## Accumulating a series and summarizing it
//!
//! ```
//! use evoker_stats::series::SampleSeries;
//!
//! let mut series = SampleSeries::new();
//! for sample in [110.0, 95.0, 102.0, 99.0] {
//!     series.push(sample);
//! }
//! let summary = series.summary().unwrap();
//! assert_eq!(summary.win_rate, series.mean().unwrap());
//! ```
//!
//! ## Checking whether two summaries are separated
//!
//! ```
//! use evoker_stats::separation::{PerfSummary, separation_factor};
//!
//! let a = PerfSummary { win_rate: 120.0, mean_stdev: Some(4.0) };
//! let b = PerfSummary { win_rate: 80.0, mean_stdev: Some(4.0) };
//! assert!(separation_factor(a, b, 2.0) >= 1.0);
//! ```

pub mod separation;
pub mod series;
