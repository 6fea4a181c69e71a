//! Numerical primitives: order statistics and least-squares solves.

pub mod lstsq;
pub mod statistics;

pub use lstsq::{solve_least_squares, solve_weighted_least_squares};
pub use statistics::{median, median_and_iqr, percentile_sorted, MAD_TO_SIGMA};
