//! Huber regression by iteratively reweighted least squares (IRLS).

use nalgebra::DMatrix;

use crate::math::{median, solve_least_squares, solve_weighted_least_squares, MAD_TO_SIGMA};

/// Lowest IRLS weight, so gross outliers stay in the system.
const WEIGHT_FLOOR: f64 = 1e-8;

/// Residual scale floor relative to the magnitude of the observations.
const RELATIVE_SCALE_FLOOR: f64 = 1e-9;

/// Huber M-estimator weight for a residual in units of the scale.
///
/// 1 inside `[-epsilon, epsilon]`, `epsilon / |u|` outside.
#[inline]
pub fn huber_weight(u: f64, epsilon: f64) -> f64 {
    let a = u.abs();
    if a <= epsilon {
        1.0
    } else {
        (epsilon / a).max(WEIGHT_FLOOR)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HuberRegressor {
    /// Transition point in units of the robust residual scale.
    pub epsilon: f64,
    pub max_iterations: usize,
    /// Stop when no coefficient moves more than `tolerance · (1 + max |β|)`.
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HuberFit {
    pub coefficients: Vec<f64>,
    /// Robust residual scale (1.4826 · MAD) of the final fit.
    pub scale: f64,
    /// Final IRLS weights, one per observation.
    pub weights: Vec<f64>,
    pub iterations: usize,
}

impl HuberRegressor {
    /// Fit `y ≈ design · β`.
    ///
    /// Returns `None` when the design is rank deficient or has fewer rows
    /// than columns.
    pub fn fit(&self, design: &DMatrix<f64>, y: &[f64]) -> Option<HuberFit> {
        debug_assert_eq!(design.nrows(), y.len());

        let rhs = DMatrix::from_column_slice(y.len(), 1, y);
        let mut beta = solve_least_squares(design, &rhs)?;
        let mut weights = vec![1.0; y.len()];

        let y_max = y.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let scale_floor = RELATIVE_SCALE_FLOOR * (1.0 + y_max);
        let mut scale = scale_floor;
        let mut iterations = 0;

        while iterations < self.max_iterations {
            iterations += 1;

            let residuals = &rhs - design * &beta;
            let abs_res: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
            scale = (MAD_TO_SIGMA * median(&abs_res)).max(scale_floor);

            for (w, r) in weights.iter_mut().zip(abs_res.iter()) {
                *w = huber_weight(r / scale, self.epsilon);
            }

            let next = solve_weighted_least_squares(design, &rhs, &weights)?;
            let change = (&next - &beta).amax();
            let magnitude = beta.amax();
            beta = next;

            if change <= self.tolerance * (1.0 + magnitude) {
                break;
            }
        }

        Some(HuberFit {
            coefficients: beta.iter().copied().collect(),
            scale,
            weights,
            iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_design(xs: &[f64]) -> DMatrix<f64> {
        DMatrix::from_fn(xs.len(), 2, |i, j| if j == 0 { 1.0 } else { xs[i] })
    }

    #[test]
    fn test_huber_weight() {
        assert_eq!(huber_weight(0.5, 1.35), 1.0);
        assert_eq!(huber_weight(-1.35, 1.35), 1.0);
        assert!((huber_weight(2.7, 1.35) - 0.5).abs() < 1e-12);
        assert_eq!(huber_weight(1e12, 1.35), WEIGHT_FLOOR);
    }

    #[test]
    fn test_fit_ignores_gross_outlier() {
        // y = 1 + 2x with one corrupted observation.
        let xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut ys: Vec<f64> = xs.iter().map(|x| 1.0 + 2.0 * x).collect();
        ys[7] += 100.0;

        let regressor = HuberRegressor {
            epsilon: 1.35,
            max_iterations: 100,
            tolerance: 1e-10,
        };
        let fit = regressor.fit(&line_design(&xs), &ys).unwrap();

        assert!((fit.coefficients[0] - 1.0).abs() < 1e-3);
        assert!((fit.coefficients[1] - 2.0).abs() < 1e-3);
        assert!(fit.weights[7] < 1e-3);
        assert!(fit.weights[0] > 0.99);

        let ols = solve_least_squares(
            &line_design(&xs),
            &DMatrix::from_column_slice(10, 1, &ys),
        )
        .unwrap();
        assert!((ols[(1, 0)] - 2.0).abs() > 0.5);
    }

    #[test]
    fn test_fit_rank_deficient_is_none() {
        let design = DMatrix::from_fn(4, 2, |_, _| 1.0);
        let regressor = HuberRegressor {
            epsilon: 1.35,
            max_iterations: 10,
            tolerance: 1e-10,
        };
        assert!(regressor.fit(&design, &[1.0, 2.0, 3.0, 4.0]).is_none());
    }
}
