//! Least-squares solves through nalgebra's SVD.
//!
//! Rank-deficient systems are reported as `None` instead of returning a
//! minimum-norm solution: every caller treats a rank-deficient design
//! (coplanar positions, collinear tiles) as missing data.

use nalgebra::{DMatrix, SVD};

/// Singular values below `RANK_TOLERANCE * max_singular_value` count as zero.
const RANK_TOLERANCE: f64 = 1e-10;

/// Solve `design * X ≈ rhs` in the least-squares sense.
///
/// `design` is `n × k`, `rhs` is `n × m`; the result is `k × m`.
/// Returns `None` if `n < k`, the design is rank deficient, or any entry is
/// not finite.
pub fn solve_least_squares(design: &DMatrix<f64>, rhs: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    debug_assert_eq!(design.nrows(), rhs.nrows());

    if design.nrows() < design.ncols() || design.ncols() == 0 {
        return None;
    }
    if design.iter().chain(rhs.iter()).any(|v| !v.is_finite()) {
        return None;
    }

    let svd = SVD::new(design.clone(), true, true);
    let max_sv = svd.singular_values.max();
    if max_sv <= 0.0 || svd.singular_values.min() <= RANK_TOLERANCE * max_sv {
        return None;
    }

    svd.solve(rhs, RANK_TOLERANCE * max_sv).ok()
}

/// Weighted least squares: rows of `design` and `rhs` are scaled by `sqrt(w)`.
pub fn solve_weighted_least_squares(
    design: &DMatrix<f64>,
    rhs: &DMatrix<f64>,
    weights: &[f64],
) -> Option<DMatrix<f64>> {
    debug_assert_eq!(design.nrows(), weights.len());

    let mut weighted_design = design.clone();
    let mut weighted_rhs = rhs.clone();
    for (row, &w) in weights.iter().enumerate() {
        let sw = w.max(0.0).sqrt();
        weighted_design.row_mut(row).scale_mut(sw);
        weighted_rhs.row_mut(row).scale_mut(sw);
    }

    solve_least_squares(&weighted_design, &weighted_rhs)
}
