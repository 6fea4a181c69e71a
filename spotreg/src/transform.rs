//! 3-D affine transform.

use glam::{DMat3, DVec3};
use nalgebra::DMatrix;

use crate::error::{DegenerateKind, RegisterError, RegisterResult};
use crate::math::solve_least_squares;

/// Smallest |det| of the linear part for a transform to count as invertible.
///
/// Registration transforms are close to the identity (det ≈ 1); anything this
/// small has collapsed a dimension.
pub const MIN_DETERMINANT: f64 = 1e-4;

/// Affine map `p ↦ linear · p + translation`.
///
/// Row-major parameter layout used by [`to_rows`](Self::to_rows) and
/// [`to_params`](Self::to_params):
/// ```text
/// | m00 m01 m02 tx |   | p[0] p[1]  p[2]  p[3]  |
/// | m10 m11 m12 ty | = | p[4] p[5]  p[6]  p[7]  |
/// | m20 m21 m22 tz |   | p[8] p[9]  p[10] p[11] |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub linear: DMat3,
    pub translation: DVec3,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl std::fmt::Display for AffineTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let t = self.translation;
        let s = self.scales();
        write!(
            f,
            "Affine(t=[{:.2}, {:.2}, {:.2}], scale=[{:.4}, {:.4}, {:.4}], det={:.4})",
            t.x,
            t.y,
            t.z,
            s.x,
            s.y,
            s.z,
            self.determinant()
        )
    }
}

impl AffineTransform {
    pub const IDENTITY: Self = Self {
        linear: DMat3::IDENTITY,
        translation: DVec3::ZERO,
    };

    pub const fn new(linear: DMat3, translation: DVec3) -> Self {
        Self {
            linear,
            translation,
        }
    }

    pub const fn from_translation(translation: DVec3) -> Self {
        Self {
            linear: DMat3::IDENTITY,
            translation,
        }
    }

    /// Build from three rows `[m_r0, m_r1, m_r2, t_r]`.
    pub fn from_rows(rows: [[f64; 4]; 3]) -> Self {
        let col = |c: usize| DVec3::new(rows[0][c], rows[1][c], rows[2][c]);
        Self {
            linear: DMat3::from_cols(col(0), col(1), col(2)),
            translation: col(3),
        }
    }

    pub fn to_rows(&self) -> [[f64; 4]; 3] {
        std::array::from_fn(|r| {
            let row = self.linear.row(r);
            [row.x, row.y, row.z, self.translation[r]]
        })
    }

    pub fn from_params(params: [f64; 12]) -> Self {
        Self::from_rows(std::array::from_fn(|r| {
            std::array::from_fn(|c| params[r * 4 + c])
        }))
    }

    pub fn to_params(&self) -> [f64; 12] {
        let rows = self.to_rows();
        std::array::from_fn(|i| rows[i / 4][i % 4])
    }

    #[inline]
    pub fn apply(&self, point: DVec3) -> DVec3 {
        self.linear * point + self.translation
    }

    pub fn apply_all(&self, points: &[DVec3]) -> Vec<DVec3> {
        points.iter().map(|&p| self.apply(p)).collect()
    }

    pub fn determinant(&self) -> f64 {
        self.linear.determinant()
    }

    pub fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det.abs() >= MIN_DETERMINANT && self.translation.is_finite()
    }

    /// `Ok(self)` if invertible, otherwise a `DegenerateInput` error.
    pub fn ensure_invertible(self) -> RegisterResult<Self> {
        if self.is_invertible() {
            Ok(self)
        } else {
            Err(RegisterError::DegenerateInput(
                DegenerateKind::NonInvertibleTransform {
                    determinant: self.determinant(),
                },
            ))
        }
    }

    pub fn inverse(&self) -> RegisterResult<Self> {
        let checked = self.ensure_invertible()?;
        let inv = checked.linear.inverse();
        Ok(Self::new(inv, -(inv * checked.translation)))
    }

    /// The transform that applies `self` first and `next` second.
    pub fn then(&self, next: &AffineTransform) -> AffineTransform {
        AffineTransform::new(
            next.linear * self.linear,
            next.linear * self.translation + next.translation,
        )
    }

    /// Diagonal of the linear part: per-axis scale when rotation and shear are small.
    pub fn scales(&self) -> DVec3 {
        DVec3::new(self.linear.x_axis.x, self.linear.y_axis.y, self.linear.z_axis.z)
    }

    /// Largest absolute difference over the 12 parameters.
    pub fn max_abs_diff(&self, other: &AffineTransform) -> f64 {
        self.to_params()
            .iter()
            .zip(other.to_params().iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    /// Least-squares affine transform mapping `src[i]` onto `dst[i]`.
    ///
    /// Returns `None` with fewer than 4 pairs or when `src` is coplanar.
    pub fn fit(src: &[DVec3], dst: &[DVec3]) -> Option<AffineTransform> {
        debug_assert_eq!(src.len(), dst.len());

        let n = src.len();
        if n < 4 {
            return None;
        }

        let design = DMatrix::from_fn(n, 4, |i, j| if j < 3 { src[i][j] } else { 1.0 });
        let rhs = DMatrix::from_fn(n, 3, |i, j| dst[i][j]);
        let solution = solve_least_squares(&design, &rhs)?;

        // solution is 4 × 3: row k holds the coefficient of source axis k
        // (row 3: constant) for each destination axis.
        let column = |k: usize| DVec3::new(solution[(k, 0)], solution[(k, 1)], solution[(k, 2)]);
        Some(AffineTransform::new(
            DMat3::from_cols(column(0), column(1), column(2)),
            column(3),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AffineTransform {
        AffineTransform::from_rows([
            [1.01, 0.002, 0.0, 3.5],
            [-0.003, 0.99, 0.01, -2.0],
            [0.0, 0.0, 1.02, 0.75],
        ])
    }

    #[test]
    fn test_rows_round_trip() {
        let t = sample();
        assert_eq!(AffineTransform::from_rows(t.to_rows()), t);
        assert_eq!(AffineTransform::from_params(t.to_params()), t);
        assert_eq!(t.to_params()[3], 3.5);
        assert_eq!(t.to_params()[1], 0.002);
    }

    #[test]
    fn test_apply_matches_rows() {
        let t = sample();
        let p = DVec3::new(10.0, 20.0, 5.0);
        let rows = t.to_rows();
        let expected = DVec3::new(
            rows[0][0] * p.x + rows[0][1] * p.y + rows[0][2] * p.z + rows[0][3],
            rows[1][0] * p.x + rows[1][1] * p.y + rows[1][2] * p.z + rows[1][3],
            rows[2][0] * p.x + rows[2][1] * p.y + rows[2][2] * p.z + rows[2][3],
        );
        assert!((t.apply(p) - expected).length() < 1e-12);
    }

    #[test]
    fn test_then_applies_in_order() {
        let first = AffineTransform::from_translation(DVec3::new(1.0, 0.0, 0.0));
        let second = AffineTransform::new(DMat3::from_diagonal(DVec3::splat(2.0)), DVec3::ZERO);
        let composed = first.then(&second);
        let p = DVec3::new(1.0, 1.0, 1.0);
        assert_eq!(composed.apply(p), second.apply(first.apply(p)));
        assert_eq!(composed.apply(p), DVec3::new(4.0, 2.0, 2.0));
    }

    #[test]
    fn test_inverse() {
        let t = sample();
        let inv = t.inverse().unwrap();
        let p = DVec3::new(-4.0, 7.0, 12.0);
        assert!((inv.apply(t.apply(p)) - p).length() < 1e-10);
    }

    #[test]
    fn test_collapsed_dimension_is_not_invertible() {
        let flat = AffineTransform::new(
            DMat3::from_diagonal(DVec3::new(1.0, 1.0, 0.0)),
            DVec3::ZERO,
        );
        assert!(!flat.is_invertible());
        assert!(matches!(
            flat.ensure_invertible(),
            Err(RegisterError::DegenerateInput(
                DegenerateKind::NonInvertibleTransform { .. }
            ))
        ));
        assert!(flat.inverse().is_err());
    }

    #[test]
    fn test_fit_recovers_transform() {
        let t = sample();
        let src: Vec<DVec3> = (0..20)
            .map(|i| {
                let f = i as f64;
                DVec3::new(f * 7.0 % 13.0, f * 3.0 % 11.0, f * 5.0 % 7.0)
            })
            .collect();
        let dst = t.apply_all(&src);
        let fitted = AffineTransform::fit(&src, &dst).unwrap();
        assert!(fitted.max_abs_diff(&t) < 1e-9);
    }

    #[test]
    fn test_fit_coplanar_is_none() {
        let src: Vec<DVec3> = (0..10)
            .map(|i| DVec3::new(i as f64, (i * i) as f64, 0.0))
            .collect();
        let dst = src.clone();
        assert!(AffineTransform::fit(&src, &dst).is_none());
        assert!(AffineTransform::fit(&src[..3], &dst[..3]).is_none());
    }
}
