//! Cross-tile regularisation of per-tile transforms.
//!
//! Neighbouring tiles share optics, so each of the 12 affine parameters varies
//! smoothly across the tile grid. Every parameter is regressed against the
//! tile's (row, col) with a Huber estimator, and the prediction replaces the
//! measured transform of every tile. Tiles whose measured translation is far
//! from the prediction, or which had no measurement, are flagged.

mod huber;


pub use huber::{huber_weight, HuberFit, HuberRegressor};

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::OutlierConfig;
use crate::error::{RegisterError, RegisterResult};
use crate::transform::AffineTransform;

/// Fewest tiles with a transform the cross-tile fit will use.
pub const MIN_TILES: usize = 3;

/// Position of a tile in the acquisition grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileGridPosition {
    pub row: i32,
    pub col: i32,
}

impl TileGridPosition {
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }
}

/// Outcome of [`correct_outliers`]. All vectors are indexed like the input.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierCorrection {
    /// Predicted transform of every tile, each one invertible.
    pub transforms: Vec<AffineTransform>,
    pub outliers: Vec<bool>,
    /// Distance between measured and predicted translation;
    /// infinite for tiles without a measurement.
    pub residuals: Vec<f64>,
    /// `[a, b, c]` of `p ≈ a + b·row + c·col` for each row-major parameter.
    pub coefficients: [[f64; 3]; 12],
}

impl OutlierCorrection {
    pub fn n_outliers(&self) -> usize {
        self.outliers.iter().filter(|&&o| o).count()
    }
}

/// Regularise per-tile transforms across the tile grid.
///
/// `transforms[i]` is `None` for tiles whose own registration failed; they get
/// a predicted transform and are flagged.
///
/// A prediction that is not invertible at any tile position fails the whole
/// correction with `DegenerateInput`.
///
/// # Panics
///
/// Panics if `config` is invalid or the slices differ in length.
pub fn correct_outliers(
    transforms: &[Option<AffineTransform>],
    positions: &[TileGridPosition],
    config: &OutlierConfig,
) -> RegisterResult<OutlierCorrection> {
    config.validate();
    assert_eq!(
        transforms.len(),
        positions.len(),
        "one grid position per tile transform"
    );

    let measured: Vec<(TileGridPosition, [f64; 12])> = transforms
        .iter()
        .zip(positions)
        .filter_map(|(t, &pos)| t.map(|t| (pos, t.to_params())))
        .collect();

    let insufficient = || RegisterError::InsufficientData {
        what: "tiles with a transform, not all in one grid line",
        found: measured.len(),
        required: MIN_TILES,
    };

    if measured.len() < MIN_TILES {
        return Err(insufficient());
    }

    let design = DMatrix::from_fn(measured.len(), 3, |i, j| match j {
        0 => 1.0,
        1 => measured[i].0.row as f64,
        _ => measured[i].0.col as f64,
    });

    let regressor = HuberRegressor {
        epsilon: config.huber_epsilon,
        max_iterations: config.max_iterations,
        tolerance: config.tolerance,
    };

    let mut coefficients = [[0.0; 3]; 12];
    for (param, coef) in coefficients.iter_mut().enumerate() {
        let y: Vec<f64> = measured.iter().map(|(_, p)| p[param]).collect();
        let fit = regressor.fit(&design, &y).ok_or_else(insufficient)?;
        trace!(
            param,
            iterations = fit.iterations,
            scale = fit.scale,
            downweighted = fit.weights.iter().filter(|&&w| w < 1.0).count(),
            "Huber fit"
        );
        coef.copy_from_slice(&fit.coefficients);
    }

    let predict = |pos: TileGridPosition| -> AffineTransform {
        let (row, col) = (pos.row as f64, pos.col as f64);
        AffineTransform::from_params(std::array::from_fn(|param| {
            let [a, b, c] = coefficients[param];
            a + b * row + c * col
        }))
    };

    let predicted: Vec<AffineTransform> = positions
        .iter()
        .map(|&pos| predict(pos).ensure_invertible())
        .collect::<RegisterResult<_>>()?;
    let residuals: Vec<f64> = transforms
        .iter()
        .zip(&predicted)
        .map(|(observed, predicted)| match observed {
            Some(t) => (t.translation - predicted.translation).length(),
            None => f64::INFINITY,
        })
        .collect();
    let outliers: Vec<bool> = residuals
        .iter()
        .map(|&r| r > config.residual_threshold)
        .collect();

    for (i, pos) in positions.iter().enumerate() {
        if outliers[i] {
            debug!(
                row = pos.row,
                col = pos.col,
                residual = residuals[i],
                "tile transform flagged as outlier"
            );
        }
    }

    Ok(OutlierCorrection {
        transforms: predicted,
        outliers,
        residuals,
        coefficients,
    })
}
