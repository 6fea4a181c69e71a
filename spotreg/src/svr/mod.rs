//! Sub-volume regression: many local shifts → one affine transform per tile.
//!
//! A tile is cut into a grid of boxes. The shift between base and target spots
//! is measured independently in each box, and a least-squares plane
//! `shift = S · centre + b` is fitted through the shifts of the boxes that
//! matched well. The tile transform is then `p ↦ (I + S) · p + b`, mapping
//! base coordinates onto target coordinates.


use glam::{DMat3, DVec3, IVec3};
use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::debug;

use crate::config::SvrConfig;
use crate::error::{RegisterError, RegisterResult};
use crate::math::solve_least_squares;
use crate::shift::compute_shift;
use crate::transform::AffineTransform;

/// Fewest accepted sub-volumes the regression will fit.
pub const MIN_SUB_VOLUMES: usize = 4;

/// One box of a tile with the spots that belong to it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubVolume {
    /// Box centre in tile coordinates.
    pub position: DVec3,
    /// Base spots inside the box.
    pub base: Vec<DVec3>,
    /// Target spots inside the box grown by the margin.
    pub target: Vec<DVec3>,
}

/// Box layout of a tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubVolumeGrid {
    /// Boxes along x, y, z.
    pub counts: [usize; 3],
    /// Growth of each box along x, y, z when collecting target spots.
    pub margin: [f64; 3],
}

impl SubVolumeGrid {
    pub fn from_config(config: &SvrConfig) -> Self {
        Self {
            counts: config.sub_volumes,
            margin: config.margin,
        }
    }

    pub fn len(&self) -> usize {
        self.counts.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split a tile of size `extent` into boxes, x-major.
    ///
    /// Every base spot lands in exactly one box; spots outside
    /// `[0, extent)` go to the nearest edge box.
    pub fn partition(&self, base: &[DVec3], target: &[DVec3], extent: DVec3) -> Vec<SubVolume> {
        let counts = DVec3::new(
            self.counts[0] as f64,
            self.counts[1] as f64,
            self.counts[2] as f64,
        );
        let size = extent / counts;
        let margin = DVec3::from_array(self.margin);

        let cell_of = |p: DVec3| -> usize {
            let cell = |axis: usize| -> usize {
                let i = (p[axis] / size[axis]).floor();
                (i.max(0.0) as usize).min(self.counts[axis] - 1)
            };
            (cell(0) * self.counts[1] + cell(1)) * self.counts[2] + cell(2)
        };

        let mut cells: Vec<SubVolume> = Vec::with_capacity(self.len());
        for ix in 0..self.counts[0] {
            for iy in 0..self.counts[1] {
                for iz in 0..self.counts[2] {
                    let lo = DVec3::new(ix as f64, iy as f64, iz as f64) * size;
                    cells.push(SubVolume {
                        position: lo + size * 0.5,
                        base: Vec::new(),
                        target: Vec::new(),
                    });
                }
            }
        }

        for &p in base {
            cells[cell_of(p)].base.push(p);
        }

        for cell in &mut cells {
            let lo = cell.position - size * 0.5 - margin;
            let hi = cell.position + size * 0.5 + margin;
            cell.target = target
                .iter()
                .copied()
                .filter(|p| p.cmpge(lo).all() && p.cmple(hi).all())
                .collect();
        }

        cells
    }
}

/// Shift measured in one sub-volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubVolumeShift {
    pub position: DVec3,
    /// `None` when the shift search failed (e.g. no spots in the box).
    pub shift: Option<IVec3>,
    pub score: f64,
    pub min_score: f64,
    /// Soft matched fraction: score / number of base spots.
    pub quality: f64,
    /// Whether the shift entered the regression.
    pub accepted: bool,
}

/// Outcome of [`run_svr`].
#[derive(Debug, Clone, PartialEq)]
pub struct SvrResult {
    pub transform: AffineTransform,
    /// One entry per input sub-volume, in input order.
    pub shifts: Vec<SubVolumeShift>,
    pub n_accepted: usize,
}

impl SvrResult {
    /// Result for a channel or round registered against itself.
    pub fn identity() -> Self {
        Self {
            transform: AffineTransform::IDENTITY,
            shifts: Vec::new(),
            n_accepted: 0,
        }
    }
}

/// Shift of every sub-volume, in parallel.
///
/// A shift is accepted when its search was significant and its quality
/// reaches `config.quality_threshold`. A box with only a few base spots can
/// have a high matched fraction at a random shift; significance rejects it.
///
/// # Panics
///
/// Panics if `config` is invalid.
pub fn measure_shifts(sub_volumes: &[SubVolume], config: &SvrConfig) -> Vec<SubVolumeShift> {
    config.validate();

    sub_volumes
        .par_iter()
        .map(|sv| match compute_shift(&sv.base, &sv.target, &config.shift) {
            Ok(result) => {
                let quality = result.score / sv.base.len() as f64;
                SubVolumeShift {
                    position: sv.position,
                    shift: Some(result.shift),
                    score: result.score,
                    min_score: result.min_score,
                    quality,
                    accepted: result.is_significant() && quality >= config.quality_threshold,
                }
            }
            Err(_) => SubVolumeShift {
                position: sv.position,
                shift: None,
                score: 0.0,
                min_score: 0.0,
                quality: 0.0,
                accepted: false,
            },
        })
        .collect()
}

/// Least-squares affine fit through the accepted shifts.
///
/// An axis along which the grid has a single box carries no slope
/// information; its slope is fixed to zero.
pub fn regress_shifts(
    shifts: &[SubVolumeShift],
    fixed_axes: [bool; 3],
) -> RegisterResult<AffineTransform> {
    let accepted: Vec<(DVec3, DVec3)> = shifts
        .iter()
        .filter(|s| s.accepted)
        .filter_map(|s| s.shift.map(|shift| (s.position, shift.as_dvec3())))
        .collect();

    let insufficient = || RegisterError::InsufficientData {
        what: "accepted sub-volumes spanning the tile",
        found: accepted.len(),
        required: MIN_SUB_VOLUMES,
    };

    if accepted.len() < MIN_SUB_VOLUMES {
        return Err(insufficient());
    }

    let free_axes: Vec<usize> = (0..3).filter(|&axis| !fixed_axes[axis]).collect();
    let k = free_axes.len() + 1;
    let design = DMatrix::from_fn(accepted.len(), k, |i, j| {
        if j < free_axes.len() {
            accepted[i].0[free_axes[j]]
        } else {
            1.0
        }
    });
    let rhs = DMatrix::from_fn(accepted.len(), 3, |i, j| accepted[i].1[j]);
    let solution = solve_least_squares(&design, &rhs).ok_or_else(insufficient)?;

    // Row j of the solution holds d(shift)/d(position[free_axes[j]]).
    let row = |j: usize| DVec3::new(solution[(j, 0)], solution[(j, 1)], solution[(j, 2)]);
    let mut slope = [DVec3::ZERO; 3];
    for (j, &axis) in free_axes.iter().enumerate() {
        slope[axis] = row(j);
    }

    let linear = DMat3::IDENTITY + DMat3::from_cols(slope[0], slope[1], slope[2]);
    AffineTransform::new(linear, row(k - 1)).ensure_invertible()
}

/// Measure the shift in every sub-volume and regress them into one affine
/// transform from base to target coordinates.
///
/// Sub-volumes whose shift search fails, is not significant or whose quality
/// is below the threshold are left out of the fit, not zeroed.
///
/// # Panics
///
/// Panics if `config` is invalid.
pub fn run_svr(sub_volumes: &[SubVolume], config: &SvrConfig) -> RegisterResult<SvrResult> {
    let shifts = measure_shifts(sub_volumes, config);
    let n_accepted = shifts.iter().filter(|s| s.accepted).count();

    debug!(
        sub_volumes = sub_volumes.len(),
        accepted = n_accepted,
        "sub-volume shifts measured"
    );

    let fixed_axes = std::array::from_fn(|axis| config.sub_volumes[axis] == 1);
    let transform = regress_shifts(&shifts, fixed_axes)?;

    Ok(SvrResult {
        transform,
        shifts,
        n_accepted,
    })
}
