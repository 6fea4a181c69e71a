//! Exhaustive shift search between two spot clouds.
//!
//! Each candidate shift is scored by translating the base cloud, finding every
//! translated spot's nearest target spot and summing a Gaussian kernel of the
//! distances:
//!
//! ```text
//! score(s) = Σ_i exp(-d_i(s)² / (2 · thresh²))
//! ```
//!
//! The score approximates the number of spots with a close partner but stays
//! smooth, so a coarse grid still localises the peak.
//!
//! [`compute_shift`] wraps the engine in a three-phase search:
//!
//! 1. **Coarse** search over the configured grid.
//! 2. **Widen**: if the best score is not significant, extend every axis by
//!    `widen` steps and search the new candidates.
//! 3. **Refine**: if significant, search a finer window around the best shift,
//!    then a unit-step window around the result.

mod grid;


pub use grid::ShiftCandidateGrid;

use glam::{DVec3, IVec3};
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::config::ShiftSearchConfig;
use crate::error::{DegenerateKind, RegisterError, RegisterResult};
use crate::math::median_and_iqr;
use crate::spatial::KdTree;
use grid::{set_difference, sort_shifts};

/// Gaussian-kernel score of a set of neighbour distances.
///
/// Maximal (1 per distance) at distance 0 and strictly decreasing in each distance.
pub fn shift_score(distances: &[f64], thresh: f64) -> f64 {
    let inv = 1.0 / (2.0 * thresh * thresh);
    distances.iter().map(|d| (-d * d * inv).exp()).sum()
}

/// Summary of one exhaustive search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreStatistics {
    /// Best candidate, in unscaled grid units.
    pub best_shift: DVec3,
    pub best_score: f64,
    pub median_score: f64,
    /// Interquartile range of all candidate scores.
    pub iqr_score: f64,
    pub n_candidates: usize,
}

/// Scores candidate shifts of a base cloud against a fixed target cloud.
///
/// Both clouds are copied with z multiplied by `z_scale`; candidate grids stay
/// in unscaled units and are scaled only when scoring.
#[derive(Debug)]
pub struct ShiftSearchEngine {
    base: Vec<DVec3>,
    tree: KdTree,
    inv_two_thresh_sq: f64,
    z_scale: f64,
}

impl ShiftSearchEngine {
    pub fn new(
        base: &[DVec3],
        target: &[DVec3],
        thresh: f64,
        z_scale: f64,
    ) -> RegisterResult<Self> {
        let scale = DVec3::new(1.0, 1.0, z_scale);
        let scaled_target: Vec<DVec3> = target.iter().map(|&p| p * scale).collect();
        let tree = KdTree::build(&scaled_target)
            .ok_or(RegisterError::DegenerateInput(DegenerateKind::EmptyPointCloud))?;
        if base.is_empty() {
            return Err(RegisterError::DegenerateInput(
                DegenerateKind::EmptyPointCloud,
            ));
        }

        Ok(Self {
            base: base.iter().map(|&p| p * scale).collect(),
            tree,
            inv_two_thresh_sq: 1.0 / (2.0 * thresh * thresh),
            z_scale,
        })
    }

    /// Score of one candidate shift (unscaled units).
    pub fn score(&self, shift: DVec3) -> f64 {
        let scaled = DVec3::new(shift.x, shift.y, shift.z * self.z_scale);
        self.base
            .iter()
            .map(|&p| {
                let neighbor = self.tree.nearest(p + scaled);
                (-neighbor.dist_sq * self.inv_two_thresh_sq).exp()
            })
            .sum()
    }

    /// Search every candidate of `grid`.
    pub fn search(&self, grid: &ShiftCandidateGrid) -> RegisterResult<ScoreStatistics> {
        self.search_excluding(grid, &[])
            .ok_or(RegisterError::DegenerateInput(
                DegenerateKind::EmptyCandidateGrid,
            ))
    }

    /// Search the candidates of `grid` not in `exclude` (sorted, deduplicated).
    ///
    /// Returns `None` when no candidate is left.
    pub fn search_excluding(
        &self,
        grid: &ShiftCandidateGrid,
        exclude: &[DVec3],
    ) -> Option<ScoreStatistics> {
        let candidates = set_difference(&grid.candidates(), exclude);
        if candidates.is_empty() {
            return None;
        }

        let scores: Vec<f64> = candidates.par_iter().map(|&c| self.score(c)).collect();

        // First maximum in enumeration order, for determinism.
        let mut best_idx = 0;
        for (i, &s) in scores.iter().enumerate() {
            if s > scores[best_idx] {
                best_idx = i;
            }
        }

        let (median_score, iqr_score) = median_and_iqr(&scores);
        Some(ScoreStatistics {
            best_shift: candidates[best_idx],
            best_score: scores[best_idx],
            median_score,
            iqr_score,
            n_candidates: candidates.len(),
        })
    }
}

/// Best shift from `grid` minus `exclude` to apply to `base` to match
/// `target`, with z in the same units as x and y.
///
/// # Panics
///
/// Panics if `thresh` is not positive.
pub fn best_shift(
    base: &[DVec3],
    target: &[DVec3],
    thresh: f64,
    grid: &ShiftCandidateGrid,
    exclude: &[DVec3],
) -> RegisterResult<ScoreStatistics> {
    assert!(thresh > 0.0, "score_thresh must be positive, got {thresh}");

    let engine = ShiftSearchEngine::new(base, target, thresh, 1.0)?;
    let mut exclude = exclude.to_vec();
    sort_shifts(&mut exclude);
    engine
        .search_excluding(grid, &exclude)
        .ok_or(RegisterError::DegenerateInput(
            DegenerateKind::EmptyCandidateGrid,
        ))
}

/// Outcome of [`compute_shift`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftResult {
    /// Best shift rounded to whole pixels, z in (unscaled) planes.
    pub shift: IVec3,
    pub score: f64,
    /// Significance threshold used: the configured one or the automatic one.
    pub min_score: f64,
    /// Statistics of the coarse search.
    pub coarse: ScoreStatistics,
}

impl ShiftResult {
    pub fn is_significant(&self) -> bool {
        self.score > self.min_score
    }
}

/// Shift to apply to `base` to best match `target`, using the coarse → widen →
/// refine search described in the module docs.
///
/// Shifts found by the widen and refine phases replace the current best only
/// when they score higher.
///
/// # Panics
///
/// Panics if `config` is invalid.
pub fn compute_shift(
    base: &[DVec3],
    target: &[DVec3],
    config: &ShiftSearchConfig,
) -> RegisterResult<ShiftResult> {
    config.validate();

    let engine = ShiftSearchEngine::new(base, target, config.score_thresh, config.z_scale)?;

    let mut grid = config.candidate_grid();
    let coarse = engine.search(&grid)?;
    let min_score = config
        .min_score
        .unwrap_or(coarse.median_score + config.min_score_auto_param * coarse.iqr_score);

    let mut state = SearchState {
        best: coarse.best_shift,
        score: coarse.best_score,
        tried: grid.candidates(),
    };

    if state.score < min_score && config.widen.iter().any(|&w| w > 0) {
        let widened = grid.widened(config.widen);
        state.try_grid(&engine, &widened, "widen");
        grid = widened;
    }

    if state.score > min_score {
        let refined = grid.refined(state.best, config.refine_scale, config.refine_extent);
        state.try_grid(&engine, &refined, "refine");

        let unit = refined.refined(state.best, 0.0, 1);
        state.try_grid(&engine, &unit, "unit");
    } else {
        debug!(
            score = state.score,
            min_score, "shift search not significant, skipping refinement"
        );
    }

    Ok(ShiftResult {
        shift: state.best.round().as_ivec3(),
        score: state.score,
        min_score,
        coarse,
    })
}

/// Best shift so far plus every candidate already scored.
struct SearchState {
    best: DVec3,
    score: f64,
    /// Sorted and deduplicated.
    tried: Vec<DVec3>,
}

impl SearchState {
    fn try_grid(&mut self, engine: &ShiftSearchEngine, grid: &ShiftCandidateGrid, phase: &str) {
        if let Some(stats) = engine.search_excluding(grid, &self.tried) {
            trace!(
                phase,
                candidates = stats.n_candidates,
                best_score = stats.best_score,
                "shift search phase"
            );
            if stats.best_score > self.score {
                self.best = stats.best_shift;
                self.score = stats.best_score;
            }
        }
        self.tried.extend(grid.candidates());
        sort_shifts(&mut self.tried);
    }
}
