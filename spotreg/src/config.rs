//! Configuration types for the registration stages.
//!
//! All configuration structs are consolidated here. Each has a `Default`
//! tuned for confocal spot data (xy pixels of ~0.1 µm, z planes of ~0.3 µm)
//! and a `validate()` that panics on values no stage can work with.
//!
//! Axis-indexed arrays (`[usize; 3]`, `[f64; 3]`) are ordered x, y, z.

use serde::{Deserialize, Serialize};

use crate::shift::ShiftCandidateGrid;

// =============================================================================
// Shift search
// =============================================================================

/// Inclusive range of candidate offsets along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl AxisRange {
    pub const fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// A range holding the single value `value`.
    pub const fn single(value: f64) -> Self {
        Self {
            min: value,
            max: value,
            step: 1.0,
        }
    }

    /// Ascending values `min, min + step, ...` up to and including `max`.
    pub fn values(&self) -> Vec<f64> {
        let count = ((self.max - self.min) / self.step + 1e-9).floor() as usize + 1;
        (0..count).map(|i| self.min + i as f64 * self.step).collect()
    }

    fn validate(&self, axis: &str) {
        assert!(
            self.min.is_finite() && self.max.is_finite(),
            "{axis} shift range must be finite, got [{}, {}]",
            self.min,
            self.max
        );
        assert!(
            self.max >= self.min,
            "{axis} shift range must have min <= max, got [{}, {}]",
            self.min,
            self.max
        );
        assert!(
            self.step > 0.0,
            "{axis} shift step must be positive, got {}",
            self.step
        );
    }
}

/// Configuration for [`compute_shift`](crate::shift::compute_shift).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftSearchConfig {
    /// Candidate x offsets (xy pixels).
    pub x_range: AxisRange,
    /// Candidate y offsets (xy pixels).
    pub y_range: AxisRange,
    /// Candidate z offsets (z planes, unscaled).
    pub z_range: AxisRange,
    /// Steps added on both ends of each axis when the coarse search is not
    /// significant. All zero disables the widened search.
    pub widen: [usize; 3],
    /// Neighbour distance (xy pixels) at which the Gaussian kernel falls to
    /// `exp(-1/2)`. Roughly the distance below which spots are a good match.
    pub score_thresh: f64,
    /// Fixed significance threshold. `None` derives it from the coarse search
    /// as `median + min_score_auto_param * IQR`.
    pub min_score: Option<f64>,
    /// Multiplier on the IQR for the automatic threshold. Should be well above 1.
    pub min_score_auto_param: f64,
    /// z pixel size divided by xy pixel size.
    pub z_scale: f64,
    /// Fraction of the coarse step used for the first refinement.
    pub refine_scale: f64,
    /// Half-width, in coarse steps, of the first refinement window.
    pub refine_extent: usize,
}

impl Default for ShiftSearchConfig {
    fn default() -> Self {
        Self {
            x_range: AxisRange::new(-20.0, 20.0, 2.0),
            y_range: AxisRange::new(-20.0, 20.0, 2.0),
            z_range: AxisRange::new(-4.0, 4.0, 1.0),
            widen: [0, 0, 0],
            score_thresh: 2.0,
            min_score: None,
            min_score_auto_param: 5.0,
            z_scale: 1.0,
            refine_scale: 0.5,
            refine_extent: 2,
        }
    }
}

impl ShiftSearchConfig {
    /// The coarse search grid described by the three ranges.
    pub fn candidate_grid(&self) -> ShiftCandidateGrid {
        ShiftCandidateGrid::new(
            self.x_range.values(),
            self.y_range.values(),
            self.z_range.values(),
        )
    }

    /// Validate configuration parameters.
    pub fn validate(&self) {
        self.x_range.validate("x");
        self.y_range.validate("y");
        self.z_range.validate("z");
        assert!(
            self.score_thresh > 0.0,
            "score_thresh must be positive, got {}",
            self.score_thresh
        );
        if let Some(min_score) = self.min_score {
            assert!(
                min_score.is_finite(),
                "min_score must be finite, got {}",
                min_score
            );
        }
        assert!(
            self.min_score_auto_param > 0.0,
            "min_score_auto_param must be positive, got {}",
            self.min_score_auto_param
        );
        assert!(
            self.z_scale > 0.0,
            "z_scale must be positive, got {}",
            self.z_scale
        );
        assert!(
            self.refine_scale >= 0.0 && self.refine_scale <= 1.0,
            "refine_scale must be in [0, 1], got {}",
            self.refine_scale
        );
    }
}

// =============================================================================
// Sub-volume regression
// =============================================================================

/// Configuration for sub-volume regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvrConfig {
    /// Number of sub-volumes along x, y, z.
    pub sub_volumes: [usize; 3],
    /// How far (x, y in xy pixels, z in planes) the target box extends past
    /// each sub-volume so that shifted spots are still found. Should cover the
    /// shift search range.
    pub margin: [f64; 3],
    /// Minimum soft matched fraction (score / base spots) for a sub-volume
    /// shift to enter the regression.
    pub quality_threshold: f64,
    pub shift: ShiftSearchConfig,
}

impl Default for SvrConfig {
    fn default() -> Self {
        Self {
            sub_volumes: [8, 8, 3],
            margin: [20.0, 20.0, 4.0],
            quality_threshold: 0.25,
            shift: ShiftSearchConfig::default(),
        }
    }
}

impl SvrConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) {
        assert!(
            self.sub_volumes.iter().all(|&n| n > 0),
            "sub_volumes counts must be positive, got {:?}",
            self.sub_volumes
        );
        assert!(
            self.margin.iter().all(|&m| m >= 0.0),
            "margin must be non-negative, got {:?}",
            self.margin
        );
        assert!(
            (0.0..=1.0).contains(&self.quality_threshold),
            "quality_threshold must be in [0, 1], got {}",
            self.quality_threshold
        );
        self.shift.validate();
    }
}

// =============================================================================
// Outlier correction
// =============================================================================

/// Configuration for cross-tile outlier correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Translation residual (xy pixels) above which a tile is an outlier.
    pub residual_threshold: f64,
    /// Huber transition point in units of the robust residual scale.
    /// 1.35 gives 95% efficiency on Gaussian residuals.
    pub huber_epsilon: f64,
    pub max_iterations: usize,
    /// Relative coefficient change below which IRLS stops.
    pub tolerance: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            residual_threshold: 5.0,
            huber_epsilon: 1.35,
            max_iterations: 100,
            tolerance: 1e-10,
        }
    }
}

impl OutlierConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) {
        assert!(
            self.residual_threshold > 0.0,
            "residual_threshold must be positive, got {}",
            self.residual_threshold
        );
        assert!(
            self.huber_epsilon > 1.0,
            "huber_epsilon must be > 1, got {}",
            self.huber_epsilon
        );
        assert!(
            self.max_iterations > 0,
            "outlier max_iterations must be positive, got {}",
            self.max_iterations
        );
        assert!(
            self.tolerance > 0.0,
            "outlier tolerance must be positive, got {}",
            self.tolerance
        );
    }
}

// =============================================================================
// ICP
// =============================================================================

/// Configuration for ICP refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConfig {
    /// Match distance on the first iteration.
    pub match_distance: f64,
    /// Floor for the match distance when it shrinks.
    pub min_match_distance: f64,
    /// Per-iteration multiplier on the match distance. 1.0 keeps it fixed.
    pub threshold_decay: f64,
    pub max_iterations: usize,
    /// Maximum change in match fraction and in any transform parameter between
    /// consecutive iterations for the unit to count as converged.
    pub convergence_tolerance: f64,
    /// Wall-clock budget per unit. Hitting it ends the unit like the iteration cap.
    pub time_budget_ms: Option<u64>,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            match_distance: 3.0,
            min_match_distance: 1.0,
            threshold_decay: 1.0,
            max_iterations: 50,
            convergence_tolerance: 1e-3,
            time_budget_ms: None,
        }
    }
}

impl IcpConfig {
    /// Match distance used on iteration `iteration` (0-based).
    pub fn match_distance_at(&self, iteration: usize) -> f64 {
        let decayed = self.match_distance * self.threshold_decay.powi(iteration as i32);
        decayed.max(self.min_match_distance.min(self.match_distance))
    }

    /// Validate configuration parameters.
    pub fn validate(&self) {
        assert!(
            self.match_distance > 0.0,
            "match_distance must be positive, got {}",
            self.match_distance
        );
        assert!(
            self.min_match_distance > 0.0 && self.min_match_distance <= self.match_distance,
            "min_match_distance must be in (0, match_distance], got {}",
            self.min_match_distance
        );
        assert!(
            self.threshold_decay > 0.0 && self.threshold_decay <= 1.0,
            "threshold_decay must be in (0, 1], got {}",
            self.threshold_decay
        );
        assert!(
            self.max_iterations > 0,
            "ICP max_iterations must be positive, got {}",
            self.max_iterations
        );
        assert!(
            self.convergence_tolerance >= 0.0,
            "convergence_tolerance must be non-negative, got {}",
            self.convergence_tolerance
        );
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Configuration for [`register_tiles`](crate::pipeline::register_tiles).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterConfig {
    /// Tile size along x, y (xy pixels) and z (planes). Spots lie in
    /// `[0, tile_extent)`.
    pub tile_extent: [f64; 3],
    /// Channel used for round registration and as the channel reference.
    pub anchor_channel: usize,
    /// Round in which channel transforms are measured.
    pub reference_round: usize,
    /// Tiles processed at once during the sub-volume stage.
    pub max_concurrent_tiles: usize,
    pub svr: SvrConfig,
    pub outlier: OutlierConfig,
    pub icp: IcpConfig,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            tile_extent: [2048.0, 2048.0, 50.0],
            anchor_channel: 0,
            reference_round: 0,
            max_concurrent_tiles: 4,
            svr: SvrConfig::default(),
            outlier: OutlierConfig::default(),
            icp: IcpConfig::default(),
        }
    }
}

impl RegisterConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) {
        assert!(
            self.tile_extent.iter().all(|&e| e > 0.0),
            "tile_extent must be positive, got {:?}",
            self.tile_extent
        );
        assert!(
            self.max_concurrent_tiles > 0,
            "max_concurrent_tiles must be positive, got {}",
            self.max_concurrent_tiles
        );
        self.svr.validate();
        self.outlier.validate();
        self.icp.validate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_range_values() {
        assert_eq!(
            AxisRange::new(-4.0, 4.0, 2.0).values(),
            vec![-4.0, -2.0, 0.0, 2.0, 4.0]
        );
        assert_eq!(AxisRange::new(0.0, 5.0, 2.0).values(), vec![0.0, 2.0, 4.0]);
        assert_eq!(AxisRange::single(3.0).values(), vec![3.0]);
    }

    #[test]
    fn test_defaults_validate() {
        RegisterConfig::default().validate();
    }

    #[test]
    #[should_panic(expected = "z_scale must be positive")]
    fn test_invalid_z_scale_panics() {
        let config = ShiftSearchConfig {
            z_scale: 0.0,
            ..Default::default()
        };
        config.validate();
    }

    #[test]
    #[should_panic(expected = "min_match_distance must be in (0, match_distance]")]
    fn test_invalid_icp_distance_panics() {
        let config = IcpConfig {
            match_distance: 2.0,
            min_match_distance: 3.0,
            ..Default::default()
        };
        config.validate();
    }

    #[test]
    fn test_match_distance_decays_to_floor() {
        let config = IcpConfig {
            match_distance: 8.0,
            min_match_distance: 2.0,
            threshold_decay: 0.5,
            ..Default::default()
        };
        assert_eq!(config.match_distance_at(0), 8.0);
        assert_eq!(config.match_distance_at(1), 4.0);
        assert_eq!(config.match_distance_at(2), 2.0);
        assert_eq!(config.match_distance_at(5), 2.0);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "
tile_extent: [512.0, 512.0, 30.0]
anchor_channel: 2
svr:
  sub_volumes: [4, 4, 2]
  shift:
    z_scale: 3.0
    widen: [5, 5, 1]
icp:
  max_iterations: 20
";
        let config: RegisterConfig = serde_yml::from_str(yaml).unwrap();
        config.validate();

        assert_eq!(config.anchor_channel, 2);
        assert_eq!(config.svr.sub_volumes, [4, 4, 2]);
        assert_eq!(config.svr.shift.z_scale, 3.0);
        assert_eq!(config.svr.shift.widen, [5, 5, 1]);
        assert_eq!(config.svr.shift.score_thresh, 2.0);
        assert_eq!(config.icp.max_iterations, 20);
        assert_eq!(config.outlier, OutlierConfig::default());
    }
}
