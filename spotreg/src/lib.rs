//! Spotreg - multi-round 3-D spot registration.
//!
//! Aligns the detected spots of every imaging round and channel of a set of
//! microscopy tiles to each tile's anchor spots:
//! - Exhaustive Gaussian-kernel shift search with widen and refine phases
//! - Sub-volume regression of local shifts into a per-tile affine transform
//! - Cross-tile Huber regression to correct outlier tiles
//! - Iterative closest point refinement of the final transforms
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use spotreg::{register_tiles, RegisterConfig, TileGridPosition, TileSpots};
//!
//! let tiles = vec![TileSpots {
//!     grid_position: TileGridPosition::new(0, 0),
//!     anchor: anchor_spots,
//!     spots: vec![vec![round0_ch0, round0_ch1], vec![round1_ch0, round1_ch1]],
//! }];
//!
//! let output = register_tiles(&tiles, &RegisterConfig::default());
//! if let Some(transform) = output.transform(0, 1, 1) {
//!     println!("tile 0, round 1, channel 1: {transform}");
//! }
//! ```

pub mod config;
pub mod error;
pub mod icp;
pub mod math;
pub mod outlier;
pub mod pipeline;
pub mod shift;
pub mod spatial;
pub mod svr;
pub mod transform;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{
    AxisRange, IcpConfig, OutlierConfig, RegisterConfig, ShiftSearchConfig, SvrConfig,
};
pub use error::{DegenerateKind, DivergenceReason, RegisterError, RegisterResult};
pub use icp::{run_icp, IcpResult, IcpStatus};
pub use outlier::{correct_outliers, OutlierCorrection, TileGridPosition};
pub use pipeline::{register_tiles, RegistrationOutput, TileSpots};
pub use shift::{best_shift, compute_shift, ShiftCandidateGrid, ShiftResult};
pub use svr::{run_svr, SubVolume, SubVolumeGrid, SvrResult};
pub use transform::AffineTransform;
