//! Full multi-round registration of a set of tiles.
//!
//! # Pipeline Stages
//!
//! 1. **Sub-volume regression** (per tile, bounded concurrency) - one affine
//!    transform per round (anchor spots → round spots in the anchor channel)
//!    and per channel (anchor channel → channel, in the reference round)
//! 2. **Outlier correction** (per round, per channel, across tiles) - replace
//!    each tile's transform with the cross-tile Huber prediction
//! 3. **ICP** (per tile/round/channel) - start from the round transform
//!    followed by the channel transform and refine on the spot clouds
//!
//! Every stage finishes for all tiles before the next starts. A failed unit
//! keeps its error in its own slot; other units carry on.


use std::time::Instant;

use glam::DVec3;
use rayon::prelude::*;

use crate::config::RegisterConfig;
use crate::error::RegisterResult;
use crate::icp::{run_icp, IcpResult};
use crate::outlier::{correct_outliers, OutlierCorrection, TileGridPosition};
use crate::svr::{run_svr, SubVolumeGrid, SvrResult};
use crate::transform::AffineTransform;

/// Detected spots of one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSpots {
    pub grid_position: TileGridPosition,
    /// Spots of the anchor image every round and channel is registered to.
    pub anchor: Vec<DVec3>,
    /// `spots[round][channel]`.
    pub spots: Vec<Vec<Vec<DVec3>>>,
}

impl TileSpots {
    pub fn n_rounds(&self) -> usize {
        self.spots.len()
    }

    pub fn n_channels(&self) -> usize {
        self.spots.first().map_or(0, Vec::len)
    }
}

/// Sub-volume regression results of one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSvr {
    /// Per round: anchor → round (anchor channel).
    pub rounds: Vec<RegisterResult<SvrResult>>,
    /// Per channel: anchor channel → channel (reference round).
    pub channels: Vec<RegisterResult<SvrResult>>,
}

/// Everything [`register_tiles`] produced. Outer index is the tile, in input
/// order, unless stated otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationOutput {
    /// Raw sub-volume regression results.
    pub svr: Vec<TileSvr>,
    /// Cross-tile correction, indexed by round.
    pub round_correction: Vec<RegisterResult<OutlierCorrection>>,
    /// Cross-tile correction, indexed by channel.
    pub channel_correction: Vec<RegisterResult<OutlierCorrection>>,
    /// `round_transforms[tile][round]` after correction.
    pub round_transforms: Vec<Vec<RegisterResult<AffineTransform>>>,
    /// `channel_transforms[tile][channel]` after correction.
    pub channel_transforms: Vec<Vec<RegisterResult<AffineTransform>>>,
    /// `icp[tile][round][channel]`.
    pub icp: Vec<Vec<Vec<RegisterResult<IcpResult>>>>,
}

impl RegistrationOutput {
    /// Final transform of one unit, if its registration succeeded.
    pub fn transform(&self, tile: usize, round: usize, channel: usize) -> Option<AffineTransform> {
        self.icp[tile][round][channel]
            .as_ref()
            .ok()
            .map(|r| r.transform)
    }

    /// Number of (tile, round, channel) units without a final transform.
    pub fn n_failed(&self) -> usize {
        self.icp
            .iter()
            .flatten()
            .flatten()
            .filter(|r| r.is_err())
            .count()
    }
}

/// Register every round and channel of every tile to the tile's anchor spots.
///
/// # Panics
///
/// Panics if the configuration is invalid, if tiles disagree on the number of
/// rounds or channels, or if the anchor channel or reference round is out of
/// range.
pub fn register_tiles(tiles: &[TileSpots], config: &RegisterConfig) -> RegistrationOutput {
    config.validate();

    let n_rounds = tiles.first().map_or(0, TileSpots::n_rounds);
    let n_channels = tiles.first().map_or(0, TileSpots::n_channels);
    for tile in tiles {
        assert!(
            tile.n_rounds() == n_rounds && tile.spots.iter().all(|r| r.len() == n_channels),
            "every tile must have {n_rounds} rounds of {n_channels} channels"
        );
    }
    if !tiles.is_empty() {
        assert!(
            config.anchor_channel < n_channels,
            "anchor_channel {} out of range for {n_channels} channels",
            config.anchor_channel
        );
        assert!(
            config.reference_round < n_rounds,
            "reference_round {} out of range for {n_rounds} rounds",
            config.reference_round
        );
    }

    let start = Instant::now();
    tracing::info!(
        tiles = tiles.len(),
        rounds = n_rounds,
        channels = n_channels,
        "Starting sub-volume regression"
    );

    let svr = common::par_map_limited(tiles, config.max_concurrent_tiles, |tile| {
        tile_svr(tile, config)
    });

    let positions: Vec<TileGridPosition> = tiles.iter().map(|t| t.grid_position).collect();

    let round_correction: Vec<RegisterResult<OutlierCorrection>> = (0..n_rounds)
        .map(|r| {
            let raw: Vec<Option<AffineTransform>> = svr
                .iter()
                .map(|s| s.rounds[r].as_ref().ok().map(|res| res.transform))
                .collect();
            correct_outliers(&raw, &positions, &config.outlier)
        })
        .collect();
    let channel_correction: Vec<RegisterResult<OutlierCorrection>> = (0..n_channels)
        .map(|c| {
            let raw: Vec<Option<AffineTransform>> = svr
                .iter()
                .map(|s| s.channels[c].as_ref().ok().map(|res| res.transform))
                .collect();
            correct_outliers(&raw, &positions, &config.outlier)
        })
        .collect();

    let round_transforms: Vec<Vec<RegisterResult<AffineTransform>>> = (0..tiles.len())
        .map(|t| {
            (0..n_rounds)
                .map(|r| corrected_transform(&round_correction[r], &svr[t].rounds[r], t))
                .collect()
        })
        .collect();
    let channel_transforms: Vec<Vec<RegisterResult<AffineTransform>>> = (0..tiles.len())
        .map(|t| {
            (0..n_channels)
                .map(|c| corrected_transform(&channel_correction[c], &svr[t].channels[c], t))
                .collect()
        })
        .collect();

    for (r, correction) in round_correction.iter().enumerate() {
        match correction {
            Ok(c) => tracing::info!(
                round = r,
                outliers = c.n_outliers(),
                "Round transforms corrected"
            ),
            Err(e) => tracing::warn!(
                round = r,
                "Cross-tile correction failed, using raw transforms: {e}"
            ),
        }
    }
    for (ch, correction) in channel_correction.iter().enumerate() {
        match correction {
            Ok(c) => tracing::info!(
                channel = ch,
                outliers = c.n_outliers(),
                "Channel transforms corrected"
            ),
            Err(e) => tracing::warn!(
                channel = ch,
                "Cross-tile correction failed, using raw transforms: {e}"
            ),
        }
    }

    let icp: Vec<Vec<Vec<RegisterResult<IcpResult>>>> = tiles
        .par_iter()
        .enumerate()
        .map(|(t, tile)| {
            (0..n_rounds)
                .into_par_iter()
                .map(|r| {
                    (0..n_channels)
                        .map(|c| -> RegisterResult<IcpResult> {
                            let round = round_transforms[t][r].as_ref().map_err(Clone::clone)?;
                            let channel =
                                channel_transforms[t][c].as_ref().map_err(Clone::clone)?;
                            let initial = round.then(channel);
                            run_icp(&tile.anchor, &tile.spots[r][c], initial, &config.icp)?
                                .into_result()
                        })
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let output = RegistrationOutput {
        svr,
        round_correction,
        channel_correction,
        round_transforms,
        channel_transforms,
        icp,
    };

    for (t, per_round) in output.icp.iter().enumerate() {
        for (r, per_channel) in per_round.iter().enumerate() {
            for (c, result) in per_channel.iter().enumerate() {
                if let Err(e) = result {
                    tracing::warn!(tile = t, round = r, channel = c, "Registration failed: {e}");
                }
            }
        }
    }

    tracing::info!(
        units = tiles.len() * n_rounds * n_channels,
        failed = output.n_failed(),
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Registration complete"
    );

    output
}

/// Round and channel sub-volume regression of one tile.
fn tile_svr(tile: &TileSpots, config: &RegisterConfig) -> TileSvr {
    let extent = DVec3::from_array(config.tile_extent);
    let grid = SubVolumeGrid::from_config(&config.svr);
    let anchor_ch = config.anchor_channel;
    let ref_spots = &tile.spots[config.reference_round];

    let rounds = (0..tile.n_rounds())
        .into_par_iter()
        .map(|r| {
            let sub_volumes = grid.partition(&tile.anchor, &tile.spots[r][anchor_ch], extent);
            run_svr(&sub_volumes, &config.svr)
        })
        .collect();

    let channels = (0..tile.n_channels())
        .into_par_iter()
        .map(|c| {
            if c == anchor_ch {
                return Ok(SvrResult::identity());
            }
            let sub_volumes = grid.partition(&ref_spots[anchor_ch], &ref_spots[c], extent);
            run_svr(&sub_volumes, &config.svr)
        })
        .collect();

    TileSvr { rounds, channels }
}

/// The cross-tile prediction for `tile`, or its raw SVR transform when the
/// cross-tile fit was impossible.
fn corrected_transform(
    correction: &RegisterResult<OutlierCorrection>,
    raw: &RegisterResult<SvrResult>,
    tile: usize,
) -> RegisterResult<AffineTransform> {
    match correction {
        Ok(c) => Ok(c.transforms[tile]),
        Err(_) => raw.as_ref().map(|s| s.transform).map_err(Clone::clone),
    }
}
