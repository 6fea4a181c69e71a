//! End-to-end registration of a small synthetic tile grid.

use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use spotreg::{
    register_tiles, AxisRange, RegisterConfig, ShiftSearchConfig, SvrConfig, TileGridPosition,
    TileSpots,
};

const EXTENT: DVec3 = DVec3::new(200.0, 200.0, 20.0);

fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

fn noisy(points: &[DVec3], offset: DVec3, rng: &mut StdRng) -> Vec<DVec3> {
    points
        .iter()
        .map(|&p| {
            let noise = DVec3::new(gaussian(rng), gaussian(rng), gaussian(rng)) * 0.05;
            p + offset + noise
        })
        .collect()
}

fn synthetic_tiles(round_shifts: &[DVec3], channel_shifts: &[DVec3]) -> Vec<TileSpots> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut tiles = Vec::new();
    for row in 0..2 {
        for col in 0..2 {
            let anchor: Vec<DVec3> = (0..800)
                .map(|_| {
                    DVec3::new(
                        rng.random_range(0.0..EXTENT.x),
                        rng.random_range(0.0..EXTENT.y),
                        rng.random_range(0.0..EXTENT.z),
                    )
                })
                .collect();
            let spots = round_shifts
                .iter()
                .map(|&rs| {
                    channel_shifts
                        .iter()
                        .map(|&cs| noisy(&anchor, rs + cs, &mut rng))
                        .collect::<Vec<_>>()
                })
                .collect();
            tiles.push(TileSpots {
                grid_position: TileGridPosition::new(row, col),
                anchor,
                spots,
            });
        }
    }
    tiles
}

fn config() -> RegisterConfig {
    RegisterConfig {
        tile_extent: EXTENT.to_array(),
        max_concurrent_tiles: 2,
        svr: SvrConfig {
            sub_volumes: [2, 2, 2],
            margin: [8.0, 8.0, 2.0],
            shift: ShiftSearchConfig {
                x_range: AxisRange::new(-6.0, 6.0, 2.0),
                y_range: AxisRange::new(-6.0, 6.0, 2.0),
                z_range: AxisRange::new(-2.0, 2.0, 1.0),
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_register_tile_grid() {
    let _ = common::setup_logging(&common::LogConfig {
        base_level: "warn".to_string(),
        directory: None,
        ..Default::default()
    });

    let round_shifts = [DVec3::ZERO, DVec3::new(2.0, -4.0, 1.0)];
    let channel_shifts = [DVec3::ZERO, DVec3::new(0.0, 2.0, 0.0)];
    let tiles = synthetic_tiles(&round_shifts, &channel_shifts);

    let output = register_tiles(&tiles, &config());

    assert_eq!(output.n_failed(), 0);
    for correction in output
        .round_correction
        .iter()
        .chain(&output.channel_correction)
    {
        let correction = correction.as_ref().expect("four tiles span the grid");
        assert_eq!(correction.n_outliers(), 0);
        assert!(correction.residuals.iter().all(|&r| r < 1e-6));
    }

    for t in 0..tiles.len() {
        for (r, &rs) in round_shifts.iter().enumerate() {
            for (c, &cs) in channel_shifts.iter().enumerate() {
                let transform = output.transform(t, r, c).expect("unit registered");
                let err = (transform.translation - (rs + cs)).length();
                assert!(err < 0.1, "tile {t} round {r} channel {c}: error {err}");
                assert!((transform.scales() - DVec3::ONE).abs().max_element() < 1e-3);
            }
        }
    }
}
