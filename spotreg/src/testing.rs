//! Synthetic spot clouds for tests.

#![allow(dead_code)]

use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// `count` spots uniformly distributed in `[0, extent)`.
pub fn random_points(count: usize, extent: DVec3, seed: u64) -> Vec<DVec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            DVec3::new(
                rng.random_range(0.0..extent.x),
                rng.random_range(0.0..extent.y),
                rng.random_range(0.0..extent.z),
            )
        })
        .collect()
}

/// Standard normal sample (Box-Muller).
pub fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Copy of `points` with independent Gaussian noise of `sigma` on every coordinate.
pub fn add_noise(points: &[DVec3], sigma: f64, seed: u64) -> Vec<DVec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    points
        .iter()
        .map(|&p| {
            p + DVec3::new(
                gaussian(&mut rng) * sigma,
                gaussian(&mut rng) * sigma,
                gaussian(&mut rng) * sigma,
            )
        })
        .collect()
}

pub fn translate(points: &[DVec3], offset: DVec3) -> Vec<DVec3> {
    points.iter().map(|&p| p + offset).collect()
}

/// Points with `offset` applied then noise added.
pub fn shifted_copy(points: &[DVec3], offset: DVec3, sigma: f64, seed: u64) -> Vec<DVec3> {
    add_noise(&translate(points, offset), sigma, seed)
}
