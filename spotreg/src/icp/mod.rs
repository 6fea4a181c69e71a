//! Iterative closest point refinement of an affine transform.
//!
//! Each iteration maps the base spots through the current transform, pairs
//! every mapped spot with its nearest target spot, drops pairs farther apart
//! than the match distance and refits the full affine transform from the
//! remaining pairs by least squares.
//!
//! A unit moves through `Initialized → Iterating → Converged |
//! MaxItersReached | Diverged`. Divergence ends the unit at once and keeps the
//! last valid transform along with the match-count and MSE histories.


use std::time::{Duration, Instant};

use glam::DVec3;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::config::IcpConfig;
use crate::error::{DivergenceReason, RegisterError, RegisterResult};
use crate::spatial::KdTree;
use crate::transform::AffineTransform;

/// How a unit finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcpStatus {
    Converged,
    /// Iteration cap or time budget hit before convergence.
    MaxItersReached,
    Diverged(DivergenceReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcpPhase {
    Initialized,
    Iterating,
    Finished(IcpStatus),
}

/// Fraction of base spots matched on each iteration.
pub fn frac_matches(match_counts: &[usize], n_base: usize) -> Vec<f64> {
    if n_base == 0 {
        return vec![0.0; match_counts.len()];
    }
    match_counts
        .iter()
        .map(|&c| c as f64 / n_base as f64)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct IcpResult {
    /// Last valid transform: the final fit, or the last fit before divergence.
    pub transform: AffineTransform,
    /// Matches found on each iteration.
    pub match_counts: Vec<usize>,
    /// Mean squared distance of the matches on each iteration (NaN with none).
    pub mse: Vec<f64>,
    pub status: IcpStatus,
    pub iterations: usize,
}

impl IcpResult {
    pub fn is_converged(&self) -> bool {
        self.status == IcpStatus::Converged
    }

    pub fn frac_matches(&self, n_base: usize) -> Vec<f64> {
        frac_matches(&self.match_counts, n_base)
    }

    /// `Err(ConvergenceFailure)` carrying the histories if the unit diverged.
    pub fn into_result(self) -> RegisterResult<IcpResult> {
        match self.status {
            IcpStatus::Diverged(reason) => Err(RegisterError::ConvergenceFailure {
                reason,
                iterations: self.iterations,
                match_counts: self.match_counts,
                mse: self.mse,
            }),
            _ => Ok(self),
        }
    }
}

/// One ICP unit, advanced an iteration at a time with [`step`](Self::step).
#[derive(Debug)]
pub struct IcpState<'a> {
    base: &'a [DVec3],
    /// `None` for an empty target.
    tree: Option<KdTree>,
    config: &'a IcpConfig,
    transform: AffineTransform,
    match_counts: Vec<usize>,
    mse: Vec<f64>,
    phase: IcpPhase,
    deadline: Option<Instant>,
}

impl<'a> IcpState<'a> {
    /// Start a unit at `initial`, which must be invertible.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    pub fn new(
        base: &'a [DVec3],
        target: &[DVec3],
        initial: AffineTransform,
        config: &'a IcpConfig,
    ) -> RegisterResult<Self> {
        config.validate();
        let transform = initial.ensure_invertible()?;
        let deadline = config
            .time_budget_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        Ok(Self {
            base,
            tree: KdTree::build(target),
            config,
            transform,
            match_counts: Vec::with_capacity(config.max_iterations),
            mse: Vec::with_capacity(config.max_iterations),
            phase: IcpPhase::Initialized,
            deadline,
        })
    }

    pub fn phase(&self) -> IcpPhase {
        self.phase
    }

    pub fn transform(&self) -> &AffineTransform {
        &self.transform
    }

    pub fn iterations(&self) -> usize {
        self.match_counts.len()
    }

    /// Run one iteration. Does nothing once the unit has finished.
    pub fn step(&mut self) -> IcpPhase {
        if let IcpPhase::Finished(_) = self.phase {
            return self.phase;
        }

        let iteration = self.iterations();
        let max_dist = self.config.match_distance_at(iteration);
        let (src, dst, sum_dist_sq) = self.find_matches(max_dist);

        let n_matches = src.len();
        self.match_counts.push(n_matches);
        self.mse.push(if n_matches == 0 {
            f64::NAN
        } else {
            sum_dist_sq / n_matches as f64
        });

        trace!(iteration, max_dist, matches = n_matches, "ICP iteration");

        if n_matches == 0 {
            return self.finish_with(IcpStatus::Diverged(DivergenceReason::NoMatches));
        }
        let Some(fitted) = AffineTransform::fit(&src, &dst) else {
            return self.finish_with(IcpStatus::Diverged(DivergenceReason::DegenerateMatches));
        };
        if !fitted.is_invertible() {
            return self.finish_with(IcpStatus::Diverged(DivergenceReason::NonInvertible));
        }

        let param_change = fitted.max_abs_diff(&self.transform);
        self.transform = fitted;

        let iterations = self.iterations();
        if iterations >= 2 {
            let frac = frac_matches(&self.match_counts[iterations - 2..], self.base.len());
            let frac_change = (frac[1] - frac[0]).abs();
            let tol = self.config.convergence_tolerance;
            if frac_change <= tol && param_change <= tol {
                return self.finish_with(IcpStatus::Converged);
            }
        }

        let out_of_time = self.deadline.is_some_and(|d| Instant::now() >= d);
        if iterations >= self.config.max_iterations || out_of_time {
            return self.finish_with(IcpStatus::MaxItersReached);
        }

        self.phase = IcpPhase::Iterating;
        self.phase
    }

    pub fn finish(self) -> IcpResult {
        let status = match self.phase {
            IcpPhase::Finished(status) => status,
            IcpPhase::Initialized | IcpPhase::Iterating => IcpStatus::MaxItersReached,
        };
        IcpResult {
            transform: self.transform,
            iterations: self.match_counts.len(),
            match_counts: self.match_counts,
            mse: self.mse,
            status,
        }
    }

    fn finish_with(&mut self, status: IcpStatus) -> IcpPhase {
        self.phase = IcpPhase::Finished(status);
        self.phase
    }

    /// Matched (base, target) pairs closer than `max_dist` under the current
    /// transform, and the sum of their squared distances.
    fn find_matches(&self, max_dist: f64) -> (Vec<DVec3>, Vec<DVec3>, f64) {
        let Some(tree) = &self.tree else {
            return (Vec::new(), Vec::new(), 0.0);
        };
        let max_dist_sq = max_dist * max_dist;
        let transform = self.transform;

        let pairs: Vec<(DVec3, DVec3, f64)> = self
            .base
            .par_iter()
            .filter_map(|&p| {
                let neighbor = tree.nearest(transform.apply(p));
                (neighbor.dist_sq < max_dist_sq)
                    .then(|| (p, tree.point(neighbor.index), neighbor.dist_sq))
            })
            .collect();

        let sum_dist_sq: f64 = pairs.iter().map(|(_, _, d)| d).sum();
        let (src, dst): (Vec<DVec3>, Vec<DVec3>) =
            pairs.into_iter().map(|(s, d, _)| (s, d)).unzip();
        (src, dst, sum_dist_sq)
    }
}

/// Refine `initial` so it maps `base` spots onto `target` spots.
///
/// Errors only for a non-invertible `initial`; a unit that diverges is
/// returned with [`IcpStatus::Diverged`] (see [`IcpResult::into_result`]).
///
/// # Panics
///
/// Panics if `config` is invalid.
pub fn run_icp(
    base: &[DVec3],
    target: &[DVec3],
    initial: AffineTransform,
    config: &IcpConfig,
) -> RegisterResult<IcpResult> {
    let mut state = IcpState::new(base, target, initial, config)?;
    loop {
        let phase = state.step();
        trace!(
            iteration = state.iterations(),
            translation = %state.transform().translation,
            "ICP transform"
        );
        if let IcpPhase::Finished(_) = phase {
            break;
        }
    }

    let result = state.finish();
    debug!(
        status = ?result.status,
        iterations = result.iterations,
        matches = result.match_counts.last().copied().unwrap_or(0),
        "ICP finished"
    );
    Ok(result)
}
