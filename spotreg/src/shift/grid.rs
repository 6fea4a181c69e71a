//! Candidate shift grids and the widen / refine / exclude operations on them.

use std::cmp::Ordering;

use glam::DVec3;

/// Two candidate components closer than this are the same shift.
const SHIFT_TOLERANCE: f64 = 1e-9;

/// Three ascending axis sequences searched as a Cartesian product.
///
/// Each axis has a uniform step, which [`widened`](Self::widened) and
/// [`refined`](Self::refined) rely on. A single-value axis is fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftCandidateGrid {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl ShiftCandidateGrid {
    pub fn new(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> Self {
        debug_assert!([&x, &y, &z]
            .iter()
            .all(|axis| axis.windows(2).all(|w| w[0] < w[1])));
        Self { x, y, z }
    }

    /// Number of candidates in the product.
    pub fn len(&self) -> usize {
        self.x.len() * self.y.len() * self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All candidates, x-major, so the result is sorted by [`compare_shifts`].
    pub fn candidates(&self) -> Vec<DVec3> {
        let mut out = Vec::with_capacity(self.len());
        for &x in &self.x {
            for &y in &self.y {
                for &z in &self.z {
                    out.push(DVec3::new(x, y, z));
                }
            }
        }
        out
    }

    /// Grid extended by `widen[axis]` steps below and above each axis.
    pub fn widened(&self, widen: [usize; 3]) -> Self {
        Self {
            x: extend_axis(&self.x, widen[0]),
            y: extend_axis(&self.y, widen[1]),
            z: extend_axis(&self.z, widen[2]),
        }
    }

    /// Grid around `center` spanning `± extent` current steps with a step of
    /// `ceil(refine_scale · step)` (at least 1).
    pub fn refined(&self, center: DVec3, refine_scale: f64, extent: usize) -> Self {
        Self {
            x: refine_axis(&self.x, center.x, refine_scale, extent),
            y: refine_axis(&self.y, center.y, refine_scale, extent),
            z: refine_axis(&self.z, center.z, refine_scale, extent),
        }
    }
}

/// Mean spacing of an axis, `None` for fewer than two values.
pub(crate) fn axis_step(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    Some((values[values.len() - 1] - values[0]) / (values.len() - 1) as f64)
}

pub(crate) fn extend_axis(values: &[f64], extend: usize) -> Vec<f64> {
    let Some(step) = axis_step(values).filter(|_| extend > 0) else {
        return values.to_vec();
    };

    let min = values[0];
    let max = values[values.len() - 1];
    let below = (1..=extend).rev().map(|k| min - k as f64 * step);
    let above = (1..=extend).map(|k| max + k as f64 * step);

    below.chain(values.iter().copied()).chain(above).collect()
}

pub(crate) fn refine_axis(values: &[f64], center: f64, refine_scale: f64, extent: usize) -> Vec<f64> {
    let Some(step) = axis_step(values) else {
        return values.to_vec();
    };

    let refined_step = (refine_scale * step).ceil().max(1.0);
    let start = center - extent as f64 * step;
    let stop = center + extent as f64 * step + refined_step / 2.0;

    (0..)
        .map(|k| start + k as f64 * refined_step)
        .take_while(|&v| v < stop)
        .collect()
}

/// Lexicographic (x, y, z) order with a small tolerance per component.
pub(crate) fn compare_shifts(a: &DVec3, b: &DVec3) -> Ordering {
    for axis in 0..3 {
        let d = a[axis] - b[axis];
        if d.abs() > SHIFT_TOLERANCE {
            return if d < 0.0 {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }
    }
    Ordering::Equal
}

/// Sort and deduplicate a list of shifts in [`compare_shifts`] order.
pub(crate) fn sort_shifts(shifts: &mut Vec<DVec3>) {
    shifts.sort_by(compare_shifts);
    shifts.dedup_by(|a, b| compare_shifts(a, b) == Ordering::Equal);
}

/// `candidates \ exclude`, both sorted by [`compare_shifts`].
pub(crate) fn set_difference(candidates: &[DVec3], exclude: &[DVec3]) -> Vec<DVec3> {
    let mut out = Vec::with_capacity(candidates.len());
    let mut j = 0;
    for c in candidates {
        while j < exclude.len() && compare_shifts(&exclude[j], c) == Ordering::Less {
            j += 1;
        }
        if j < exclude.len() && compare_shifts(&exclude[j], c) == Ordering::Equal {
            continue;
        }
        out.push(*c);
    }
    out
}
