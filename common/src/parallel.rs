//! Bounded parallel mapping.
//!
//! Work units (tiles, sub-volumes) are independent, but each one can hold a
//! large amount of point data. `par_map_limited` keeps at most
//! `max_concurrent` of them in flight while still writing every result into
//! its own slot, in input order.

use rayon::prelude::*;

/// Maps `f` over `items` in parallel, with at most `max_concurrent` items in flight.
///
/// Results are returned in input order. Each slot is written exactly once.
///
/// # Panics
///
/// Panics if `max_concurrent` is 0.
pub fn par_map_limited<T, R, F>(items: &[T], max_concurrent: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(items.len()).collect();

    for (batch, (inputs, outputs)) in items
        .chunks(max_concurrent)
        .zip(slots.chunks_mut(max_concurrent))
        .enumerate()
    {
        inputs
            .par_iter()
            .zip(outputs.par_iter_mut())
            .for_each(|(item, slot)| *slot = Some(f(item)));
        tracing::trace!(batch, size = inputs.len(), "parallel batch finished");
    }

    slots.into_iter().flatten().collect()
}
