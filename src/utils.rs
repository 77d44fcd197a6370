//! Common utilities used across the crate.

use std::ops::Range;

/// Split `n_items` across `n_workers`, returning the half-open range owned by
/// `worker`.
///
/// The first `n_items % n_workers` workers receive one extra item so the
/// partition is as even as possible. Every item belongs to exactly one
/// worker, which is what lets the evaluator give each worker a disjoint
/// accumulator slab.
#[inline]
pub fn partition_work(worker: usize, n_workers: usize, n_items: usize) -> Range<usize> {
    debug_assert!(worker < n_workers);
    let per_worker = n_items / n_workers;
    let remainder = n_items % n_workers;
    if worker < remainder {
        let start = worker * (per_worker + 1);
        start..start + per_worker + 1
    } else {
        let start = remainder * (per_worker + 1) + (worker - remainder) * per_worker;
        start..start + per_worker
    }
}
