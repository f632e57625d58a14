/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Rebuilding per-query structure over flat, unordered result buffers.
//!
//! Gathered results arrive with no useful ordering: contributions from
//! different processes interleave arbitrarily. [`count_results`] rebuilds
//! the CSR offset array from the per-result query ids, and
//! [`sort_results!`](crate::sort_results) reorders the flat buffers so each
//! query's results are contiguous again.

use std::sync::atomic::{AtomicUsize, Ordering};

use distree_utils::exclusive_scan;

use crate::exec::ExecutionContext;

/// Build the CSR offset array for `n_queries` from one query id per result.
///
/// Ids must lie in `[0, n_queries)`. Counting uses one relaxed atomic
/// increment per result under the data-parallel loop; the counts are read
/// only after the loop's completion point, then converted to offsets by an
/// exclusive scan. `n_queries == 0` with an empty id list is legal and
/// yields `[0]`.
pub fn count_results<C>(ctx: &C, n_queries: usize, query_ids: &[u32]) -> Vec<usize>
where
    C: ExecutionContext,
{
    let counts: Vec<AtomicUsize> = (0..n_queries + 1).map(|_| AtomicUsize::new(0)).collect();

    ctx.for_each(query_ids.len(), |i| {
        let id = query_ids[i] as usize;
        assert!(id < n_queries, "query id {} out of range", id);
        counts[id].fetch_add(1, Ordering::Relaxed);
    });

    let mut offsets: Vec<usize> = counts.into_iter().map(AtomicUsize::into_inner).collect();
    exclusive_scan(&mut offsets);
    offsets
}

/// The permutation that sorts `keys` ascending, ties broken by original
/// position.
///
/// `keys` is left untouched; entry `i` of the result is the source position
/// of the element that belongs at sorted position `i`. Position tie-breaking
/// makes the permutation deterministic for any key distribution.
pub fn argsort<K: Ord + Copy>(keys: &[K]) -> Vec<u32> {
    let mut permutation: Vec<u32> = (0..keys.len() as u32).collect();
    permutation.sort_unstable_by_key(|&i| (keys[i as usize], i));
    permutation
}

/// Gather `values` through `permutation`: entry `i` of the result is
/// `values[permutation[i]]`.
pub fn permuted_copy<T: Copy>(permutation: &[u32], values: &[T]) -> Vec<T> {
    assert_eq!(
        permutation.len(),
        values.len(),
        "companion buffer length does not match the key buffer"
    );
    permutation.iter().map(|&p| values[p as usize]).collect()
}

/// Sort any number of companion buffers by one key buffer.
///
/// Computes the ascending permutation of the keys (the key buffer itself is
/// neither mutated nor rebound) and rebinds every companion `Vec` to its
/// permuted copy. All companions must have the key buffer's length. Empty
/// input is a no-op.
///
/// ```
/// use distree::sort_results;
///
/// let ids = vec![2u32, 0, 1, 0];
/// let mut indices = vec![20u32, 0, 10, 1];
/// let mut distances = vec![2.0f32, 0.0, 1.0, 0.1];
/// sort_results!(&ids, &mut indices, &mut distances);
/// assert_eq!(indices, vec![0, 1, 10, 20]);
/// assert_eq!(distances, vec![0.0, 0.1, 1.0, 2.0]);
/// ```
#[macro_export]
macro_rules! sort_results {
    ($keys:expr $(, $companion:expr)+ $(,)?) => {{
        let __permutation = $crate::query::indexing::argsort($keys);
        $(
            *$companion = $crate::query::indexing::permuted_copy(&__permutation, $companion);
        )+
    }};
}
