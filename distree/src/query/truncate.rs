/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Per-query truncation of merged candidates to the requested count.

use std::cmp::Ordering;

use distree_utils::{exclusive_scan, split_by_offsets, IndexedAccess};
use tracing::debug;

use crate::exec::ExecutionContext;
use crate::query::{NearestQuery, PairIndexRank};

/// One candidate held by a [`FixedHeap`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapEntry {
    /// Candidate index within the owning process's local data.
    pub index: u32,
    /// Rank of the owning process.
    pub rank: u32,
    /// Ordering key.
    pub distance: f32,
}

// Smallest distance wins; NaN compares equal so it neither sinks nor rises.
fn before(a: &HeapEntry, b: &HeapEntry) -> bool {
    a.distance
        .partial_cmp(&b.distance)
        .unwrap_or(Ordering::Equal)
        == Ordering::Less
}

/// A fixed-capacity binary heap over a borrowed slice, keyed by distance
/// with the smallest on top.
///
/// The backing slice comes from a scratch arena shared by all queries of a
/// truncation pass, so no per-query allocation happens. Capacity is the
/// slice length and is never grown. Popping yields candidates in ascending
/// distance order; the order among equal distances is whatever the heap
/// produces, deterministic for a fixed insertion order but otherwise
/// unspecified.
#[derive(Debug)]
pub struct FixedHeap<'a> {
    slots: &'a mut [HeapEntry],
    len: usize,
}

impl<'a> FixedHeap<'a> {
    /// An empty heap backed by `slots`.
    pub fn new(slots: &'a mut [HeapEntry]) -> Self {
        Self { slots, len: 0 }
    }

    /// Maximum number of entries the heap can hold.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the heap holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert an entry.
    ///
    /// Panics when the heap is full; the arena is sized to the total
    /// candidate count, so a full heap is a caller bug.
    pub fn push(&mut self, entry: HeapEntry) {
        assert!(self.len < self.slots.len(), "fixed heap overflow");
        let mut child = self.len;
        self.slots[child] = entry;
        self.len += 1;

        while child > 0 {
            let parent = (child - 1) / 2;
            if before(&self.slots[child], &self.slots[parent]) {
                self.slots.swap(child, parent);
                child = parent;
            } else {
                break;
            }
        }
    }

    /// Remove and return the entry with the smallest distance.
    pub fn pop(&mut self) -> Option<HeapEntry> {
        if self.len == 0 {
            return None;
        }
        let top = self.slots[0];
        self.len -= 1;
        self.slots[0] = self.slots[self.len];

        let mut parent = 0;
        loop {
            let left = 2 * parent + 1;
            if left >= self.len {
                break;
            }
            let right = left + 1;
            let mut closest = left;
            if right < self.len && before(&self.slots[right], &self.slots[left]) {
                closest = right;
            }
            if before(&self.slots[closest], &self.slots[parent]) {
                self.slots.swap(closest, parent);
                parent = closest;
            } else {
                break;
            }
        }
        Some(top)
    }
}

/// Truncate each query's merged candidates to its requested count.
///
/// Query `q`'s candidates occupy `offsets[q]..offsets[q + 1]` of the
/// parallel `indices` / `ranks` / `distances` buffers. On return, `indices`,
/// `ranks` and `offsets` are replaced by truncated versions keeping the
/// `min(count, k(q))` smallest-distance candidates per query, in ascending
/// distance order. Distances are dropped from the output; callers that need
/// them retain their own copy. A query with no candidates keeps an empty
/// range and skips the heap entirely.
///
/// Queries are processed independently in parallel; every per-query heap
/// borrows a disjoint slice of one shared arena sized to the
/// pre-truncation candidate total.
///
/// Like [`forward_queries`](crate::query::forward_queries), the batch is
/// consumed through [`IndexedAccess`], so a reordered view of stored
/// queries truncates without a materialized copy.
pub fn filter_results<Q, P, C>(
    ctx: &C,
    queries: &P,
    distances: &[f32],
    indices: &mut Vec<u32>,
    offsets: &mut Vec<usize>,
    ranks: &mut Vec<u32>,
) where
    Q: NearestQuery,
    P: IndexedAccess<Item = Q>,
    C: ExecutionContext,
{
    let n_queries = queries.len();
    assert!(
        distree_utils::csr::is_well_formed(offsets, indices.len()),
        "candidate offsets are not a CSR array over the candidate buffer"
    );
    assert_eq!(offsets.len(), n_queries + 1, "one offset range per query");
    assert_eq!(ranks.len(), indices.len(), "one rank per candidate");
    assert_eq!(distances.len(), indices.len(), "one distance per candidate");

    let mut new_offsets = vec![0usize; n_queries + 1];
    for q in 0..n_queries {
        let count = offsets[q + 1] - offsets[q];
        new_offsets[q] = count.min(queries.get(q).k() as usize);
    }
    let n_truncated = exclusive_scan(&mut new_offsets);

    debug!(
        n_queries,
        n_candidates = indices.len(),
        n_truncated,
        "filter_results"
    );

    let mut new_indices = vec![0u32; n_truncated];
    let mut new_ranks = vec![0u32; n_truncated];
    let mut arena = vec![HeapEntry::default(); indices.len()];

    {
        let arena_rows = split_by_offsets(&mut arena, offsets);
        let index_rows = split_by_offsets(&mut new_indices, &new_offsets);
        let rank_rows = split_by_offsets(&mut new_ranks, &new_offsets);

        let work: Vec<(usize, &mut [HeapEntry], &mut [u32], &mut [u32])> = arena_rows
            .into_iter()
            .zip(index_rows)
            .zip(rank_rows)
            .enumerate()
            .map(|(q, ((arena_row, index_row), rank_row))| (q, arena_row, index_row, rank_row))
            .collect();

        let indices_in: &[u32] = indices.as_slice();
        let ranks_in: &[u32] = ranks.as_slice();
        ctx.dispatch(work, |(q, arena_row, index_row, rank_row)| {
            if arena_row.is_empty() {
                return;
            }
            let mut heap = FixedHeap::new(arena_row);
            for i in offsets[q]..offsets[q + 1] {
                heap.push(HeapEntry {
                    index: indices_in[i],
                    rank: ranks_in[i],
                    distance: distances[i],
                });
            }
            for slot in 0..index_row.len() {
                let entry = heap.pop().expect("arena row holds every candidate");
                index_row[slot] = entry.index;
                rank_row[slot] = entry.rank;
            }
        });
    }

    *indices = new_indices;
    *ranks = new_ranks;
    *offsets = new_offsets;
}

/// Zip parallel index and rank buffers into the final per-candidate values.
pub fn zip_results(indices: &[u32], ranks: &[u32]) -> Vec<PairIndexRank> {
    assert_eq!(indices.len(), ranks.len(), "one rank per candidate");
    indices
        .iter()
        .zip(ranks)
        .map(|(&index, &rank)| PairIndexRank { index, rank })
        .collect()
}

#[cfg(test)]
mod truncate_test {
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::exec::{HostContext, SerialContext};
    use crate::query::Nearest;

    fn entry(index: u32, distance: f32) -> HeapEntry {
        HeapEntry {
            index,
            rank: 0,
            distance,
        }
    }

    #[test]
    fn heap_pops_ascending() {
        let mut arena = vec![HeapEntry::default(); 5];
        let mut heap = FixedHeap::new(&mut arena);
        assert!(heap.is_empty());
        assert_eq!(heap.capacity(), 5);

        for (i, d) in [3.0f32, 1.0, 2.5, 0.5, 2.0].iter().enumerate() {
            heap.push(entry(i as u32, *d));
        }
        assert_eq!(heap.len(), 5);

        let mut drained = Vec::new();
        while let Some(e) = heap.pop() {
            drained.push(e.distance);
        }
        assert_eq!(drained, vec![0.5, 1.0, 2.0, 2.5, 3.0]);
        assert!(heap.pop().is_none());
    }

    #[test]
    #[should_panic]
    fn heap_overflow_asserts() {
        let mut arena = vec![HeapEntry::default(); 1];
        let mut heap = FixedHeap::new(&mut arena);
        heap.push(entry(0, 1.0));
        heap.push(entry(1, 2.0));
    }

    #[test]
    fn truncates_to_k_smallest_in_ascending_order() {
        let ctx = SerialContext;
        let queries = vec![Nearest::new(0.0f32, 2), Nearest::new(0.0f32, 3)];
        // Query 0: 4 candidates, query 1: 2 candidates (fewer than k).
        let mut offsets = vec![0usize, 4, 6];
        let mut indices = vec![10u32, 11, 12, 13, 20, 21];
        let mut ranks = vec![0u32, 1, 2, 3, 0, 1];
        let distances = [4.0f32, 1.0, 3.0, 2.0, 9.0, 8.0];

        filter_results(&ctx, &queries, &distances, &mut indices, &mut offsets, &mut ranks);

        assert_eq!(offsets, vec![0, 2, 4]);
        assert_eq!(indices, vec![11, 13, 21, 20]);
        assert_eq!(ranks, vec![1, 3, 1, 0]);
    }

    #[test]
    fn zero_candidate_query_stays_empty() {
        let ctx = SerialContext;
        let queries = vec![Nearest::new(0.0f32, 3), Nearest::new(0.0f32, 1)];
        let mut offsets = vec![0usize, 0, 2];
        let mut indices = vec![5u32, 6];
        let mut ranks = vec![0u32, 0];
        let distances = [2.0f32, 1.0];

        filter_results(&ctx, &queries, &distances, &mut indices, &mut offsets, &mut ranks);

        assert_eq!(offsets, vec![0, 0, 1]);
        assert_eq!(indices, vec![6]);
        assert_eq!(ranks, vec![0]);
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let ctx = SerialContext;
        let queries: Vec<Nearest<f32>> = Vec::new();
        let mut offsets = vec![0usize];
        let mut indices = Vec::new();
        let mut ranks = Vec::new();
        filter_results(&ctx, &queries, &[], &mut indices, &mut offsets, &mut ranks);
        assert_eq!(offsets, vec![0]);
        assert!(indices.is_empty());
    }

    #[test]
    fn matches_full_sort_reference() {
        let ctx = HostContext;
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        let n_queries = 50;
        let queries: Vec<Nearest<f32>> = (0..n_queries)
            .map(|_| Nearest::new(0.0, rng.random_range(1..8)))
            .collect();

        let mut offsets = vec![0usize; n_queries + 1];
        for q in 0..n_queries {
            offsets[q] = rng.random_range(0..12);
        }
        let total = exclusive_scan(&mut offsets);

        let mut indices: Vec<u32> = (0..total as u32).collect();
        let mut ranks: Vec<u32> = (0..total).map(|_| rng.random_range(0..4)).collect();
        let distances: Vec<f32> = (0..total).map(|_| rng.random_range(0.0..100.0)).collect();

        let reference_offsets = offsets.clone();
        let reference_indices = indices.clone();
        let reference_distances = distances.clone();

        filter_results(&ctx, &queries, &distances, &mut indices, &mut offsets, &mut ranks);

        for q in 0..n_queries {
            let lo = reference_offsets[q];
            let hi = reference_offsets[q + 1];
            let k = queries[q].k() as usize;

            // Independent reference: fully sort the query's candidates.
            let mut full: Vec<(f32, u32)> = (lo..hi)
                .map(|i| (reference_distances[i], reference_indices[i]))
                .collect();
            full.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
            full.truncate(k);

            let kept = offsets[q + 1] - offsets[q];
            assert_eq!(kept, (hi - lo).min(k));

            // Input indices were the identity, so a kept index recovers its
            // original distance directly.
            let got: Vec<(f32, u32)> = (offsets[q]..offsets[q + 1])
                .map(|i| (reference_distances[indices[i] as usize], indices[i]))
                .collect();

            // Distances ascend and match the reference multiset.
            for w in got.windows(2) {
                assert!(w[0].0 <= w[1].0);
            }
            let mut got_d: Vec<f32> = got.iter().map(|e| e.0).collect();
            let mut ref_d: Vec<f32> = full.iter().map(|e| e.0).collect();
            got_d.sort_by(|a, b| a.partial_cmp(b).unwrap());
            ref_d.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_eq!(got_d, ref_d);
        }
    }

    #[test]
    fn permuted_query_view_truncates_in_view_order() {
        use distree_utils::Permuted;

        let ctx = SerialContext;
        let stored = vec![Nearest::new(0.0f32, 1), Nearest::new(0.0f32, 2)];
        let order = vec![1u32, 0];
        let view = Permuted::new(&stored, &order);

        // Candidates laid out in view order: view query 0 (k = 2) has three,
        // view query 1 (k = 1) has two.
        let mut offsets = vec![0usize, 3, 5];
        let mut indices = vec![0u32, 1, 2, 3, 4];
        let mut ranks = vec![0u32; 5];
        let distances = [3.0f32, 1.0, 2.0, 5.0, 4.0];

        filter_results(&ctx, &view, &distances, &mut indices, &mut offsets, &mut ranks);

        assert_eq!(offsets, vec![0, 2, 3]);
        assert_eq!(indices, vec![1, 2, 4]);
    }

    #[test]
    fn zip_pairs_up() {
        let zipped = zip_results(&[1, 2], &[10, 20]);
        assert_eq!(
            zipped,
            vec![
                PairIndexRank { index: 1, rank: 10 },
                PairIndexRank { index: 2, rank: 20 }
            ]
        );
    }
}
