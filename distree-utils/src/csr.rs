/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Compressed-sparse-row helpers.
//!
//! A CSR offset array of length `n + 1` delimits `n` variable-length
//! sub-lists inside one flat buffer: sub-list `q` occupies
//! `offsets[q]..offsets[q + 1]`. Offsets are built by counting into the
//! first `n` slots and running an exclusive scan over all `n + 1`.

/// Convert per-bucket counts into exclusive prefix sums, in place.
///
/// Each element becomes the sum of all elements before it; the final element
/// (left at zero by the counting pass) becomes the total. Returns the total.
pub fn exclusive_scan(values: &mut [usize]) -> usize {
    let mut running = 0usize;
    for value in values.iter_mut() {
        let count = *value;
        *value = running;
        running += count;
    }
    running
}

/// Whether `offsets` is a well-formed CSR offset array over `total` items.
pub fn is_well_formed(offsets: &[usize], total: usize) -> bool {
    !offsets.is_empty()
        && offsets[0] == 0
        && offsets.windows(2).all(|w| w[0] <= w[1])
        && *offsets.last().unwrap() == total
}

/// Split one mutable buffer into the disjoint per-row slices delimited by a
/// CSR offset array.
///
/// The returned slices partition `buffer` exactly, so independent rows can be
/// filled from concurrent workers without aliasing. `buffer.len()` must equal
/// the final offset.
pub fn split_by_offsets<'a, T>(mut buffer: &'a mut [T], offsets: &[usize]) -> Vec<&'a mut [T]> {
    assert!(
        is_well_formed(offsets, buffer.len()),
        "ill-formed CSR offsets: {:?} over {} items",
        offsets,
        buffer.len()
    );

    let mut rows = Vec::with_capacity(offsets.len() - 1);
    for window in offsets.windows(2) {
        let (row, rest) = buffer.split_at_mut(window[1] - window[0]);
        rows.push(row);
        buffer = rest;
    }
    rows
}
