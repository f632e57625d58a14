/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! An items-by-payload view with an explicit stride.
//!
//! Transfer payloads are logically two dimensional: one item per exported
//! element, each item carrying a fixed-width packet of scalars (a bare value,
//! a coordinate triple, a small struct flattened to its fields). The backing
//! memory is not always dense: a payload may be a column slice of a wider
//! per-item record.
//!
//! ```text
//!            |<------ stride ------>|
//!            |<-- width -->|
//!            +-------------+
//! item 0 ->  | a0 a1 a2 a3 | a4 a5
//! item 1 ->  | b0 b1 b2 b3 | b4 b5
//! item 2 ->  | c0 c1 c2 c3 | c4 c5
//!            +-------------+
//! ```
//!
//! The transfer layer uses [`Packets::as_dense_slice`] to decide whether a
//! buffer can be handed to the transport as-is or must be staged into a dense
//! row-major copy first.

use std::fmt;

use thiserror::Error;

/// Linear slice length required by a packet view with the given shape.
///
/// The final item does not need trailing padding, so the last row only
/// contributes `width` elements.
pub fn linear_length(items: usize, width: usize, stride: usize) -> usize {
    (items.max(1) - 1) * stride + items.min(1) * width
}

/// Error produced when a slice cannot back a packet view of the given shape.
#[derive(Debug, Error)]
#[non_exhaustive]
#[error(
    "tried to construct a packet view of {items} items, width {width}, stride {stride} \
     over a slice of length {len} (expected {})",
    linear_length(*items, *width, *stride)
)]
pub struct ShapeError {
    len: usize,
    items: usize,
    width: usize,
    stride: usize,
}

/// A read-only view of `items` packets of `width` elements each, rows
/// separated by `stride` elements in the backing slice.
#[derive(Clone, Copy)]
pub struct Packets<'a, T> {
    data: &'a [T],
    items: usize,
    width: usize,
    stride: usize,
}

impl<T> fmt::Debug for Packets<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packets")
            .field("items", &self.items)
            .field("width", &self.width)
            .field("stride", &self.stride)
            .finish()
    }
}

impl<'a, T> Packets<'a, T> {
    /// Construct a view with an explicit stride.
    ///
    /// Requires `stride >= width` and `data.len()` matching
    /// [`linear_length`] for the shape.
    pub fn new(data: &'a [T], items: usize, width: usize, stride: usize) -> Result<Self, ShapeError> {
        if stride < width || data.len() != linear_length(items, width, stride) {
            return Err(ShapeError {
                len: data.len(),
                items,
                width,
                stride,
            });
        }
        Ok(Self {
            data,
            items,
            width,
            stride,
        })
    }

    /// Construct a dense view (`stride == width`) over the whole slice.
    ///
    /// Requires `data.len()` to be a multiple of `width`. `width` must be
    /// nonzero.
    pub fn from_dense(data: &'a [T], width: usize) -> Result<Self, ShapeError> {
        assert!(width > 0, "packet width must be nonzero");
        if data.len() % width != 0 {
            return Err(ShapeError {
                len: data.len(),
                items: data.len() / width,
                width,
                stride: width,
            });
        }
        Ok(Self {
            data,
            items: data.len() / width,
            width,
            stride: width,
        })
    }

    /// Number of items (rows).
    pub fn items(&self) -> usize {
        self.items
    }

    /// Elements per item.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Whether rows are contiguous in the backing slice.
    pub fn is_dense(&self) -> bool {
        self.stride == self.width || self.items <= 1
    }

    /// The packet for `item`.
    ///
    /// Panics if `item >= self.items()`.
    pub fn item(&self, item: usize) -> &[T] {
        assert!(item < self.items, "packet item out of bounds");
        let start = item * self.stride;
        &self.data[start..start + self.width]
    }

    /// The backing slice, if the view is dense row-major.
    ///
    /// A dense view can be marshalled without a staging copy.
    pub fn as_dense_slice(&self) -> Option<&'a [T]> {
        if self.is_dense() {
            Some(&self.data[..self.items * self.width])
        } else {
            None
        }
    }
}

impl<T: Copy> Packets<'_, T> {
    /// Write all packets into `out` as a dense row-major buffer, in the
    /// order chosen by `placement`: item `i` lands at row `placement[i]`.
    ///
    /// `placement` must be a bijection over `0..items`; `out` must hold
    /// exactly `items * width` elements.
    pub fn write_dense_into(&self, placement: &[u32], out: &mut [T]) {
        assert_eq!(placement.len(), self.items, "placement length mismatch");
        assert_eq!(out.len(), self.items * self.width, "staging buffer length mismatch");
        for (i, &slot) in placement.iter().enumerate() {
            let start = slot as usize * self.width;
            out[start..start + self.width].copy_from_slice(self.item(i));
        }
    }
}

#[cfg(test)]
mod packets_test {
    use super::*;

    #[test]
    fn dense_view_roundtrip() {
        let data = vec![1u32, 2, 3, 4, 5, 6];
        let view = Packets::from_dense(&data, 2).unwrap();

        assert_eq!(view.items(), 3);
        assert_eq!(view.width(), 2);
        assert!(view.is_dense());
        assert_eq!(view.item(0), &[1, 2]);
        assert_eq!(view.item(2), &[5, 6]);
        assert_eq!(view.as_dense_slice(), Some(&data[..]));
    }

    #[test]
    fn strided_view_exposes_columns() {
        // Two items of three columns out of four-wide records.
        let data = vec![1u32, 2, 3, 99, 4, 5, 6];
        let view = Packets::new(&data, 2, 3, 4).unwrap();

        assert!(!view.is_dense());
        assert_eq!(view.as_dense_slice(), None);
        assert_eq!(view.item(0), &[1, 2, 3]);
        assert_eq!(view.item(1), &[4, 5, 6]);
    }

    #[test]
    fn single_item_is_always_dense() {
        let data = vec![1u8, 2, 3];
        let view = Packets::new(&data, 1, 3, 8).unwrap();
        assert!(view.is_dense());
        assert_eq!(view.as_dense_slice(), Some(&data[..]));
    }

    #[test]
    fn zero_items_is_legal() {
        let data: Vec<f32> = Vec::new();
        let view = Packets::from_dense(&data, 4).unwrap();
        assert_eq!(view.items(), 0);
        assert!(view.is_dense());
        assert_eq!(view.as_dense_slice(), Some(&data[..]));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let data = vec![1u32, 2, 3, 4, 5];
        assert!(Packets::from_dense(&data, 2).is_err());
        assert!(Packets::new(&data, 2, 3, 2).is_err());
        assert!(Packets::new(&data, 3, 2, 4).is_err());
    }

    #[test]
    fn write_dense_applies_placement() {
        let data = vec![1u32, 2, 3, 99, 4, 5, 6, 99, 7, 8, 9];
        let view = Packets::new(&data, 3, 3, 4).unwrap();

        let placement = [2u32, 0, 1];
        let mut out = vec![0u32; 9];
        view.write_dense_into(&placement, &mut out);
        assert_eq!(out, vec![4, 5, 6, 7, 8, 9, 1, 2, 3]);
    }

    #[test]
    fn linear_length_shape_rule() {
        assert_eq!(linear_length(0, 3, 8), 0);
        assert_eq!(linear_length(1, 3, 8), 3);
        assert_eq!(linear_length(2, 3, 8), 11);
        assert_eq!(linear_length(4, 2, 2), 8);
    }
}
