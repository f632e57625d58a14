/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! The distributed query round.
//!
//! A round moves a batch of spatial queries through four stages: forward the
//! queries to the processes that own relevant data ([`forward_queries`]),
//! run the local search there (external to this crate), ship the partial
//! answers home ([`gather_results`]), then index, sort and truncate them
//! ([`count_results`], [`sort_results!`], [`filter_results`]) into the final
//! per-query result lists.
//!
//! [`sort_results!`]: crate::sort_results

pub mod forward;
pub mod gather;
pub mod indexing;
pub mod truncate;

pub use forward::{forward_queries, Forwarded};
pub use gather::gather_results;
pub use indexing::{argsort, count_results, permuted_copy};
pub use truncate::{filter_results, zip_results, FixedHeap};

use serde::{Deserialize, Serialize};

/// A spatial query as seen by the exchange layer: an opaque value copied
/// into export buffers.
///
/// The layer never inspects the predicate itself; geometry evaluation is the
/// local search's business.
pub trait Query: Copy + Default + Send + Sync + 'static {}

/// A nearest-type query. The requested result count is the one property the
/// exchange layer reads, when truncating merged candidates.
pub trait NearestQuery: Query {
    /// Number of results the query asked for.
    fn k(&self) -> u32;
}

/// A k-nearest-neighbors predicate around a geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Nearest<G> {
    /// The geometry distances are measured from.
    pub geometry: G,
    /// Number of neighbors requested.
    pub k: u32,
}

impl<G> Nearest<G> {
    /// A query for the `k` nearest candidates to `geometry`.
    pub fn new(geometry: G, k: u32) -> Self {
        Self { geometry, k }
    }
}

impl<G: Copy + Default + Send + Sync + 'static> Query for Nearest<G> {}

impl<G: Copy + Default + Send + Sync + 'static> NearestQuery for Nearest<G> {
    fn k(&self) -> u32 {
        self.k
    }
}

/// A containment predicate: all candidates intersecting `geometry`.
///
/// Containment rounds carry no distances and are never truncated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Within<G> {
    /// The region to test against.
    pub geometry: G,
}

impl<G> Within<G> {
    /// A query for every candidate intersecting `geometry`.
    pub fn new(geometry: G) -> Self {
        Self { geometry }
    }
}

impl<G: Copy + Default + Send + Sync + 'static> Query for Within<G> {}

/// A final result entry: a candidate within its owning process's local data,
/// plus that process's rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairIndexRank {
    /// Candidate index within the owning process's local data.
    pub index: u32,
    /// Rank of the owning process.
    pub rank: u32,
}
