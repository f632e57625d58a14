/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Process-group bookkeeping, communication plans and the transport seam.
//!
//! A round of query exchange is driven by a [`CommPlan`]: the caller derives
//! a [`SendPlan`] from its per-item destination ranks (a pure, local
//! computation), then asks the [`Transport`] to complete it. Completion is
//! the one collective step, learning how many items every peer will deliver.
//! Plans are round-scoped; destination sets differ between the forward and
//! return trips, so a fresh plan is built for each.

pub mod loopback;
pub mod transfer;

pub use loopback::LoopbackGroup;
pub use transfer::send_across_network;

use crate::error::DistResult;

/// Process identifier within a group.
pub type Rank = u32;

/// A participant's view of the process group.
///
/// Used only to stamp outgoing items with a source rank and to size
/// per-destination accounting.
pub trait ProcessGroup {
    /// The calling process's identifier within the group.
    fn rank(&self) -> Rank;

    /// Number of processes in the group.
    fn size(&self) -> Rank;
}

//////////////
// SendPlan //
//////////////

/// The sender-side half of a communication plan.
///
/// Built locally from a destination-rank list, before any communication
/// happens: per-rank send counts plus the stable permutation that groups
/// export items into ascending-rank blocks. Items sharing a destination keep
/// their relative order, which is the only cross-process ordering promise
/// the exchange makes.
#[derive(Debug, Clone)]
pub struct SendPlan {
    group_size: Rank,
    send_counts: Vec<usize>,
    staging: Vec<u32>,
    identity_staging: bool,
}

impl SendPlan {
    /// Build a plan from one destination rank per export item.
    ///
    /// Every rank must be below `group_size`; violations are caller bugs and
    /// assert.
    pub fn from_sends(group_size: Rank, destinations: &[Rank]) -> Self {
        let mut send_counts = vec![0usize; group_size as usize];
        for &rank in destinations {
            assert!(rank < group_size, "destination rank {} out of range", rank);
            send_counts[rank as usize] += 1;
        }

        let mut cursors = send_counts.clone();
        distree_utils::exclusive_scan(&mut cursors);

        let mut identity_staging = true;
        let mut staging = Vec::with_capacity(destinations.len());
        for (i, &rank) in destinations.iter().enumerate() {
            let slot = cursors[rank as usize];
            cursors[rank as usize] += 1;
            identity_staging &= slot == i;
            staging.push(slot as u32);
        }

        Self {
            group_size,
            send_counts,
            staging,
            identity_staging,
        }
    }

    /// Build a plan from per-batch destination ranks with a CSR offset array
    /// expanding each batch to its item count.
    ///
    /// Batch `q` covers items `offsets[q]..offsets[q + 1]` and goes whole to
    /// `ranks[q]`. Batches destined to the same rank are assumed to appear
    /// consecutively (inherited from how forwarded queries are delivered);
    /// under that precondition the expansion itself is already rank-blocked.
    pub fn from_batched_sends(group_size: Rank, ranks: &[Rank], offsets: &[usize]) -> Self {
        assert_eq!(
            offsets.len(),
            ranks.len() + 1,
            "offsets must delimit one batch per rank entry"
        );
        let total = *offsets.last().expect("offsets may not be empty");
        assert!(
            distree_utils::csr::is_well_formed(offsets, total),
            "ill-formed batch offsets"
        );

        let mut expanded = Vec::with_capacity(total);
        for (q, &rank) in ranks.iter().enumerate() {
            assert!(rank < group_size, "destination rank {} out of range", rank);
            expanded.resize(expanded.len() + (offsets[q + 1] - offsets[q]), rank);
        }
        Self::from_sends(group_size, &expanded)
    }

    /// Number of processes the plan was built for.
    pub fn group_size(&self) -> Rank {
        self.group_size
    }

    /// Total number of items this process exports.
    pub fn total_send_len(&self) -> usize {
        self.staging.len()
    }

    /// Items exported to each rank.
    pub fn send_counts(&self) -> &[usize] {
        &self.send_counts
    }

    /// The staged (rank-blocked) position of export item `i`.
    pub fn staging(&self) -> &[u32] {
        &self.staging
    }

    /// Whether the export order is already rank-blocked, letting dense
    /// buffers skip the staging copy.
    pub fn is_identity_staging(&self) -> bool {
        self.identity_staging
    }
}

//////////////
// CommPlan //
//////////////

/// A completed communication plan: the local [`SendPlan`] plus the receive
/// counts negotiated with every peer.
#[derive(Debug, Clone)]
pub struct CommPlan {
    send: SendPlan,
    recv_counts: Vec<usize>,
    total_recv: usize,
}

impl CommPlan {
    /// Assemble a completed plan from a send plan and per-source receive
    /// counts. Called by [`Transport::complete`] implementations.
    pub fn new(send: SendPlan, recv_counts: Vec<usize>) -> Self {
        assert_eq!(
            recv_counts.len(),
            send.group_size() as usize,
            "one receive count per peer required"
        );
        let total_recv = recv_counts.iter().sum();
        Self {
            send,
            recv_counts,
            total_recv,
        }
    }

    /// The sender-side half of the plan.
    pub fn send_plan(&self) -> &SendPlan {
        &self.send
    }

    /// Total number of items this process exports.
    pub fn total_send_len(&self) -> usize {
        self.send.total_send_len()
    }

    /// Total number of items this process imports.
    pub fn total_recv_len(&self) -> usize {
        self.total_recv
    }

    /// Items imported from each rank.
    pub fn recv_counts(&self) -> &[usize] {
        &self.recv_counts
    }
}

///////////////
// Transport //
///////////////

/// The point-to-point communication substrate.
///
/// Both operations are collective: every member of the group must make the
/// matching call, and each call blocks the caller until its sends and
/// receives complete. A failed call aborts the round; the exchange layer
/// adds no retry logic on top.
pub trait Transport {
    /// Complete a locally-built [`SendPlan`] by learning the per-source
    /// receive counts from every peer.
    fn complete(&self, plan: SendPlan) -> DistResult<CommPlan>;

    /// Exchange a staged export buffer for the import buffer described by
    /// `plan`.
    ///
    /// `exports` must hold `plan.total_send_len() * packet_len` elements in
    /// rank-blocked order; `imports` must hold `plan.total_recv_len() *
    /// packet_len`. On return, imports are grouped per source rank with each
    /// source's items in their sent order. No interleaving order across
    /// sources is promised.
    fn exchange<T>(
        &self,
        plan: &CommPlan,
        exports: &[T],
        packet_len: usize,
        imports: &mut [T],
    ) -> DistResult<()>
    where
        T: Copy + Send + Sync + 'static;

    /// Whether the transport can address accelerator memory directly.
    ///
    /// When `false`, [`send_across_network`] mirrors device-resident buffers
    /// through host memory around the exchange.
    fn device_accessible(&self) -> bool {
        false
    }
}
