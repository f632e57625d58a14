/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Forwarding a query batch to the processes that can answer it.

use distree_utils::{split_by_offsets, IndexedAccess, Packets};
use tracing::debug;

use crate::comm::{send_across_network, ProcessGroup, Rank, SendPlan, Transport};
use crate::error::{DistResult, ErrorContext};
use crate::exec::ExecutionContext;
use crate::query::Query;

/// The forwarded batch as it appears on a receiving process.
///
/// All three buffers are aligned: entry `i` of each refers to the same
/// received item, because the export buffers were filled from one shared
/// flattened ordering. No join key is needed.
#[derive(Debug, Clone)]
pub struct Forwarded<Q> {
    /// The query copies this process received.
    pub queries: Vec<Q>,
    /// For each received query, its index in the originating batch.
    pub ids: Vec<u32>,
    /// For each received query, the rank it was forwarded from.
    pub ranks: Vec<Rank>,
}

impl<Q> Forwarded<Q> {
    /// Number of queries this process received.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Whether nothing was received.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Ship each query of the local batch to its destination processes.
///
/// `offsets` is a CSR offset array over `queries`; `destinations` holds the
/// flattened destination ranks, so query `q` goes to
/// `destinations[offsets[q]..offsets[q + 1]]`. A query with an empty
/// destination list contributes nothing; an empty batch is legal and
/// produces empty outputs everywhere.
///
/// Three transfers share one communication plan: the sender's rank
/// (broadcast per exported item), the query payload, and the original query
/// index. This is a collective call.
///
/// The batch is consumed through [`IndexedAccess`], so a
/// [`Permuted`](distree_utils::Permuted) view of a stored batch forwards in
/// the caller's chosen order without materializing a copy; original ids are
/// the view's logical indices.
pub fn forward_queries<Q, P, G, T, C>(
    group: &G,
    transport: &T,
    ctx: &C,
    queries: &P,
    destinations: &[Rank],
    offsets: &[usize],
) -> DistResult<Forwarded<Q>>
where
    Q: Query,
    P: IndexedAccess<Item = Q>,
    G: ProcessGroup,
    T: Transport,
    C: ExecutionContext,
{
    let n_queries = queries.len();
    assert!(
        distree_utils::csr::is_well_formed(offsets, destinations.len()),
        "destination offsets are not a CSR array over the destination list"
    );
    assert_eq!(
        offsets.len(),
        n_queries + 1,
        "one offset range per query required"
    );

    let n_exports = destinations.len();
    let plan = transport
        .complete(SendPlan::from_sends(group.size(), destinations))
        .context("completing forward plan")?;
    let n_imports = plan.total_recv_len();

    debug!(n_queries, n_exports, n_imports, "forward_queries");

    // Source rank, broadcast once per exported item.
    let export_ranks = vec![group.rank(); n_exports];
    let mut ranks = Vec::new();
    send_across_network(
        ctx,
        transport,
        &plan,
        Packets::from_dense(&export_ranks, 1).expect("rank buffer is dense"),
        &mut ranks,
    )
    .context("forwarding source ranks")?;

    // The query itself, replicated once per destination.
    let mut export_queries = vec![Q::default(); n_exports];
    {
        let rows = split_by_offsets(&mut export_queries, offsets);
        let work: Vec<(&mut [Q], Q)> = rows
            .into_iter()
            .enumerate()
            .map(|(q, row)| (row, queries.get(q)))
            .collect();
        ctx.dispatch(work, |(row, query)| row.fill(query));
    }
    let mut fwd_queries = Vec::new();
    send_across_network(
        ctx,
        transport,
        &plan,
        Packets::from_dense(&export_queries, 1).expect("query buffer is dense"),
        &mut fwd_queries,
    )
    .context("forwarding queries")?;

    // The original query index, replicated once per destination.
    let mut export_ids = vec![0u32; n_exports];
    {
        let rows = split_by_offsets(&mut export_ids, offsets);
        let work: Vec<(usize, &mut [u32])> = rows.into_iter().enumerate().collect();
        ctx.dispatch(work, |(q, row)| row.fill(q as u32));
    }
    let mut ids = Vec::new();
    send_across_network(
        ctx,
        transport,
        &plan,
        Packets::from_dense(&export_ids, 1).expect("id buffer is dense"),
        &mut ids,
    )
    .context("forwarding original query ids")?;

    Ok(Forwarded {
        queries: fwd_queries,
        ids,
        ranks,
    })
}
