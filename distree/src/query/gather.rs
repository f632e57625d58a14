/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Shipping partial results back to the processes that issued the queries.

use distree_utils::{split_by_offsets, Packets};
use tracing::debug;

use crate::comm::{send_across_network, ProcessGroup, Rank, SendPlan, Transport};
use crate::error::{DistResult, ErrorContext};
use crate::exec::ExecutionContext;

/// Return every partial result to the process and query that originated it.
///
/// Inputs describe the results this process produced for the queries it
/// received: `out` holds one entry per result, CSR-delimited per forwarded
/// query by `offsets`; `ranks` and `ids` are the per-forwarded-query source
/// rank and original query index delivered by
/// [`forward_queries`](crate::query::forward_queries).
///
/// Results for the same source rank are contiguous in `out` (inherited from
/// how forwarded queries arrive: one sender's batch is never interleaved
/// with another's), so no reordering happens before the return plan is
/// built. Four transfers share that plan: this process's rank per result,
/// the original query id expanded per result, the result payload, and the
/// distances when present. On return, `out`, `ranks`, `ids` and `distances`
/// hold the received, origin-side versions; `ranks` and `ids` are then
/// per-result, not per-forwarded-query.
///
/// `distances` is `None` for containment rounds; the transfer is skipped
/// entirely. This is a collective call, and the presence of `distances`
/// must agree across the group (it is determined by the round's query type,
/// which every member shares).
pub fn gather_results<T, G, Tr, C>(
    group: &G,
    transport: &Tr,
    ctx: &C,
    out: &mut Vec<T>,
    offsets: &[usize],
    ranks: &mut Vec<Rank>,
    ids: &mut Vec<u32>,
    distances: Option<&mut Vec<f32>>,
) -> DistResult<()>
where
    T: Copy + Default + Send + Sync + 'static,
    G: ProcessGroup,
    Tr: Transport,
    C: ExecutionContext,
{
    let n_fwd_queries = offsets.len().saturating_sub(1);
    assert!(
        distree_utils::csr::is_well_formed(offsets, out.len()),
        "result offsets are not a CSR array over the result buffer"
    );
    assert_eq!(ranks.len(), n_fwd_queries, "one source rank per forwarded query");
    assert_eq!(ids.len(), n_fwd_queries, "one original id per forwarded query");
    if let Some(ref d) = distances {
        assert_eq!(d.len(), out.len(), "one distance per result");
    }

    let n_exports = out.len();
    let plan = transport
        .complete(SendPlan::from_batched_sends(group.size(), ranks, offsets))
        .context("completing return plan")?;
    let n_imports = plan.total_recv_len();

    debug!(n_fwd_queries, n_exports, n_imports, "gather_results");

    // The answering process's rank, broadcast per result.
    let export_ranks = vec![group.rank(); n_exports];
    let mut import_ranks = Vec::new();
    send_across_network(
        ctx,
        transport,
        &plan,
        Packets::from_dense(&export_ranks, 1).expect("rank buffer is dense"),
        &mut import_ranks,
    )
    .context("returning answering ranks")?;

    // Original query ids, expanded from per-forwarded-query to per-result.
    let mut export_ids = vec![0u32; n_exports];
    {
        let rows = split_by_offsets(&mut export_ids, offsets);
        let work: Vec<(&mut [u32], u32)> = rows.into_iter().zip(ids.iter().copied()).collect();
        ctx.dispatch(work, |(row, id)| row.fill(id));
    }
    let mut import_ids = Vec::new();
    send_across_network(
        ctx,
        transport,
        &plan,
        Packets::from_dense(&export_ids, 1).expect("id buffer is dense"),
        &mut import_ids,
    )
    .context("returning original query ids")?;

    // The result payload itself.
    let mut import_out = Vec::new();
    send_across_network(
        ctx,
        transport,
        &plan,
        Packets::from_dense(out, 1).expect("result buffer is dense"),
        &mut import_out,
    )
    .context("returning results")?;

    *ranks = import_ranks;
    *ids = import_ids;
    *out = import_out;

    if let Some(distances) = distances {
        let mut import_distances = Vec::new();
        send_across_network(
            ctx,
            transport,
            &plan,
            Packets::from_dense(distances, 1).expect("distance buffer is dense"),
            &mut import_distances,
        )
        .context("returning distances")?;
        *distances = import_distances;
    }

    Ok(())
}
