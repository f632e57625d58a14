/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Layout-safe bulk transfer of a payload across the process group.

use distree_utils::Packets;
use tracing::trace;

use crate::comm::{CommPlan, Transport};
use crate::error::DistResult;
use crate::exec::{ExecutionContext, MemorySpace};

/// Move every export packet to its destination process.
///
/// `exports` must hold exactly `plan.total_send_len()` items; `imports` is
/// resized to `plan.total_recv_len()` items of the same packet width. Within
/// one sender's contribution the received items keep their sent order; no
/// interleaving order across senders is promised.
///
/// The transport consumes a dense, rank-blocked row-major buffer. When the
/// export view is already dense and the plan's staging permutation is the
/// identity, the buffer is handed over directly; otherwise a staging copy is
/// produced first. When the execution context holds buffers in accelerator
/// memory and the transport cannot address it, the staged buffer is mirrored
/// through host memory around the exchange.
///
/// Zero-length transfers are legal; the collective call is still made, since
/// peers may be sending to this process.
pub fn send_across_network<T, Tr, C>(
    ctx: &C,
    transport: &Tr,
    plan: &CommPlan,
    exports: Packets<'_, T>,
    imports: &mut Vec<T>,
) -> DistResult<()>
where
    T: Copy + Default + Send + Sync + 'static,
    Tr: Transport,
    C: ExecutionContext,
{
    assert_eq!(
        exports.items(),
        plan.total_send_len(),
        "export item count does not match the communication plan"
    );

    let width = exports.width();
    let send_plan = plan.send_plan();

    trace!(
        exported = exports.items(),
        imported = plan.total_recv_len(),
        width,
        "send_across_network"
    );

    let needs_host_mirror =
        ctx.memory_space() == MemorySpace::Device && !transport.device_accessible();

    let mut received = vec![T::default(); plan.total_recv_len() * width];

    // Dense, already-blocked and transport-addressable: marshal in place.
    let direct = exports.as_dense_slice().filter(|_| {
        send_plan.is_identity_staging() && !needs_host_mirror
    });

    match direct {
        Some(flat) => {
            transport.exchange(plan, flat, width.max(1), &mut received)?;
        }
        None => {
            let mut staged = vec![T::default(); exports.items() * width];
            exports.write_dense_into(send_plan.staging(), &mut staged);

            if needs_host_mirror {
                let staged_host = ctx.mirror_to_host(&staged);
                transport.exchange(plan, &staged_host, width.max(1), &mut received)?;
                received = ctx.mirror_from_host(received);
            } else {
                transport.exchange(plan, &staged, width.max(1), &mut received)?;
            }
        }
    }

    *imports = received;
    Ok(())
}

#[cfg(test)]
mod transfer_test {
    use super::*;
    use crate::comm::{LoopbackGroup, ProcessGroup, SendPlan};
    use crate::exec::SerialContext;

    #[test]
    fn zero_length_transfer_is_a_noop() {
        let mut group = LoopbackGroup::split(1);
        let me = group.remove(0);
        let ctx = SerialContext;

        let plan = me.complete(SendPlan::from_sends(1, &[])).unwrap();
        let exports: Vec<u64> = Vec::new();
        let view = Packets::from_dense(&exports, 1).unwrap();

        let mut imports = vec![1u64, 2, 3];
        send_across_network(&ctx, &me, &plan, view, &mut imports).unwrap();
        assert!(imports.is_empty());
    }

    #[test]
    fn strided_exports_are_staged() {
        let mut group = LoopbackGroup::split(1);
        let me = group.remove(0);
        let ctx = SerialContext;

        let plan = me.complete(SendPlan::from_sends(1, &[0, 0])).unwrap();

        // Two items of width 2 carved out of width-3 records.
        let backing = vec![1u32, 2, 99, 3, 4];
        let view = Packets::new(&backing, 2, 2, 3).unwrap();

        let mut imports = Vec::new();
        send_across_network(&ctx, &me, &plan, view, &mut imports).unwrap();
        assert_eq!(imports, vec![1, 2, 3, 4]);
    }

    #[test]
    fn unblocked_exports_are_permuted_into_rank_order() {
        let members = LoopbackGroup::split(2);
        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                std::thread::spawn(move || {
                    let ctx = SerialContext;
                    let me = member.rank();

                    // Alternating destinations: item order within each
                    // destination must survive the exchange.
                    let destinations = [0u32, 1, 0, 1];
                    let plan = member
                        .complete(SendPlan::from_sends(2, &destinations))
                        .unwrap();

                    let exports = vec![me * 10, me * 10 + 1, me * 10 + 2, me * 10 + 3];
                    let view = Packets::from_dense(&exports, 1).unwrap();

                    let mut imports = Vec::new();
                    send_across_network(&ctx, &member, &plan, view, &mut imports).unwrap();

                    // Each member receives both senders' items destined to
                    // it, sent order preserved, sources in ascending order.
                    let base = me;
                    assert_eq!(
                        imports,
                        vec![base, base + 2, 10 + base, 10 + base + 2]
                    );
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    #[should_panic]
    fn item_count_mismatch_asserts() {
        let mut group = LoopbackGroup::split(1);
        let me = group.remove(0);
        let ctx = SerialContext;

        let plan = me.complete(SendPlan::from_sends(1, &[0, 0])).unwrap();
        let exports = vec![1u32];
        let view = Packets::from_dense(&exports, 1).unwrap();
        let mut imports = Vec::new();
        let _ = send_across_network(&ctx, &me, &plan, view, &mut imports);
    }
}
