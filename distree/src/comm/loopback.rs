/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! An in-process process group.
//!
//! [`LoopbackGroup::split`] hands out one member handle per simulated rank;
//! each handle is driven from its own thread. Collective calls meet at a
//! barrier and move payloads through shared mailboxes, giving the exchange
//! layer a real multi-rank substrate without a network. A group of size one
//! is the single-node fallback: every collective completes immediately and
//! empty plans exchange nothing.
//!
//! The collective contract is the same one a message-passing backend would
//! impose: every member must issue the matching `complete`/`exchange` calls
//! in the same order, and a member that panics mid-round poisons the group
//! for its peers.

use std::any::Any;
use std::sync::{Arc, Barrier, Mutex};

use hashbrown::HashMap;
use thiserror::Error;

use crate::comm::{CommPlan, ProcessGroup, Rank, SendPlan, Transport};
use crate::error::{DistError, DistErrorKind, DistResult};

/// Failures surfaced by the loopback substrate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoopbackError {
    /// A peer thread panicked while holding a shared structure.
    #[error("shared mailbox poisoned by a failed peer")]
    Poisoned,

    /// A peer delivered a payload of a different element type.
    #[error("collective payload type mismatch between ranks {from} and {to}")]
    TypeMismatch {
        /// Sending rank.
        from: Rank,
        /// Receiving rank.
        to: Rank,
    },

    /// A peer delivered a block whose length contradicts the completed plan.
    #[error("rank {from} delivered {got} elements to rank {to}, plan promised {expected}")]
    BlockMismatch {
        /// Sending rank.
        from: Rank,
        /// Receiving rank.
        to: Rank,
        /// Elements received.
        got: usize,
        /// Elements the plan promised.
        expected: usize,
    },
}

struct Shared {
    barrier: Barrier,
    // Per-source send counts posted during plan completion. Entries are
    // overwritten by the next round, never cleared.
    counts: Mutex<HashMap<Rank, Vec<usize>>>,
    // (source, destination) -> type-erased Vec<T> block for one exchange.
    mail: Mutex<HashMap<(Rank, Rank), Box<dyn Any + Send>>>,
}

/// One member of an in-process group.
pub struct LoopbackGroup {
    rank: Rank,
    size: Rank,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LoopbackGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackGroup")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl LoopbackGroup {
    /// Create a group of `size` members, returning one handle per rank.
    ///
    /// Each handle is `Send`; drive each from its own thread.
    pub fn split(size: Rank) -> Vec<LoopbackGroup> {
        assert!(size > 0, "a process group has at least one member");
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size as usize),
            counts: Mutex::new(HashMap::new()),
            mail: Mutex::new(HashMap::new()),
        });
        (0..size)
            .map(|rank| LoopbackGroup {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn poisoned() -> DistError {
        DistError::new(DistErrorKind::LockPoison, LoopbackError::Poisoned)
    }
}

impl ProcessGroup for LoopbackGroup {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> Rank {
        self.size
    }
}

impl Transport for LoopbackGroup {
    fn complete(&self, plan: SendPlan) -> DistResult<CommPlan> {
        assert_eq!(
            plan.group_size(),
            self.size,
            "plan built for a different group size"
        );

        {
            let mut counts = self.shared.counts.lock().map_err(|_| Self::poisoned())?;
            counts.insert(self.rank, plan.send_counts().to_vec());
        }
        self.shared.barrier.wait();

        let recv_counts = {
            let counts = self.shared.counts.lock().map_err(|_| Self::poisoned())?;
            (0..self.size)
                .map(|src| counts[&src][self.rank as usize])
                .collect::<Vec<_>>()
        };
        // Hold every member until all have read; the next round overwrites.
        self.shared.barrier.wait();

        Ok(CommPlan::new(plan, recv_counts))
    }

    fn exchange<T>(
        &self,
        plan: &CommPlan,
        exports: &[T],
        packet_len: usize,
        imports: &mut [T],
    ) -> DistResult<()>
    where
        T: Copy + Send + Sync + 'static,
    {
        assert!(packet_len > 0, "packet length must be nonzero");
        assert_eq!(
            exports.len(),
            plan.total_send_len() * packet_len,
            "export buffer does not match plan"
        );
        assert_eq!(
            imports.len(),
            plan.total_recv_len() * packet_len,
            "import buffer does not match plan"
        );

        // Post one block per destination, empty blocks included so every
        // receiver finds an entry.
        {
            let mut mail = self.shared.mail.lock().map_err(|_| Self::poisoned())?;
            let mut cursor = 0usize;
            for (dst, &count) in plan.send_plan().send_counts().iter().enumerate() {
                let elements = count * packet_len;
                let block: Vec<T> = exports[cursor..cursor + elements].to_vec();
                cursor += elements;
                mail.insert((self.rank, dst as Rank), Box::new(block));
            }
        }
        self.shared.barrier.wait();

        // Collect blocks ascending by source rank. The Transport contract
        // promises nothing about this order; ascending is simply the stable
        // choice this substrate makes.
        {
            let mut mail = self.shared.mail.lock().map_err(|_| Self::poisoned())?;
            let mut cursor = 0usize;
            for src in 0..self.size {
                let boxed = mail
                    .remove(&(src, self.rank))
                    .expect("peer posted no block; collective call mismatch");
                let block = boxed.downcast::<Vec<T>>().map_err(|_| {
                    DistError::new(
                        DistErrorKind::Transport,
                        LoopbackError::TypeMismatch {
                            from: src,
                            to: self.rank,
                        },
                    )
                })?;
                let expected = plan.recv_counts()[src as usize] * packet_len;
                if block.len() != expected {
                    return Err(DistError::new(
                        DistErrorKind::Transport,
                        LoopbackError::BlockMismatch {
                            from: src,
                            to: self.rank,
                            got: block.len(),
                            expected,
                        },
                    ));
                }
                imports[cursor..cursor + expected].copy_from_slice(&block);
                cursor += expected;
            }
        }
        self.shared.barrier.wait();

        Ok(())
    }
}

#[cfg(test)]
mod loopback_test {
    use super::*;

    #[test]
    fn single_member_group_completes_immediately() {
        let mut group = LoopbackGroup::split(1);
        let me = group.remove(0);
        assert_eq!(me.rank(), 0);
        assert_eq!(me.size(), 1);

        let plan = me.complete(SendPlan::from_sends(1, &[])).unwrap();
        assert_eq!(plan.total_send_len(), 0);
        assert_eq!(plan.total_recv_len(), 0);

        let mut imports: Vec<u32> = Vec::new();
        me.exchange(&plan, &[], 1, &mut imports).unwrap();
        assert!(imports.is_empty());
    }

    #[test]
    fn self_send_round_trips() {
        let mut group = LoopbackGroup::split(1);
        let me = group.remove(0);

        let plan = me.complete(SendPlan::from_sends(1, &[0, 0, 0])).unwrap();
        assert_eq!(plan.total_recv_len(), 3);

        let exports = [7u32, 8, 9];
        let mut imports = vec![0u32; 3];
        me.exchange(&plan, &exports, 1, &mut imports).unwrap();
        assert_eq!(imports, vec![7, 8, 9]);
    }

    #[test]
    fn two_members_swap_payloads() {
        let members = LoopbackGroup::split(2);
        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                std::thread::spawn(move || {
                    let me = member.rank();
                    let peer = 1 - me;
                    // Each member sends `me + 1` copies of its rank to the peer.
                    let destinations = vec![peer; me as usize + 1];
                    let plan = member
                        .complete(SendPlan::from_sends(2, &destinations))
                        .unwrap();
                    assert_eq!(plan.total_recv_len(), peer as usize + 1);

                    let exports = vec![me * 100; destinations.len()];
                    let mut imports = vec![0; plan.total_recv_len()];
                    member.exchange(&plan, &exports, 1, &mut imports).unwrap();
                    assert_eq!(imports, vec![peer * 100; peer as usize + 1]);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn packets_move_whole() {
        let members = LoopbackGroup::split(2);
        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                std::thread::spawn(move || {
                    let me = member.rank();
                    let peer = 1 - me;
                    let plan = member.complete(SendPlan::from_sends(2, &[peer])).unwrap();

                    // One item of three f32 scalars.
                    let exports = [me as f32, me as f32 + 0.25, me as f32 + 0.5];
                    let mut imports = vec![0.0f32; plan.total_recv_len() * 3];
                    member.exchange(&plan, &exports, 3, &mut imports).unwrap();
                    assert_eq!(
                        imports,
                        vec![peer as f32, peer as f32 + 0.25, peer as f32 + 0.5]
                    );
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
