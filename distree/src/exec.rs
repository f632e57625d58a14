/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! The data-parallel execution seam.
//!
//! Every per-item loop in the exchange layer (export-buffer fill, result
//! counting, per-query truncation) runs through an [`ExecutionContext`] so
//! the same code drives host thread pools today and accelerator-backed
//! contexts tomorrow. Both primitives are synchronous from the caller's point
//! of view: when the call returns, every item has completed and its writes
//! are visible. Downstream code never reads state from an unfinished
//! dispatch.

use rayon::prelude::*;

/// The memory space a context allocates its buffers in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySpace {
    /// Directly addressable by the calling process and by host-only
    /// transports.
    Host,

    /// Accelerator-resident memory. Transports advertise via
    /// [`Transport::device_accessible`] whether they can marshal it without
    /// a host mirror.
    ///
    /// [`Transport::device_accessible`]: crate::comm::Transport::device_accessible
    Device,
}

/// An execution context supplying the "for each index in range, run body"
/// primitive plus buffer mirroring across memory spaces.
pub trait ExecutionContext: Send + Sync {
    /// The memory space buffers produced under this context live in.
    fn memory_space(&self) -> MemorySpace {
        MemorySpace::Host
    }

    /// Run `body(i)` for every `i` in `0..n`, in parallel where the context
    /// allows. Returns only after all items have completed.
    fn for_each<F>(&self, n: usize, body: F)
    where
        F: Fn(usize) + Send + Sync;

    /// Run `body` over independent owned work items, in parallel where the
    /// context allows. Returns only after all items have completed.
    ///
    /// This is the seam for loops whose items carry exclusive mutable state
    /// (for example, disjoint output slices split out of one buffer).
    fn dispatch<W, F>(&self, work: Vec<W>, body: F)
    where
        W: Send,
        F: Fn(W) + Send + Sync;

    /// Copy a buffer from this context's memory space into host-addressable
    /// memory. Identity-copy for host contexts.
    fn mirror_to_host<T>(&self, data: &[T]) -> Vec<T>
    where
        T: Copy + Send + Sync,
    {
        data.to_vec()
    }

    /// Move a host-addressable buffer into this context's memory space.
    /// Pass-through for host contexts.
    fn mirror_from_host<T>(&self, data: Vec<T>) -> Vec<T>
    where
        T: Copy + Send + Sync,
    {
        data
    }
}

/// Host execution context backed by the global rayon thread pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostContext;

impl ExecutionContext for HostContext {
    fn for_each<F>(&self, n: usize, body: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        (0..n).into_par_iter().for_each(body);
    }

    fn dispatch<W, F>(&self, work: Vec<W>, body: F)
    where
        W: Send,
        F: Fn(W) + Send + Sync,
    {
        work.into_par_iter().for_each(body);
    }
}

/// Single-threaded execution context.
///
/// Used as a deterministic baseline in tests and for callers that already
/// parallelize at a coarser level.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialContext;

impl ExecutionContext for SerialContext {
    fn for_each<F>(&self, n: usize, body: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        for i in 0..n {
            body(i);
        }
    }

    fn dispatch<W, F>(&self, work: Vec<W>, body: F)
    where
        W: Send,
        F: Fn(W) + Send + Sync,
    {
        for item in work {
            body(item);
        }
    }
}
