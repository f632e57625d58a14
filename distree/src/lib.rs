/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Distributed query exchange for spatial search.
//!
//! Spatial data is sharded across a process group; a query issued on one
//! process may only be answerable by others. This crate routes query batches
//! to the processes that own relevant data, ships partial answers back
//! tagged with their provenance, and merges them into a bounded,
//! correctly-ordered result set per original query. The local tree search
//! itself, the message-passing substrate and the data-parallel backend are
//! collaborators behind traits; this layer only orchestrates where queries
//! go and how partial results combine.

pub mod comm;
pub mod error;
pub mod exec;
pub mod query;

// Top level exports.
pub use error::{DistError, DistErrorKind, DistResult};
