/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

pub mod csr;
pub mod packets;
pub mod views;

pub use csr::{exclusive_scan, split_by_offsets};
pub use packets::Packets;
pub use views::{IndexedAccess, Permuted, PermutedWithIndex};
