/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

pub mod dist_error;

pub use dist_error::{DistError, DistErrorKind, DistResult, ErrorContext};
