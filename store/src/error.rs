// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Store System Error Types
//!
//! Errors raised by store backends. Every error is serializable so it can be
//! carried inside actor replies once converted by the actor runtime.
//!
//! ## Error Categories
//!
//! - **Store**: a backend operation failed (I/O, script evaluation, encoding).
//! - **Lock**: an in-process backend could not acquire its internal lock.
//! - **Channel**: a publish/subscribe channel could not be used.
//!
//! Missing keys are not errors: reads return `Ok(None)` and conditional
//! operations return `Ok(false)`.
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error handling for the storage system.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq)]
pub enum Error {
    /// A backend operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// The backend lock is poisoned or unavailable.
    #[error("Can not lock store data: {0}")]
    Lock(String),

    /// A publish/subscribe channel failed.
    #[error("Channel error: {0}")]
    Channel(String),
}
