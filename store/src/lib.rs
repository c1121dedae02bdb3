// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Store module.
//!
//! This module contains the contract of the shared store used by the cluster
//! (key-value entries with expiry, atomic conditional renewal, sorted sets and
//! publish/subscribe channels) and an in-memory implementation of it.
//!

pub mod database;
pub mod error;
pub mod memory;

pub use database::{PubSub, Store, Subscription};
pub use error::Error;
pub use memory::MemoryStore;
