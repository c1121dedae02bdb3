// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Core library for the Grove framework.
//! Provides the virtual actor runtime and the shared store it coordinates
//! through. Applications register actor types on every node and talk to
//! actors by identity, wherever they are active.

pub use actor::{
    ActivationState, Actor, ActorContext, ActorId, ActorIdentity, ActorRef,
    ActorSystem, ClusterInfo, Config, Error as ActorError, Handler, NodeId,
    NodeInfo, NodeStatus, SystemRef, SystemRunner,
};

pub use store::{
    Error as StoreError, MemoryStore, PubSub, Store, Subscription,
};
