// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor placement
//!
//! Chooses the node that should host an actor that has no location yet. The
//! choice is uniform among the nodes seen as running in the current cluster
//! view. The view may be stale, so the chosen node can already be gone; the
//! directory and the message timeout deal with that.
//!

use crate::{
    cluster::{ClusterInfo, ClusterSnapshot, NodeId, NodeInfo, NodeStatus},
    ActorIdentity, Error,
};

use rand::seq::IndexedRandom;
use tracing::debug;

#[derive(Clone)]
pub struct ActorPlacement {
    cluster: ClusterInfo,
}

impl ActorPlacement {
    pub fn new(cluster: ClusterInfo) -> Self {
        Self { cluster }
    }

    /// Picks a hosting node for the actor from the current cluster view.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoCapacity` if no node is running.
    ///
    pub fn place_actor(&self, identity: &ActorIdentity) -> Result<NodeId, Error> {
        Self::place(&self.cluster.snapshot(), identity)
    }

    /// Picks a hosting node for the actor from `snapshot`.
    pub fn place(
        snapshot: &ClusterSnapshot,
        identity: &ActorIdentity,
    ) -> Result<NodeId, Error> {
        let candidates: Vec<&NodeInfo> = snapshot
            .members
            .values()
            .filter(|node| node.node_status == NodeStatus::Running)
            .collect();
        let chosen = candidates
            .choose(&mut rand::rng())
            .ok_or_else(|| Error::NoCapacity(identity.to_string()))?;
        debug!(
            "Placing actor {} on node {} ({} candidates).",
            identity,
            chosen.node_id,
            candidates.len()
        );
        Ok(chosen.node_id.clone())
    }
}
