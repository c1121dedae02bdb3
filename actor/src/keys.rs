// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Names of the store keys and channels used by a cluster.

use crate::{cluster::NodeId, ActorIdentity};

#[derive(Clone, Debug)]
pub(crate) struct KeyGenerator {
    cluster_name: String,
}

impl KeyGenerator {
    pub(crate) fn new(cluster_name: &str) -> Self {
        Self {
            cluster_name: cluster_name.to_owned(),
        }
    }

    /// Membership entry of a node. Also the name of its private channel.
    pub(crate) fn node(&self, node_id: &NodeId) -> String {
        format!("{}nodeId:{}", self.node_prefix(), node_id)
    }

    pub(crate) fn node_prefix(&self) -> String {
        format!("node/clusterName:{}/", self.cluster_name)
    }

    /// Broadcast channel of the cluster.
    pub(crate) fn cluster(&self) -> String {
        format!("cluster/clusterName:{}", self.cluster_name)
    }

    pub(crate) fn actor_placement(&self, identity: &ActorIdentity) -> String {
        format!(
            "actorPlacement/clusterName:{}/actorType:{}/actorId:{}",
            self.cluster_name, identity.actor_type, identity.actor_id
        )
    }

    pub(crate) fn reminder_list(&self) -> String {
        format!("reminderList/clusterName:{}", self.cluster_name)
    }
}
