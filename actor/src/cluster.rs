// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Cluster membership
//!
//! Every node publishes its own entry in the shared store under a key that
//! expires after `node_entry_secs`, and periodically rebuilds its view of the
//! cluster by scanning the entries of all nodes. Nodes that stop refreshing
//! their entry drop out of the view once it expires.
//!
//! [`ClusterInfo`] is the shared, cheaply clonable view read by placement and
//! messaging. [`ClusterMembership`] keeps it in sync with the store.
//!

use crate::{keys::KeyGenerator, Error};

use serde::{Deserialize, Serialize};
use store::Store;
use tracing::{debug, warn};
use uuid::Uuid;

use std::{
    collections::HashMap,
    fmt::Formatter,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

/// Opaque unique id of a node, generated once per process.
#[derive(
    Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(String);

impl NodeId {
    pub fn new() -> Self {
        NodeId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        NodeId(id.to_owned())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a node. Only `Running` nodes receive new placements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Membership entry of a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub node_name: String,
    pub node_status: NodeStatus,
}

/// Point in time view of the cluster.
#[derive(Clone, Debug)]
pub struct ClusterSnapshot {
    pub cluster_name: String,
    pub local_node: NodeInfo,
    pub members: HashMap<NodeId, NodeInfo>,
}

/// Shared view of the cluster held by a node.
#[derive(Clone)]
pub struct ClusterInfo {
    inner: Arc<RwLock<ClusterSnapshot>>,
}

impl ClusterInfo {
    pub fn new(cluster_name: &str, node_name: &str) -> Self {
        let local_node = NodeInfo {
            node_id: NodeId::new(),
            node_name: node_name.to_owned(),
            node_status: NodeStatus::Idle,
        };
        Self {
            inner: Arc::new(RwLock::new(ClusterSnapshot {
                cluster_name: cluster_name.to_owned(),
                local_node,
                members: HashMap::new(),
            })),
        }
    }

    // A poisoned view is still a consistent snapshot: writers only replace
    // whole fields.
    fn read(&self) -> RwLockReadGuard<'_, ClusterSnapshot> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClusterSnapshot> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        self.read().clone()
    }

    pub fn cluster_name(&self) -> String {
        self.read().cluster_name.clone()
    }

    pub fn local_node(&self) -> NodeInfo {
        self.read().local_node.clone()
    }

    pub fn local_node_id(&self) -> NodeId {
        self.read().local_node.node_id.clone()
    }

    pub fn local_status(&self) -> NodeStatus {
        self.read().local_node.node_status
    }

    pub fn set_local_status(&self, status: NodeStatus) {
        let mut snapshot = self.write();
        debug!(
            "Node {} status {:?} -> {:?}.",
            snapshot.local_node.node_id, snapshot.local_node.node_status, status
        );
        snapshot.local_node.node_status = status;
        let local = snapshot.local_node.clone();
        if let Some(member) = snapshot.members.get_mut(&local.node_id) {
            *member = local;
        }
    }

    pub fn set_members(&self, members: HashMap<NodeId, NodeInfo>) {
        self.write().members = members;
    }

    pub fn node_count(&self) -> usize {
        self.read().members.len()
    }
}

/// Publishes the local entry and refreshes the member view from the store.
#[derive(Clone)]
pub struct ClusterMembership {
    cluster: ClusterInfo,
    store: Arc<dyn Store>,
    keys: KeyGenerator,
    node_entry_ttl: Duration,
}

impl ClusterMembership {
    pub(crate) fn new(
        cluster: ClusterInfo,
        store: Arc<dyn Store>,
        keys: KeyGenerator,
        node_entry_ttl: Duration,
    ) -> Self {
        Self {
            cluster,
            store,
            keys,
            node_entry_ttl,
        }
    }

    /// Writes the local node entry with the node entry time to live.
    pub async fn update_node_entry(&self) -> Result<(), Error> {
        let node = self.cluster.local_node();
        let bytes =
            bincode::serialize(&node).map_err(|e| Error::Encode(e.to_string()))?;
        self.store
            .set_ex(&self.keys.node(&node.node_id), &bytes, self.node_entry_ttl)
            .await?;
        Ok(())
    }

    /// Rebuilds the member view from the live node entries.
    pub async fn sync_node_directory(&self) -> Result<(), Error> {
        let keys = self.store.keys(&self.keys.node_prefix()).await?;
        let mut members = HashMap::new();
        for key in keys {
            // The entry may expire between the scan and the read.
            let Some(bytes) = self.store.get(&key).await? else {
                continue;
            };
            match bincode::deserialize::<NodeInfo>(&bytes) {
                Ok(node) => {
                    members.insert(node.node_id.clone(), node);
                }
                Err(e) => warn!("Invalid node entry {}: {}", key, e),
            }
        }
        debug!("Cluster view has {} nodes.", members.len());
        self.cluster.set_members(members);
        Ok(())
    }

    pub async fn update_cluster(&self) -> Result<(), Error> {
        self.update_node_entry().await?;
        self.sync_node_directory().await
    }
}
