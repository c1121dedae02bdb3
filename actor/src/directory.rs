// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor directory
//!
//! The directory maps every actor identity to the node that owns it. An
//! ownership record is a lease: it carries a time to live and disappears
//! unless the owner keeps renewing it.
//!
//! Two atomic operations give the cluster its single-owner guarantee without
//! a lock manager:
//!
//! - claiming a location only succeeds if no record exists, so among
//!   concurrent claimers exactly one wins and every caller learns the winner;
//! - renewal checks the stored owner and refreshes the lease in one step, so
//!   a renewal can never extend a record that was reassigned in between.
//!

use crate::{cluster::NodeId, keys::KeyGenerator, ActorIdentity, Error};

use async_trait::async_trait;
use store::Store;
use tracing::debug;

use std::{sync::Arc, time::Duration};

/// Distributed registry of actor locations.
#[async_trait]
pub trait ActorDirectory: Send + Sync + 'static {
    /// Returns the owner of the actor, if any.
    async fn get_location(
        &self,
        identity: &ActorIdentity,
    ) -> Result<Option<NodeId>, Error>;

    /// Claims the actor for `node` if nobody owns it.
    ///
    /// # Returns
    ///
    /// The owner after the call. It differs from `node` when another node
    /// already owned the actor or won a concurrent claim; callers must use the
    /// returned value.
    ///
    async fn put_or_get_location(
        &self,
        identity: &ActorIdentity,
        node: &NodeId,
        ttl: Duration,
    ) -> Result<NodeId, Error>;

    /// Removes the location record unconditionally.
    async fn remove_actor(&self, identity: &ActorIdentity) -> Result<(), Error>;

    /// Refreshes the lease if `node` is the current owner. The record is left
    /// untouched otherwise.
    async fn update_expiry(
        &self,
        identity: &ActorIdentity,
        node: &NodeId,
        ttl: Duration,
    ) -> Result<bool, Error>;
}

/// Directory kept in the shared store.
#[derive(Clone)]
pub struct StoreActorDirectory {
    store: Arc<dyn Store>,
    keys: KeyGenerator,
}

impl StoreActorDirectory {
    pub fn new(store: Arc<dyn Store>, cluster_name: &str) -> Self {
        Self {
            store,
            keys: KeyGenerator::new(cluster_name),
        }
    }
}

fn decode_node(bytes: Vec<u8>) -> Result<NodeId, Error> {
    String::from_utf8(bytes)
        .map(|id| NodeId::from(id.as_str()))
        .map_err(|e| Error::Decode(e.to_string()))
}

#[async_trait]
impl ActorDirectory for StoreActorDirectory {
    async fn get_location(
        &self,
        identity: &ActorIdentity,
    ) -> Result<Option<NodeId>, Error> {
        let key = self.keys.actor_placement(identity);
        self.store.get(&key).await?.map(decode_node).transpose()
    }

    async fn put_or_get_location(
        &self,
        identity: &ActorIdentity,
        node: &NodeId,
        ttl: Duration,
    ) -> Result<NodeId, Error> {
        let key = self.keys.actor_placement(identity);
        if self
            .store
            .set_nx_ex(&key, node.as_str().as_bytes(), ttl)
            .await?
        {
            debug!("Node {} claimed actor {}.", node, identity);
            return Ok(node.clone());
        }
        match self.get_location(identity).await? {
            Some(owner) => {
                debug!("Actor {} is already owned by {}.", identity, owner);
                Ok(owner)
            }
            None => Err(Error::Store(format!(
                "Location of actor {} vanished while claiming it",
                identity
            ))),
        }
    }

    async fn remove_actor(&self, identity: &ActorIdentity) -> Result<(), Error> {
        let key = self.keys.actor_placement(identity);
        self.store.del(&key).await?;
        debug!("Location of actor {} removed.", identity);
        Ok(())
    }

    async fn update_expiry(
        &self,
        identity: &ActorIdentity,
        node: &NodeId,
        ttl: Duration,
    ) -> Result<bool, Error> {
        let key = self.keys.actor_placement(identity);
        Ok(self
            .store
            .expire_if_eq(&key, node.as_str().as_bytes(), ttl)
            .await?)
    }
}
