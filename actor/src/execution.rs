// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor execution
//!
//! Per-node table of live activations. The table creates activations on the
//! first message for an identity, bumps their idle deadline on every admitted
//! message, and deactivates them when they expire, when the node stops, or
//! when the node learns it no longer owns them.
//!
//! The get-or-create of an activation and the enqueue of its activation job
//! happen under the table lock, so concurrent first messages for the same
//! identity share a single activation and always queue behind its activation
//! hook.
//!
//! A teardown is owned by the one call that claims it. That call runs the
//! deactivation hook, removes the location record and then the table entry;
//! every other caller waits until the entry is gone. A node that is not
//! running creates no new activations.
//!

use crate::{
    activation::ActorActivation,
    cluster::{ClusterInfo, NodeStatus},
    directory::ActorDirectory,
    factory::ActorFactory,
    mailbox::{ReplyReceiver, Request},
    system::SystemRef,
    ActorIdentity, Error,
};

use tokio::{
    sync::{oneshot, Notify},
    time::Instant,
};
use tracing::{debug, error};

use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

/// A request accepted into a mailbox, waiting to be settled.
pub(crate) struct Admission {
    identity: ActorIdentity,
    /// Present when this admission created the activation.
    activation: Option<oneshot::Receiver<Result<(), Error>>>,
    reply: ReplyReceiver,
}

#[derive(Clone)]
pub struct ActorExecution {
    activations: Arc<RwLock<HashMap<String, ActorActivation>>>,
    factory: ActorFactory,
    directory: Arc<dyn ActorDirectory>,
    cluster: ClusterInfo,
    lifetime: Duration,
    ownership_ttl: Duration,
    /// Woken every time a torn down activation leaves the table.
    removed: Arc<Notify>,
}

impl ActorExecution {
    pub(crate) fn new(
        factory: ActorFactory,
        directory: Arc<dyn ActorDirectory>,
        cluster: ClusterInfo,
        lifetime: Duration,
        ownership_ttl: Duration,
    ) -> Self {
        Self {
            activations: Arc::new(RwLock::new(HashMap::new())),
            factory,
            directory,
            cluster,
            lifetime,
            ownership_ttl,
            removed: Arc::new(Notify::new()),
        }
    }

    // The table is only ever mutated through whole inserts and removes, so a
    // poisoned lock still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ActorActivation>> {
        self.activations.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ActorActivation>> {
        self.activations.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live activations on this node.
    pub fn activation_count(&self) -> usize {
        self.read().len()
    }

    pub fn activation(&self, identity: &ActorIdentity) -> Option<ActorActivation> {
        self.read().get(&identity.activation_key()).cloned()
    }

    pub fn is_active(&self, identity: &ActorIdentity) -> bool {
        self.read().contains_key(&identity.activation_key())
    }

    /// Renews this node's ownership lease of the actor.
    ///
    /// # Returns
    ///
    /// `false` if another node owns the actor or the lease is gone.
    ///
    pub async fn renew(&self, identity: &ActorIdentity) -> Result<bool, Error> {
        self.directory
            .update_expiry(identity, &self.cluster.local_node_id(), self.ownership_ttl)
            .await
    }

    /// Gets or creates the activation and enqueues the request on it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Rejected` if the activation is being torn down, or if
    /// it would have to be created while the node is not running.
    ///
    pub(crate) fn admit(
        &self,
        system: &SystemRef,
        identity: &ActorIdentity,
        request: Request,
    ) -> Result<Admission, Error> {
        let key = identity.activation_key();
        let (activation, activating) = {
            let mut table = self.write();
            match table.get(&key) {
                Some(activation) if activation.is_tearing_down() => {
                    return Err(Error::Rejected(identity.to_string()));
                }
                Some(activation) => (activation.clone(), None),
                None if self.cluster.local_status() != NodeStatus::Running => {
                    return Err(Error::Rejected(identity.to_string()));
                }
                None => {
                    let spawner = self.factory.spawner(&identity.actor_type)?;
                    let activation = spawner.spawn(identity.clone(), system.clone());
                    let activating = activation.activate();
                    table.insert(key, activation.clone());
                    (activation, Some(activating))
                }
            }
        };

        activation.set_expire_at(Instant::now() + self.lifetime);
        let reply = activation.dispatch(request)?;
        Ok(Admission {
            identity: identity.clone(),
            activation: activating,
            reply,
        })
    }

    /// Waits for an admitted request. If the admission created the activation
    /// and the activation hook fails, the activation is torn down and the
    /// activation error is returned.
    pub(crate) async fn settle(&self, admission: Admission) -> Result<Vec<u8>, Error> {
        let Admission {
            identity,
            activation,
            reply,
        } = admission;

        if let Some(activation) = activation {
            let activated = activation.await.unwrap_or_else(|_| {
                Err(Error::Activation(format!("{} runner is gone", identity)))
            });
            if let Err(err) = activated {
                if let Err(teardown) = self.deactivate(&identity).await {
                    error!(
                        "Can not tear down failed activation {}: {:?}",
                        identity, teardown
                    );
                }
                return Err(err);
            }
        }

        reply
            .await
            .unwrap_or_else(|_| Err(Error::Rejected(identity.to_string())))
    }

    /// Delivers a message to the local activation of the actor, creating it
    /// if needed, and waits for the reply.
    pub async fn on_message(
        &self,
        system: &SystemRef,
        identity: &ActorIdentity,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, Error> {
        let admission = self.admit(system, identity, Request::Message(payload))?;
        self.settle(admission).await
    }

    /// Deactivates the local activation and removes its location record. Does
    /// nothing if the actor is not active here.
    pub async fn deactivate(&self, identity: &ActorIdentity) -> Result<(), Error> {
        self.teardown(identity, true).await
    }

    /// Deactivates the local activation of an actor owned by another node.
    /// The location record is left alone.
    pub async fn evict(&self, identity: &ActorIdentity) -> Result<(), Error> {
        self.teardown(identity, false).await
    }

    async fn teardown(
        &self,
        identity: &ActorIdentity,
        remove_location: bool,
    ) -> Result<(), Error> {
        let Some(activation) = self.activation(identity) else {
            return Ok(());
        };
        self.teardown_activation(identity, activation, remove_location)
            .await
    }

    /// Waits until an activation that stopped taking work has left the
    /// table. Returns at once if the current activation accepts work.
    pub(crate) async fn wait_teardown(
        &self,
        identity: &ActorIdentity,
    ) -> Result<(), Error> {
        match self.activation(identity) {
            Some(activation) if activation.is_tearing_down() => {
                self.teardown_activation(identity, activation, false).await
            }
            _ => Ok(()),
        }
    }

    async fn teardown_activation(
        &self,
        identity: &ActorIdentity,
        activation: ActorActivation,
        remove_location: bool,
    ) -> Result<(), Error> {
        if !activation.claim_teardown() {
            self.wait_removed(identity, &activation).await;
            return Ok(());
        }

        let deactivated = activation.deactivate().await.map(|_| ());
        let removed = if remove_location {
            self.directory.remove_actor(identity).await
        } else {
            Ok(())
        };

        {
            let key = identity.activation_key();
            let mut table = self.write();
            if table.get(&key).is_some_and(|current| current.ptr_eq(&activation)) {
                table.remove(&key);
                debug!("Actor {} removed from the activation table.", identity);
            }
        }
        self.removed.notify_waiters();
        deactivated.and(removed)
    }

    async fn wait_removed(&self, identity: &ActorIdentity, activation: &ActorActivation) {
        let key = identity.activation_key();
        loop {
            let removed = self.removed.notified();
            tokio::pin!(removed);
            removed.as_mut().enable();
            let present = self
                .read()
                .get(&key)
                .is_some_and(|current| current.ptr_eq(activation));
            if !present {
                return;
            }
            removed.await;
        }
    }

    /// Deactivates every activation whose idle deadline has passed.
    pub async fn kill_expired_actors(&self) {
        let now = Instant::now();
        let expired: Vec<ActorIdentity> = self
            .read()
            .values()
            .filter(|activation| activation.expire_at() <= now)
            .map(|activation| activation.identity().clone())
            .collect();
        for identity in expired {
            debug!("Actor {} expired.", identity);
            if let Err(err) = self.deactivate(&identity).await {
                error!("Can not deactivate expired actor {}: {:?}", identity, err);
            }
        }
    }

    /// Deactivates every activation of the node, including the ones admitted
    /// while the sweep runs. Meant for a node that is no longer running, which
    /// creates no new activations.
    pub async fn kill_all_actors(&self) {
        loop {
            let all: Vec<ActorIdentity> = self
                .read()
                .values()
                .map(|activation| activation.identity().clone())
                .collect();
            if all.is_empty() {
                break;
            }
            for identity in all {
                if let Err(err) = self.deactivate(&identity).await {
                    error!("Can not deactivate actor {}: {:?}", identity, err);
                }
            }
        }
    }
}
