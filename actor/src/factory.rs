// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Registry of actor constructors by type name.

use crate::{
    activation::ActorActivation, actor::Actor, system::SystemRef, ActorIdentity,
    Error,
};

use tracing::debug;

use std::{
    collections::HashMap,
    marker::PhantomData,
    sync::{Arc, RwLock},
};

/// Type erased constructor of activations of one actor type.
pub(crate) trait Spawner: Send + Sync {
    fn spawn(&self, identity: ActorIdentity, system: SystemRef) -> ActorActivation;
}

struct TypedSpawner<A, F> {
    factory: F,
    _phantom_actor: PhantomData<fn() -> A>,
}

impl<A, F> Spawner for TypedSpawner<A, F>
where
    A: Actor,
    F: Fn() -> A + Send + Sync,
{
    fn spawn(&self, identity: ActorIdentity, system: SystemRef) -> ActorActivation {
        ActorActivation::spawn((self.factory)(), identity, system)
    }
}

#[derive(Clone, Default)]
pub struct ActorFactory {
    spawners: Arc<RwLock<HashMap<String, Arc<dyn Spawner>>>>,
}

impl ActorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the constructor of an actor type.
    ///
    /// # Errors
    ///
    /// Returns `Error::ActorTypeExists` if the type is already registered.
    ///
    pub fn register<A, F>(&self, actor_type: &str, factory: F) -> Result<(), Error>
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        let mut spawners = self
            .spawners
            .write()
            .map_err(|e| Error::Functional(e.to_string()))?;
        if spawners.contains_key(actor_type) {
            return Err(Error::ActorTypeExists(actor_type.to_owned()));
        }
        spawners.insert(
            actor_type.to_owned(),
            Arc::new(TypedSpawner {
                factory,
                _phantom_actor: PhantomData,
            }),
        );
        debug!("Registered actor type {}.", actor_type);
        Ok(())
    }

    pub fn contains(&self, actor_type: &str) -> bool {
        self.spawners
            .read()
            .map(|spawners| spawners.contains_key(actor_type))
            .unwrap_or(false)
    }

    pub(crate) fn spawner(&self, actor_type: &str) -> Result<Arc<dyn Spawner>, Error> {
        let spawners = self
            .spawners
            .read()
            .map_err(|e| Error::Functional(e.to_string()))?;
        spawners
            .get(actor_type)
            .cloned()
            .ok_or_else(|| Error::UnknownActorType(actor_type.to_owned()))
    }
}
