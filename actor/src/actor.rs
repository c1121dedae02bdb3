// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor
//!
//! The `actor` module provides the `Actor` trait and the `Handler` trait that
//! application code implements, the `ActorContext` handed to every hook and
//! the `ActorRef` used to talk to an actor wherever it lives in the cluster.
//!
//! Actors are virtual: nobody creates or destroys them explicitly. The first
//! message addressed to an identity activates an instance on some node, and
//! the instance is deactivated again after it stays idle for the configured
//! lifetime.
//!

use crate::{
    mailbox::{Job, MailboxSender},
    system::SystemRef,
    ActorId, ActorIdentity, Error,
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use std::{collections::HashMap, marker::PhantomData, time::Duration};

/// The actor trait.
///
/// All hooks have a default implementation doing nothing, so an actor only
/// overrides what it needs. Every hook runs as a job of the actor mailbox,
/// never concurrently with another hook of the same instance.
///
/// # Example
///
/// ```ignore
/// struct Greeter;
///
/// #[async_trait]
/// impl Actor for Greeter {
///     type Message = String;
///     type Response = String;
/// }
///
/// #[async_trait]
/// impl Handler<Greeter> for Greeter {
///     async fn handle_message(
///         &mut self,
///         name: String,
///         _ctx: &mut ActorContext<Greeter>,
///     ) -> Result<String, Error> {
///         Ok(format!("Hello, {}", name))
///     }
/// }
/// ```
#[async_trait]
pub trait Actor: Send + Sync + Sized + 'static + Handler<Self> {
    /// Message accepted by the actor.
    type Message: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Reply produced by the message handler.
    type Response: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Runs before the first message. An error tears the instance down and
    /// fails the messages waiting for it.
    async fn on_activate(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Runs when the instance is deactivated, after its timers are cancelled.
    async fn on_deactivate(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Runs when a reminder registered by this actor is due.
    async fn on_reminder(
        &mut self,
        _name: &str,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Runs when a timer registered by this instance fires.
    async fn on_timer(
        &mut self,
        _name: &str,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Message handler of an actor.
#[async_trait]
pub trait Handler<A: Actor + Handler<A>>: Send + Sync {
    /// Handles a message. The error returned here reaches the caller as is.
    async fn handle_message(
        &mut self,
        msg: A::Message,
        ctx: &mut ActorContext<A>,
    ) -> Result<A::Response, Error>;
}

struct TimerEntry {
    token: CancellationToken,
    recurring: bool,
    generation: u64,
}

/// Context of an activation, handed to every hook.
pub struct ActorContext<A: Actor> {
    identity: ActorIdentity,
    system: SystemRef,
    sender: MailboxSender,
    timers: HashMap<String, TimerEntry>,
    generation: u64,
    /// Parent of every timer token; cancelled on deactivation.
    token: CancellationToken,
    _phantom_actor: PhantomData<fn() -> A>,
}

impl<A: Actor> ActorContext<A> {
    pub(crate) fn new(
        identity: ActorIdentity,
        system: SystemRef,
        sender: MailboxSender,
        token: CancellationToken,
    ) -> Self {
        Self {
            identity,
            system,
            sender,
            timers: HashMap::new(),
            generation: 0,
            token,
            _phantom_actor: PhantomData,
        }
    }

    pub fn actor_type(&self) -> &str {
        &self.identity.actor_type
    }

    pub fn actor_id(&self) -> &ActorId {
        &self.identity.actor_id
    }

    pub fn identity(&self) -> &ActorIdentity {
        &self.identity
    }

    pub fn system(&self) -> &SystemRef {
        &self.system
    }

    /// Reference to another actor, for actor to actor calls.
    pub fn actor<B: Actor>(
        &self,
        actor_type: &str,
        actor_id: impl Into<ActorId>,
    ) -> ActorRef<B> {
        self.system.actor::<B>(actor_type, actor_id)
    }

    /// Registers a timer that calls [`Actor::on_timer`] after `delay`, and
    /// then every `delay` if `recurring`. Ticks go through the mailbox.
    ///
    /// # Errors
    ///
    /// Returns `Error::TimerExists` if a timer with that name is registered.
    ///
    pub fn register_timer(
        &mut self,
        name: &str,
        delay: Duration,
        recurring: bool,
    ) -> Result<(), Error> {
        if self.timers.contains_key(name) {
            return Err(Error::TimerExists(name.to_owned()));
        }
        self.generation += 1;
        let generation = self.generation;
        let token = self.token.child_token();

        let task_token = token.clone();
        let sender = self.sender.clone();
        let timer = name.to_owned();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {
                        let tick = Job::Timer { name: timer.clone(), generation };
                        if sender.send(tick).is_err() || !recurring {
                            break;
                        }
                    }
                }
            }
        });

        debug!("Actor {} registered timer {}.", self.identity, name);
        self.timers.insert(
            name.to_owned(),
            TimerEntry {
                token,
                recurring,
                generation,
            },
        );
        Ok(())
    }

    /// Cancels a timer. Returns whether it was registered.
    pub fn unregister_timer(&mut self, name: &str) -> bool {
        match self.timers.remove(name) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_timer(&self, name: &str) -> bool {
        self.timers.contains_key(name)
    }

    /// Accepts a timer tick if it belongs to the live registration of `name`.
    /// One shot timers are forgotten once their tick is accepted. Ticks still
    /// queued when the activation starts deactivating are dropped.
    pub(crate) fn accept_tick(&mut self, name: &str, generation: u64) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        let Some(entry) = self.timers.get(name) else {
            return false;
        };
        if entry.generation != generation {
            return false;
        }
        if !entry.recurring {
            self.timers.remove(name);
        }
        true
    }

    pub(crate) fn cancel_timers(&mut self) {
        self.token.cancel();
        self.timers.clear();
    }

    /// Registers a durable reminder that calls [`Actor::on_reminder`] on this
    /// actor after `delay`, on whatever node hosts it by then.
    pub async fn register_reminder(
        &self,
        name: &str,
        delay: Duration,
    ) -> Result<(), Error> {
        self.system
            .reminders()
            .register_reminder(&self.identity, name, delay)
            .await
    }

    pub async fn unregister_reminder(&self, name: &str) -> Result<(), Error> {
        self.system
            .reminders()
            .unregister_reminder(&self.identity, name)
            .await
    }
}

/// Location transparent reference to an actor.
pub struct ActorRef<A: Actor> {
    identity: ActorIdentity,
    system: SystemRef,
    _phantom_actor: PhantomData<fn() -> A>,
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            system: self.system.clone(),
            _phantom_actor: PhantomData,
        }
    }
}

impl<A: Actor> ActorRef<A> {
    pub(crate) fn new(identity: ActorIdentity, system: SystemRef) -> Self {
        Self {
            identity,
            system,
            _phantom_actor: PhantomData,
        }
    }

    pub fn identity(&self) -> &ActorIdentity {
        &self.identity
    }

    /// Sends a message and waits for the reply.
    pub async fn ask(&self, message: A::Message) -> Result<A::Response, Error> {
        self.system
            .messaging()
            .ask::<A>(&self.identity, &message)
            .await
    }

    /// Sends a message without waiting for it to be handled.
    pub async fn tell(&self, message: A::Message) -> Result<(), Error> {
        self.system
            .messaging()
            .tell::<A>(&self.identity, &message)
            .await
    }
}
