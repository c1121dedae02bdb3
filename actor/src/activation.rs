// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor activation
//!
//! An activation is the single in-memory instance of an actor on a node. It
//! is made of two halves:
//!
//! - the [`ActivationRunner`], a task that owns the actor instance and its
//!   context and executes the jobs of the mailbox one at a time;
//! - the [`ActorActivation`] handle, kept in the activation table of the node,
//!   which enqueues jobs and drives the state machine.
//!
//! ## States
//!
//! ```text
//! Created -> Activating -> Active -> Deactivating -> Deactivated
//! ```
//!
//! The activation job is always the first job of the mailbox. A failed
//! activation hook poisons the instance: every job queued behind it fails
//! with the activation error and the deactivation hook is skipped.
//!
//! Once deactivation starts the handle refuses new work, every timer is
//! cancelled, and jobs that slipped into the mailbox behind the deactivation
//! job are rejected.
//!

use crate::{
    actor::{Actor, ActorContext, Handler},
    mailbox::{mailbox, Job, MailboxReceiver, MailboxSender, ReplyReceiver, Request},
    system::SystemRef,
    ActorIdentity, Error,
};

use tokio::{
    sync::{oneshot, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

/// Lifecycle state of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Created,
    Activating,
    Active,
    Deactivating,
    Deactivated,
}

impl ActivationState {
    /// Whether the activation still takes new jobs.
    pub fn is_accepting(&self) -> bool {
        matches!(
            self,
            ActivationState::Created
                | ActivationState::Activating
                | ActivationState::Active
        )
    }
}

struct Shared {
    identity: ActorIdentity,
    sender: MailboxSender,
    state: watch::Sender<ActivationState>,
    expire_at: Mutex<Instant>,
    token: CancellationToken,
    /// Set by the one caller in charge of tearing the activation down.
    teardown: AtomicBool,
}

/// Handle to an activation.
#[derive(Clone)]
pub struct ActorActivation {
    shared: Arc<Shared>,
}

impl ActorActivation {
    /// Spawns the runner of a new activation in `Created` state.
    pub(crate) fn spawn<A: Actor>(
        actor: A,
        identity: ActorIdentity,
        system: SystemRef,
    ) -> Self {
        debug!("Creating activation of actor {}.", identity);
        let (sender, receiver) = mailbox();
        let (state, _) = watch::channel(ActivationState::Created);
        let token = CancellationToken::new();
        let shared = Arc::new(Shared {
            identity: identity.clone(),
            sender: sender.clone(),
            state,
            expire_at: Mutex::new(Instant::now()),
            token: token.clone(),
            teardown: AtomicBool::new(false),
        });

        let ctx = ActorContext::new(identity, system, sender, token);
        let runner = ActivationRunner {
            actor,
            shared: shared.clone(),
            receiver,
            failure: None,
        };
        tokio::spawn(runner.run(ctx));

        Self { shared }
    }

    pub fn identity(&self) -> &ActorIdentity {
        &self.shared.identity
    }

    pub fn state(&self) -> ActivationState {
        *self.shared.state.borrow()
    }

    pub fn expire_at(&self) -> Instant {
        *self
            .shared
            .expire_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_expire_at(&self, expire_at: Instant) {
        *self
            .shared
            .expire_at
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = expire_at;
    }

    /// Claims the teardown of the activation. Only the first call gets `true`.
    pub(crate) fn claim_teardown(&self) -> bool {
        !self.shared.teardown.swap(true, Ordering::SeqCst)
    }

    /// Whether the activation is leaving, or has left, the node.
    pub fn is_tearing_down(&self) -> bool {
        self.shared.teardown.load(Ordering::SeqCst) || !self.state().is_accepting()
    }

    /// Whether both handles refer to the same activation.
    pub fn ptr_eq(&self, other: &ActorActivation) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Enqueues the activation job. The job is in the mailbox when this
    /// returns; the receiver settles once the activation hook has run.
    pub(crate) fn activate(&self) -> oneshot::Receiver<Result<(), Error>> {
        let (rsvp, receiver) = oneshot::channel();
        if let Err(error) = self.shared.sender.send(Job::Activate { rsvp }) {
            error.0.reject(Error::Activation(format!(
                "{} runner is gone",
                self.shared.identity
            )));
        }
        receiver
    }

    /// Enqueues a request behind the jobs already in the mailbox.
    ///
    /// # Errors
    ///
    /// Returns `Error::Rejected` without enqueueing if the activation is
    /// deactivating or deactivated.
    ///
    pub(crate) fn dispatch(&self, request: Request) -> Result<ReplyReceiver, Error> {
        if !self.state().is_accepting() {
            return Err(Error::Rejected(self.shared.identity.to_string()));
        }
        let (rsvp, receiver) = oneshot::channel();
        self.shared
            .sender
            .send(request.into_job(rsvp))
            .map_err(|_| Error::Rejected(self.shared.identity.to_string()))?;
        Ok(receiver)
    }

    /// Stops accepting work, cancels the timers and runs the deactivation
    /// hook. Waits until the activation is deactivated.
    ///
    /// # Returns
    ///
    /// `true` if this call started the deactivation, `false` if it was
    /// already under way or done.
    ///
    pub async fn deactivate(&self) -> Result<bool, Error> {
        let mut started = false;
        self.shared.state.send_if_modified(|state| {
            if state.is_accepting() {
                *state = ActivationState::Deactivating;
                started = true;
                true
            } else {
                false
            }
        });

        if started {
            debug!("Deactivating actor {}.", self.shared.identity);
            self.shared.token.cancel();
            let (rsvp, receiver) = oneshot::channel();
            if self.shared.sender.send(Job::Deactivate { rsvp }).is_ok() {
                let _ = receiver.await;
            }
        }

        let mut state = self.shared.state.subscribe();
        state
            .wait_for(|state| *state == ActivationState::Deactivated)
            .await
            .map_err(|e| Error::Send(e.to_string()))?;
        Ok(started)
    }
}

/// Task side of an activation.
pub(crate) struct ActivationRunner<A: Actor> {
    actor: A,
    shared: Arc<Shared>,
    receiver: MailboxReceiver,
    /// Error of the activation hook, if it failed.
    failure: Option<Error>,
}

impl<A: Actor> ActivationRunner<A> {
    async fn run(mut self, mut ctx: ActorContext<A>) {
        let identity = self.shared.identity.clone();
        while let Some(job) = self.receiver.recv().await {
            match job {
                Job::Activate { rsvp } => {
                    let result = self.activate(&mut ctx).await;
                    if rsvp.send(result).is_err() {
                        debug!("Nobody waits for activation of {}.", identity);
                    }
                }
                Job::Message { payload, rsvp } => {
                    let result = match &self.failure {
                        Some(error) => Err(error.clone()),
                        None => self.handle(payload, &mut ctx).await,
                    };
                    if rsvp.send(result).is_err() {
                        debug!("Reply of actor {} dropped.", identity);
                    }
                }
                Job::Reminder { name, rsvp } => {
                    let result = match &self.failure {
                        Some(error) => Err(error.clone()),
                        None => self
                            .actor
                            .on_reminder(&name, &mut ctx)
                            .await
                            .map(|_| Vec::new()),
                    };
                    if rsvp.send(result).is_err() {
                        debug!("Reminder {} of {} not awaited.", name, identity);
                    }
                }
                Job::Timer { name, generation } => {
                    if self.failure.is_some() || !ctx.accept_tick(&name, generation)
                    {
                        continue;
                    }
                    if let Err(err) = self.actor.on_timer(&name, &mut ctx).await {
                        error!(
                            "Timer {} of actor {} failed: {:?}",
                            name, identity, err
                        );
                    }
                }
                Job::Deactivate { rsvp } => {
                    ctx.cancel_timers();
                    if self.failure.is_none() {
                        if let Err(err) = self.actor.on_deactivate(&mut ctx).await {
                            error!(
                                "Actor {} failed to deactivate: {:?}",
                                identity, err
                            );
                        }
                    }
                    let _ = rsvp.send(());
                    break;
                }
            }
        }

        self.receiver.close();
        while let Ok(job) = self.receiver.try_recv() {
            job.reject(Error::Rejected(identity.to_string()));
        }
        self.shared.state.send_replace(ActivationState::Deactivated);
        debug!("Actor {} is deactivated.", identity);
    }

    async fn activate(&mut self, ctx: &mut ActorContext<A>) -> Result<(), Error> {
        self.shared.state.send_if_modified(|state| {
            if *state == ActivationState::Created {
                *state = ActivationState::Activating;
                true
            } else {
                false
            }
        });

        match self.actor.on_activate(ctx).await {
            Ok(()) => {
                self.shared.state.send_if_modified(|state| {
                    if *state == ActivationState::Activating {
                        *state = ActivationState::Active;
                        true
                    } else {
                        false
                    }
                });
                debug!("Actor {} is active.", self.shared.identity);
                Ok(())
            }
            Err(err) => {
                error!(
                    "Actor {} failed to activate: {:?}",
                    self.shared.identity, err
                );
                ctx.cancel_timers();
                let error = Error::Activation(err.to_string());
                self.failure = Some(error.clone());
                Err(error)
            }
        }
    }

    async fn handle(
        &mut self,
        payload: Vec<u8>,
        ctx: &mut ActorContext<A>,
    ) -> Result<Vec<u8>, Error> {
        let message: A::Message = bincode::deserialize(&payload)
            .map_err(|e| Error::Decode(e.to_string()))?;
        let response = self.actor.handle_message(message, ctx).await?;
        bincode::serialize(&response).map_err(|e| Error::Encode(e.to_string()))
    }
}

impl<A: Actor> Drop for ActivationRunner<A> {
    // A runner that dies early (a panicking hook) must not leave waiters
    // of the deactivation hanging.
    fn drop(&mut self) {
        self.shared.state.send_replace(ActivationState::Deactivated);
    }
}
