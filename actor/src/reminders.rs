// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor reminders
//!
//! Reminders are durable timers. The schedule lives in a sorted set of the
//! shared store, scored by trigger time in unix milliseconds, so it survives
//! the activation that registered a reminder and the node that hosted it.
//!
//! A single system actor ([`ReminderActor`]) owns the schedule of a cluster.
//! Every mutation is a message to that actor, so its mailbox serializes them
//! even when many nodes register reminders concurrently. The actor keeps the
//! entries due within the next pulse in memory and a recurring pump timer
//! delivers the due ones as reminder requests to their target actors.
//!
//! Delivery is at least once: an entry leaves the schedule only after its
//! target acknowledged it, and a failed delivery is retried on the next pump.
//!

use crate::{
    actor::{Actor, ActorContext, Handler},
    messaging::{ActorMessaging, RequestKind},
    ActorIdentity, Error,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use store::Store;
use tracing::{debug, warn};

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Actor type of the reminder system actor.
pub const REMINDER_ACTOR_TYPE: &str = "__reminders";

/// Actor id of the reminder system actor.
pub const REMINDER_ACTOR_ID: &str = "global";

const PUMP_TIMER: &str = "pump";

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// A reminder of one actor. Encoded, it is the member of the schedule.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reminder {
    pub identity: ActorIdentity,
    pub name: String,
}

/// Messages of the reminder system actor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ReminderMessage {
    Register { reminder: Reminder, delay_ms: u64 },
    Unregister { reminder: Reminder },
    /// Loads the entries due within the next pulse.
    Ping,
    /// Outcome of a delivery started by the pump.
    Delivered { member: Vec<u8>, success: bool },
}

struct ScheduledReminder {
    reminder: Reminder,
    trigger_at: i64,
    /// A delivery is under way.
    in_flight: bool,
    /// Registered again while a delivery was under way.
    rescheduled: bool,
}

/// System actor owning the reminder schedule of the cluster.
pub struct ReminderActor {
    store: Arc<dyn Store>,
    schedule_key: String,
    pump: Duration,
    window: Duration,
    to_consider: HashMap<Vec<u8>, ScheduledReminder>,
}

impl ReminderActor {
    pub fn new(
        store: Arc<dyn Store>,
        schedule_key: String,
        pump: Duration,
        window: Duration,
    ) -> Self {
        Self {
            store,
            schedule_key,
            pump,
            window,
            to_consider: HashMap::new(),
        }
    }

    async fn register(&mut self, reminder: Reminder, delay_ms: u64) -> Result<(), Error> {
        let member = bincode::serialize(&reminder)
            .map_err(|e| Error::Encode(e.to_string()))?;
        let trigger_at =
            now_ms().saturating_add(i64::try_from(delay_ms).unwrap_or(i64::MAX));
        self.store
            .zadd(&self.schedule_key, trigger_at, &member)
            .await?;
        if let Some(scheduled) = self.to_consider.get_mut(&member) {
            scheduled.trigger_at = trigger_at;
            scheduled.rescheduled = scheduled.in_flight;
        }
        debug!(
            "Reminder {} of {} scheduled at {}.",
            reminder.name, reminder.identity, trigger_at
        );
        self.ping().await
    }

    async fn unregister(&mut self, reminder: Reminder) -> Result<(), Error> {
        let member = bincode::serialize(&reminder)
            .map_err(|e| Error::Encode(e.to_string()))?;
        self.store.zrem(&self.schedule_key, &member).await?;
        self.to_consider.remove(&member);
        debug!("Reminder {} of {} removed.", reminder.name, reminder.identity);
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), Error> {
        let horizon = now_ms().saturating_add(duration_ms(self.window));
        let due = self
            .store
            .zrange_by_score(&self.schedule_key, horizon)
            .await?;
        for (member, trigger_at) in due {
            if let Some(scheduled) = self.to_consider.get_mut(&member) {
                if !scheduled.in_flight {
                    scheduled.trigger_at = trigger_at;
                }
                continue;
            }
            match bincode::deserialize::<Reminder>(&member) {
                Ok(reminder) => {
                    self.to_consider.insert(
                        member,
                        ScheduledReminder {
                            reminder,
                            trigger_at,
                            in_flight: false,
                            rescheduled: false,
                        },
                    );
                }
                Err(e) => warn!("Invalid reminder in schedule: {}", e),
            }
        }
        Ok(())
    }

    async fn delivered(&mut self, member: Vec<u8>, success: bool) -> Result<(), Error> {
        let Some(scheduled) = self.to_consider.get_mut(&member) else {
            // Unregistered while the delivery was under way.
            return Ok(());
        };
        if success && !scheduled.rescheduled {
            self.store.zrem(&self.schedule_key, &member).await?;
            self.to_consider.remove(&member);
            return Ok(());
        }
        if !success {
            warn!(
                "Reminder {} of {} not delivered, retrying on next pump.",
                scheduled.reminder.name, scheduled.reminder.identity
            );
        }
        scheduled.in_flight = false;
        scheduled.rescheduled = false;
        Ok(())
    }

    /// Starts the delivery of every due reminder. Deliveries run outside of
    /// the mailbox and report back with a `Delivered` message, so a target
    /// actor may register reminders from its reminder hook.
    fn pump(&mut self, ctx: &ActorContext<ReminderActor>) {
        let now = now_ms();
        for (member, scheduled) in self.to_consider.iter_mut() {
            if scheduled.in_flight || scheduled.trigger_at > now {
                continue;
            }
            scheduled.in_flight = true;
            let reminders = ctx.system().reminders().clone();
            let this = ctx.actor::<ReminderActor>(REMINDER_ACTOR_TYPE, REMINDER_ACTOR_ID);
            let reminder = scheduled.reminder.clone();
            let member = member.clone();
            tokio::spawn(async move {
                let result = reminders
                    .trigger_reminder(&reminder.identity, &reminder.name)
                    .await;
                if let Err(err) = &result {
                    warn!(
                        "Reminder {} of {} failed: {:?}",
                        reminder.name, reminder.identity, err
                    );
                }
                let outcome = ReminderMessage::Delivered {
                    member,
                    success: result.is_ok(),
                };
                if let Err(err) = this.tell(outcome).await {
                    warn!("Can not report reminder outcome: {:?}", err);
                }
            });
        }
    }
}

#[async_trait]
impl Actor for ReminderActor {
    type Message = ReminderMessage;
    type Response = ();

    async fn on_activate(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        ctx.register_timer(PUMP_TIMER, self.pump, true)?;
        self.ping().await
    }

    async fn on_timer(
        &mut self,
        name: &str,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        if name == PUMP_TIMER {
            self.pump(ctx);
        }
        Ok(())
    }
}

#[async_trait]
impl Handler<ReminderActor> for ReminderActor {
    async fn handle_message(
        &mut self,
        msg: ReminderMessage,
        _ctx: &mut ActorContext<ReminderActor>,
    ) -> Result<(), Error> {
        match msg {
            ReminderMessage::Register { reminder, delay_ms } => {
                self.register(reminder, delay_ms).await
            }
            ReminderMessage::Unregister { reminder } => self.unregister(reminder).await,
            ReminderMessage::Ping => self.ping().await,
            ReminderMessage::Delivered { member, success } => {
                self.delivered(member, success).await
            }
        }
    }
}

/// Client side of the reminder subsystem.
#[derive(Clone)]
pub struct ActorReminders {
    messaging: ActorMessaging,
}

impl ActorReminders {
    pub(crate) fn new(messaging: ActorMessaging) -> Self {
        Self { messaging }
    }

    fn system_actor() -> ActorIdentity {
        ActorIdentity::new(REMINDER_ACTOR_TYPE, REMINDER_ACTOR_ID)
    }

    /// Schedules reminder `name` of the actor `delay` from now. Registering an
    /// existing reminder moves its trigger time.
    pub async fn register_reminder(
        &self,
        identity: &ActorIdentity,
        name: &str,
        delay: Duration,
    ) -> Result<(), Error> {
        let message = ReminderMessage::Register {
            reminder: Reminder {
                identity: identity.clone(),
                name: name.to_owned(),
            },
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        };
        self.messaging
            .ask::<ReminderActor>(&Self::system_actor(), &message)
            .await
    }

    pub async fn unregister_reminder(
        &self,
        identity: &ActorIdentity,
        name: &str,
    ) -> Result<(), Error> {
        let message = ReminderMessage::Unregister {
            reminder: Reminder {
                identity: identity.clone(),
                name: name.to_owned(),
            },
        };
        self.messaging
            .ask::<ReminderActor>(&Self::system_actor(), &message)
            .await
    }

    /// Makes the reminder actor load the entries due soon. Also keeps it
    /// active somewhere in the cluster.
    pub async fn ping_reminders(&self) -> Result<(), Error> {
        self.messaging
            .tell::<ReminderActor>(&Self::system_actor(), &ReminderMessage::Ping)
            .await
    }

    /// Delivers reminder `name` to the actor and waits for its hook.
    pub(crate) async fn trigger_reminder(
        &self,
        identity: &ActorIdentity,
        name: &str,
    ) -> Result<(), Error> {
        let payload = bincode::serialize(&name.to_owned())
            .map_err(|e| Error::Encode(e.to_string()))?;
        self.messaging
            .send_actor_request(identity, payload, false, RequestKind::Reminder)
            .await?
            .wait()
            .await?;
        Ok(())
    }
}
