// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Mailbox
//!
//! Every piece of work an activation performs is a [`Job`] in its mailbox:
//! the activation hook, user messages, reminders, timer ticks and the
//! deactivation hook. The runner takes one job at a time in enqueue order, so
//! actor code never runs concurrently with itself.
//!

use crate::Error;

use tokio::sync::{mpsc, oneshot};

/// Reply channel of a job producing encoded bytes.
pub(crate) type Reply = oneshot::Sender<Result<Vec<u8>, Error>>;

/// Receiving side of a [`Reply`].
pub(crate) type ReplyReceiver = oneshot::Receiver<Result<Vec<u8>, Error>>;

/// Unit of work executed by an activation runner.
pub(crate) enum Job {
    /// Run the activation hook.
    Activate {
        rsvp: oneshot::Sender<Result<(), Error>>,
    },
    /// Run the message handler with an encoded message.
    Message { payload: Vec<u8>, rsvp: Reply },
    /// Run the reminder hook.
    Reminder { name: String, rsvp: Reply },
    /// Run the timer hook. `generation` identifies the registration that
    /// scheduled the tick.
    Timer { name: String, generation: u64 },
    /// Run the deactivation hook and stop.
    Deactivate { rsvp: oneshot::Sender<()> },
}

impl Job {
    /// Answers the job without running it.
    pub(crate) fn reject(self, error: Error) {
        match self {
            Job::Activate { rsvp } => {
                let _ = rsvp.send(Err(error));
            }
            Job::Message { rsvp, .. } | Job::Reminder { rsvp, .. } => {
                let _ = rsvp.send(Err(error));
            }
            Job::Deactivate { rsvp } => {
                let _ = rsvp.send(());
            }
            Job::Timer { .. } => {}
        }
    }
}

/// Work an activation accepts from outside.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Request {
    Message(Vec<u8>),
    Reminder(String),
}

impl Request {
    pub(crate) fn into_job(self, rsvp: Reply) -> Job {
        match self {
            Request::Message(payload) => Job::Message { payload, rsvp },
            Request::Reminder(name) => Job::Reminder { name, rsvp },
        }
    }
}

pub(crate) type MailboxSender = mpsc::UnboundedSender<Job>;

pub(crate) type MailboxReceiver = mpsc::UnboundedReceiver<Job>;

/// Creates a new unbounded mailbox.
pub(crate) fn mailbox() -> (MailboxSender, MailboxReceiver) {
    mpsc::unbounded_channel()
}
