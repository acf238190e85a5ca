// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pending command table.
//!
//! An entry lives from the moment a command is issued until it resolves,
//! fails, times out, or its last caller goes away. Every resolution removes
//! the entry, so a command can never be resolved twice and a late reply
//! finds nothing to match.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::{Command, CommandKind, CorrelationToken};
use crate::error::{Error, TransportError};
use crate::event::Event;
use crate::types::{DeviceId, RunMode, StationId};

/// What resolves a pending command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expectation {
    /// The transport accepted the message.
    Sent,
    /// An acknowledgement (or a schedule change) carrying the token.
    Ack,
    /// Watering started on the station.
    WateringStarted { station: StationId },
    /// The device switched to the mode.
    ModeChanged { mode: RunMode },
}

/// How a pending command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Resolved,
    TimedOut(u64),
    ConnectionLost(String),
    Rejected(String),
}

impl Outcome {
    fn into_result(self) -> Result<(), Error> {
        match self {
            Self::Resolved => Ok(()),
            Self::TimedOut(ms) => Err(Error::Timeout(ms)),
            Self::ConnectionLost(reason) => {
                Err(Error::Connection(TransportError::ConnectionFailed(reason)))
            }
            Self::Rejected(message) => Err(Error::Rejected(message)),
        }
    }
}

/// Diagnostic snapshot of a pending command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// Correlation token of the command.
    pub token: CorrelationToken,
    /// Target device, if any.
    pub device_id: Option<DeviceId>,
    /// Kind of the command.
    pub kind: CommandKind,
    /// Issue order.
    pub seq: u64,
    /// When the command was issued.
    pub issued_at: Instant,
    /// When waiting callers give up.
    pub deadline: Instant,
    /// Whether the command reached the transport.
    pub sent: bool,
    /// Callers waiting on the command (more than one when coalesced).
    pub waiters: usize,
}

struct Entry {
    command: Command,
    expectation: Expectation,
    seq: u64,
    issued_at: Instant,
    deadline: Instant,
    wait_ms: u64,
    sent: bool,
    waiters: Vec<(u64, oneshot::Sender<Outcome>)>,
}

impl Entry {
    fn finish(self, outcome: &Outcome) {
        for (_, waiter) in self.waiters {
            // A waiter that went away no longer cares.
            let _ = waiter.send(outcome.clone());
        }
    }

    fn matches(&self, event: &Event) -> bool {
        match (&self.expectation, event) {
            (
                Expectation::WateringStarted { station },
                Event::WateringStarted {
                    device_id,
                    station: started,
                    ..
                },
            ) => {
                self.command.device_id() == Some(device_id)
                    && started.is_none_or(|s| s == *station)
            }
            (Expectation::ModeChanged { mode }, Event::ModeChanged { device_id, mode: changed, .. }) => {
                self.command.device_id() == Some(device_id) && changed == mode
            }
            _ => false,
        }
    }
}

#[derive(Default)]
struct Table {
    entries: HashMap<CorrelationToken, Entry>,
    next_seq: u64,
    next_waiter: u64,
}

impl Table {
    fn finish(&mut self, token: &CorrelationToken, outcome: &Outcome) -> bool {
        match self.entries.remove(token) {
            Some(entry) => {
                entry.finish(outcome);
                true
            }
            None => false,
        }
    }
}

/// Shared table of pending commands.
#[derive(Clone, Default)]
pub(crate) struct PendingTable {
    inner: Arc<Mutex<Table>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a command, or joins an identical exclusive one.
    ///
    /// `wait_ms` is the timeout reported to callers when `deadline` passes.
    pub(crate) fn register(
        &self,
        command: Command,
        expectation: Expectation,
        deadline: Instant,
        wait_ms: u64,
    ) -> Result<Ticket, Error> {
        let mut table = self.inner.lock();
        let waiter_id = table.next_waiter;
        table.next_waiter += 1;
        let (tx, rx) = oneshot::channel();

        let kind = command.kind();
        if let (true, Some(device_id)) = (kind.is_exclusive(), command.device_id()) {
            let existing = table.entries.iter_mut().find(|(_, entry)| {
                entry.command.kind() == kind && entry.command.device_id() == Some(device_id)
            });
            if let Some((token, entry)) = existing {
                if entry.command != command || entry.expectation != expectation {
                    return Err(Error::Conflict {
                        device_id: device_id.clone(),
                        kind,
                    });
                }
                tracing::debug!(token = %token, kind = %kind, "Coalescing with pending command");
                entry.waiters.push((waiter_id, tx));
                return Ok(Ticket {
                    table: self.clone(),
                    token: token.clone(),
                    waiter_id,
                    deadline: entry.deadline,
                    wait_ms: entry.wait_ms,
                    created: false,
                    rx,
                });
            }
        }

        let token = CorrelationToken::new();
        let seq = table.next_seq;
        table.next_seq += 1;
        table.entries.insert(
            token.clone(),
            Entry {
                command,
                expectation,
                seq,
                issued_at: Instant::now(),
                deadline,
                wait_ms,
                sent: false,
                waiters: vec![(waiter_id, tx)],
            },
        );
        Ok(Ticket {
            table: self.clone(),
            token,
            waiter_id,
            deadline,
            wait_ms,
            created: true,
            rx,
        })
    }

    /// Returns the command for a token that is still pending.
    pub(crate) fn command(&self, token: &CorrelationToken) -> Option<Command> {
        self.inner
            .lock()
            .entries
            .get(token)
            .map(|entry| entry.command.clone())
    }

    /// Records that the command reached the transport.
    ///
    /// Commands that only wait for the send resolve here.
    pub(crate) fn mark_sent(&self, token: &CorrelationToken) {
        let mut table = self.inner.lock();
        let Some(entry) = table.entries.get_mut(token) else {
            return;
        };
        entry.sent = true;
        let done = entry.expectation == Expectation::Sent;
        if done {
            table.finish(token, &Outcome::Resolved);
        }
    }

    pub(crate) fn fail(&self, token: &CorrelationToken, outcome: &Outcome) -> bool {
        self.inner.lock().finish(token, outcome)
    }

    /// Resolves the pending command an inbound event answers, if any.
    ///
    /// Returns the token of the resolved command.
    pub(crate) fn observe(&self, event: &Event) -> Option<CorrelationToken> {
        let mut table = self.inner.lock();

        if let Some(token) = event.token() {
            let Some(entry) = table.entries.get(token) else {
                tracing::debug!(token = %token, kind = %event.kind(), "Dropping unmatched reply");
                return None;
            };
            let outcome = match event {
                Event::Error { message, .. } => Outcome::Rejected(message.clone()),
                Event::CommandAck { .. } if entry.expectation != Expectation::Ack => {
                    tracing::trace!(token = %token, "Command accepted, waiting for its event");
                    return None;
                }
                _ => Outcome::Resolved,
            };
            let token = token.clone();
            table.finish(&token, &outcome);
            return Some(token);
        }

        match event {
            Event::CommandAck { .. } => {
                tracing::debug!("Dropping untagged acknowledgement");
                None
            }
            Event::Error { device_id, message, .. } => {
                tracing::warn!(device_id = ?device_id, message = %message, "Untagged error event");
                None
            }
            Event::WateringStarted { .. } | Event::ModeChanged { .. } => {
                let token = table
                    .entries
                    .iter()
                    .filter(|(_, entry)| entry.sent && entry.matches(event))
                    .min_by_key(|(_, entry)| entry.seq)
                    .map(|(token, _)| token.clone())?;
                table.finish(&token, &Outcome::Resolved);
                Some(token)
            }
            _ => None,
        }
    }

    /// Fails every pending command.
    ///
    /// Returns the number of commands failed.
    pub(crate) fn fail_all(&self, outcome: &Outcome) -> usize {
        let entries: Vec<Entry> = self
            .inner
            .lock()
            .entries
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        let count = entries.len();
        for entry in entries {
            entry.finish(outcome);
        }
        count
    }

    /// Marks every pending command as unsent and returns their tokens in
    /// issue order.
    pub(crate) fn requeue(&self) -> Vec<CorrelationToken> {
        let mut table = self.inner.lock();
        let mut queued: Vec<(u64, CorrelationToken)> = table
            .entries
            .iter_mut()
            .map(|(token, entry)| {
                entry.sent = false;
                (entry.seq, token.clone())
            })
            .collect();
        queued.sort_unstable_by_key(|(seq, _)| *seq);
        queued.into_iter().map(|(_, token)| token).collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<PendingCommand> {
        let table = self.inner.lock();
        let mut commands: Vec<PendingCommand> = table
            .entries
            .iter()
            .map(|(token, entry)| PendingCommand {
                token: token.clone(),
                device_id: entry.command.device_id().cloned(),
                kind: entry.command.kind(),
                seq: entry.seq,
                issued_at: entry.issued_at,
                deadline: entry.deadline,
                sent: entry.sent,
                waiters: entry.waiters.len(),
            })
            .collect();
        commands.sort_unstable_by_key(|c| c.seq);
        commands
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn leave(&self, token: &CorrelationToken, waiter_id: u64) {
        let mut table = self.inner.lock();
        let Some(entry) = table.entries.get_mut(token) else {
            return;
        };
        entry.waiters.retain(|(id, _)| *id != waiter_id);
        if entry.waiters.is_empty() {
            tracing::debug!(token = %token, "Pending command cancelled");
            table.entries.remove(token);
        }
    }
}

/// A caller's claim on a pending command.
///
/// Dropping the ticket before the command resolves cancels the caller's
/// interest; the entry is released once no caller is left.
pub(crate) struct Ticket {
    table: PendingTable,
    token: CorrelationToken,
    waiter_id: u64,
    deadline: Instant,
    wait_ms: u64,
    created: bool,
    rx: oneshot::Receiver<Outcome>,
}

impl Ticket {
    pub(crate) fn token(&self) -> &CorrelationToken {
        &self.token
    }

    /// Returns `false` when the caller joined an identical pending command.
    pub(crate) fn is_new(&self) -> bool {
        self.created
    }

    /// Waits for the command to resolve or its deadline to pass.
    pub(crate) async fn wait(mut self) -> Result<(), Error> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome.into_result(),
            Ok(Err(_)) => Err(Error::Connection(TransportError::ChannelClosed(
                "pending command".to_string(),
            ))),
            Err(_) => {
                let outcome = Outcome::TimedOut(self.wait_ms);
                self.table.fail(&self.token, &outcome);
                tracing::debug!(token = %self.token, timeout_ms = self.wait_ms, "Pending command timed out");
                outcome.into_result()
            }
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.table.leave(&self.token, self.waiter_id);
    }
}
