//! Command bus: push fan-out plus the legacy single-slot poll mailbox.
//!
//! Push delivery is a `tokio::sync::broadcast` channel. Each subscriber has
//! its own receiver, so a slow display lags (and is told to resync) without
//! holding anyone else up. Nothing is retried or persisted.
//!
//! The poll slot is a narrower capability kept for displays that cannot hold
//! a socket open: it remembers only the most recent command, hands it out at
//! most once, and forgets it after the TTL.

use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

use crate::clock::PeriodSlot;
use crate::command::Command;
use crate::event_buffer::{BufferStats, LogBuffer, LogEntry, LogLevel, PollError, PollResult};
use crate::selection::Selector;
use crate::shuffle::ShuffleSeed;

/// Why the persisted state changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub revision: u64,
    pub reason: String,
    pub reshuffled: bool,
    pub shuffle_seed: ShuffleSeed,
    pub selector: Selector,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    Command {
        #[serde(flatten)]
        command: Command,
        issued_at: DateTime<Utc>,
    },
    StateChanged(StateChange),
    LogAppended(LogEntry),
    PeriodChanged { from: PeriodSlot, to: PeriodSlot },
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub channel_capacity: usize,
    pub log_capacity: usize,
    pub command_ttl: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            log_capacity: 500,
            command_ttl: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingCommand {
    command: Command,
    issued_at: Instant,
}

/// A new subscriber's receiver plus the log backlog to replay first.
pub struct Subscription {
    pub events: broadcast::Receiver<BusEvent>,
    pub replay: Vec<LogEntry>,
}

pub struct CommandBus {
    tx: broadcast::Sender<BusEvent>,
    pending: Mutex<Option<PendingCommand>>,
    command_ttl: Duration,
    log: RwLock<LogBuffer>,
}

impl CommandBus {
    pub fn new(config: BusConfig) -> Self {
        let (tx, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            tx,
            pending: Mutex::new(None),
            command_ttl: config.command_ttl,
            log: RwLock::new(LogBuffer::new(config.log_capacity)),
        }
    }

    /// Subscribe to live events, with up to `replay` recent log entries.
    ///
    /// The receiver is created before the backlog is copied, so an entry
    /// appended in between may show up in both; `seq` tells them apart.
    pub fn subscribe(&self, replay: usize) -> Subscription {
        let events = self.tx.subscribe();
        let replay = self
            .log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tail(replay);
        Subscription { events, replay }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Broadcast to whoever is listening. Returns how many receivers got it.
    pub fn publish(&self, event: BusEvent) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                debug!("no subscribers for bus event");
                0
            }
        }
    }

    /// Push a command to subscribers and park it in the poll slot.
    pub fn send_command(&self, command: Command) -> usize {
        {
            let mut slot = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            *slot = Some(PendingCommand {
                command: command.clone(),
                issued_at: Instant::now(),
            });
        }
        self.publish(BusEvent::Command {
            command,
            issued_at: Utc::now(),
        })
    }

    /// Take the parked command if it is still fresh. Expired commands are
    /// dropped silently.
    pub fn take_pending(&self) -> Option<Command> {
        let mut slot = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = slot.take()?;
        if pending.issued_at.elapsed() > self.command_ttl {
            debug!(command = pending.command.name(), "poll command expired");
            return None;
        }
        Some(pending.command)
    }

    pub fn append_log(&self, level: LogLevel, message: impl Into<String>, source: Option<String>) -> LogEntry {
        let entry = self
            .log
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(level, message, source);
        self.publish(BusEvent::LogAppended(entry.clone()));
        entry
    }

    pub fn poll_log(&self, cursor: Option<u64>, limit: usize) -> Result<PollResult, PollError> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .poll(cursor, limit)
    }

    pub fn clear_log(&self) -> usize {
        self.log
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear()
    }

    pub fn log_stats(&self) -> BufferStats {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .stats()
    }
}
