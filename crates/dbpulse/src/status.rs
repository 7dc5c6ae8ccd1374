//! # Status Record
//!
//! [`StatusRecord`] is the state the health monitor publishes. The monitor
//! task is its only writer; any number of observers may read it at any
//! frequency. Every accessor takes the lock just long enough to copy one
//! small value, so readers are never held up by a reconnect in progress.
//!
//! Observers that want every transition instead of polling can
//! [`subscribe`](StatusRecord::subscribe) to status changes.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::sync::broadcast;

use crate::error::DbPulseError;

/// Health of the monitored connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// No health check has completed yet.
    #[default]
    Unknown,
    /// The last health check or reconnection attempt succeeded.
    Connected,
    /// The connection failed and is not being recovered right now.
    Disconnected,
    /// A reconnection attempt or manual check is in progress.
    Reconnecting,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Unknown => "unknown",
            Status::Connected => "connected",
            Status::Disconnected => "disconnected",
            Status::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

/// Point-in-time copy of every [`StatusRecord`] field.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub status: Status,
    #[serde(serialize_with = "serialize_error")]
    pub last_error: Option<Arc<DbPulseError>>,
    pub last_ping_time: Option<DateTime<Utc>>,
    pub last_reconnect_time: Option<DateTime<Utc>>,
    pub retries_exhausted: bool,
}

impl StatusSnapshot {
    /// Whether an operator should be offered a manual reconnect.
    pub fn needs_manual_reconnect(&self) -> bool {
        self.status == Status::Disconnected && self.retries_exhausted
    }
}

impl PartialEq for StatusSnapshot {
    fn eq(&self, other: &Self) -> bool {
        let same_error = match (&self.last_error, &other.last_error) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a.to_string() == b.to_string(),
            _ => false,
        };
        self.status == other.status
            && same_error
            && self.last_ping_time == other.last_ping_time
            && self.last_reconnect_time == other.last_reconnect_time
            && self.retries_exhausted == other.retries_exhausted
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<Arc<DbPulseError>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Capacity of the status change channel. Slow subscribers lag rather
/// than block the monitor.
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Thread-safe published connection state.
///
/// Shared as `Arc<StatusRecord>` between the monitor and its observers.
#[derive(Debug)]
pub struct StatusRecord {
    inner: RwLock<StatusSnapshot>,
    changes: broadcast::Sender<Status>,
}

impl Default for StatusRecord {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(StatusSnapshot::default()),
            changes,
        }
    }
}

impl StatusRecord {
    /// Create a record in the initial `Unknown` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every status value that differs from the one before it.
    pub fn subscribe(&self) -> broadcast::Receiver<Status> {
        self.changes.subscribe()
    }

    // A panicking writer cannot leave a field half-written, so a poisoned
    // lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, StatusSnapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StatusSnapshot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// All fields, read under a single lock acquisition.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.read().clone()
    }

    pub fn status(&self) -> Status {
        self.read().status
    }

    pub fn set_status(&self, status: Status) {
        let previous = std::mem::replace(&mut self.write().status, status);
        if previous != status {
            let _ = self.changes.send(status);
        }
    }

    pub fn last_error(&self) -> Option<Arc<DbPulseError>> {
        self.read().last_error.clone()
    }

    pub fn set_last_error(&self, error: Arc<DbPulseError>) {
        self.write().last_error = Some(error);
    }

    pub fn clear_last_error(&self) {
        self.write().last_error = None;
    }

    /// Time of the last health check, successful or not.
    pub fn last_ping_time(&self) -> Option<DateTime<Utc>> {
        self.read().last_ping_time
    }

    /// Stamp `last_ping_time` with the current time.
    pub fn mark_ping(&self) {
        self.write().last_ping_time = Some(Utc::now());
    }

    /// Time of the last reconnection attempt.
    pub fn last_reconnect_time(&self) -> Option<DateTime<Utc>> {
        self.read().last_reconnect_time
    }

    /// Stamp `last_reconnect_time` with the current time.
    pub fn mark_reconnect(&self) {
        self.write().last_reconnect_time = Some(Utc::now());
    }

    /// Whether the automatic retry budget of the current failure episode is spent.
    pub fn retries_exhausted(&self) -> bool {
        self.read().retries_exhausted
    }

    pub fn set_retries_exhausted(&self, exhausted: bool) {
        self.write().retries_exhausted = exhausted;
    }
}
