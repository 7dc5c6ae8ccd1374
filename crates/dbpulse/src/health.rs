//! # Connection Health Monitor
//!
//! Background task that periodically pings the database through a
//! [`ConnectionHandle`] and publishes the outcome to a [`StatusRecord`].
//!
//! ## State machine
//!
//! ```text
//! Unknown ──► Connected ◄──────────────┐
//!    │           │                      │ attempt succeeded
//!    ▼           ▼                      │
//! Disconnected ──► Reconnecting ────────┘
//!    ▲                 │
//!    └─────────────────┘ all attempts failed (retries exhausted)
//! ```
//!
//! Every failed health check runs the reconnection protocol: up to
//! `max_retries` attempts of connect + ping, sleeping `attempt * step`
//! after each failure. When the budget is spent the monitor stays
//! `Disconnected` and ignores ticks until a [`ReconnectTrigger`] asks for a
//! manual check.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{DbPulseConfig, MonitorConfig};
use crate::connection::{ConnectionHandle, Connector};
use crate::error::DbPulseError;
use crate::status::{Status, StatusRecord};

/// How long [`HealthMonitor::stop`] waits for the loop before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Shortest tick period the monitor will run with.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

// ─── Manual trigger ─────────────────────────────────────────────────────

/// Sender half of the single-slot manual reconnect channel.
///
/// Cloneable and cheap. Requests never block: while one request is pending,
/// further requests are coalesced into it.
#[derive(Debug, Clone)]
pub struct ReconnectTrigger {
    tx: mpsc::Sender<()>,
}

impl ReconnectTrigger {
    /// Ask the monitor for an immediate out-of-cycle health check.
    ///
    /// Returns `true` if the request was queued, `false` if one was already
    /// pending or the monitor has stopped.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                tracing::debug!("Manual reconnect already pending; request coalesced");
                false
            }
            Err(TrySendError::Closed(())) => {
                tracing::debug!("Manual reconnect requested after monitor stopped");
                false
            }
        }
    }
}

fn manual_channel() -> (ReconnectTrigger, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (ReconnectTrigger { tx }, rx)
}

/// Resolves once shutdown has been requested. Never resolves if the sender
/// is gone without requesting it.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

// ─── Health check procedure ─────────────────────────────────────────────

/// One health check plus, on failure, the bounded reconnection protocol.
pub struct HealthChecker<C: Connector> {
    connection: Arc<ConnectionHandle<C>>,
    status: Arc<StatusRecord>,
    config: MonitorConfig,
    shutdown: watch::Receiver<bool>,
}

impl<C: Connector> HealthChecker<C> {
    pub fn new(
        connection: Arc<ConnectionHandle<C>>,
        status: Arc<StatusRecord>,
        config: &MonitorConfig,
    ) -> Self {
        // Without a monitor nothing can request shutdown; the closed
        // channel never reports one.
        let (_, shutdown) = watch::channel(false);
        Self {
            connection,
            status,
            config: config.clone(),
            shutdown,
        }
    }

    fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn interrupted(&self) -> bool {
        tracing::info!("Reconnection interrupted by shutdown");
        self.status.set_status(Status::Disconnected);
        false
    }

    /// Run one health check. Returns whether the connection ended healthy.
    ///
    /// `last_ping_time` is stamped whatever the outcome. A successful ping
    /// reports `Connected` and leaves `retries_exhausted` alone; a failed
    /// one always enters the reconnection protocol.
    pub async fn run(&self) -> bool {
        let previous = self.status.status();
        self.status.mark_ping();

        match self.connection.ping().await {
            Ok(()) => {
                if matches!(previous, Status::Disconnected | Status::Reconnecting) {
                    tracing::info!(previous = %previous, "Health check recovered");
                }
                self.status.set_status(Status::Connected);
                self.status.clear_last_error();
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Health check failed");
                self.status.set_last_error(Arc::new(e));
                self.status.set_status(Status::Disconnected);
                self.reconnect().await
            }
        }
    }

    /// Operator-requested check: reports `Reconnecting` immediately, runs
    /// the health check, and re-arms automatic checks if it succeeds.
    pub async fn run_manual(&self) -> bool {
        self.status.set_status(Status::Reconnecting);
        let healthy = self.run().await;
        if healthy {
            self.status.set_retries_exhausted(false);
        }
        healthy
    }

    /// Bounded reconnection protocol. Returns whether the connection was
    /// restored.
    ///
    /// A shutdown request ends the protocol before the next attempt or
    /// during a backoff wait, reporting `Disconnected`.
    async fn reconnect(&self) -> bool {
        let max_retries = self.config.max_retries;
        self.status.set_status(Status::Reconnecting);

        let mut last_error: Option<Arc<DbPulseError>> = None;

        for attempt in 1..=max_retries {
            if self.shutdown_requested() {
                return self.interrupted();
            }
            self.status.mark_reconnect();
            tracing::info!(attempt, max_retries, "Attempting reconnection");

            let outcome = match self.connection.connect().await {
                Ok(()) => self.connection.ping().await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    self.status.set_status(Status::Connected);
                    self.status.clear_last_error();
                    self.status.set_retries_exhausted(false);
                    tracing::info!(attempt, "Reconnection successful");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Reconnection attempt failed");
                    let e = Arc::new(e);
                    self.status.set_status(Status::Reconnecting);
                    self.status.set_last_error(Arc::clone(&e));
                    last_error = Some(e);
                }
            }

            let delay = self.config.backoff_for(attempt);
            tracing::debug!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Backing off before retry"
            );
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                biased;

                () = wait_for_shutdown(&mut shutdown) => return self.interrupted(),
                () = tokio::time::sleep(delay) => {}
            }
        }

        tracing::error!(attempts = max_retries, "All reconnection attempts exhausted");
        self.status.set_retries_exhausted(true);
        self.status.set_status(Status::Disconnected);
        if let Some(e) = last_error {
            self.status.set_last_error(e);
        }
        false
    }
}

// ─── Monitor task ───────────────────────────────────────────────────────

/// Background health monitor for one database connection.
///
/// The monitor task is the only writer of its [`StatusRecord`]. Readers get
/// the record through [`status`](Self::status) and request manual checks
/// through [`trigger`](Self::trigger).
pub struct HealthMonitor {
    handle: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    trigger: ReconnectTrigger,
    status: Arc<StatusRecord>,
    target: String,
}

impl HealthMonitor {
    /// Start monitoring with a fresh handle and record built from `config`.
    pub fn spawn<C: Connector>(connector: C, config: &DbPulseConfig) -> Self {
        let connection = Arc::new(ConnectionHandle::new(connector, &config.timeouts));
        Self::start(connection, Arc::new(StatusRecord::new()), &config.monitor)
    }

    /// Start the monitor task.
    ///
    /// The task opens the initial connection, then races the periodic tick
    /// against manual reconnect requests until [`stop`](Self::stop) is
    /// called or the monitor is dropped. An interval below one second is
    /// raised to one second. Must be called within a tokio runtime.
    pub fn start<C: Connector>(
        connection: Arc<ConnectionHandle<C>>,
        status: Arc<StatusRecord>,
        config: &MonitorConfig,
    ) -> Self {
        let (trigger, manual_rx) = manual_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let target = connection.target();

        let interval = config.interval().max(MIN_INTERVAL);
        if interval != config.interval() {
            tracing::warn!(
                interval_secs = config.interval_secs,
                "Health check interval too short; using 1s"
            );
        }

        let checker = HealthChecker::new(connection, Arc::clone(&status), config)
            .with_shutdown(shutdown_rx.clone());

        let handle = tokio::spawn(monitor_loop(checker, interval, manual_rx, shutdown_rx));

        Self {
            handle: Some(handle),
            shutdown,
            trigger,
            status,
            target,
        }
    }

    /// Shared status record published by this monitor.
    pub fn status(&self) -> Arc<StatusRecord> {
        Arc::clone(&self.status)
    }

    /// Receiver of status transitions.
    pub fn status_changes(&self) -> broadcast::Receiver<Status> {
        self.status.subscribe()
    }

    /// Handle for requesting manual health checks.
    pub fn trigger(&self) -> ReconnectTrigger {
        self.trigger.clone()
    }

    /// Redacted description of the monitored target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Stop the monitor and close the connection.
    ///
    /// A reconnection cycle in progress ends at its next backoff wait. An
    /// in-flight connect or ping is awaited up to a bounded time, after
    /// which the task is aborted.
    pub async fn stop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!("Health monitor did not stop in time; aborting");
                handle.abort();
            }
        }
    }

    /// Returns whether the monitor task is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn monitor_loop<C: Connector>(
    checker: HealthChecker<C>,
    interval: Duration,
    mut manual_rx: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = checker.connection.connect().await {
        tracing::warn!(
            error = %e,
            "Initial database connection failed; waiting for first health check"
        );
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = wait_for_shutdown(&mut shutdown) => break,
            Some(()) = manual_rx.recv() => {
                tracing::info!("Manual reconnect requested");
                checker.run_manual().await;
            }
            _ = ticker.tick() => {
                if checker.status.retries_exhausted() {
                    tracing::trace!("Retries exhausted; waiting for manual reconnect");
                    continue;
                }
                checker.run().await;
            }
        }
    }

    checker.connection.close().await;
    tracing::debug!("Health monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_coalesces_pending_requests() {
        let (trigger, mut rx) = manual_channel();

        assert!(trigger.request());
        assert!(!trigger.request());
        assert!(!trigger.clone().request());

        assert_eq!(rx.recv().await, Some(()));
        assert!(rx.try_recv().is_err());

        assert!(trigger.request());
    }

    #[tokio::test]
    async fn test_trigger_after_receiver_dropped() {
        let (trigger, rx) = manual_channel();
        drop(rx);
        assert!(!trigger.request());
    }
}
