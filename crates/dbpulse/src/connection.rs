//! # Connection Handle
//!
//! [`ConnectionHandle`] owns at most one live connection produced by a
//! [`Connector`]. Connect, ping and close all run under one async mutex, so
//! a reconnect can never overlap a ping on the same handle.
//!
//! The database specifics live behind two small traits:
//!
//! - [`Connector`] establishes a new [`Connection`] against a fixed target.
//! - [`Connection`] answers liveness checks and releases itself on close.
//!
//! [`PgConnector`](crate::postgres::PgConnector) is the PostgreSQL
//! implementation; tests plug in scripted ones.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::TimeoutConfig;
use crate::error::{DbPulseError, DbPulseResult};

/// Establishes connections to one fixed target.
pub trait Connector: Send + Sync + 'static {
    /// The live connection type produced by [`connect`](Self::connect).
    type Connection: Connection;

    /// Open a new connection to the target.
    fn connect(&self) -> impl Future<Output = DbPulseResult<Self::Connection>> + Send;

    /// Human-readable target description with credentials redacted.
    fn describe(&self) -> String;
}

/// One live connection.
pub trait Connection: Send + 'static {
    /// Issue a liveness check.
    fn ping(&mut self) -> impl Future<Output = DbPulseResult<()>> + Send;

    /// Release the connection and any background resources it owns.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Lifecycle wrapper around a single connection.
pub struct ConnectionHandle<C: Connector> {
    connector: C,
    connection: Mutex<Option<C::Connection>>,
    connect_timeout: Duration,
    ping_timeout: Duration,
}

impl<C: Connector> ConnectionHandle<C> {
    /// Create an empty handle. No connection is opened until [`connect`](Self::connect).
    pub fn new(connector: C, timeouts: &TimeoutConfig) -> Self {
        Self {
            connector,
            connection: Mutex::new(None),
            connect_timeout: timeouts.connect_timeout(),
            ping_timeout: timeouts.ping_timeout(),
        }
    }

    /// Replace the owned connection with a freshly established one.
    ///
    /// Any existing connection is closed first. On failure the handle is
    /// left empty.
    ///
    /// # Errors
    /// Returns the connector's establishment error, or
    /// [`DbPulseError::Timeout`] if the connect timeout expires.
    pub async fn connect(&self) -> DbPulseResult<()> {
        let mut slot = self.connection.lock().await;

        if let Some(old) = slot.take() {
            tracing::debug!("Closing previous connection before reconnecting");
            old.close().await;
        }

        let connection = tokio::time::timeout(self.connect_timeout, self.connector.connect())
            .await
            .map_err(|_| DbPulseError::Timeout {
                seconds: self.connect_timeout.as_secs(),
            })??;

        tracing::info!(target_db = %self.connector.describe(), "Connected to database");
        *slot = Some(connection);
        Ok(())
    }

    /// Probe the owned connection.
    ///
    /// # Errors
    /// Returns [`DbPulseError::NoConnection`] when the handle is empty,
    /// [`DbPulseError::Timeout`] when the check hangs, otherwise the check's
    /// own result.
    pub async fn ping(&self) -> DbPulseResult<()> {
        let mut slot = self.connection.lock().await;
        let connection = slot.as_mut().ok_or(DbPulseError::NoConnection)?;

        tokio::time::timeout(self.ping_timeout, connection.ping())
            .await
            .map_err(|_| DbPulseError::Timeout {
                seconds: self.ping_timeout.as_secs(),
            })?
    }

    /// Release the owned connection, if any. Safe to call repeatedly.
    pub async fn close(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.close().await;
            tracing::debug!("Database connection closed");
        }
    }

    /// Whether a connection is currently owned.
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Redacted description of the connection target.
    pub fn target(&self) -> String {
        self.connector.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        opened: AtomicU32,
        closed: AtomicU32,
        pings: AtomicU32,
    }

    struct CountingConnector {
        counters: Arc<Counters>,
        fail_connect: bool,
        hang_ping: bool,
    }

    struct CountingConnection {
        counters: Arc<Counters>,
        hang_ping: bool,
    }

    impl Connector for CountingConnector {
        type Connection = CountingConnection;

        async fn connect(&self) -> DbPulseResult<CountingConnection> {
            if self.fail_connect {
                return Err(DbPulseError::ConnectionFailed {
                    target: self.describe(),
                    reason: "refused".into(),
                });
            }
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(CountingConnection {
                counters: Arc::clone(&self.counters),
                hang_ping: self.hang_ping,
            })
        }

        fn describe(&self) -> String {
            "mock://db".into()
        }
    }

    impl Connection for CountingConnection {
        async fn ping(&mut self) -> DbPulseResult<()> {
            self.counters.pings.fetch_add(1, Ordering::SeqCst);
            if self.hang_ping {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn close(self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_handle(
        fail_connect: bool,
        hang_ping: bool,
    ) -> (ConnectionHandle<CountingConnector>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let connector = CountingConnector {
            counters: Arc::clone(&counters),
            fail_connect,
            hang_ping,
        };
        (ConnectionHandle::new(connector, &TimeoutConfig::default()), counters)
    }

    #[tokio::test]
    async fn test_ping_without_connection() {
        let (handle, counters) = counting_handle(false, false);
        let err = handle.ping().await.unwrap_err();
        assert!(matches!(err, DbPulseError::NoConnection));
        assert_eq!(counters.pings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_then_ping() {
        let (handle, counters) = counting_handle(false, false);
        handle.connect().await.unwrap();
        assert!(handle.is_connected().await);
        handle.ping().await.unwrap();
        assert_eq!(counters.pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_closes_previous_connection() {
        let (handle, counters) = counting_handle(false, false);
        handle.connect().await.unwrap();
        handle.connect().await.unwrap();
        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_handle_empty() {
        let (handle, _) = counting_handle(true, false);
        let err = handle.connect().await.unwrap_err();
        assert!(matches!(err, DbPulseError::ConnectionFailed { .. }));
        assert!(!handle.is_connected().await);
        assert!(matches!(handle.ping().await.unwrap_err(), DbPulseError::NoConnection));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (handle, counters) = counting_handle(false, false);
        handle.close().await;
        handle.connect().await.unwrap();
        handle.close().await;
        handle.close().await;
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert!(!handle.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_ping_times_out() {
        let (handle, _) = counting_handle(false, true);
        handle.connect().await.unwrap();
        let err = handle.ping().await.unwrap_err();
        assert!(matches!(err, DbPulseError::Timeout { seconds: 5 }));
        // the connection is kept; the reconnection protocol replaces it
        assert!(handle.is_connected().await);
    }
}
