//! # Error Types
//!
//! Every failure the monitor can observe maps to one [`DbPulseError`]
//! variant. None of them are fatal: the health monitor stores the most
//! recent one in the [`StatusRecord`](crate::status::StatusRecord) and keeps
//! running.

use thiserror::Error;

/// Convenient Result alias for dbpulse operations.
pub type DbPulseResult<T> = std::result::Result<T, DbPulseError>;

/// All errors produced by the connection handle, connectors and config loader.
#[derive(Error, Debug)]
pub enum DbPulseError {
    // ─── Connection ─────────────────────────────────────────────────
    /// Failed to establish a connection (target unreachable, auth failure, ...).
    ///
    /// `target` is always the redacted form of the connection string.
    #[error("Failed to connect to {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    /// The liveness check failed on an established connection.
    #[error("Ping failed: {reason}")]
    PingFailed { reason: String },

    /// A ping was attempted while no connection is owned.
    #[error("No database connection")]
    NoConnection,

    // ─── Timeout ────────────────────────────────────────────────────
    /// Connect or ping did not finish within the configured timeout.
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    // ─── Config ─────────────────────────────────────────────────────
    /// Configuration file error (missing, malformed, or invalid values).
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },
}

// ─── From impls for external error types ────────────────────────────────

#[cfg(feature = "config-toml")]
impl From<toml::de::Error> for DbPulseError {
    fn from(err: toml::de::Error) -> Self {
        DbPulseError::ConfigError {
            reason: err.to_string(),
        }
    }
}
