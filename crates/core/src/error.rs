//! Crate-wide error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ab_protocol::ProtocolError),

    /// Distinct from dispatch failures: the registry said the daemon was
    /// alive but the connect failed, so the liveness check was stale.
    #[error("failed to connect to daemon for session '{session}': {source}")]
    Connect {
        session: String,
        #[source]
        source: std::io::Error,
    },

    /// Fatal to daemon startup; the daemon must not report itself started.
    #[error("daemon startup failed: {0}")]
    Startup(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("timeout after {ms}ms waiting for {what}")]
    Timeout { ms: u64, what: String },

    #[error("session '{0}' has no running daemon")]
    NotRunning(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
