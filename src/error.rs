use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the honeypot core.
#[derive(Error, Debug)]
pub enum HoneypotError {
    /// Host key could not be read or parsed
    #[error("failed to load host key {path}: {source}")]
    HostKey {
        path: PathBuf,
        #[source]
        source: russh::keys::Error,
    },

    /// Listen address is not usable
    #[error("invalid listen address: {0}")]
    InvalidAddress(String),

    /// Network binding failed
    #[error("failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Log sink could not be opened
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Pseudo-terminal allocation or resize failed
    #[error("pty error: {0}")]
    Pty(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for honeypot operations
pub type HoneypotResult<T> = Result<T, HoneypotError>;

impl HoneypotError {
    pub fn pty(message: impl ToString) -> Self {
        Self::Pty(message.to_string())
    }
}
