//! Error types for device sessions, remote operations and run configuration.
//!
//! Every fallible path in the crate returns [`ConnectError`]. Errors never
//! cross a host boundary: the device protocol turns them into a per-host
//! outcome instead of aborting the batch.

use thiserror::Error;

/// Errors that can occur while connecting to and configuring a device.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The connection attempt did not finish within the configured budget.
    #[error("connect timeout after {0} seconds")]
    ConnectTimeout(u64),

    /// Every credential (primary and alternates) was rejected or failed.
    #[error("all {0} credential attempts failed")]
    CredentialsExhausted(usize),

    /// The session was already closed when an operation was requested.
    #[error("session closed")]
    SessionClosed,

    /// A host or CIDR entry could not be parsed.
    #[error("invalid host entry '{0}'")]
    InvalidHost(String),

    /// The run configuration contains a value that cannot be used safely.
    ///
    /// Country codes, MTU targets and radio keys are interpolated into remote
    /// `sed` expressions, so they must be plain tokens.
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    /// No credentials are registered for the requested device class.
    #[error("no credentials for device class {0}")]
    MissingCredentials(String),

    /// A remote command reported a failure that the caller chose to surface.
    #[error("remote command '{command}' failed with exit status {exit_status}: {stderr}")]
    RemoteCommand {
        command: String,
        exit_status: u32,
        stderr: String,
    },

    /// Internal bookkeeping failure (poisoned lock, encoding error).
    #[error("internal error: {0}")]
    InternalServerError(String),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Local filesystem or process error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Credential or recording JSON could not be decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConnectError {
    /// Whether a new attempt with the same credential may succeed.
    ///
    /// Timeouts and local/transport I/O hiccups are transient. Authentication
    /// rejections and configuration errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConnectError::ConnectTimeout(_) => true,
            ConnectError::Io(e) => is_transient_io(e),
            ConnectError::RusshError(russh::Error::IO(e)) => is_transient_io(e),
            ConnectError::Ssh2Error(
                async_ssh2_tokio::Error::SshError(russh::Error::IO(e))
                | async_ssh2_tokio::Error::IoError(e),
            ) => is_transient_io(e),
            // Authentication rejections and everything else are final.
            _ => false,
        }
    }
}

fn is_transient_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::Interrupted
    )
}
