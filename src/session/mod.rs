//! Device sessions: authenticated command channels to one host.
//!
//! A [`DeviceSession`] is either live (an open SSH transport) or simulated
//! (dry-run: nothing leaves the machine, every command reports success with
//! empty output). Both expose the same capability so the remote operations
//! never branch on the mode.
//!
//! # Main Components
//!
//! - [`Connector`] / [`RemoteShell`] - transport seams, implemented over SSH by
//!   [`SshConnector`] / [`SshShell`]
//! - [`open_session`] - primary + fallback credential walk
//! - [`DeviceSession`] - the per-host session owned by one task
//! - [`SessionRecorder`] - optional audit trail shared by a run

use std::future::Future;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use log::{debug, error, info, trace};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{RunConfig, SecurityLevel, SessionTimeouts};
use crate::credentials::fingerprint;
use crate::error::ConnectError;
use crate::retry::with_retry;

pub use connect::open_session;
pub use recording::{SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder};

/// Result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_status: u32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// An authenticated remote command channel.
pub trait RemoteShell: Send {
    /// Runs `command` and waits for its exit status and output.
    fn exec(&mut self, command: &str)
    -> impl Future<Output = Result<ExecOutput, ConnectError>> + Send;

    /// Sends `command` without waiting for it to finish.
    fn exec_detached(&mut self, command: &str)
    -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Copies a remote file to `local`.
    fn fetch_file(
        &mut self,
        remote: &str,
        local: &Path,
    ) -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Copies `local` over a remote file.
    fn push_file(
        &mut self,
        local: &Path,
        remote: &str,
    ) -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Releases the transport.
    fn close(&mut self) -> impl Future<Output = Result<(), ConnectError>> + Send;
}

/// Opens [`RemoteShell`]s with a single username/password pair.
pub trait Connector: Send + Sync {
    type Shell: RemoteShell + 'static;

    fn connect(
        &self,
        host: Ipv4Addr,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<Self::Shell, ConnectError>> + Send;
}

/// Live or simulated transport behind a [`DeviceSession`].
pub enum SessionMode<S> {
    Live(S),
    Simulated,
}

/// Session bound to one host, owned by the task handling that host.
///
/// [`DeviceSession::close`] is idempotent. A session dropped without being
/// closed (a panicking task) releases its transport through the shell's own
/// `Drop`.
pub struct DeviceSession<S> {
    host: Ipv4Addr,
    mode: SessionMode<S>,
    closed: bool,
    recorder: Option<SessionRecorder>,
}

impl<S: RemoteShell> DeviceSession<S> {
    pub fn live(host: Ipv4Addr, shell: S, recorder: Option<SessionRecorder>) -> Self {
        Self::with_mode(host, SessionMode::Live(shell), recorder)
    }

    pub fn simulated(host: Ipv4Addr, recorder: Option<SessionRecorder>) -> Self {
        Self::with_mode(host, SessionMode::Simulated, recorder)
    }

    fn with_mode(host: Ipv4Addr, mode: SessionMode<S>, recorder: Option<SessionRecorder>) -> Self {
        if let Some(recorder) = recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::SessionOpened {
                host,
                simulated: matches!(mode, SessionMode::Simulated),
            });
        }
        Self {
            host,
            mode,
            closed: false,
            recorder,
        }
    }

    pub fn host(&self) -> Ipv4Addr {
        self.host
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.mode, SessionMode::Simulated)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn record(&self, event: SessionEvent) {
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(event);
        }
    }

    /// Runs a command. Simulated sessions log it and report success.
    pub async fn exec(&mut self, command: &str) -> Result<ExecOutput, ConnectError> {
        if self.closed {
            return Err(ConnectError::SessionClosed);
        }
        let host = self.host;
        match &mut self.mode {
            SessionMode::Live(shell) => {
                debug!("[{}] exec: {}", host, command);
                let output = shell.exec(command).await?;
                self.record(SessionEvent::CommandIssued {
                    host,
                    command: command.to_string(),
                    exit_status: Some(output.exit_status),
                });
                Ok(output)
            }
            SessionMode::Simulated => {
                info!("[{}] DRY-RUN: would execute: {}", host, command);
                self.record(SessionEvent::CommandSimulated {
                    host,
                    command: command.to_string(),
                });
                Ok(ExecOutput::default())
            }
        }
    }

    /// Sends a command without awaiting its outcome.
    pub async fn exec_detached(&mut self, command: &str) -> Result<(), ConnectError> {
        if self.closed {
            return Err(ConnectError::SessionClosed);
        }
        let host = self.host;
        match &mut self.mode {
            SessionMode::Live(shell) => {
                shell.exec_detached(command).await?;
                self.record(SessionEvent::CommandIssued {
                    host,
                    command: command.to_string(),
                    exit_status: None,
                });
            }
            SessionMode::Simulated => {
                info!("[{}] DRY-RUN: would execute: {}", host, command);
                self.record(SessionEvent::CommandSimulated {
                    host,
                    command: command.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Copies a remote file locally. A simulated session writes an empty file.
    pub async fn fetch_file(&mut self, remote: &str, local: &Path) -> Result<(), ConnectError> {
        if self.closed {
            return Err(ConnectError::SessionClosed);
        }
        let host = self.host;
        let simulated = match &mut self.mode {
            SessionMode::Live(shell) => {
                shell.fetch_file(remote, local).await?;
                false
            }
            SessionMode::Simulated => {
                info!("[{}] DRY-RUN: would download {}", host, remote);
                tokio::fs::write(local, b"").await?;
                true
            }
        };
        self.record(SessionEvent::FileFetched {
            host,
            remote_path: remote.to_string(),
            simulated,
        });
        Ok(())
    }

    /// Copies a local file over a remote one. Simulated sessions only log.
    pub async fn push_file(&mut self, local: &Path, remote: &str) -> Result<(), ConnectError> {
        if self.closed {
            return Err(ConnectError::SessionClosed);
        }
        let host = self.host;
        let simulated = match &mut self.mode {
            SessionMode::Live(shell) => {
                shell.push_file(local, remote).await?;
                false
            }
            SessionMode::Simulated => {
                info!("[{}] DRY-RUN: would upload {}", host, remote);
                true
            }
        };
        self.record(SessionEvent::FilePushed {
            host,
            remote_path: remote.to_string(),
            simulated,
        });
        Ok(())
    }

    /// Releases the transport. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match &mut self.mode {
            SessionMode::Live(shell) => {
                if let Err(e) = shell.close().await {
                    debug!("[{}] Error closing session: {}", self.host, e);
                }
            }
            SessionMode::Simulated => {
                info!("[{}] DRY-RUN: session closed", self.host);
            }
        }
        self.record(SessionEvent::SessionClosed { host: self.host });
    }
}

/// Opens SSH sessions with the run's algorithm profile and timeouts.
#[derive(Debug, Clone)]
pub struct SshConnector {
    port: u16,
    level: SecurityLevel,
    server_check: ServerCheckMethod,
    timeouts: SessionTimeouts,
}

/// SSH command channel to one device.
pub struct SshShell {
    host: Ipv4Addr,
    client: Option<Client>,
}

mod client;
mod connect;
mod recording;
