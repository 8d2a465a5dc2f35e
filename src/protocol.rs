//! Per-host state machine.
//!
//! Every host runs probe, connect, read, decide, apply, verify, persist and
//! reboot in order, stopping at the first terminal state. The session is
//! closed on every path once it has been opened, including a panicking step.
//! Errors and panics after connect become [`Outcome::Error`] instead of
//! escaping the host's task.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use log::{error, info, warn};

use crate::batch::panic_message;
use crate::config::RunConfig;
use crate::error::ConnectError;
use crate::ops::{self, MtuOutcome, RadioOutcome};
use crate::probe::Probe;
use crate::report::{OperationResult, Outcome};
use crate::session::{open_session, Connector, DeviceSession, RemoteShell, SessionRecorder};
use crate::snapshot::CountryMode;

/// What to do with each host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Read and classify the country code; never mutates.
    CheckCountry,
    /// Rewrite the country code from `old_code` to `new_code`.
    UpdateCountry,
    /// Bring the PPPoE MTU and MRU to the configured target.
    FixPppoeMtu,
    /// Rewrite `radio.1.<key>` parameters.
    SetRadioParams(BTreeMap<String, String>),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CheckCountry => write!(f, "country check"),
            Operation::UpdateCountry => write!(f, "country update"),
            Operation::FixPppoeMtu => write!(f, "PPPoE MTU fix"),
            Operation::SetRadioParams(_) => write!(f, "radio parameter update"),
        }
    }
}

/// Runs one [`Operation`] against one host with a shared run configuration.
pub struct DeviceRunner<C, P> {
    connector: C,
    probe: P,
    config: Arc<RunConfig>,
    recorder: Option<SessionRecorder>,
}

impl<C: Connector, P: Probe> DeviceRunner<C, P> {
    pub fn new(connector: C, probe: P, config: Arc<RunConfig>) -> Self {
        Self {
            connector,
            probe,
            config,
            recorder: None,
        }
    }

    /// Records every session this runner opens.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs `operation` on `host` to a terminal state. Never fails.
    pub async fn run(&self, host: Ipv4Addr, operation: &Operation) -> OperationResult {
        if !self.probe.is_reachable(host).await {
            warn!("[{}] Host unreachable", host);
            return OperationResult::new(host, Outcome::Unreachable, "host unreachable");
        }

        let Some(mut session) =
            open_session(&self.connector, host, &self.config, self.recorder.clone()).await
        else {
            return OperationResult::new(
                host,
                Outcome::ConnectFailed,
                format!(
                    "connection failed after {} credential(s)",
                    self.config.credentials.attempt_count()
                ),
            );
        };

        let result = AssertUnwindSafe(self.drive(&mut session, operation))
            .catch_unwind()
            .await;
        session.close().await;

        match result {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("[{}] {} failed: {}", host, operation, e);
                OperationResult::error(host, format!("{operation} failed: {e}"))
            }
            Err(payload) => {
                let message = panic_message(payload);
                error!("[{}] {} panicked: {}", host, operation, message);
                OperationResult::error(host, format!("{operation} panicked: {message}"))
            }
        }
    }

    async fn drive<S: RemoteShell>(
        &self,
        session: &mut DeviceSession<S>,
        operation: &Operation,
    ) -> Result<OperationResult, ConnectError> {
        match operation {
            Operation::CheckCountry => self.check_country(session).await,
            Operation::UpdateCountry => self.update_country(session).await,
            Operation::FixPppoeMtu => self.fix_mtu(session).await,
            Operation::SetRadioParams(params) => self.set_radio(session, params).await,
        }
    }

    async fn check_country<S: RemoteShell>(
        &self,
        session: &mut DeviceSession<S>,
    ) -> Result<OperationResult, ConnectError> {
        let host = session.host();
        let cfg = &self.config;
        let snapshot = ops::check_country_mode(session, &cfg.remote_config_path).await?;
        let mode = snapshot.classify(&cfg.old_code, &cfg.new_code);
        match mode {
            CountryMode::Inconsistent => warn!("[{}] Inconsistent country codes: {}", host, snapshot),
            _ => info!("[{}] {:?}: {}", host, mode, snapshot),
        }
        Ok(OperationResult::new(
            host,
            Outcome::Checked(mode),
            snapshot.to_string(),
        ))
    }

    async fn update_country<S: RemoteShell>(
        &self,
        session: &mut DeviceSession<S>,
    ) -> Result<OperationResult, ConnectError> {
        let host = session.host();
        let cfg = &self.config;
        let path = cfg.remote_config_path.as_str();

        let snapshot = ops::check_country_mode(session, path).await?;
        if snapshot.all_equal(&cfg.new_code) {
            info!("[{}] Already at country code {}", host, cfg.new_code);
            return Ok(OperationResult::new(
                host,
                Outcome::NoChangeNeeded,
                format!("already at {}", cfg.new_code),
            ));
        }

        info!(
            "[{}] Updating country code {} -> {} (current: {})",
            host, cfg.old_code, cfg.new_code, snapshot
        );
        ops::update_config(session, &cfg.old_code, &cfg.new_code, path, cfg.dry_run).await?;
        ops::verify_update(session, path, cfg.dry_run).await;
        ops::persist_changes(session, path, cfg.dry_run).await?;
        if cfg.reboot {
            ops::reboot_device(session, cfg.dry_run).await;
        }

        Ok(OperationResult::new(
            host,
            Outcome::Updated {
                rebooted: cfg.reboot,
            },
            with_reboot(
                format!("country code {} -> {}", cfg.old_code, cfg.new_code),
                cfg.reboot,
            ),
        ))
    }

    async fn fix_mtu<S: RemoteShell>(
        &self,
        session: &mut DeviceSession<S>,
    ) -> Result<OperationResult, ConnectError> {
        let host = session.host();
        let cfg = &self.config;
        let outcome = ops::fix_pppoe_mtu(
            session,
            cfg.mtu_target,
            &cfg.remote_config_path,
            &cfg.work_dir(),
            cfg.dry_run,
            cfg.reboot,
        )
        .await?;

        Ok(match outcome {
            MtuOutcome::AlreadyCorrect => OperationResult::new(
                host,
                Outcome::NoChangeNeeded,
                format!("MTU/MRU already {}", cfg.mtu_target),
            ),
            MtuOutcome::Fixed {
                mtu_before,
                mru_before,
                rebooted,
            } => OperationResult::new(
                host,
                Outcome::Updated { rebooted },
                with_reboot(
                    format!(
                        "MTU {} / MRU {} -> {}",
                        mtu_before.as_deref().unwrap_or("N/A"),
                        mru_before.as_deref().unwrap_or("N/A"),
                        cfg.mtu_target
                    ),
                    rebooted,
                ),
            ),
        })
    }

    async fn set_radio<S: RemoteShell>(
        &self,
        session: &mut DeviceSession<S>,
        params: &BTreeMap<String, String>,
    ) -> Result<OperationResult, ConnectError> {
        let host = session.host();
        let cfg = &self.config;
        let outcome = ops::set_radio_params(
            session,
            params,
            &cfg.remote_config_path,
            &cfg.work_dir(),
            cfg.dry_run,
            cfg.reboot,
        )
        .await?;

        Ok(match outcome {
            RadioOutcome::Unchanged => OperationResult::new(
                host,
                Outcome::NoChangeNeeded,
                "radio parameters already applied",
            ),
            RadioOutcome::Applied { changed, rebooted } => OperationResult::new(
                host,
                Outcome::Updated { rebooted },
                with_reboot(format!("set {}", changed.join(", ")), rebooted),
            ),
        })
    }
}

fn with_reboot(detail: String, rebooted: bool) -> String {
    if rebooted {
        format!("{detail} (rebooted)")
    } else {
        detail
    }
}
