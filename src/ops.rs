//! Remote configuration primitives.
//!
//! Each operation performs one action on an open [`DeviceSession`]. Mutating
//! commands are skipped and logged as `would execute` when `dry_run` is set.
//! A non-zero exit status on a mutating command is logged and reported in
//! the returned [`StepStatus`], never raised; only transport failures come
//! back as `Err`.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ConnectError;
use crate::session::{DeviceSession, RemoteShell};
use crate::snapshot::{ConfigFile, ConfigSnapshot};

pub const REBOOT_COMMAND: &str = "reboot";

const MTU_KEY: &str = "ppp.1.mtu";
const MRU_KEY: &str = "ppp.1.mru";

static RADIO_PARAM_KEY: Lazy<Regex> = Lazy::new(|| match Regex::new(r"^[A-Za-z0-9_.]+$") {
    Ok(re) => re,
    Err(err) => panic!("invalid RADIO_PARAM_KEY regex: {err}"),
});

/// Outcome of one mutating command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    Failed { exit_status: u32, stderr: String },
    /// Skipped because of dry-run.
    DryRun,
}

/// Outcome of [`fix_pppoe_mtu`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MtuOutcome {
    AlreadyCorrect,
    Fixed {
        mtu_before: Option<String>,
        mru_before: Option<String>,
        rebooted: bool,
    },
}

/// Outcome of [`set_radio_params`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioOutcome {
    Unchanged,
    Applied {
        /// Full keys that were rewritten or added.
        changed: Vec<String>,
        rebooted: bool,
    },
}

/// Rewrites `radio(.1).countrycode=<old>` lines to `<new>`.
///
/// The expression is anchored to the whole line so an old code that is a
/// prefix of another code never matches it.
pub fn country_code_substitution(old_code: &str, new_code: &str, path: &str) -> String {
    format!(r#"sed -i "s/^\(radio\(\.1\)\?\.countrycode=\){old_code}$/\1{new_code}/" {path}"#)
}

pub fn country_code_grep(path: &str) -> String {
    format!(r"grep '^radio\(\.1\)\?\.countrycode' {path}")
}

pub fn radio_params_grep(path: &str) -> String {
    format!(r"grep '^radio\.1\.' {path}")
}

pub fn persist_command(path: &str) -> String {
    format!("cfgmtd -f {path} -w")
}

/// Replaces the whole value of `key` with `value`.
pub fn key_substitution(key: &str, value: &str, path: &str) -> String {
    let pattern = key.replace('.', r"\.");
    format!("sed -i 's/^{pattern}=.*/{key}={value}/' {path}")
}

async fn run_mutation<S: RemoteShell>(
    session: &mut DeviceSession<S>,
    command: &str,
    what: &str,
    dry_run: bool,
) -> Result<StepStatus, ConnectError> {
    let host = session.host();
    if dry_run {
        info!("[{}] DRY-RUN: would execute: {}", host, command);
        return Ok(StepStatus::DryRun);
    }
    let output = session.exec(command).await?;
    if output.success() {
        info!("[{}] {} succeeded", host, what);
        Ok(StepStatus::Done)
    } else {
        let stderr = output.stderr.trim().to_string();
        let failure = ConnectError::RemoteCommand {
            command: command.to_string(),
            exit_status: output.exit_status,
            stderr: stderr.clone(),
        };
        error!("[{}] {} failed: {}", host, what, failure);
        Ok(StepStatus::Failed {
            exit_status: output.exit_status,
            stderr,
        })
    }
}

/// Rewrites both country code keys from `old_code` to `new_code`.
pub async fn update_config<S: RemoteShell>(
    session: &mut DeviceSession<S>,
    old_code: &str,
    new_code: &str,
    path: &str,
    dry_run: bool,
) -> Result<StepStatus, ConnectError> {
    let command = country_code_substitution(old_code, new_code, path);
    run_mutation(session, &command, &format!("country code rewrite in {path}"), dry_run).await
}

/// Re-reads the country code lines and logs them. Never fails the caller.
pub async fn verify_update<S: RemoteShell>(
    session: &mut DeviceSession<S>,
    path: &str,
    dry_run: bool,
) -> Option<String> {
    observe(session, &country_code_grep(path), dry_run).await
}

async fn observe<S: RemoteShell>(
    session: &mut DeviceSession<S>,
    command: &str,
    dry_run: bool,
) -> Option<String> {
    let host = session.host();
    if dry_run {
        info!("[{}] DRY-RUN: would execute: {}", host, command);
        return None;
    }
    match session.exec(command).await {
        Ok(output) => {
            let lines = output.stdout.trim().to_string();
            info!("[{}] Verification: {}", host, lines);
            Some(lines)
        }
        Err(e) => {
            warn!("[{}] Verification could not run: {}", host, e);
            None
        }
    }
}

/// Commits the configuration file to flash.
pub async fn persist_changes<S: RemoteShell>(
    session: &mut DeviceSession<S>,
    path: &str,
    dry_run: bool,
) -> Result<StepStatus, ConnectError> {
    run_mutation(session, &persist_command(path), "cfgmtd flash write", dry_run).await
}

/// Issues a reboot without waiting for any acknowledgment.
pub async fn reboot_device<S: RemoteShell>(session: &mut DeviceSession<S>, dry_run: bool) {
    let host = session.host();
    if dry_run {
        info!("[{}] DRY-RUN: would execute: {}", host, REBOOT_COMMAND);
        return;
    }
    info!("[{}] Rebooting device...", host);
    if let Err(e) = session.exec_detached(REBOOT_COMMAND).await {
        debug!("[{}] reboot send error ignored: {}", host, e);
    }
}

/// Reads the current country code keys.
///
/// When no line matches, the device is assumed to run the licensed code and
/// [`ConfigSnapshot::licensed_default`] is returned.
pub async fn check_country_mode<S: RemoteShell>(
    session: &mut DeviceSession<S>,
    path: &str,
) -> Result<ConfigSnapshot, ConnectError> {
    let host = session.host();
    let output = session.exec(&country_code_grep(path)).await?;
    let snapshot = ConfigSnapshot::parse(&output.stdout);
    if snapshot.is_empty() {
        warn!(
            "[{}] No countrycode line in {}, assuming licensed",
            host, path
        );
        return Ok(ConfigSnapshot::licensed_default());
    }
    debug!("[{}] country mode: {}", host, snapshot);
    Ok(snapshot)
}

fn local_copy(work_dir: &Path, host: Ipv4Addr) -> PathBuf {
    work_dir.join(format!("system_{}.cfg", host.to_string().replace('.', "_")))
}

async fn fetch_config<S: RemoteShell>(
    session: &mut DeviceSession<S>,
    path: &str,
    local: &Path,
) -> Result<ConfigFile, ConnectError> {
    session.fetch_file(path, local).await?;
    let text = tokio::fs::read_to_string(local).await?;
    Ok(ConfigFile::parse(&text))
}

/// Brings `ppp.1.mtu` and `ppp.1.mru` to `target`.
///
/// The configuration file is fetched and inspected locally; when both values
/// already equal `target` nothing is sent. Otherwise both keys are rewritten,
/// the file persisted, and the device rebooted when `reboot` is set.
pub async fn fix_pppoe_mtu<S: RemoteShell>(
    session: &mut DeviceSession<S>,
    target: u32,
    path: &str,
    work_dir: &Path,
    dry_run: bool,
    reboot: bool,
) -> Result<MtuOutcome, ConnectError> {
    let host = session.host();
    let local = local_copy(work_dir, host);
    let fetched = fetch_config(session, path, &local).await;
    if let Err(e) = tokio::fs::remove_file(&local).await {
        debug!("[{}] could not remove {}: {}", host, local.display(), e);
    }
    let file = fetched?;

    let target = target.to_string();
    let mtu_before = file.get(MTU_KEY).map(str::to_string);
    let mru_before = file.get(MRU_KEY).map(str::to_string);

    if mtu_before.as_deref() == Some(target.as_str())
        && mru_before.as_deref() == Some(target.as_str())
    {
        info!("[{}] MTU and MRU already {}", host, target);
        return Ok(MtuOutcome::AlreadyCorrect);
    }

    info!(
        "[{}] Fixing PPPoE MTU/MRU (MTU: {}, MRU: {})",
        host,
        file.line(MTU_KEY).unwrap_or("N/A"),
        file.line(MRU_KEY).unwrap_or("N/A")
    );
    for key in [MTU_KEY, MRU_KEY] {
        let command = key_substitution(key, &target, path);
        run_mutation(session, &command, &format!("{key} rewrite"), dry_run).await?;
    }
    persist_changes(session, path, dry_run).await?;
    if reboot {
        reboot_device(session, dry_run).await;
    }

    Ok(MtuOutcome::Fixed {
        mtu_before,
        mru_before,
        rebooted: reboot,
    })
}

/// Checks `radio.1.*` parameter names and values before they reach a device.
pub fn validate_radio_params(params: &BTreeMap<String, String>) -> Result<(), ConnectError> {
    if params.is_empty() {
        return Err(ConnectError::InvalidConfig(
            "no radio parameters given".to_string(),
        ));
    }
    for (key, value) in params {
        if !RADIO_PARAM_KEY.is_match(key) {
            return Err(ConnectError::InvalidConfig(format!(
                "radio parameter '{key}' is not a plain key"
            )));
        }
        if value.contains(['\n', '\r']) || value.trim() != value {
            return Err(ConnectError::InvalidConfig(format!(
                "radio parameter '{key}' has a multi-line or padded value"
            )));
        }
    }
    Ok(())
}

/// Rewrites `radio.1.<key>=<value>` for every entry of `params`.
///
/// The file is fetched, edited locally, pushed back, verified and persisted.
/// Nothing is pushed when every key already holds its value.
pub async fn set_radio_params<S: RemoteShell>(
    session: &mut DeviceSession<S>,
    params: &BTreeMap<String, String>,
    path: &str,
    work_dir: &Path,
    dry_run: bool,
    reboot: bool,
) -> Result<RadioOutcome, ConnectError> {
    validate_radio_params(params)?;
    let host = session.host();
    let local = local_copy(work_dir, host);

    let result = apply_radio_params(session, params, path, &local, dry_run, reboot).await;
    if let Err(e) = tokio::fs::remove_file(&local).await {
        debug!("[{}] could not remove {}: {}", host, local.display(), e);
    }
    result
}

async fn apply_radio_params<S: RemoteShell>(
    session: &mut DeviceSession<S>,
    params: &BTreeMap<String, String>,
    path: &str,
    local: &Path,
    dry_run: bool,
    reboot: bool,
) -> Result<RadioOutcome, ConnectError> {
    let host = session.host();
    let mut file = fetch_config(session, path, local).await?;
    let changed = params
        .iter()
        .filter_map(|(key, value)| {
            let full_key = format!("radio.1.{key}");
            file.set(&full_key, value).then_some(full_key)
        })
        .collect::<Vec<_>>();

    if changed.is_empty() {
        info!("[{}] Radio parameters already applied", host);
        return Ok(RadioOutcome::Unchanged);
    }

    info!("[{}] Rewriting {}", host, changed.join(", "));
    tokio::fs::write(local, file.render()).await?;
    if dry_run {
        info!("[{}] DRY-RUN: would upload edited {}", host, path);
    } else {
        session.push_file(local, path).await?;
    }
    observe(session, &radio_params_grep(path), dry_run).await;
    persist_changes(session, path, dry_run).await?;
    if reboot {
        reboot_device(session, dry_run).await;
    }
    Ok(RadioOutcome::Applied {
        changed,
        rebooted: reboot,
    })
}
