//! In-memory device fleet standing in for SSH in integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use rwisp::config::RunConfig;
use rwisp::credentials::CredentialSet;
use rwisp::error::ConnectError;
use rwisp::probe::Probe;
use rwisp::session::{Connector, ExecOutput, RemoteShell};
use rwisp::snapshot::ConfigFile;

pub const LICENSED: &str = include_str!("../fixtures/system_licensed.cfg");
pub const OLD_CODE: &str = include_str!("../fixtures/system_old_code.cfg");
pub const NEW_CODE: &str = include_str!("../fixtures/system_new_code.cfg");
pub const MIXED_CODE: &str = include_str!("../fixtures/system_mixed_code.cfg");

static COUNTRY_SED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"=\\\)(\w+)\$/\\1(\w+)/").expect("country sed regex"));
static KEY_SED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"s/\^[^=]+=\.\*/([^=]+)=([^/]+)/").expect("key sed regex"));

pub fn host(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

/// Run configuration for `511 -> 32` with three passwords to walk.
pub fn run_config(work_dir: &Path) -> RunConfig {
    let credentials = CredentialSet::new(
        "ubnt",
        "first",
        vec!["second".to_string(), "third".to_string()],
    );
    let mut config = RunConfig::new(credentials, "511", "32");
    config.work_dir = Some(work_dir.to_path_buf());
    config
}

/// Scripted behaviour of one fake device.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub password: String,
    pub config: String,
    /// Commands starting with this prefix exit with the given status.
    pub failing: Option<(String, u32)>,
    /// Commands starting with this prefix break the transport.
    pub broken: Option<String>,
    /// Commands starting with this prefix panic inside the shell.
    pub panicking: Option<String>,
    /// Delay applied to every command.
    pub hold: Duration,
}

impl FakeDevice {
    pub fn new(password: &str, config: &str) -> Self {
        Self {
            password: password.to_string(),
            config: config.to_string(),
            failing: None,
            broken: None,
            panicking: None,
            hold: Duration::ZERO,
        }
    }

    pub fn failing(mut self, prefix: &str, exit_status: u32) -> Self {
        self.failing = Some((prefix.to_string(), exit_status));
        self
    }

    pub fn broken(mut self, prefix: &str) -> Self {
        self.broken = Some(prefix.to_string());
        self
    }

    pub fn panicking(mut self, prefix: &str) -> Self {
        self.panicking = Some(prefix.to_string());
        self
    }

    pub fn hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }
}

#[derive(Debug, Default)]
struct FleetState {
    devices: HashMap<Ipv4Addr, FakeDevice>,
    attempts: Vec<(Ipv4Addr, String)>,
    commands: Vec<(Ipv4Addr, String)>,
    open: usize,
    peak: usize,
}

/// Shared handle to every fake device, their logs, and a concurrency gauge.
#[derive(Debug, Clone, Default)]
pub struct FakeFleet {
    state: Arc<Mutex<FleetState>>,
}

impl FakeFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, host: Ipv4Addr, device: FakeDevice) -> Self {
        self.lock().devices.insert(host, device);
        self
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().expect("fleet lock")
    }

    /// Passwords tried against `host`, in order.
    pub fn attempts(&self, host: Ipv4Addr) -> Vec<String> {
        self.lock()
            .attempts
            .iter()
            .filter(|(h, _)| *h == host)
            .map(|(_, pw)| pw.clone())
            .collect()
    }

    /// Commands that reached `host`, in order.
    pub fn commands(&self, host: Ipv4Addr) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter(|(h, _)| *h == host)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    pub fn config(&self, host: Ipv4Addr) -> ConfigFile {
        ConfigFile::parse(&self.lock().devices[&host].config)
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().open
    }

    pub fn peak_sessions(&self) -> usize {
        self.lock().peak
    }
}

impl Connector for FakeFleet {
    type Shell = FakeShell;

    async fn connect(
        &self,
        host: Ipv4Addr,
        _username: &str,
        password: &str,
    ) -> Result<FakeShell, ConnectError> {
        let mut state = self.lock();
        state.attempts.push((host, password.to_string()));
        let Some(device) = state.devices.get(&host) else {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no device").into());
        };
        if device.password != password {
            return Err(ConnectError::Ssh2Error(async_ssh2_tokio::Error::PasswordWrong));
        }
        state.open += 1;
        state.peak = state.peak.max(state.open);
        Ok(FakeShell {
            host,
            fleet: self.clone(),
            open: true,
        })
    }
}

pub struct FakeShell {
    host: Ipv4Addr,
    fleet: FakeFleet,
    open: bool,
}

impl FakeShell {
    fn run(&self, command: &str) -> Result<ExecOutput, ConnectError> {
        let mut state = self.fleet.lock();
        state.commands.push((self.host, command.to_string()));
        let device = state
            .devices
            .get_mut(&self.host)
            .expect("device for open shell");

        if device
            .broken
            .as_deref()
            .is_some_and(|prefix| command.starts_with(prefix))
        {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link dropped").into());
        }
        if let Some((prefix, exit_status)) = &device.failing {
            if command.starts_with(prefix.as_str()) {
                return Ok(ExecOutput {
                    exit_status: *exit_status,
                    stdout: String::new(),
                    stderr: "scripted failure".to_string(),
                });
            }
        }

        let stdout = if command.starts_with(r"grep '^radio\(\.1\)\?\.countrycode'") {
            grep(&device.config, |line| {
                line.starts_with("radio.countrycode=") || line.starts_with("radio.1.countrycode=")
            })
        } else if command.starts_with(r"grep '^radio\.1\.'") {
            grep(&device.config, |line| line.starts_with("radio.1."))
        } else if let Some(caps) = COUNTRY_SED.captures(command) {
            let mut file = ConfigFile::parse(&device.config);
            for key in ["radio.countrycode", "radio.1.countrycode"] {
                if file.get(key) == Some(&caps[1]) {
                    file.set(key, &caps[2]);
                }
            }
            device.config = file.render();
            String::new()
        } else if let Some(caps) = KEY_SED.captures(command) {
            let mut file = ConfigFile::parse(&device.config);
            if file.get(&caps[1]).is_some() {
                file.set(&caps[1], &caps[2]);
            }
            device.config = file.render();
            String::new()
        } else {
            String::new()
        };

        Ok(ExecOutput {
            exit_status: 0,
            stdout,
            stderr: String::new(),
        })
    }

    /// Delay for `command` and whether it should panic. The fleet lock is
    /// released before either takes effect so a panic never poisons it.
    fn behaviour(&self, command: &str) -> (Duration, bool) {
        let state = self.fleet.lock();
        let device = &state.devices[&self.host];
        let panics = device
            .panicking
            .as_deref()
            .is_some_and(|prefix| command.starts_with(prefix));
        (device.hold, panics)
    }
}

fn grep(config: &str, keep: impl Fn(&str) -> bool) -> String {
    config
        .lines()
        .filter(|line| keep(line))
        .map(|line| format!("{line}\n"))
        .collect()
}

impl RemoteShell for FakeShell {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, ConnectError> {
        let (hold, panics) = self.behaviour(command);
        tokio::time::sleep(hold).await;
        if panics {
            panic!("device {} returned garbage for `{command}`", self.host);
        }
        self.run(command)
    }

    async fn exec_detached(&mut self, command: &str) -> Result<(), ConnectError> {
        self.run(command).map(|_| ())
    }

    async fn fetch_file(&mut self, _remote: &str, local: &Path) -> Result<(), ConnectError> {
        let config = self.fleet.lock().devices[&self.host].config.clone();
        tokio::fs::write(local, config).await?;
        Ok(())
    }

    async fn push_file(&mut self, local: &Path, _remote: &str) -> Result<(), ConnectError> {
        let text = tokio::fs::read_to_string(local).await?;
        if let Some(device) = self.fleet.lock().devices.get_mut(&self.host) {
            device.config = text;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        if std::mem::take(&mut self.open) {
            self.fleet.lock().open -= 1;
        }
        Ok(())
    }
}

/// Reachability decided by a fixed set of down hosts.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbe {
    down: HashSet<Ipv4Addr>,
}

impl ScriptedProbe {
    pub fn down(hosts: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        Self {
            down: hosts.into_iter().collect(),
        }
    }
}

impl Probe for ScriptedProbe {
    async fn is_reachable(&self, host: Ipv4Addr) -> bool {
        !self.down.contains(&host)
    }
}
