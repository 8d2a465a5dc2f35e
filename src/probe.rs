//! Reachability checks run before a session is opened.

use std::future::Future;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, trace};
use tokio::process::Command;

/// Boolean liveness check for one host.
pub trait Probe: Send + Sync {
    fn is_reachable(&self, host: Ipv4Addr) -> impl Future<Output = bool> + Send;
}

/// Single-packet ICMP echo through the system `ping` binary.
#[derive(Debug, Clone)]
pub struct PingProbe {
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn args(&self, host: Ipv4Addr) -> Vec<String> {
        if cfg!(windows) {
            vec![
                "-n".to_string(),
                "1".to_string(),
                "-w".to_string(),
                self.timeout.as_millis().to_string(),
                host.to_string(),
            ]
        } else {
            vec![
                "-c".to_string(),
                "1".to_string(),
                "-W".to_string(),
                self.timeout.as_secs().max(1).to_string(),
                host.to_string(),
            ]
        }
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Probe for PingProbe {
    async fn is_reachable(&self, host: Ipv4Addr) -> bool {
        let args = self.args(host);
        trace!("ping {}", args.join(" "));
        match Command::new("ping")
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(e) => {
                debug!("[{}] ping could not be spawned: {}", host, e);
                false
            }
        }
    }
}

/// Treats every host as reachable. Useful when ICMP is filtered.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeReachable;

impl Probe for AssumeReachable {
    async fn is_reachable(&self, _host: Ipv4Addr) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_sends_a_single_packet() {
        let args = PingProbe::default().args(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(args[1], "1");
        assert_eq!(args.last().map(String::as_str), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn assume_reachable_is_always_true() {
        assert!(AssumeReachable.is_reachable(Ipv4Addr::LOCALHOST).await);
    }
}
