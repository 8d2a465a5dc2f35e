//! Run configuration and SSH algorithm profiles.
//!
//! Fleet devices range from current firmware to builds shipping a decade-old
//! dropbear, so algorithm lists come in three levels (see
//! [`SecurityLevel`]). [`RunConfig`] is built once per run and
//! shared read-only by every host task.

use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

use async_ssh2_tokio::ServerCheckMethod;
use once_cell::sync::Lazy;
use regex::Regex;
use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac, Preferred};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialSet;
use crate::error::ConnectError;

/// Country code the devices fall back to when no `countrycode` line exists.
pub const LICENSED_COUNTRY_CODE: &str = "511";

/// Default device configuration file edited in place by every operation.
pub const DEFAULT_REMOTE_CONFIG_PATH: &str = "/tmp/system.cfg";

/// Default PPPoE MTU/MRU target.
pub const DEFAULT_MTU_TARGET: u32 = 1492;

/// Default worker pool size.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Values interpolated into remote shell commands must match this.
static SAFE_TOKEN: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"^[A-Za-z0-9_]+$") {
        Ok(re) => re,
        Err(err) => panic!("invalid SAFE_TOKEN regex: {err}"),
    });

static SAFE_PATH: Lazy<Regex> = Lazy::new(|| match Regex::new(r"^/[A-Za-z0-9_./-]+$") {
    Ok(re) => re,
    Err(err) => panic!("invalid SAFE_PATH regex: {err}"),
});

pub const SECURE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
];

pub const SECURE_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

pub const SECURE_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
];

pub const SECURE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

pub const BALANCED_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA1,
];

pub const BALANCED_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_128_CBC,
];

pub const BALANCED_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1,
];

pub const BALANCED_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
];

/// Modern algorithms first, then the Diffie-Hellman groups, CBC ciphers and
/// SHA-1 MACs that older airOS dropbear builds are limited to. Unencrypted
/// `none`/`clear` entries are never offered.
pub const LEGACY_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA1,
    kex::DH_GEX_SHA1,
    kex::DH_G1_SHA1,
];

pub const LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_192_CBC,
    cipher::AES_128_CBC,
];

pub const LEGACY_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

pub const LEGACY_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Dsa,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Ed25519,
    Algorithm::Rsa { hash: None },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
];

pub const DEFAULT_COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

/// Algorithm policy for SSH negotiation.
///
/// The client's order decides which mutually supported algorithm wins, so
/// every level lists its strongest entries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Modern algorithms only, host keys checked against known_hosts.
    Secure,
    /// Adds SHA-1 MACs and CBC ciphers, host keys still checked.
    Balanced,
    /// Everything old dropbear builds need. Host keys are not pinned because
    /// fleet devices are re-imaged often.
    LegacyCompatible,
}

/// The four algorithm lists behind one [`SecurityLevel`].
#[derive(Debug, Clone, Copy)]
pub struct AlgorithmProfile {
    pub kex: &'static [kex::Name],
    pub key: &'static [Algorithm],
    pub cipher: &'static [cipher::Name],
    pub mac: &'static [mac::Name],
}

impl AlgorithmProfile {
    pub fn preferred(&self) -> Preferred {
        Preferred {
            kex: Cow::Borrowed(self.kex),
            key: Cow::Borrowed(self.key),
            cipher: Cow::Borrowed(self.cipher),
            mac: Cow::Borrowed(self.mac),
            compression: Cow::Borrowed(DEFAULT_COMPRESSION_ALGORITHMS),
        }
    }
}

impl SecurityLevel {
    pub fn profile(self) -> AlgorithmProfile {
        match self {
            SecurityLevel::Secure => AlgorithmProfile {
                kex: SECURE_KEX_ORDER,
                key: SECURE_KEY_TYPES,
                cipher: SECURE_CIPHERS,
                mac: SECURE_MAC_ALGORITHMS,
            },
            SecurityLevel::Balanced => AlgorithmProfile {
                kex: BALANCED_KEX_ORDER,
                key: BALANCED_KEY_TYPES,
                cipher: BALANCED_CIPHERS,
                mac: BALANCED_MAC_ALGORITHMS,
            },
            SecurityLevel::LegacyCompatible => AlgorithmProfile {
                kex: LEGACY_KEX_ORDER,
                key: LEGACY_KEY_TYPES,
                cipher: LEGACY_CIPHERS,
                mac: LEGACY_MAC_ALGORITHMS,
            },
        }
    }

    /// Host key verification matching the level.
    pub fn server_check(self) -> ServerCheckMethod {
        match self {
            SecurityLevel::Secure | SecurityLevel::Balanced => {
                ServerCheckMethod::DefaultKnownHostsFile
            }
            SecurityLevel::LegacyCompatible => ServerCheckMethod::NoCheck,
        }
    }
}

/// Per-attempt connection budget.
///
/// The transport takes a single deadline, so the three phases are summed
/// into one bound for each credential attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionTimeouts {
    /// TCP connect timeout (seconds).
    pub connect_secs: u64,
    /// SSH banner/handshake timeout (seconds).
    pub banner_secs: u64,
    /// Authentication timeout (seconds).
    pub auth_secs: u64,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            banner_secs: 5,
            auth_secs: 5,
        }
    }
}

impl SessionTimeouts {
    /// Upper bound for a single credential attempt.
    pub fn attempt_budget(&self) -> Duration {
        Duration::from_secs(self.connect_secs + self.banner_secs + self.auth_secs)
    }
}

/// Explicit retry strategy applied by composition (see [`crate::retry`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    /// Pause between attempts (milliseconds).
    pub delay_ms: u64,
}

impl RetryPolicy {
    /// A single attempt, no retry.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
        }
    }

    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_mtu_target() -> u32 {
    DEFAULT_MTU_TARGET
}

fn default_remote_config_path() -> String {
    DEFAULT_REMOTE_CONFIG_PATH.to_string()
}

fn default_security() -> SecurityLevel {
    SecurityLevel::LegacyCompatible
}

/// Immutable configuration for one batch run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunConfig {
    /// Credentials shared by every session of the run.
    pub credentials: CredentialSet,
    /// Country code expected on devices that still need the change.
    pub old_code: String,
    /// Country code to apply.
    pub new_code: String,
    /// Reboot devices after persisting a change.
    #[serde(default)]
    pub reboot: bool,
    /// Log intended actions without touching any device.
    #[serde(default)]
    pub dry_run: bool,
    /// Upper bound of concurrently processed hosts.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// PPPoE MTU/MRU target value.
    #[serde(default = "default_mtu_target")]
    pub mtu_target: u32,
    /// Device configuration file edited by the operations.
    #[serde(default = "default_remote_config_path")]
    pub remote_config_path: String,
    /// SSH algorithm profile.
    #[serde(default = "default_security")]
    pub security: SecurityLevel,
    #[serde(default)]
    pub timeouts: SessionTimeouts,
    /// Retry strategy applied to each credential attempt.
    #[serde(default)]
    pub connect_retry: RetryPolicy,
    /// Local directory for fetched configuration files (system temp dir if unset).
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

impl RunConfig {
    /// Creates a configuration with defaults for everything but the
    /// credentials and the country code pair.
    pub fn new(credentials: CredentialSet, old_code: &str, new_code: &str) -> Self {
        Self {
            credentials,
            old_code: old_code.to_string(),
            new_code: new_code.to_string(),
            reboot: false,
            dry_run: false,
            max_workers: DEFAULT_MAX_WORKERS,
            mtu_target: DEFAULT_MTU_TARGET,
            remote_config_path: DEFAULT_REMOTE_CONFIG_PATH.to_string(),
            security: default_security(),
            timeouts: SessionTimeouts::default(),
            connect_retry: RetryPolicy::once(),
            work_dir: None,
        }
    }

    /// Checks cross-field invariants before any host is contacted.
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.credentials.username.trim().is_empty() {
            return Err(ConnectError::InvalidConfig("username is empty".to_string()));
        }
        if self.max_workers == 0 {
            return Err(ConnectError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        for (name, code) in [("old_code", &self.old_code), ("new_code", &self.new_code)] {
            if !SAFE_TOKEN.is_match(code) {
                return Err(ConnectError::InvalidConfig(format!(
                    "{name} '{code}' must be alphanumeric"
                )));
            }
        }
        if !(576..=9000).contains(&self.mtu_target) {
            return Err(ConnectError::InvalidConfig(format!(
                "mtu_target {} out of range 576..=9000",
                self.mtu_target
            )));
        }
        if !SAFE_PATH.is_match(&self.remote_config_path) {
            return Err(ConnectError::InvalidConfig(format!(
                "remote_config_path '{}' is not a plain absolute path",
                self.remote_config_path
            )));
        }
        Ok(())
    }

    /// Directory used for fetched configuration files.
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
