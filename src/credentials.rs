//! Credential sets and the per-device-class credential store.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConnectError;

/// Device family a credential set applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Sector access points.
    Ap,
    /// Customer-premises equipment.
    Cpe,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Ap => write!(f, "ap"),
            DeviceClass::Cpe => write!(f, "cpe"),
        }
    }
}

/// Username plus primary and ordered fallback passwords.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CredentialSet {
    pub username: String,
    pub password: String,
    /// Tried in order after the primary password fails. Accepts a single
    /// string or a list when decoded.
    #[serde(default, deserialize_with = "one_or_many")]
    pub alt_passwords: Vec<String>,
}

impl CredentialSet {
    pub fn new(username: &str, password: &str, alt_passwords: Vec<String>) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            alt_passwords,
        }
    }

    /// Primary password followed by the alternates, in attempt order.
    pub fn attempt_order(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.password.as_str()).chain(self.alt_passwords.iter().map(String::as_str))
    }

    /// Number of connection attempts a full fallback walk makes.
    pub fn attempt_count(&self) -> usize {
        1 + self.alt_passwords.len()
    }
}

// Passwords never reach logs through `{:?}`.
impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("username", &self.username)
            .field("password", &fingerprint(&self.password))
            .field(
                "alt_passwords",
                &self
                    .alt_passwords
                    .iter()
                    .map(|p| fingerprint(p))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Short, non-reversible tag identifying a password in logs.
pub fn fingerprint(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    let hex = digest[..4]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    format!("sha256:{hex}")
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(p)) if p.is_empty() => Vec::new(),
        Some(OneOrMany::One(p)) => vec![p],
        Some(OneOrMany::Many(list)) => list,
    })
}

/// Credential sets keyed by device class, as stored in the credentials file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CredentialStore {
    sets: HashMap<DeviceClass, CredentialSet>,
}

impl CredentialStore {
    pub fn from_json(json: &str) -> Result<Self, ConnectError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConnectError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json(&text)
    }

    pub fn insert(&mut self, class: DeviceClass, set: CredentialSet) {
        self.sets.insert(class, set);
    }

    pub fn get(&self, class: DeviceClass) -> Result<&CredentialSet, ConnectError> {
        self.sets
            .get(&class)
            .ok_or_else(|| ConnectError::MissingCredentials(class.to_string()))
    }
}
