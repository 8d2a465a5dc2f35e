//! Line-oriented `key=value` device configuration.
//!
//! [`ConfigSnapshot`] is a read-only view over a few keys extracted from
//! command output. [`ConfigFile`] keeps every line of a fetched file so it can
//! be edited and written back without reordering.

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::LICENSED_COUNTRY_CODE;

pub const COUNTRY_CODE_KEY: &str = "radio.countrycode";
pub const RADIO1_COUNTRY_CODE_KEY: &str = "radio.1.countrycode";

/// Where a device's country code stands relative to a requested change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CountryMode {
    /// Every key holds the old code.
    MatchesOld,
    /// Every key holds the new code.
    MatchesNew,
    /// Keys disagree with each other.
    Inconsistent,
    /// Keys agree on a code that is neither, or nothing was read.
    Unknown,
}

/// Current values of a set of configuration keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    values: BTreeMap<String, String>,
    assumed: bool,
}

impl ConfigSnapshot {
    /// Parses `key=value` lines, ignoring lines without `=`.
    pub fn parse(text: &str) -> Self {
        let values = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        Self {
            values,
            assumed: false,
        }
    }

    /// Snapshot used when a device has no country code line at all.
    ///
    /// Such devices run the licensed profile, so the value is assumed rather
    /// than read; [`ConfigSnapshot::is_assumed`] tells the two apart.
    pub fn licensed_default() -> Self {
        let mut values = BTreeMap::new();
        values.insert(
            COUNTRY_CODE_KEY.to_string(),
            LICENSED_COUNTRY_CODE.to_string(),
        );
        Self {
            values,
            assumed: true,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_assumed(&self) -> bool {
        self.assumed
    }

    /// True when the snapshot is non-empty and every value equals `value`.
    pub fn all_equal(&self, value: &str) -> bool {
        !self.values.is_empty() && self.values.values().all(|v| v == value)
    }

    pub fn classify(&self, old_code: &str, new_code: &str) -> CountryMode {
        let mut distinct = self.values.values().collect::<Vec<_>>();
        distinct.sort();
        distinct.dedup();

        match distinct.as_slice() {
            [] => CountryMode::Unknown,
            [only] if only.as_str() == new_code => CountryMode::MatchesNew,
            [only] if only.as_str() == old_code => CountryMode::MatchesOld,
            [_] => CountryMode::Unknown,
            _ => CountryMode::Inconsistent,
        }
    }
}

impl fmt::Display for ConfigSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return write!(f, "(no values)");
        }
        let rendered = self
            .values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        if self.assumed {
            write!(f, "{rendered} (assumed)")
        } else {
            write!(f, "{rendered}")
        }
    }
}

/// A whole configuration file, edited line by line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    lines: Vec<String>,
}

impl ConfigFile {
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// First line for `key`, verbatim.
    pub fn line(&self, key: &str) -> Option<&str> {
        self.position(key).map(|idx| self.lines[idx].as_str())
    }

    /// Value of the first line for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.line(key)
            .and_then(|line| line.split_once('='))
            .map(|(_, value)| value.trim())
    }

    /// Sets `key` to `value`, replacing the first matching line or appending
    /// one. Returns whether the file changed.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        if self.get(key) == Some(value) {
            return false;
        }
        let line = format!("{key}={value}");
        match self.position(key) {
            Some(idx) => self.lines[idx] = line,
            None => self.lines.push(line),
        }
        true
    }

    pub fn render(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.lines.iter().position(|line| {
            line.split_once('=')
                .is_some_and(|(k, _)| k.trim() == key)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines() {
        let snapshot = ConfigSnapshot::parse("radio.countrycode=32\nradio.1.countrycode=32\nnoise\n");
        assert_eq!(snapshot.get(COUNTRY_CODE_KEY), Some("32"));
        assert_eq!(snapshot.get(RADIO1_COUNTRY_CODE_KEY), Some("32"));
        assert_eq!(snapshot.values().len(), 2);
        assert!(!snapshot.is_assumed());
    }

    #[test]
    fn licensed_default_is_marked_assumed() {
        let snapshot = ConfigSnapshot::licensed_default();
        assert_eq!(snapshot.get(COUNTRY_CODE_KEY), Some("511"));
        assert_eq!(snapshot.values().len(), 1);
        assert!(snapshot.is_assumed());
        assert_eq!(snapshot.to_string(), "radio.countrycode=511 (assumed)");
    }

    #[test]
    fn classify_covers_every_mode() {
        let old = ConfigSnapshot::parse("radio.countrycode=511\nradio.1.countrycode=511");
        assert_eq!(old.classify("511", "32"), CountryMode::MatchesOld);

        let new = ConfigSnapshot::parse("radio.countrycode=32\nradio.1.countrycode=32");
        assert_eq!(new.classify("511", "32"), CountryMode::MatchesNew);

        let mixed = ConfigSnapshot::parse("radio.countrycode=511\nradio.1.countrycode=32");
        assert_eq!(mixed.classify("511", "32"), CountryMode::Inconsistent);

        let other = ConfigSnapshot::parse("radio.countrycode=840");
        assert_eq!(other.classify("511", "32"), CountryMode::Unknown);

        assert_eq!(
            ConfigSnapshot::default().classify("511", "32"),
            CountryMode::Unknown
        );
    }

    #[test]
    fn all_equal_requires_values() {
        assert!(!ConfigSnapshot::default().all_equal("32"));
        let mixed = ConfigSnapshot::parse("radio.countrycode=32\nradio.1.countrycode=511");
        assert!(!mixed.all_equal("32"));
    }

    #[test]
    fn config_file_edits_in_place_and_appends() {
        let mut file = ConfigFile::parse("radio.1.chanbw=20\nradio.1.txpower=10\nwireless.1.ssid=x\n");
        assert!(file.set("radio.1.txpower", "18"));
        assert!(!file.set("radio.1.chanbw", "20"));
        assert!(file.set("radio.1.dfs", "enabled"));
        assert_eq!(
            file.render(),
            "radio.1.chanbw=20\nradio.1.txpower=18\nwireless.1.ssid=x\nradio.1.dfs=enabled\n"
        );
    }

    #[test]
    fn config_file_matches_whole_keys() {
        let file = ConfigFile::parse("ppp.1.mtu_extra=1\nppp.1.mtu=1500\n");
        assert_eq!(file.get("ppp.1.mtu"), Some("1500"));
        assert_eq!(file.line("ppp.1.mtu"), Some("ppp.1.mtu=1500"));
        assert_eq!(file.get("ppp.1.mru"), None);
    }
}
