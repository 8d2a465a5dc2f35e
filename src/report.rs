//! Per-host results and the categorized run summary.

use std::fmt;
use std::net::Ipv4Addr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::snapshot::CountryMode;

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Terminal state of one host's run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// Probe failed.
    Unreachable,
    /// Every credential was rejected or timed out.
    ConnectFailed,
    NoChangeNeeded,
    Updated { rebooted: bool },
    /// Read-only check result.
    Checked(CountryMode),
    /// A step failed after the session was opened, or the task panicked.
    Error(String),
}

/// Exactly one of these is produced for every dispatched host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OperationResult {
    pub host: Ipv4Addr,
    pub outcome: Outcome,
    /// Human-readable detail shown in summaries.
    pub detail: String,
}

impl OperationResult {
    pub fn new(host: Ipv4Addr, outcome: Outcome, detail: impl Into<String>) -> Self {
        Self {
            host,
            outcome,
            detail: detail.into(),
        }
    }

    pub fn error(host: Ipv4Addr, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            host,
            outcome: Outcome::Error(detail.clone()),
            detail,
        }
    }

    pub fn category(&self) -> Category {
        match &self.outcome {
            Outcome::Updated { .. } => Category::Updated,
            Outcome::NoChangeNeeded => Category::NoChangeNeeded,
            Outcome::Checked(CountryMode::MatchesOld) => Category::MatchesOld,
            Outcome::Checked(CountryMode::MatchesNew) => Category::MatchesNew,
            Outcome::Checked(CountryMode::Inconsistent) => Category::Inconsistent,
            Outcome::Checked(CountryMode::Unknown) => Category::Unknown,
            Outcome::Unreachable => Category::Unreachable,
            Outcome::ConnectFailed => Category::ConnectFailed,
            Outcome::Error(_) => Category::Error,
        }
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<16} -> {}", self.host.to_string(), self.detail)
    }
}

/// Summary buckets, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Updated,
    NoChangeNeeded,
    MatchesOld,
    MatchesNew,
    Inconsistent,
    Unknown,
    Unreachable,
    ConnectFailed,
    Error,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Updated,
        Category::NoChangeNeeded,
        Category::MatchesOld,
        Category::MatchesNew,
        Category::Inconsistent,
        Category::Unknown,
        Category::Unreachable,
        Category::ConnectFailed,
        Category::Error,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Category::Updated => "Updated",
            Category::NoChangeNeeded => "No change needed",
            Category::MatchesOld => "Old country code",
            Category::MatchesNew => "New country code",
            Category::Inconsistent => "Inconsistent values",
            Category::Unknown => "Unknown country code",
            Category::Unreachable => "Unreachable",
            Category::ConnectFailed => "Connection failed",
            Category::Error => "Errors",
        }
    }
}

/// Results grouped by [`Category`]; completion order is kept inside a group.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    groups: Vec<(Category, Vec<OperationResult>)>,
}

impl Summary {
    pub fn from_results(results: &[OperationResult]) -> Self {
        let groups = Category::ALL
            .iter()
            .map(|&category| {
                let members = results
                    .iter()
                    .filter(|r| r.category() == category)
                    .cloned()
                    .collect::<Vec<_>>();
                (category, members)
            })
            .filter(|(_, members)| !members.is_empty())
            .collect();
        Self { groups }
    }

    pub fn count(&self, category: Category) -> usize {
        self.group(category).len()
    }

    pub fn group(&self, category: Category) -> &[OperationResult] {
        self.groups
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, members)| members.as_slice())
            .unwrap_or(&[])
    }

    pub fn total(&self) -> usize {
        self.groups.iter().map(|(_, members)| members.len()).sum()
    }

    /// Non-empty categories in report order.
    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.groups.iter().map(|(c, _)| *c)
    }

    /// Renders a header per non-empty category followed by its host lines.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.total() + self.groups.len() + 1);
        lines.push(format!("Total hosts: {}", self.total()));
        for (category, members) in &self.groups {
            lines.push(format!("{} ({})", category.title(), members.len()));
            lines.extend(members.iter().map(|r| format!("  {r}")));
        }
        lines
    }
}

/// Splits `lines` into pages of at most `page_size` lines.
pub fn paginate(lines: &[String], page_size: usize) -> Vec<Vec<String>> {
    lines
        .chunks(page_size.max(1))
        .map(<[String]>::to_vec)
        .collect()
}
