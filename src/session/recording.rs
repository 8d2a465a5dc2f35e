use super::*;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Connection attempts and session open/close only.
    KeyEventsOnly,
    /// Key events plus every command and file transfer.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectAttempt {
        host: Ipv4Addr,
        /// 0 for the primary password, n for the n-th alternate.
        attempt: usize,
        password_fingerprint: String,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
    SessionOpened {
        host: Ipv4Addr,
        simulated: bool,
    },
    CommandIssued {
        host: Ipv4Addr,
        command: String,
        /// `None` for detached commands.
        #[serde(default)]
        exit_status: Option<u32>,
    },
    CommandSimulated {
        host: Ipv4Addr,
        command: String,
    },
    FileFetched {
        host: Ipv4Addr,
        remote_path: String,
        simulated: bool,
    },
    FilePushed {
        host: Ipv4Addr,
        remote_path: String,
        simulated: bool,
    },
    SessionClosed {
        host: Ipv4Addr,
    },
}

impl SessionEvent {
    pub fn host(&self) -> Ipv4Addr {
        match self {
            SessionEvent::ConnectAttempt { host, .. }
            | SessionEvent::SessionOpened { host, .. }
            | SessionEvent::CommandIssued { host, .. }
            | SessionEvent::CommandSimulated { host, .. }
            | SessionEvent::FileFetched { host, .. }
            | SessionEvent::FilePushed { host, .. }
            | SessionEvent::SessionClosed { host } => *host,
        }
    }

    fn is_key_event(&self) -> bool {
        matches!(
            self,
            SessionEvent::ConnectAttempt { .. }
                | SessionEvent::SessionOpened { .. }
                | SessionEvent::SessionClosed { .. }
        )
    }
}

/// In-memory audit trail, cheap to clone and shared by all sessions of a run.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current recording level.
    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record an event if the level admits it.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConnectError> {
        match self.level {
            SessionRecordLevel::Off => return Ok(()),
            SessionRecordLevel::KeyEventsOnly if !event.is_key_event() => return Ok(()),
            _ => {}
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConnectError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    /// Events recorded for one host, in recording order.
    pub fn events_for(&self, host: Ipv4Addr) -> Vec<SessionEvent> {
        self.entries()
            .unwrap_or_default()
            .into_iter()
            .map(|entry| entry.event)
            .filter(|event| event.host() == host)
            .collect()
    }

    /// Commands that actually reached `host` (excludes simulated ones).
    pub fn issued_commands(&self, host: Ipv4Addr) -> Vec<String> {
        self.events_for(host)
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::CommandIssued { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Commands logged but never sent to `host`.
    pub fn simulated_commands(&self, host: Ipv4Addr) -> Vec<String> {
        self.events_for(host)
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::CommandSimulated { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Clears all recorded events.
    pub fn clear(&self) -> Result<(), ConnectError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, ConnectError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            lines.push(serde_json::to_string(&entry)?);
        }
        Ok(lines.join("\n"))
    }

    /// Restore a recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let mut parsed = Vec::new();
        for line in jsonl.lines() {
            if line.trim().is_empty() {
                continue;
            }
            parsed.push(serde_json::from_str::<SessionRecordEntry>(line)?);
        }
        Ok(Self {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
