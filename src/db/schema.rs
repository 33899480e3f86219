//! Store schema and row types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL schema, created idempotently on boot.
///
/// Existing databases are upgraded by additive column migrations only; see
/// `Store::run_migrations`. Columns are never dropped or renamed.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    name TEXT PRIMARY KEY,
    registered_at TEXT,
    last_seen TEXT,
    last_inbox_check TEXT,
    role TEXT DEFAULT NULL,
    description TEXT DEFAULT NULL,
    status TEXT DEFAULT 'offline',
    heartbeat_at TEXT DEFAULT NULL,
    team TEXT DEFAULT ''
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_agent TEXT,
    to_agent TEXT,
    content TEXT,
    timestamp TEXT,
    read_flag INTEGER DEFAULT 0,
    is_cc INTEGER DEFAULT 0,
    cc_original_to TEXT DEFAULT NULL,
    task_id TEXT DEFAULT NULL,
    reply_to INTEGER DEFAULT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(to_agent, read_flag);
CREATE INDEX IF NOT EXISTS idx_messages_task ON messages(task_id);

CREATE TABLE IF NOT EXISTS broadcast_reads (
    agent_name TEXT,
    message_id INTEGER,
    PRIMARY KEY (agent_name, message_id)
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    project TEXT DEFAULT '',
    title TEXT NOT NULL,
    description TEXT DEFAULT '',
    assigned_to TEXT,
    created_by TEXT NOT NULL,
    status TEXT DEFAULT 'pending'
        CHECK(status IN ('pending','assigned','in_progress','review','completed','failed')),
    result TEXT DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS handshakes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    initiated_by TEXT NOT NULL,
    message_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    status TEXT DEFAULT 'pending'
        CHECK(status IN ('pending','completed'))
);

CREATE TABLE IF NOT EXISTS handshake_acks (
    handshake_id INTEGER,
    agent_name TEXT,
    acked_at TEXT NOT NULL,
    PRIMARY KEY (handshake_id, agent_name)
);

CREATE TABLE IF NOT EXISTS contracts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project TEXT DEFAULT '',
    name TEXT NOT NULL,
    kind TEXT NOT NULL
        CHECK(kind IN ('function','dom_id','css_class','file_path','api_endpoint','event','other')),
    owner TEXT NOT NULL,
    spec TEXT DEFAULT '',
    version INTEGER DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(project, name, kind)
);

CREATE TABLE IF NOT EXISTS spawn_policy (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scope TEXT NOT NULL UNIQUE,
    enabled INTEGER DEFAULT 1,
    max_minions INTEGER DEFAULT 3,
    set_by TEXT NOT NULL,
    set_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS minion_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pilot TEXT NOT NULL,
    task_description TEXT NOT NULL,
    status TEXT DEFAULT 'spawned',
    spawned_at TEXT NOT NULL,
    completed_at TEXT,
    result TEXT
);
"#;

/// Additive column migrations: (table, column name, column definition).
///
/// Applied only when `PRAGMA table_info` shows the column missing, so
/// databases created before a column existed pick it up with its default.
pub const MIGRATIONS: &[(&str, &str, &str)] = &[
    ("agents", "last_inbox_check", "last_inbox_check TEXT"),
    ("agents", "role", "role TEXT DEFAULT NULL"),
    ("agents", "description", "description TEXT DEFAULT NULL"),
    ("agents", "status", "status TEXT DEFAULT 'offline'"),
    ("agents", "heartbeat_at", "heartbeat_at TEXT DEFAULT NULL"),
    ("agents", "team", "team TEXT DEFAULT ''"),
    ("messages", "is_cc", "is_cc INTEGER DEFAULT 0"),
    ("messages", "cc_original_to", "cc_original_to TEXT DEFAULT NULL"),
    ("messages", "task_id", "task_id TEXT DEFAULT NULL"),
    ("messages", "reply_to", "reply_to INTEGER DEFAULT NULL"),
];

/// Agent record, enriched with liveness info when listed via `who`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub registered_at: Option<String>,
    pub last_seen: Option<String>,
    pub last_inbox_check: Option<String>,
    pub role: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub heartbeat_at: Option<String>,
    pub team: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<Health>,
}

/// Liveness derived from `heartbeat_at` age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Stale,
    Dead,
    Unknown,
}

impl Health {
    /// Classify a heartbeat timestamp against `now`.
    pub fn classify(heartbeat_at: Option<&str>, now: DateTime<Utc>) -> Self {
        let Some(raw) = heartbeat_at else {
            return Health::Unknown;
        };
        let Ok(parsed) = DateTime::parse_from_rfc3339(raw) else {
            return Health::Unknown;
        };
        let age = (now - parsed.with_timezone(&Utc)).num_seconds();
        if age < 120 {
            Health::Healthy
        } else if age < 600 {
            Health::Stale
        } else {
            Health::Dead
        }
    }
}

/// A stored message row.
///
/// Write-once apart from `read_flag`; broadcast rows (`to_agent = "all"`)
/// never mutate, their per-reader state lives in `broadcast_reads`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub from_agent: String,
    pub to_agent: String,
    pub content: String,
    pub timestamp: String,
    pub read_flag: bool,
    pub is_cc: bool,
    pub cc_original_to: Option<String>,
    pub task_id: Option<String>,
    pub reply_to: Option<i64>,
    /// Annotation added when delivering a CC copy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc_note: Option<String>,
}

/// Fields for a message insert. All rows of one send share a timestamp.
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub content: &'a str,
    pub timestamp: &'a str,
    pub is_cc: bool,
    pub cc_original_to: Option<&'a str>,
    pub task_id: Option<&'a str>,
    pub reply_to: Option<i64>,
}

impl<'a> NewMessage<'a> {
    pub fn direct(from: &'a str, to: &'a str, content: &'a str, timestamp: &'a str) -> Self {
        Self {
            from,
            to,
            content,
            timestamp,
            is_cc: false,
            cc_original_to: None,
            task_id: None,
            reply_to: None,
        }
    }

    pub fn with_task(mut self, task_id: Option<&'a str>) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn cc(mut self, original_to: &'a str) -> Self {
        self.is_cc = true;
        self.cc_original_to = Some(original_to);
        self
    }
}

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Review,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Assigned,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task record. `result` is opaque text; `submit_for_review` stores a JSON
/// payload there which only the review path parses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub project: String,
    pub title: String,
    pub description: String,
    pub assigned_to: Option<String>,
    pub created_by: String,
    pub status: TaskStatus,
    pub result: String,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeStatus {
    Pending,
    Completed,
}

impl HandshakeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HandshakeStatus::Pending => "pending",
            HandshakeStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Handshake {
    pub id: i64,
    pub initiated_by: String,
    pub message_id: i64,
    pub created_at: String,
    pub status: HandshakeStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandshakeAck {
    pub agent: String,
    pub acked_at: String,
}

/// The closed set of contract kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Function,
    DomId,
    CssClass,
    FilePath,
    ApiEndpoint,
    Event,
    Other,
}

impl ContractKind {
    pub const ALL: [ContractKind; 7] = [
        ContractKind::Function,
        ContractKind::DomId,
        ContractKind::CssClass,
        ContractKind::FilePath,
        ContractKind::ApiEndpoint,
        ContractKind::Event,
        ContractKind::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContractKind::Function => "function",
            ContractKind::DomId => "dom_id",
            ContractKind::CssClass => "css_class",
            ContractKind::FilePath => "file_path",
            ContractKind::ApiEndpoint => "api_endpoint",
            ContractKind::Event => "event",
            ContractKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }

    pub fn valid_list() -> String {
        Self::ALL
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Contract {
    pub id: i64,
    pub project: String,
    pub name: String,
    pub kind: ContractKind,
    pub owner: String,
    pub spec: String,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinionStatus {
    Spawned,
    Completed,
    Failed,
}

impl MinionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MinionStatus::Spawned => "spawned",
            MinionStatus::Completed => "completed",
            MinionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [Self::Spawned, Self::Completed, Self::Failed]
            .into_iter()
            .find(|v| v.as_str() == s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MinionLogEntry {
    pub id: i64,
    pub pilot: String,
    pub task_description: String,
    pub status: MinionStatus,
    pub spawned_at: String,
    pub completed_at: Option<String>,
    pub result: Option<String>,
}

/// Effective spawn policy for one pilot.
#[derive(Debug, Clone, Serialize)]
pub struct EffectivePolicy {
    pub enabled: bool,
    pub max_minions: i64,
    pub active_minions: i64,
    pub can_spawn: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn health_thresholds() {
        let now = Utc::now();
        let fresh = (now - Duration::seconds(30)).to_rfc3339();
        let stale = (now - Duration::seconds(300)).to_rfc3339();
        let dead = (now - Duration::seconds(601)).to_rfc3339();

        assert_eq!(Health::classify(Some(&fresh), now), Health::Healthy);
        assert_eq!(Health::classify(Some(&stale), now), Health::Stale);
        assert_eq!(Health::classify(Some(&dead), now), Health::Dead);
        assert_eq!(Health::classify(None, now), Health::Unknown);
        assert_eq!(Health::classify(Some("garbage"), now), Health::Unknown);
    }

    #[test]
    fn task_status_round_trips() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn contract_kind_closed_set() {
        assert_eq!(ContractKind::parse("dom_id"), Some(ContractKind::DomId));
        assert_eq!(ContractKind::parse("widget"), None);
        assert!(ContractKind::valid_list().contains("api_endpoint"));
    }
}
