//! Room archival
//!
//! When a room is torn down its store file is gzip-compressed into an archive
//! directory next to a JSON index describing what the room contained. Index
//! entries merge on re-archive and expire after a TTL unless pinned.

use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::OptionalExtension;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::db::Store;
use crate::error::{Error, Result};

const INDEX_FILE: &str = "index.json";

/// What a room contained, recorded into the archive index.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub agents: Vec<AgentBrief>,
    pub message_count: i64,
    pub tasks: Vec<TaskBrief>,
    pub date_range: Option<DateRange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentBrief {
    pub name: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskBrief {
    pub id: String,
    pub title: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateRange {
    pub first: String,
    pub last: String,
}

/// Summarize a room's store for its index entry.
pub fn room_summary(store: &Store) -> Result<RoomSummary> {
    store.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT name, role FROM agents ORDER BY name")?;
        let agents: Vec<AgentBrief> = stmt
            .query_map([], |row| {
                Ok(AgentBrief {
                    name: row.get(0)?,
                    role: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        let message_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?;

        let mut stmt = conn.prepare("SELECT id, title, status FROM tasks ORDER BY id")?;
        let tasks: Vec<TaskBrief> = stmt
            .query_map([], |row| {
                Ok(TaskBrief {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    status: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        let date_range: Option<DateRange> = conn
            .query_row(
                "SELECT MIN(timestamp), MAX(timestamp) FROM messages",
                [],
                |row| {
                    let first: Option<String> = row.get(0)?;
                    let last: Option<String> = row.get(1)?;
                    Ok(first.zip(last))
                },
            )
            .optional()?
            .flatten()
            .map(|(first, last)| DateRange { first, last });

        Ok(RoomSummary {
            agents,
            message_count,
            tasks,
            date_range,
        })
    })
}

/// Gzip the room's store file into the archive directory. Returns the
/// archive path, named `<room>_<YYYYmmdd_HHMMSS>.db.gz`.
pub fn archive_room(room: &str, db_path: &Path, archive_dir: &Path) -> Result<PathBuf> {
    if !db_path.exists() {
        return Err(Error::NotFound {
            what: "store file",
            id: db_path.display().to_string(),
        });
    }
    std::fs::create_dir_all(archive_dir)?;

    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let archive_path = archive_dir.join(format!("{room}_{stamp}.db.gz"));

    let mut input = File::open(db_path)?;
    let output = File::create(&archive_path)?;
    let mut encoder = GzEncoder::new(output, Compression::new(6));
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;

    Ok(archive_path)
}

/// Merge metadata for a room into `index.json`. New keys overwrite, old keys
/// are kept; `archived_at` and `pinned` get defaults when absent.
pub fn update_index(archive_dir: &Path, room: &str, metadata: Value) -> Result<()> {
    let index_path = archive_dir.join(INDEX_FILE);
    let mut index: Map<String, Value> = match std::fs::read_to_string(&index_path) {
        Ok(raw) => serde_json::from_str(&raw)
            .map_err(|e| Error::InvalidParams(format!("corrupt archive index: {e}")))?,
        Err(_) => Map::new(),
    };

    let mut entry = match index.remove(room) {
        Some(Value::Object(existing)) => existing,
        _ => Map::new(),
    };
    if let Value::Object(new_fields) = metadata {
        for (key, value) in new_fields {
            entry.insert(key, value);
        }
    }
    entry
        .entry("archived_at".to_string())
        .or_insert_with(|| json!(Utc::now().to_rfc3339()));
    entry.entry("pinned".to_string()).or_insert(json!(false));
    index.insert(room.to_string(), Value::Object(entry));

    std::fs::write(&index_path, serde_json::to_string_pretty(&index).unwrap_or_default())?;
    Ok(())
}

/// Delete archives older than the TTL unless pinned. Returns the deleted
/// room names.
pub fn cleanup_expired(archive_dir: &Path, ttl_days: i64) -> Result<Vec<String>> {
    let index_path = archive_dir.join(INDEX_FILE);
    let Ok(raw) = std::fs::read_to_string(&index_path) else {
        return Ok(Vec::new());
    };
    let mut index: Map<String, Value> = serde_json::from_str(&raw)
        .map_err(|e| Error::InvalidParams(format!("corrupt archive index: {e}")))?;

    let cutoff = Utc::now() - Duration::days(ttl_days);
    let mut deleted = Vec::new();

    let rooms: Vec<String> = index.keys().cloned().collect();
    for room in rooms {
        let Some(entry) = index.get(&room) else { continue };
        if entry["pinned"].as_bool().unwrap_or(false) {
            continue;
        }
        let Some(archived_at) = entry["archived_at"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        else {
            continue;
        };
        if archived_at.with_timezone(&Utc) >= cutoff {
            continue;
        }

        if let Some(path) = entry["archive_path"].as_str() {
            let path = Path::new(path);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        index.remove(&room);
        deleted.push(room);
    }

    std::fs::write(&index_path, serde_json::to_string_pretty(&index).unwrap_or_default())?;
    Ok(deleted)
}

/// Gunzip an archive back into a working directory; returns the restored
/// store path.
pub fn restore_room(archive_path: &Path, target_dir: &Path) -> Result<PathBuf> {
    if !archive_path.exists() {
        return Err(Error::NotFound {
            what: "archive",
            id: archive_path.display().to_string(),
        });
    }
    std::fs::create_dir_all(target_dir)?;

    let file_name = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("restored.db.gz");
    let db_name = file_name.strip_suffix(".gz").unwrap_or(file_name);
    let db_path = target_dir.join(db_name);

    let input = File::open(archive_path)?;
    let mut decoder = GzDecoder::new(input);
    let mut output = File::create(&db_path)?;
    io::copy(&mut decoder, &mut output)?;

    Ok(db_path)
}
