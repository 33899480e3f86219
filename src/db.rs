//! Durable store
//!
//! A single embedded SQLite database holds every persistent entity: agents,
//! messages, broadcast reads, tasks, handshakes, contracts, spawn policies
//! and the minion log. Writes are serialized behind one connection; composite
//! mutations (task transition + message insert, handshake completion) run
//! inside `Store::with_tx` so they commit atomically.

mod schema;

pub use schema::*;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::Result;

/// Thread-safe store handle.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the store at the given path. The parent directory is
    /// created if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;

        for (table, column, definition) in MIGRATIONS {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
            let existing: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<std::result::Result<_, _>>()?;
            if !existing.iter().any(|c| c == column) {
                conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {definition}"))?;
            }
        }
        Ok(())
    }

    /// Run a read or single-statement write against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Run a closure inside a transaction; commits on `Ok`, rolls back on
    /// `Err`. Mutations touching more than one table must go through here.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

// ==================== Agent helpers ====================

/// Names of every agent currently registered with role `lead`.
///
/// Queried fresh on each use: the lead set changes under registration and
/// must never be cached across calls.
pub fn leads(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM agents WHERE role = 'lead'")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

pub fn agent_team(conn: &Connection, name: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT team FROM agents WHERE name = ?1",
        params![name],
        |row| row.get::<_, Option<String>>(0),
    )
    .optional()
    .map(|opt| opt.flatten().filter(|t| !t.is_empty()))
}

/// The recipient-name variants an agent can be addressed by: the short name
/// plus, when the agent carries a team label, `<team>/<name>`.
pub fn name_variants(conn: &Connection, name: &str) -> rusqlite::Result<Vec<String>> {
    let mut variants = vec![name.to_string()];
    if let Some(team) = agent_team(conn, name)? {
        variants.push(format!("{team}/{name}"));
    }
    Ok(variants)
}

/// Create a skeletal agent row if the name is unknown.
pub fn ensure_agent(conn: &Connection, name: &str, now: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO agents (name, registered_at, last_seen) VALUES (?1, ?2, ?2)",
        params![name, now],
    )?;
    Ok(())
}

pub fn get_agent(conn: &Connection, name: &str) -> rusqlite::Result<Option<Agent>> {
    conn.query_row(
        "SELECT name, registered_at, last_seen, last_inbox_check, role, description,
                status, heartbeat_at, team
         FROM agents WHERE name = ?1",
        params![name],
        row_to_agent,
    )
    .optional()
}

pub fn list_agents(conn: &Connection) -> rusqlite::Result<Vec<Agent>> {
    let mut stmt = conn.prepare(
        "SELECT name, registered_at, last_seen, last_inbox_check, role, description,
                status, heartbeat_at, team
         FROM agents ORDER BY last_seen DESC",
    )?;
    let rows = stmt.query_map([], row_to_agent)?;
    rows.collect()
}

/// All registered agent names except `excluded`.
pub fn agent_names_except(conn: &Connection, excluded: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM agents WHERE name != ?1")?;
    let rows = stmt.query_map(params![excluded], |row| row.get(0))?;
    rows.collect()
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        name: row.get(0)?,
        registered_at: row.get(1)?,
        last_seen: row.get(2)?,
        last_inbox_check: row.get(3)?,
        role: row.get(4)?,
        description: row.get(5)?,
        status: row.get(6)?,
        heartbeat_at: row.get(7)?,
        team: row.get(8)?,
        connected: None,
        health: None,
    })
}

// ==================== Message helpers ====================

pub fn insert_message(conn: &Connection, msg: &NewMessage<'_>) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO messages
            (from_agent, to_agent, content, timestamp, read_flag, is_cc, cc_original_to, task_id, reply_to)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?8)",
        params![
            msg.from,
            msg.to,
            msg.content,
            msg.timestamp,
            msg.is_cc,
            msg.cc_original_to,
            msg.task_id,
            msg.reply_to,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        from_agent: row.get(1)?,
        to_agent: row.get(2)?,
        content: row.get(3)?,
        timestamp: row.get(4)?,
        read_flag: row.get(5)?,
        is_cc: row.get(6)?,
        cc_original_to: row.get(7)?,
        task_id: row.get(8)?,
        reply_to: row.get(9)?,
        cc_note: None,
    })
}

const MESSAGE_COLUMNS: &str =
    "id, from_agent, to_agent, content, timestamp, read_flag, is_cc, cc_original_to, task_id, reply_to";

/// Unread direct messages addressed to any of the given name variants.
pub fn unread_direct(conn: &Connection, variants: &[String]) -> rusqlite::Result<Vec<MessageRow>> {
    let placeholders = vec!["?"; variants.len()].join(",");
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE to_agent IN ({placeholders}) AND read_flag = 0"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(variants), row_to_message)?;
    rows.collect()
}

/// Broadcast rows this agent has not acknowledged. Broadcasts an agent sent
/// itself never count as unread for it.
pub fn unacked_broadcasts(conn: &Connection, agent: &str) -> rusqlite::Result<Vec<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE to_agent = 'all' AND from_agent != ?1
           AND id NOT IN (SELECT message_id FROM broadcast_reads WHERE agent_name = ?1)"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![agent], row_to_message)?;
    rows.collect()
}

/// Unread count and the distinct senders behind it, for gate checks and
/// alert pushes.
pub fn unread_info(conn: &Connection, agent: &str) -> rusqlite::Result<(i64, Vec<String>)> {
    let variants = name_variants(conn, agent)?;
    let mut senders: Vec<String> = Vec::new();
    let mut count = 0i64;
    for msg in unread_direct(conn, &variants)? {
        count += 1;
        if !senders.contains(&msg.from_agent) {
            senders.push(msg.from_agent);
        }
    }
    for msg in unacked_broadcasts(conn, agent)? {
        count += 1;
        if !senders.contains(&msg.from_agent) {
            senders.push(msg.from_agent);
        }
    }
    Ok((count, senders))
}

pub fn mark_read(conn: &Connection, ids: &[i64]) -> rusqlite::Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!("UPDATE messages SET read_flag = 1 WHERE id IN ({placeholders})");
    conn.execute(&sql, rusqlite::params_from_iter(ids))?;
    Ok(())
}

pub fn record_broadcast_read(conn: &Connection, agent: &str, id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO broadcast_reads (agent_name, message_id) VALUES (?1, ?2)",
        params![agent, id],
    )?;
    Ok(())
}

/// Newest `count` messages, optionally filtered by task, returned
/// oldest-first.
pub fn message_history(
    conn: &Connection,
    count: i64,
    task_id: Option<&str>,
) -> rusqlite::Result<Vec<MessageRow>> {
    let mut rows = match task_id {
        Some(task) => {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE task_id = ?1 ORDER BY id DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mapped = stmt.query_map(params![task, count], row_to_message)?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY id DESC LIMIT ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mapped = stmt.query_map(params![count], row_to_message)?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    rows.reverse();
    Ok(rows)
}

/// Current wall-clock timestamp in the store's string format.
pub fn now_string() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let store = Store::open_in_memory().unwrap();
        // A second pass over schema + migrations must be a no-op.
        store.run_migrations().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO agents (name, registered_at, last_seen) VALUES ('a', 'x', 'x')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn message_ids_are_monotonic() {
        let store = Store::open_in_memory().unwrap();
        let ids = store
            .with_conn(|conn| {
                let a = insert_message(conn, &NewMessage::direct("a", "b", "one", "t1"))?;
                let b = insert_message(conn, &NewMessage::direct("a", "b", "two", "t2"))?;
                Ok((a, b))
            })
            .unwrap();
        assert!(ids.1 > ids.0);
    }

    #[test]
    fn unread_info_merges_direct_and_broadcast() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                ensure_agent(conn, "reader", "t0")?;
                insert_message(conn, &NewMessage::direct("x", "reader", "hi", "t1"))?;
                insert_message(conn, &NewMessage::direct("x", "all", "announce", "t2"))?;
                insert_message(conn, &NewMessage::direct("reader", "all", "mine", "t3"))?;
                let (count, senders) = unread_info(conn, "reader")?;
                // Own broadcast does not count against the reader.
                assert_eq!(count, 2);
                assert_eq!(senders, vec!["x".to_string()]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn team_variants_resolve() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO agents (name, registered_at, last_seen, team)
                     VALUES ('spartan', 't', 't', 'gypsy-danger')",
                    [],
                )?;
                let variants = name_variants(conn, "spartan")?;
                assert_eq!(
                    variants,
                    vec!["spartan".to_string(), "gypsy-danger/spartan".to_string()]
                );
                insert_message(
                    conn,
                    &NewMessage::direct("x", "gypsy-danger/spartan", "hello", "t1"),
                )?;
                let unread = unread_direct(conn, &variants)?;
                assert_eq!(unread.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn history_is_oldest_first_with_limit() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                for i in 0..5 {
                    insert_message(
                        conn,
                        &NewMessage::direct("a", "b", &format!("m{i}"), &format!("t{i}")),
                    )?;
                }
                let last3 = message_history(conn, 3, None)?;
                assert_eq!(
                    last3.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
                    vec!["m2", "m3", "m4"]
                );
                Ok(())
            })
            .unwrap();
    }
}
