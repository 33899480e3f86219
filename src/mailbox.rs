//! Message send / inbox / history semantics
//!
//! The unread gate lives here: an agent with unread mail cannot send until it
//! drains its inbox. Every direct message not already involving a lead is
//! silently CC'd to every lead, so leads see all traffic without explicit
//! addressing.

use rusqlite::{params, Connection};
use tracing::info;

use crate::db::{self, MessageRow, NewMessage, Store};
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::session::{SessionHandle, SessionRegistry};

/// Recipient name for broadcasts.
pub const BROADCAST: &str = "all";

#[derive(Clone)]
pub struct Mailbox {
    store: Store,
    sessions: SessionRegistry,
    notifier: Notifier,
}

/// Parameters for one `send` call.
#[derive(Debug, Default)]
pub struct Outgoing<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub body: &'a str,
    /// Comma-separated explicit CC list.
    pub cc: &'a str,
    pub task_id: &'a str,
    pub reply_to: Option<i64>,
}

impl Mailbox {
    pub fn new(store: Store, sessions: SessionRegistry, notifier: Notifier) -> Self {
        Self {
            store,
            sessions,
            notifier,
        }
    }

    /// Deliver a message to one agent, or to everyone when `to` is `all`.
    ///
    /// Fails with the unread gate when the sender has pending mail. The gate
    /// check and the insert are separate store calls; the gate is soft
    /// backpressure, not a safety invariant.
    pub fn send(&self, session: &SessionHandle, msg: &Outgoing<'_>) -> Result<String> {
        let unread = self
            .store
            .with_conn(|conn| Ok(db::unread_info(conn, msg.from)?.0))?;
        if unread > 0 {
            return Err(Error::UnreadMailBlocked(unread));
        }

        let now = db::now_string();
        let (resolved_to, cc_agents, effective_task) = self.store.with_tx(|tx| {
            db::ensure_agent(tx, msg.from, &now)?;

            let resolved_to = resolve_recipient(tx, msg.to)?;

            // A reply inherits the thread's task link unless one was given.
            let mut effective_task = non_empty(msg.task_id).map(str::to_string);
            if effective_task.is_none() {
                if let Some(reply_to) = msg.reply_to {
                    effective_task = tx
                        .query_row(
                            "SELECT task_id FROM messages WHERE id = ?1",
                            params![reply_to],
                            |row| row.get::<_, Option<String>>(0),
                        )
                        .unwrap_or(None);
                }
            }

            db::insert_message(
                tx,
                &NewMessage {
                    from: msg.from,
                    to: &resolved_to,
                    content: msg.body,
                    timestamp: &now,
                    is_cc: false,
                    cc_original_to: None,
                    task_id: effective_task.as_deref(),
                    reply_to: msg.reply_to,
                },
            )?;

            // Effective CC set: explicit list plus every lead not already
            // involved. The lead set is read inside this transaction, never
            // cached across calls.
            let mut cc_agents: Vec<String> = msg
                .cc
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            for lead in db::leads(tx)? {
                if lead != msg.from && lead != resolved_to && !cc_agents.contains(&lead) {
                    cc_agents.push(lead);
                }
            }

            for cc_agent in &cc_agents {
                if cc_agent != &resolved_to {
                    db::insert_message(
                        tx,
                        &NewMessage {
                            from: msg.from,
                            to: cc_agent,
                            content: msg.body,
                            timestamp: &now,
                            is_cc: true,
                            cc_original_to: Some(&resolved_to),
                            task_id: effective_task.as_deref(),
                            reply_to: msg.reply_to,
                        },
                    )?;
                }
            }

            Ok((resolved_to, cc_agents, effective_task))
        })?;

        self.sessions.bind_if_absent(msg.from, session);

        let mut targets: Vec<String> = if resolved_to == BROADCAST {
            self.sessions
                .connected_agents()
                .into_iter()
                .filter(|a| a != msg.from)
                .collect()
        } else if resolved_to == msg.from {
            Vec::new()
        } else {
            vec![resolved_to.clone()]
        };
        for cc_agent in &cc_agents {
            if cc_agent != msg.from && !targets.contains(cc_agent) {
                targets.push(cc_agent.clone());
            }
        }
        self.notifier.notify_agents(&targets);

        info!(
            from = msg.from,
            to = %resolved_to,
            cc = cc_agents.len(),
            "message delivered"
        );

        let mut reply = format!("Message sent from '{}' to '{resolved_to}'", msg.from);
        if !msg.cc.is_empty() {
            reply.push_str(&format!(" (cc: {})", msg.cc));
        }
        if let Some(task) = &effective_task {
            reply.push_str(&format!(" [task: {task}]"));
        }
        reply.push('.');
        Ok(reply)
    }

    /// Unread direct messages plus unacknowledged broadcasts, chronologically,
    /// as a JSON array. Flips read state atomically with the fetch.
    pub fn check_inbox(&self, session: &SessionHandle, agent: &str) -> Result<String> {
        let now = db::now_string();
        let mut messages = self.store.with_tx(|tx| {
            tx.execute(
                "UPDATE agents SET last_seen = ?1, last_inbox_check = ?1 WHERE name = ?2",
                params![now, agent],
            )?;

            let variants = db::name_variants(tx, agent)?;
            let direct = db::unread_direct(tx, &variants)?;
            let ids: Vec<i64> = direct.iter().map(|m| m.id).collect();
            db::mark_read(tx, &ids)?;

            let broadcasts = db::unacked_broadcasts(tx, agent)?;
            for msg in &broadcasts {
                db::record_broadcast_read(tx, agent, msg.id)?;
            }

            let mut all = direct;
            all.extend(broadcasts);
            Ok(all)
        })?;

        self.sessions.bind_if_absent(agent, session);

        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        for msg in &mut messages {
            if msg.is_cc {
                let original = msg.cc_original_to.as_deref().unwrap_or("unknown");
                msg.cc_note = Some(format!("[CC] originally to: {original}"));
            }
        }

        Ok(serde_json::to_string_pretty(&messages).unwrap_or_else(|_| "[]".to_string()))
    }

    /// The newest `count` messages across all agents (optionally only one
    /// task's thread), oldest-first, for catch-up.
    pub fn get_history(&self, count: i64, task_id: &str) -> Result<String> {
        let rows = self
            .store
            .with_conn(|conn| Ok(db::message_history(conn, count, non_empty(task_id))?))?;
        Ok(serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string()))
    }
}

/// Resolve a recipient name. Short names that only exist team-qualified are
/// resolved when unambiguous; several matches across teams are an error.
fn resolve_recipient(conn: &Connection, to: &str) -> Result<String> {
    if to == BROADCAST || to.contains('/') {
        return Ok(to.to_string());
    }
    let exact: i64 = conn.query_row(
        "SELECT COUNT(*) FROM agents WHERE name = ?1",
        params![to],
        |row| row.get(0),
    )?;
    if exact > 0 {
        return Ok(to.to_string());
    }

    let mut stmt = conn.prepare("SELECT name FROM agents WHERE name LIKE ?1")?;
    let qualified: Vec<String> = stmt
        .query_map(params![format!("%/{to}")], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    match qualified.len() {
        0 => Ok(to.to_string()),
        1 => Ok(qualified.into_iter().next().unwrap()),
        _ => Err(Error::AmbiguousRecipient {
            name: to.to_string(),
            matches: qualified.join(", "),
        }),
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
