//! Handshake barrier
//!
//! A lead broadcasts a plan; every targeted agent must ACK before the GO
//! signal. Completion is re-evaluated against the full roster on every ACK,
//! so agents registered after initiation are still expected to sync.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use tracing::info;

use crate::db::{self, Handshake, HandshakeAck, HandshakeStatus, NewMessage, Store};
use crate::error::{Error, Result};
use crate::notify::Notifier;

const HANDSHAKE_PREFIX: &str = "[HANDSHAKE] ";

#[derive(Clone)]
pub struct HandshakeCoordinator {
    store: Store,
    notifier: Notifier,
}

impl HandshakeCoordinator {
    pub fn new(store: Store, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Broadcast a handshake plan as one direct message per target so
    /// delivery is tracked per agent. Empty `agents` targets the whole
    /// roster except the initiator.
    pub fn initiate(&self, initiator: &str, body: &str, agents: &str) -> Result<String> {
        let now = db::now_string();
        let (handshake_id, targets) = self.store.with_tx(|tx| {
            let leads = db::leads(tx)?;
            if !leads.is_empty() && !leads.iter().any(|l| l == initiator) {
                return Err(Error::LeadOnly {
                    leads: leads.join(", "),
                    action: "initiate handshakes".to_string(),
                });
            }

            let targets: Vec<String> = if agents.is_empty() {
                db::agent_names_except(tx, initiator)?
            } else {
                agents
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            };
            if targets.is_empty() {
                return Err(Error::Conflict(
                    "no agents to handshake with; register agents first".to_string(),
                ));
            }

            let full_body = format!("{HANDSHAKE_PREFIX}{body}");
            let mut anchor_id = None;
            for target in &targets {
                let id = db::insert_message(
                    tx,
                    &NewMessage::direct(initiator, target, &full_body, &now),
                )?;
                anchor_id.get_or_insert(id);
            }

            tx.execute(
                "INSERT INTO handshakes (initiated_by, message_id, created_at, status)
                 VALUES (?1, ?2, ?3, 'pending')",
                params![initiator, anchor_id, now],
            )?;
            Ok((tx.last_insert_rowid(), targets))
        })?;

        self.notifier.notify_agents(&targets);
        info!(handshake = handshake_id, initiator, targets = targets.len(), "handshake initiated");

        Ok(format!(
            "Handshake #{handshake_id} initiated. Waiting for ACK from: {}. \
             Agents: call ack_handshake with handshake_id={handshake_id} after reading the plan.",
            targets.join(", ")
        ))
    }

    /// Record one ACK. When the ACK set covers every registered non-initiator
    /// the handshake completes and the initiator plus all leads get the
    /// sync message.
    pub fn ack(&self, acker: &str, handshake_id: i64) -> Result<String> {
        let now = db::now_string();
        let (completed, pending, synced_targets) = self.store.with_tx(|tx| {
            let handshake = get_handshake(tx, handshake_id)?;
            if handshake.status == HandshakeStatus::Completed {
                return Err(Error::Conflict(format!(
                    "handshake #{handshake_id} is already completed"
                )));
            }
            let already: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM handshake_acks WHERE handshake_id = ?1 AND agent_name = ?2",
                    params![handshake_id, acker],
                    |row| row.get(0),
                )
                .optional()?;
            if already.is_some() {
                return Err(Error::Conflict(format!(
                    "you already ACKed handshake #{handshake_id}"
                )));
            }

            tx.execute(
                "INSERT INTO handshake_acks (handshake_id, agent_name, acked_at)
                 VALUES (?1, ?2, ?3)",
                params![handshake_id, acker, now],
            )?;

            let pending = pending_agents(tx, handshake_id, &handshake.initiated_by)?;
            if !pending.is_empty() {
                return Ok((false, pending, Vec::new()));
            }

            tx.execute(
                "UPDATE handshakes SET status = 'completed' WHERE id = ?1",
                params![handshake_id],
            )?;
            let mut targets = vec![handshake.initiated_by.clone()];
            for lead in db::leads(tx)? {
                if !targets.contains(&lead) {
                    targets.push(lead);
                }
            }
            let body =
                format!("[HANDSHAKE #{handshake_id}] ALL AGENTS SYNCED. Ready for GO signal.");
            for target in &targets {
                db::insert_message(tx, &NewMessage::direct("system", target, &body, &now))?;
            }
            Ok((true, Vec::new(), targets))
        })?;

        if completed {
            self.notifier.notify_agents(&synced_targets);
            info!(handshake = handshake_id, acker, "handshake complete");
            Ok(format!(
                "ACK recorded. Handshake #{handshake_id} COMPLETE, all agents synced!"
            ))
        } else {
            Ok(format!(
                "ACK recorded. Still waiting on: {}",
                pending.join(", ")
            ))
        }
    }

    /// Who has ACKed and who is still pending, as a JSON document.
    pub fn status(&self, handshake_id: i64) -> Result<String> {
        let report = self.store.with_conn(|conn| {
            let handshake = get_handshake(conn, handshake_id)?;

            let mut stmt = conn.prepare(
                "SELECT agent_name, acked_at FROM handshake_acks WHERE handshake_id = ?1",
            )?;
            let acks: Vec<HandshakeAck> = stmt
                .query_map(params![handshake_id], |row| {
                    Ok(HandshakeAck {
                        agent: row.get(0)?,
                        acked_at: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;

            let pending = pending_agents(conn, handshake_id, &handshake.initiated_by)?;

            Ok(json!({
                "handshake_id": handshake.id,
                "initiated_by": handshake.initiated_by,
                "status": handshake.status.as_str(),
                "created_at": handshake.created_at,
                "acked": acks,
                "pending": pending,
            }))
        })?;
        Ok(serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string()))
    }
}

fn get_handshake(conn: &Connection, id: i64) -> Result<Handshake> {
    conn.query_row(
        "SELECT id, initiated_by, message_id, created_at, status FROM handshakes WHERE id = ?1",
        params![id],
        |row| {
            let status_raw: String = row.get(4)?;
            Ok(Handshake {
                id: row.get(0)?,
                initiated_by: row.get(1)?,
                message_id: row.get(2)?,
                created_at: row.get(3)?,
                status: if status_raw == "completed" {
                    HandshakeStatus::Completed
                } else {
                    HandshakeStatus::Pending
                },
            })
        },
    )
    .optional()?
    .ok_or_else(|| Error::NotFound {
        what: "handshake",
        id: format!("#{id}"),
    })
}

/// Registered agents minus the initiator minus everyone who already ACKed.
fn pending_agents(conn: &Connection, handshake_id: i64, initiator: &str) -> Result<Vec<String>> {
    let expected = db::agent_names_except(conn, initiator)?;
    let mut stmt =
        conn.prepare("SELECT agent_name FROM handshake_acks WHERE handshake_id = ?1")?;
    let acked: Vec<String> = stmt
        .query_map(params![handshake_id], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(expected.into_iter().filter(|a| !acked.contains(a)).collect())
}
