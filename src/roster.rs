//! Agent roster
//!
//! Registration, presence and liveness. Agents are created lazily on first
//! mention, upgraded on explicit `register`, and removed only by explicit
//! `deregister`.

use chrono::Utc;
use rusqlite::params;
use std::path::PathBuf;
use tracing::info;

use crate::db::{self, Health, Store};
use crate::error::{Error, Result};
use crate::session::{SessionHandle, SessionRegistry};

#[derive(Clone)]
pub struct Roster {
    store: Store,
    sessions: SessionRegistry,
    runtime_dir: PathBuf,
    room_token: Option<String>,
}

impl Roster {
    pub fn new(
        store: Store,
        sessions: SessionRegistry,
        runtime_dir: PathBuf,
        room_token: Option<String>,
    ) -> Self {
        Self {
            store,
            sessions,
            runtime_dir,
            room_token: room_token.filter(|t| !t.is_empty()),
        }
    }

    /// Register (or re-register) the calling agent and bind its session for
    /// push notifications. Empty role/description/team leave any previously
    /// stored values untouched.
    pub fn register(
        &self,
        session: &SessionHandle,
        name: &str,
        role: &str,
        description: &str,
        team: &str,
        token: &str,
    ) -> Result<String> {
        if let Some(expected) = &self.room_token {
            if token != expected {
                return Err(Error::AuthRejected);
            }
        }

        let now = db::now_string();
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agents (name, registered_at, last_seen, role, description, status, team)
                 VALUES (?1, ?2, ?2, NULLIF(?3, ''), NULLIF(?4, ''), 'waiting for work', ?5)
                 ON CONFLICT(name) DO UPDATE SET
                     last_seen = ?2,
                     role = COALESCE(NULLIF(?3, ''), agents.role),
                     description = COALESCE(NULLIF(?4, ''), agents.description),
                     team = COALESCE(NULLIF(?5, ''), agents.team),
                     status = 'waiting for work'",
                params![name, now, role, description, team],
            )?;
            Ok(())
        })?;

        self.sessions.bind(name, session.clone());
        info!(agent = name, role, team, "agent registered");

        let mut reply = format!("Agent '{name}' registered successfully.");
        if !role.is_empty() {
            reply.push_str(&format!(" role={role}"));
        }
        if !team.is_empty() {
            reply.push_str(&format!(" team={team}"));
        }
        if let Some(onboarding) = self.load_onboarding(role) {
            reply.push_str(&format!(
                "\n\n# Onboarding\n\nRead and follow these instructions for your session:\n\n{onboarding}"
            ));
        }
        Ok(reply)
    }

    /// Onboarding text: room protocol plus the role profile, when present
    /// under the runtime directory.
    fn load_onboarding(&self, role: &str) -> Option<String> {
        let mut parts = Vec::new();
        if let Ok(text) = std::fs::read_to_string(self.runtime_dir.join("PROTOCOL.md")) {
            parts.push(text);
        }
        if !role.is_empty() {
            let role_path = self.runtime_dir.join("roles").join(format!("{role}.md"));
            if let Ok(text) = std::fs::read_to_string(role_path) {
                parts.push(text);
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n---\n\n"))
        }
    }

    pub fn set_status(&self, name: &str, status: &str) -> Result<String> {
        let now = db::now_string();
        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE agents SET status = ?1, last_seen = ?2 WHERE name = ?3",
                params![status, now, name],
            )?;
            Ok(())
        })?;
        Ok(format!("Status set: {name} → {status}"))
    }

    /// Remove an agent from the roster entirely. Used to clean up stale or
    /// ghost entries from previous sessions.
    pub fn deregister(&self, name: &str) -> Result<String> {
        let deleted = self.store.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM agents WHERE name = ?1", params![name])?)
        })?;
        if deleted == 0 {
            return Err(Error::NotFound {
                what: "agent",
                id: name.to_string(),
            });
        }
        self.sessions.unbind_agent(name);
        Ok(format!("Agent '{name}' deregistered."))
    }

    /// Every agent, enriched with connection state and heartbeat-derived
    /// health, as a JSON document.
    pub fn who(&self) -> Result<String> {
        let now = Utc::now();
        let mut agents = self.store.with_conn(|conn| Ok(db::list_agents(conn)?))?;
        for agent in &mut agents {
            agent.connected = Some(self.sessions.is_connected(&agent.name));
            agent.health = Some(Health::classify(agent.heartbeat_at.as_deref(), now));
        }
        Ok(serde_json::to_string_pretty(&agents).unwrap_or_else(|_| "[]".to_string()))
    }

    /// Heartbeat. Also re-associates the calling session with this agent so
    /// pushes keep flowing after a reconnect.
    pub fn ping(&self, session: &SessionHandle, name: &str) -> Result<String> {
        let now = db::now_string();
        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE agents SET heartbeat_at = ?1, last_seen = ?1 WHERE name = ?2",
                params![now, name],
            )?;
            Ok(())
        })?;
        self.sessions.bind_if_absent(name, session);
        Ok(format!("pong — {now}"))
    }
}
