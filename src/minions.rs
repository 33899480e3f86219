//! Minion spawn policy
//!
//! Leads control whether pilots may spawn short-lived subordinate workers and
//! how many may run at once. The effective policy for a pilot is its own
//! scope row, falling back to `global`, falling back to the built-in default.

use rusqlite::{params, OptionalExtension};
use tracing::info;

use crate::db::{self, EffectivePolicy, MinionStatus, Store};
use crate::error::{Error, Result};

/// Built-in policy when neither an agent scope nor `global` is set.
const DEFAULT_ENABLED: bool = true;
const DEFAULT_MAX_MINIONS: i64 = 3;

/// Scope name for the room-wide policy row.
pub const GLOBAL_SCOPE: &str = "global";

#[derive(Clone)]
pub struct MinionGovernor {
    store: Store,
}

impl MinionGovernor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Upsert the policy for a scope (`global` or an agent name). Lead-only.
    pub fn set_policy(
        &self,
        actor: &str,
        scope: &str,
        enabled: bool,
        max_minions: i64,
    ) -> Result<String> {
        let now = db::now_string();
        self.store.with_tx(|tx| {
            let leads = db::leads(tx)?;
            if !leads.is_empty() && !leads.iter().any(|l| l == actor) {
                return Err(Error::LeadOnly {
                    leads: leads.join(", "),
                    action: "set spawn policy".to_string(),
                });
            }
            tx.execute(
                "INSERT INTO spawn_policy (scope, enabled, max_minions, set_by, set_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(scope) DO UPDATE SET
                     enabled = excluded.enabled,
                     max_minions = excluded.max_minions,
                     set_by = excluded.set_by,
                     set_at = excluded.set_at",
                params![scope, enabled, max_minions, actor, now],
            )?;
            Ok(())
        })?;

        info!(scope, enabled, max_minions, actor, "spawn policy set");
        let state = if enabled { "enabled" } else { "disabled" };
        Ok(format!(
            "Spawn policy set: scope='{scope}' {state} max_minions={max_minions} (by {actor})"
        ))
    }

    /// Effective policy plus the pilot's live minion count, as JSON.
    pub fn get_policy(&self, pilot: &str) -> Result<String> {
        let policy = self.effective_policy(pilot)?;
        Ok(serde_json::to_string_pretty(&policy).unwrap_or_else(|_| "{}".to_string()))
    }

    pub fn effective_policy(&self, pilot: &str) -> Result<EffectivePolicy> {
        self.store.with_conn(|conn| {
            let scoped: Option<(bool, i64)> = conn
                .query_row(
                    "SELECT enabled, max_minions FROM spawn_policy WHERE scope = ?1",
                    params![pilot],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let row = match scoped {
                Some(row) => Some(row),
                None => conn
                    .query_row(
                        "SELECT enabled, max_minions FROM spawn_policy WHERE scope = ?1",
                        params![GLOBAL_SCOPE],
                        |r| Ok((r.get(0)?, r.get(1)?)),
                    )
                    .optional()?,
            };
            let (enabled, max_minions) = row.unwrap_or((DEFAULT_ENABLED, DEFAULT_MAX_MINIONS));

            let active_minions: i64 = conn.query_row(
                "SELECT COUNT(*) FROM minion_log WHERE pilot = ?1 AND status = 'spawned'",
                params![pilot],
                |r| r.get(0),
            )?;

            Ok(EffectivePolicy {
                enabled,
                max_minions,
                active_minions,
                can_spawn: enabled && active_minions < max_minions,
            })
        })
    }

    /// Log a minion lifecycle event. `spawned` appends a fresh row;
    /// `completed`/`failed` close the pilot's most recent live row.
    pub fn log_minion(
        &self,
        pilot: &str,
        description: &str,
        status: &str,
        result: &str,
    ) -> Result<String> {
        let status = MinionStatus::parse(status).ok_or_else(|| {
            Error::InvalidParams(format!(
                "invalid minion status '{status}'; must be one of: spawned, completed, failed"
            ))
        })?;
        let now = db::now_string();

        match status {
            MinionStatus::Spawned => {
                let id = self.store.with_conn(|conn| {
                    conn.execute(
                        "INSERT INTO minion_log (pilot, task_description, status, spawned_at)
                         VALUES (?1, ?2, 'spawned', ?3)",
                        params![pilot, description, now],
                    )?;
                    Ok(conn.last_insert_rowid())
                })?;
                Ok(format!("Minion logged: id={id} pilot={pilot} status=spawned"))
            }
            MinionStatus::Completed | MinionStatus::Failed => {
                let id = self.store.with_tx(|tx| {
                    let live: Option<i64> = tx
                        .query_row(
                            "SELECT id FROM minion_log
                             WHERE pilot = ?1 AND status = 'spawned'
                             ORDER BY id DESC LIMIT 1",
                            params![pilot],
                            |r| r.get(0),
                        )
                        .optional()?;
                    let id = live.ok_or_else(|| Error::NoActiveMinion(pilot.to_string()))?;
                    tx.execute(
                        "UPDATE minion_log SET status = ?1, completed_at = ?2, result = NULLIF(?3, '')
                         WHERE id = ?4",
                        params![status.as_str(), now, result, id],
                    )?;
                    Ok(id)
                })?;
                Ok(format!(
                    "Minion updated: id={id} pilot={pilot} status={}",
                    status.as_str()
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (MinionGovernor, Store) {
        let store = Store::open_in_memory().unwrap();
        (MinionGovernor::new(store.clone()), store)
    }

    fn register(store: &Store, name: &str, role: &str) {
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO agents (name, registered_at, last_seen, role)
                     VALUES (?1, 't', 't', NULLIF(?2, ''))",
                    params![name, role],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn default_policy_applies_without_rows() {
        let (governor, _store) = setup();
        let policy = governor.effective_policy("p").unwrap();
        assert!(policy.enabled);
        assert_eq!(policy.max_minions, 3);
        assert_eq!(policy.active_minions, 0);
        assert!(policy.can_spawn);
    }

    #[test]
    fn agent_scope_overrides_global() {
        let (governor, store) = setup();
        register(&store, "lead1", "lead");

        governor.set_policy("lead1", GLOBAL_SCOPE, true, 5).unwrap();
        governor.set_policy("lead1", "p", false, 1).unwrap();

        let p = governor.effective_policy("p").unwrap();
        assert!(!p.enabled);
        assert_eq!(p.max_minions, 1);

        let other = governor.effective_policy("q").unwrap();
        assert!(other.enabled);
        assert_eq!(other.max_minions, 5);
    }

    #[test]
    fn non_lead_cannot_set_policy() {
        let (governor, store) = setup();
        register(&store, "lead1", "lead");
        register(&store, "p", "coder");

        let err = governor.set_policy("p", GLOBAL_SCOPE, false, 0).unwrap_err();
        assert!(matches!(err, Error::LeadOnly { .. }));
    }

    #[test]
    fn spawn_cap_closes_and_reopens() {
        let (governor, store) = setup();
        register(&store, "lead1", "lead");
        governor.set_policy("lead1", GLOBAL_SCOPE, true, 2).unwrap();

        governor.log_minion("p", "t1", "spawned", "").unwrap();
        governor.log_minion("p", "t2", "spawned", "").unwrap();

        let full = governor.effective_policy("p").unwrap();
        assert_eq!(full.active_minions, 2);
        assert!(!full.can_spawn);

        governor.log_minion("p", "", "completed", "done").unwrap();
        let freed = governor.effective_policy("p").unwrap();
        assert_eq!(freed.active_minions, 1);
        assert!(freed.can_spawn);
    }

    #[test]
    fn completion_closes_newest_live_row() {
        let (governor, store) = setup();
        governor.log_minion("p", "first", "spawned", "").unwrap();
        governor.log_minion("p", "second", "spawned", "").unwrap();

        governor.log_minion("p", "", "failed", "oom").unwrap();

        store
            .with_conn(|conn| {
                let (desc, status): (String, String) = conn.query_row(
                    "SELECT task_description, status FROM minion_log WHERE id = 2",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?;
                assert_eq!((desc.as_str(), status.as_str()), ("second", "failed"));
                let first_status: String = conn.query_row(
                    "SELECT status FROM minion_log WHERE id = 1",
                    [],
                    |r| r.get(0),
                )?;
                assert_eq!(first_status, "spawned");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn completing_without_live_minion_fails() {
        let (governor, _store) = setup();
        let err = governor.log_minion("p", "", "completed", "").unwrap_err();
        assert!(matches!(err, Error::NoActiveMinion(_)));
    }

    #[test]
    fn per_pilot_counts_are_independent() {
        let (governor, _store) = setup();
        governor.log_minion("p", "t", "spawned", "").unwrap();
        governor.log_minion("q", "t", "spawned", "").unwrap();
        governor.log_minion("q", "t", "spawned", "").unwrap();

        assert_eq!(governor.effective_policy("p").unwrap().active_minions, 1);
        assert_eq!(governor.effective_policy("q").unwrap().active_minions, 2);
    }
}
