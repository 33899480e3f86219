//! Shared interface contracts
//!
//! Versioned named specifications agents agree on (function signatures, DOM
//! ids, file paths, …). Updating an existing contract bumps its version and
//! fans the new spec out to every other registered agent.

use rusqlite::params;
use tracing::info;

use crate::db::{self, Contract, ContractKind, NewMessage, Store};
use crate::error::{Error, Result};
use crate::notify::Notifier;

#[derive(Clone)]
pub struct ContractRegistry {
    store: Store,
    notifier: Notifier,
}

impl ContractRegistry {
    pub fn new(store: Store, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Declare a contract at version 1, or bump an existing
    /// (project, name, kind) and broadcast the change.
    pub fn declare(
        &self,
        owner: &str,
        name: &str,
        kind: &str,
        spec: &str,
        project: &str,
    ) -> Result<String> {
        let kind = ContractKind::parse(kind).ok_or_else(|| Error::InvalidKind {
            kind: kind.to_string(),
            valid: ContractKind::valid_list(),
        })?;

        let now = db::now_string();
        let (version, notify_targets) = self.store.with_tx(|tx| {
            let existing: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT id, version FROM contracts
                     WHERE project = ?1 AND name = ?2 AND kind = ?3",
                    params![project, name, kind.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(|err| match err {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            match existing {
                Some((row_id, version)) => {
                    let new_version = version + 1;
                    tx.execute(
                        "UPDATE contracts SET spec = ?1, owner = ?2, version = ?3, updated_at = ?4
                         WHERE id = ?5",
                        params![spec, owner, new_version, now, row_id],
                    )?;

                    let body =
                        format!("[CONTRACT v{new_version}] {kind} '{name}' updated by {owner}: {spec}");
                    let targets = db::agent_names_except(tx, owner)?;
                    for target in &targets {
                        db::insert_message(tx, &NewMessage::direct(owner, target, &body, &now))?;
                    }
                    Ok((new_version, targets))
                }
                None => {
                    tx.execute(
                        "INSERT INTO contracts
                            (project, name, kind, owner, spec, version, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                        params![project, name, kind.as_str(), owner, spec, now],
                    )?;
                    Ok((1, Vec::new()))
                }
            }
        })?;

        self.notifier.notify_agents(&notify_targets);
        info!(name, %kind, version, owner, "contract declared");

        if version == 1 {
            Ok(format!("Contract declared: {kind} '{name}' v1 (owner: {owner})"))
        } else {
            Ok(format!(
                "Contract updated: {kind} '{name}' v{version} (owner: {owner})"
            ))
        }
    }

    /// Contracts matching the filters, sorted by (kind, name), as JSON.
    pub fn list(&self, project: &str, owner: &str, kind: &str) -> Result<String> {
        let contracts = self.store.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, project, name, kind, owner, spec, version, created_at, updated_at
                 FROM contracts WHERE 1=1",
            );
            let mut args: Vec<String> = Vec::new();
            if !project.is_empty() {
                sql.push_str(" AND project = ?");
                args.push(project.to_string());
            }
            if !owner.is_empty() {
                sql.push_str(" AND owner = ?");
                args.push(owner.to_string());
            }
            if !kind.is_empty() {
                sql.push_str(" AND kind = ?");
                args.push(kind.to_string());
            }
            sql.push_str(" ORDER BY kind, name");

            let mut stmt = conn.prepare(&sql)?;
            let contracts: Vec<Contract> = stmt
                .query_map(rusqlite::params_from_iter(&args), |row| {
                    let kind_raw: String = row.get(3)?;
                    Ok(Contract {
                        id: row.get(0)?,
                        project: row.get(1)?,
                        name: row.get(2)?,
                        kind: ContractKind::parse(&kind_raw).unwrap_or(ContractKind::Other),
                        owner: row.get(4)?,
                        spec: row.get(5)?,
                        version: row.get(6)?,
                        created_at: row.get(7)?,
                        updated_at: row.get(8)?,
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;
            Ok(contracts)
        })?;
        Ok(serde_json::to_string_pretty(&contracts).unwrap_or_else(|_| "[]".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;

    fn setup() -> (ContractRegistry, Store) {
        let store = Store::open_in_memory().unwrap();
        let notifier = Notifier::new(store.clone(), SessionRegistry::new());
        (ContractRegistry::new(store.clone(), notifier), store)
    }

    fn register(store: &Store, name: &str) {
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO agents (name, registered_at, last_seen) VALUES (?1, 't', 't')",
                    params![name],
                )?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let (registry, _store) = setup();
        let err = registry.declare("x", "paint", "widget", "v1", "").unwrap_err();
        assert!(matches!(err, Error::InvalidKind { .. }));
        assert!(err.caller_message().contains("function"));
    }

    #[test]
    fn first_declaration_is_v1_without_broadcast() {
        let (registry, store) = setup();
        register(&store, "x");
        register(&store, "y");

        let reply = registry.declare("x", "paint", "function", "v1", "").unwrap();
        assert!(reply.contains("'paint' v1"));

        let messages: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(messages, 0);
    }

    #[test]
    fn update_bumps_version_and_broadcasts_to_others() {
        let (registry, store) = setup();
        register(&store, "x");
        register(&store, "y");
        register(&store, "z");

        registry.declare("x", "paint", "function", "v1", "").unwrap();
        let reply = registry.declare("y", "paint", "function", "v2", "").unwrap();
        assert!(reply.contains("'paint' v2"));

        store
            .with_conn(|conn| {
                // Owner changed hands; everyone but the updater hears about it.
                let owner: String = conn.query_row(
                    "SELECT owner FROM contracts WHERE name = 'paint'",
                    [],
                    |r| r.get(0),
                )?;
                assert_eq!(owner, "y");

                let mut stmt = conn.prepare(
                    "SELECT to_agent, content FROM messages ORDER BY to_agent",
                )?;
                let rows: Vec<(String, String)> = stmt
                    .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                    .collect::<rusqlite::Result<_>>()?;
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].0, "x");
                assert_eq!(rows[1].0, "z");
                assert_eq!(
                    rows[0].1,
                    "[CONTRACT v2] function 'paint' updated by y: v2"
                );
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn versions_increase_monotonically_per_key() {
        let (registry, store) = setup();
        register(&store, "x");

        for i in 1..=5 {
            registry
                .declare("x", "paint", "function", &format!("v{i}"), "")
                .unwrap();
            let version: i64 = store
                .with_conn(|conn| {
                    Ok(conn.query_row(
                        "SELECT version FROM contracts WHERE name = 'paint'",
                        [],
                        |r| r.get(0),
                    )?)
                })
                .unwrap();
            assert_eq!(version, i);
        }

        // Same name, different kind is an independent contract.
        registry.declare("x", "paint", "event", "spec", "").unwrap();
        let version: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT version FROM contracts WHERE name = 'paint' AND kind = 'event'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn list_filters_and_sorts() {
        let (registry, _store) = setup();
        registry.declare("x", "zz", "function", "s", "p1").unwrap();
        registry.declare("x", "aa", "function", "s", "p1").unwrap();
        registry.declare("y", "btn", "dom_id", "s", "p2").unwrap();

        let all: serde_json::Value = serde_json::from_str(&registry.list("", "", "").unwrap()).unwrap();
        let names: Vec<&str> = all
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        // dom_id sorts before function; names break ties.
        assert_eq!(names, vec!["btn", "aa", "zz"]);

        let p1: serde_json::Value =
            serde_json::from_str(&registry.list("p1", "", "").unwrap()).unwrap();
        assert_eq!(p1.as_array().unwrap().len(), 2);

        let by_owner: serde_json::Value =
            serde_json::from_str(&registry.list("", "y", "").unwrap()).unwrap();
        assert_eq!(by_owner.as_array().unwrap().len(), 1);
    }
}
