//! Task state machine
//!
//! Tasks move through a fixed transition graph; every edge names who may
//! drive it. Transitions and their auto-notification messages commit in one
//! transaction, then recipients are pushed.

#[cfg(test)]
mod proptests;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use tracing::info;

use crate::db::{self, Health, NewMessage, Store, Task, TaskStatus};
use crate::error::{Error, Result};
use crate::notify::Notifier;

/// Who may drive a given transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Any agent registered with role `lead`. When no lead is registered at
    /// all, lead edges are open to any agent (bootstrap).
    Lead,
    /// Exactly the task's current assignee.
    Assignee,
}

/// The complete transition table. `completed` is terminal.
pub const TRANSITIONS: &[(TaskStatus, TaskStatus, Authority)] = &[
    (TaskStatus::Pending, TaskStatus::Assigned, Authority::Lead),
    (TaskStatus::Assigned, TaskStatus::InProgress, Authority::Assignee),
    (TaskStatus::InProgress, TaskStatus::Review, Authority::Assignee),
    (TaskStatus::InProgress, TaskStatus::Failed, Authority::Assignee),
    (TaskStatus::Review, TaskStatus::Completed, Authority::Lead),
    // Rework: lead sends a reviewed task back.
    (TaskStatus::Review, TaskStatus::InProgress, Authority::Lead),
    // Retry: lead reassigns a failed task.
    (TaskStatus::Failed, TaskStatus::Assigned, Authority::Lead),
];

/// Authority required for `from → to`, or `None` when the edge is invalid.
pub fn transition_authority(from: TaskStatus, to: TaskStatus) -> Option<Authority> {
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, auth)| *auth)
}

/// Reachable states from `from`, for error replies.
pub fn valid_next(from: TaskStatus) -> Vec<TaskStatus> {
    TRANSITIONS
        .iter()
        .filter(|(f, _, _)| *f == from)
        .map(|(_, t, _)| *t)
        .collect()
}

fn invalid_transition(from: TaskStatus, to: &str) -> Error {
    let valid = valid_next(from);
    let valid = if valid.is_empty() {
        "none (terminal state)".to_string()
    } else {
        valid
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    Error::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
        valid,
    }
}

/// Lead authorization: any lead, or anyone when no lead exists yet.
fn authorize_lead(conn: &Connection, actor: &str, action: &str) -> Result<()> {
    let leads = db::leads(conn)?;
    if leads.is_empty() || leads.iter().any(|l| l == actor) {
        Ok(())
    } else {
        Err(Error::LeadOnly {
            leads: leads.join(", "),
            action: action.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct TaskBoard {
    store: Store,
    notifier: Notifier,
}

impl TaskBoard {
    pub fn new(store: Store, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Mint the next TASK-NNN id and insert the task. When `assign_to` is
    /// given the task starts `assigned` and the assignee gets the assignment
    /// message, CC'd to every other lead.
    pub fn create_task(
        &self,
        creator: &str,
        title: &str,
        description: &str,
        assign_to: &str,
        project: &str,
    ) -> Result<String> {
        let now = db::now_string();
        let assignee = if assign_to.is_empty() {
            None
        } else {
            Some(assign_to)
        };
        let status = if assignee.is_some() {
            TaskStatus::Assigned
        } else {
            TaskStatus::Pending
        };

        let (task_id, notify_targets) = self.store.with_tx(|tx| {
            let task_id = next_task_id(tx)?;
            tx.execute(
                "INSERT INTO tasks (id, project, title, description, assigned_to, created_by,
                                    status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    task_id,
                    project,
                    title,
                    description,
                    assignee,
                    creator,
                    status.as_str(),
                    now
                ],
            )?;

            let mut targets = Vec::new();
            if let Some(assignee) = assignee {
                let mut body = format!("[{task_id}] TASK ASSIGNED: {title}");
                if !description.is_empty() {
                    body.push_str(&format!("\n\n{description}"));
                }
                db::insert_message(
                    tx,
                    &NewMessage::direct(creator, assignee, &body, &now)
                        .with_task(Some(task_id.as_str())),
                )?;
                targets.push(assignee.to_string());

                for lead in db::leads(tx)? {
                    if lead != creator && lead != assignee {
                        db::insert_message(
                            tx,
                            &NewMessage::direct(creator, &lead, &body, &now)
                                .with_task(Some(task_id.as_str()))
                                .cc(assignee),
                        )?;
                        targets.push(lead);
                    }
                }
            }
            Ok((task_id, targets))
        })?;

        self.notifier.notify_agents(&notify_targets);
        info!(task = %task_id, creator, assigned = assign_to, "task created");

        let mut reply = format!("Task {task_id} created: '{title}' (status: {status})");
        if let Some(assignee) = assignee {
            reply.push_str(&format!(" → assigned to {assignee}"));
        }
        Ok(reply)
    }

    /// Drive one edge of the transition graph, with authorization, then
    /// auto-message the other side (assignee actor → leads, lead actor →
    /// assignee).
    pub fn update_task(
        &self,
        actor: &str,
        task_id: &str,
        status: &str,
        result: &str,
    ) -> Result<String> {
        let now = db::now_string();
        let (old_status, new_status, notify_targets) = self.store.with_tx(|tx| {
            let task = get_task(tx, task_id)?;
            let old = task.status;
            let new = TaskStatus::parse(status).ok_or_else(|| invalid_transition(old, status))?;
            let authority =
                transition_authority(old, new).ok_or_else(|| invalid_transition(old, status))?;

            let leads = db::leads(tx)?;
            match authority {
                Authority::Lead => {
                    authorize_lead(tx, actor, &format!("transition {old} → {new}"))?;
                }
                Authority::Assignee => {
                    if task.assigned_to.as_deref() != Some(actor) {
                        return Err(Error::AssigneeOnly {
                            assignee: task.assigned_to.unwrap_or_else(|| "nobody".into()),
                            action: format!("transition {old} → {new}"),
                        });
                    }
                }
            }

            apply_transition(tx, task_id, new, result, &now)?;

            let mut body = format!("[{task_id}] Status: {old} → {new}");
            if !result.is_empty() {
                body.push_str(&format!("\n\n{result}"));
            }

            let mut targets = Vec::new();
            match authority {
                Authority::Assignee => {
                    for lead in leads {
                        db::insert_message(
                            tx,
                            &NewMessage::direct(actor, &lead, &body, &now)
                                .with_task(Some(task_id)),
                        )?;
                        targets.push(lead);
                    }
                }
                Authority::Lead => {
                    if let Some(assignee) = &task.assigned_to {
                        db::insert_message(
                            tx,
                            &NewMessage::direct(actor, assignee, &body, &now)
                                .with_task(Some(task_id)),
                        )?;
                        targets.push(assignee.clone());
                    }
                }
            }
            Ok((old, new, targets))
        })?;

        self.notifier.notify_agents(&notify_targets);
        info!(task = task_id, actor, from = %old_status, to = %new_status, "task transitioned");
        Ok(format!("Task {task_id}: {old_status} → {new_status}"))
    }

    /// Tasks matching the filters, oldest-first. With no filters at all,
    /// completed tasks are hidden. In-progress tasks whose assignee's
    /// heartbeat has gone dead carry a warning.
    pub fn list_tasks(&self, status: &str, assigned_to: &str, project: &str) -> Result<String> {
        let now = Utc::now();
        let tasks = self.store.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, project, title, description, assigned_to, created_by, status,
                        result, created_at, updated_at, completed_at
                 FROM tasks WHERE 1=1",
            );
            let mut args: Vec<String> = Vec::new();
            if !status.is_empty() {
                sql.push_str(" AND status = ?");
                args.push(status.to_string());
            } else if assigned_to.is_empty() && project.is_empty() {
                sql.push_str(" AND status != 'completed'");
            }
            if !assigned_to.is_empty() {
                sql.push_str(" AND assigned_to = ?");
                args.push(assigned_to.to_string());
            }
            if !project.is_empty() {
                sql.push_str(" AND project = ?");
                args.push(project.to_string());
            }
            sql.push_str(" ORDER BY created_at ASC");

            let mut stmt = conn.prepare(&sql)?;
            let mut tasks: Vec<Task> = stmt
                .query_map(rusqlite::params_from_iter(&args), row_to_task)?
                .collect::<rusqlite::Result<_>>()?;

            for task in &mut tasks {
                if task.status != TaskStatus::InProgress {
                    continue;
                }
                let Some(assignee) = &task.assigned_to else {
                    continue;
                };
                let heartbeat: Option<String> = conn
                    .query_row(
                        "SELECT heartbeat_at FROM agents WHERE name = ?1",
                        params![assignee],
                        |row| row.get(0),
                    )
                    .optional()?
                    .flatten();
                if Health::classify(heartbeat.as_deref(), now) == Health::Dead {
                    task.warning = Some("assigned agent appears dead".to_string());
                }
            }
            Ok(tasks)
        })?;
        Ok(serde_json::to_string_pretty(&tasks).unwrap_or_else(|_| "[]".to_string()))
    }

    /// Assignee hands an in-progress task to review, with a structured
    /// payload stored in `result` and a review message to every lead.
    pub fn submit_for_review(
        &self,
        actor: &str,
        task_id: &str,
        summary: &str,
        files_changed: &str,
        test_results: &str,
    ) -> Result<String> {
        let now = db::now_string();
        let notify_targets = self.store.with_tx(|tx| {
            let task = get_task(tx, task_id)?;
            if task.status != TaskStatus::InProgress {
                return Err(invalid_transition(task.status, TaskStatus::Review.as_str()));
            }
            if task.assigned_to.as_deref() != Some(actor) {
                return Err(Error::AssigneeOnly {
                    assignee: task.assigned_to.unwrap_or_else(|| "nobody".into()),
                    action: "submit for review".to_string(),
                });
            }

            let review_payload = json!({
                "summary": summary,
                "files_changed": files_changed,
                "test_results": test_results,
            })
            .to_string();
            tx.execute(
                "UPDATE tasks SET status = 'review', result = ?1, updated_at = ?2 WHERE id = ?3",
                params![review_payload, now, task_id],
            )?;

            let mut body = format!("[REVIEW] {task_id}: {}\n\nSUMMARY: {summary}", task.title);
            if !files_changed.is_empty() {
                body.push_str(&format!("\nFILES: {files_changed}"));
            }
            if !test_results.is_empty() {
                body.push_str(&format!("\nTESTS: {test_results}"));
            }
            body.push_str("\n\nAwaiting review. Use approve_task or reject_task.");

            let leads = db::leads(tx)?;
            for lead in &leads {
                db::insert_message(
                    tx,
                    &NewMessage::direct(actor, lead, &body, &now).with_task(Some(task_id)),
                )?;
            }
            Ok(leads)
        })?;

        self.notifier.notify_agents(&notify_targets);
        Ok(format!("Task {task_id} submitted for review."))
    }

    /// Lead accepts a reviewed task; terminal.
    pub fn approve_task(&self, actor: &str, task_id: &str, notes: &str) -> Result<String> {
        let now = db::now_string();
        let notify_target = self.store.with_tx(|tx| {
            authorize_lead(tx, actor, "approve tasks")?;
            let task = get_task(tx, task_id)?;
            if task.status != TaskStatus::Review {
                return Err(invalid_transition(
                    task.status,
                    TaskStatus::Completed.as_str(),
                ));
            }

            tx.execute(
                "UPDATE tasks SET status = 'completed', completed_at = ?1, updated_at = ?1
                 WHERE id = ?2",
                params![now, task_id],
            )?;

            if let Some(assignee) = &task.assigned_to {
                let mut body = format!("[APPROVED] {task_id}: {}", task.title);
                if !notes.is_empty() {
                    body.push_str(&format!("\n\nNotes: {notes}"));
                }
                db::insert_message(
                    tx,
                    &NewMessage::direct(actor, assignee, &body, &now).with_task(Some(task_id)),
                )?;
            }
            Ok(task.assigned_to)
        })?;

        self.notifier.notify_agents(notify_target.as_slice());
        Ok(format!("Task {task_id} approved and completed."))
    }

    /// Lead sends a reviewed task back for rework with feedback.
    pub fn reject_task(&self, actor: &str, task_id: &str, reason: &str) -> Result<String> {
        let now = db::now_string();
        let (assignee, _) = self.store.with_tx(|tx| {
            authorize_lead(tx, actor, "reject tasks")?;
            let task = get_task(tx, task_id)?;
            if task.status != TaskStatus::Review {
                return Err(invalid_transition(
                    task.status,
                    TaskStatus::InProgress.as_str(),
                ));
            }

            tx.execute(
                "UPDATE tasks SET status = 'in_progress', updated_at = ?1 WHERE id = ?2",
                params![now, task_id],
            )?;

            if let Some(assignee) = &task.assigned_to {
                let body = format!("[REWORK] {task_id}: {}\n\nREASON: {reason}", task.title);
                db::insert_message(
                    tx,
                    &NewMessage::direct(actor, assignee, &body, &now).with_task(Some(task_id)),
                )?;
            }
            Ok((task.assigned_to, ()))
        })?;

        self.notifier.notify_agents(assignee.as_slice());
        let assignee_name = assignee.unwrap_or_else(|| "nobody".into());
        Ok(format!(
            "Task {task_id} rejected — sent back to {assignee_name} for rework."
        ))
    }
}

/// Parse the largest existing numeric suffix and add one.
fn next_task_id(conn: &Connection) -> Result<String> {
    let newest: Option<String> = conn
        .query_row(
            "SELECT id FROM tasks ORDER BY CAST(SUBSTR(id, 6) AS INTEGER) DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    let next = match newest {
        Some(id) => {
            let suffix = id.rsplit('-').next().unwrap_or("0");
            suffix
                .parse::<u32>()
                .map_err(|_| Error::InvalidParams(format!("malformed task id in store: {id}")))?
                + 1
        }
        None => 1,
    };
    Ok(format!("TASK-{next:03}"))
}

fn apply_transition(
    conn: &Connection,
    task_id: &str,
    new_status: TaskStatus,
    result: &str,
    now: &str,
) -> rusqlite::Result<()> {
    let mut sql = String::from("UPDATE tasks SET status = ?1, updated_at = ?2");
    if !result.is_empty() {
        sql.push_str(", result = ?4");
    }
    if new_status == TaskStatus::Completed {
        sql.push_str(", completed_at = ?2");
    }
    sql.push_str(" WHERE id = ?3");
    if result.is_empty() {
        conn.execute(&sql, params![new_status.as_str(), now, task_id])?;
    } else {
        conn.execute(&sql, params![new_status.as_str(), now, task_id, result])?;
    }
    Ok(())
}

fn get_task(conn: &Connection, task_id: &str) -> Result<Task> {
    conn.query_row(
        "SELECT id, project, title, description, assigned_to, created_by, status,
                result, created_at, updated_at, completed_at
         FROM tasks WHERE id = ?1",
        params![task_id],
        row_to_task,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound {
        what: "task",
        id: task_id.to_string(),
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let status_raw: String = row.get(6)?;
    Ok(Task {
        id: row.get(0)?,
        project: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        assigned_to: row.get(4)?,
        created_by: row.get(5)?,
        status: TaskStatus::parse(&status_raw).unwrap_or(TaskStatus::Pending),
        result: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        completed_at: row.get(10)?,
        warning: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;

    fn setup() -> (TaskBoard, Store) {
        let store = Store::open_in_memory().unwrap();
        let sessions = SessionRegistry::new();
        let notifier = Notifier::new(store.clone(), sessions.clone());
        (TaskBoard::new(store.clone(), notifier), store)
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

    fn task_status(store: &Store, id: &str) -> String {
        store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT status FROM tasks WHERE id = ?1",
                    params![id],
                    |r| r.get(0),
                )?)
            })
            .unwrap()
    }

    #[test]
    fn task_ids_increase_by_numeric_suffix() {
        let (board, _store) = setup();
        let first = board.create_task("lead1", "one", "", "", "").unwrap();
        let second = board.create_task("lead1", "two", "", "", "").unwrap();
        assert!(first.contains("TASK-001"));
        assert!(second.contains("TASK-002"));
    }

    #[test]
    fn create_with_assignee_messages_assignee_and_ccs_leads() {
        let (board, store) = setup();
        register(&store, "lead1", "lead");
        register(&store, "lead2", "lead");
        register(&store, "dev1", "coder");

        board
            .create_task("lead1", "T", "do the thing", "dev1", "")
            .unwrap();

        store
            .with_conn(|conn| {
                let direct: String = conn.query_row(
                    "SELECT content FROM messages WHERE to_agent = 'dev1' AND is_cc = 0",
                    [],
                    |r| r.get(0),
                )?;
                assert!(direct.starts_with("[TASK-001] TASK ASSIGNED: T"));
                assert!(direct.contains("do the thing"));

                // lead2 gets a CC copy; the creating lead does not.
                let cc_to_lead2: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE to_agent = 'lead2' AND is_cc = 1
                       AND cc_original_to = 'dev1'",
                    [],
                    |r| r.get(0),
                )?;
                let to_lead1: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE to_agent = 'lead1'",
                    [],
                    |r| r.get(0),
                )?;
                assert_eq!((cc_to_lead2, to_lead1), (1, 0));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn assignee_walks_happy_path_and_leads_are_notified() {
        let (board, store) = setup();
        register(&store, "lead1", "lead");
        register(&store, "dev1", "coder");
        board.create_task("lead1", "T", "", "dev1", "").unwrap();

        board
            .update_task("dev1", "TASK-001", "in_progress", "")
            .unwrap();
        assert_eq!(task_status(&store, "TASK-001"), "in_progress");

        let body: String = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT content FROM messages WHERE to_agent = 'lead1'
                     ORDER BY id DESC LIMIT 1",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(body, "[TASK-001] Status: assigned → in_progress");
    }

    #[test]
    fn invalid_transition_names_valid_next_states() {
        let (board, store) = setup();
        register(&store, "lead1", "lead");
        register(&store, "dev1", "coder");
        board.create_task("lead1", "T", "", "dev1", "").unwrap();
        board
            .update_task("dev1", "TASK-001", "in_progress", "")
            .unwrap();

        let err = board
            .update_task("dev1", "TASK-001", "completed", "")
            .unwrap_err();
        let message = err.caller_message();
        assert!(message.contains("invalid transition in_progress → completed"));
        assert!(message.contains("review, failed"));
    }

    #[test]
    fn wrong_actor_is_rejected() {
        let (board, store) = setup();
        register(&store, "lead1", "lead");
        register(&store, "dev1", "coder");
        register(&store, "dev2", "coder");
        board.create_task("lead1", "T", "", "dev1", "").unwrap();

        let err = board
            .update_task("dev2", "TASK-001", "in_progress", "")
            .unwrap_err();
        assert!(matches!(err, Error::AssigneeOnly { .. }));

        let err = board
            .update_task("dev1", "TASK-001", "assigned", "")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn lead_edges_open_when_no_lead_registered() {
        let (board, store) = setup();
        register(&store, "dev1", "coder");
        board.create_task("dev1", "T", "", "", "").unwrap();

        // Nobody has role lead, so anyone may assign.
        board
            .update_task("dev1", "TASK-001", "assigned", "")
            .unwrap();
        assert_eq!(task_status(&store, "TASK-001"), "assigned");
    }

    #[test]
    fn review_cycle_approve() {
        let (board, store) = setup();
        register(&store, "lead1", "lead");
        register(&store, "dev1", "coder");
        board.create_task("lead1", "T", "", "dev1", "").unwrap();
        board
            .update_task("dev1", "TASK-001", "in_progress", "")
            .unwrap();

        board
            .submit_for_review("dev1", "TASK-001", "done", "src/lib.rs", "all green")
            .unwrap();
        assert_eq!(task_status(&store, "TASK-001"), "review");

        // The review payload is structured JSON in `result`.
        let result: String = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT result FROM tasks WHERE id = 'TASK-001'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["summary"], "done");
        assert_eq!(parsed["files_changed"], "src/lib.rs");

        let review_msg: String = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT content FROM messages WHERE to_agent = 'lead1'
                     ORDER BY id DESC LIMIT 1",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert!(review_msg.starts_with("[REVIEW] TASK-001: T"));

        board.approve_task("lead1", "TASK-001", "nice").unwrap();
        assert_eq!(task_status(&store, "TASK-001"), "completed");

        let approved: String = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT content FROM messages WHERE to_agent = 'dev1'
                     ORDER BY id DESC LIMIT 1",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert!(approved.starts_with("[APPROVED] TASK-001: T"));
        assert!(approved.contains("nice"));
    }

    #[test]
    fn review_cycle_reject_goes_back_to_in_progress() {
        let (board, store) = setup();
        register(&store, "lead1", "lead");
        register(&store, "dev1", "coder");
        board.create_task("lead1", "T", "", "dev1", "").unwrap();
        board
            .update_task("dev1", "TASK-001", "in_progress", "")
            .unwrap();
        board
            .submit_for_review("dev1", "TASK-001", "done", "", "")
            .unwrap();

        board
            .reject_task("lead1", "TASK-001", "tests missing")
            .unwrap();
        assert_eq!(task_status(&store, "TASK-001"), "in_progress");

        let rework: String = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT content FROM messages WHERE to_agent = 'dev1'
                     ORDER BY id DESC LIMIT 1",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert!(rework.starts_with("[REWORK] TASK-001: T"));
        assert!(rework.contains("REASON: tests missing"));
    }

    #[test]
    fn submit_for_review_requires_assignee_and_in_progress() {
        let (board, store) = setup();
        register(&store, "lead1", "lead");
        register(&store, "dev1", "coder");
        board.create_task("lead1", "T", "", "dev1", "").unwrap();

        let err = board
            .submit_for_review("dev1", "TASK-001", "too early", "", "")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        board
            .update_task("dev1", "TASK-001", "in_progress", "")
            .unwrap();
        let err = board
            .submit_for_review("lead1", "TASK-001", "not mine", "", "")
            .unwrap_err();
        assert!(matches!(err, Error::AssigneeOnly { .. }));
    }

    #[test]
    fn completed_is_terminal() {
        let (board, store) = setup();
        register(&store, "lead1", "lead");
        register(&store, "dev1", "coder");
        board.create_task("lead1", "T", "", "dev1", "").unwrap();
        board
            .update_task("dev1", "TASK-001", "in_progress", "")
            .unwrap();
        board
            .submit_for_review("dev1", "TASK-001", "s", "", "")
            .unwrap();
        board.approve_task("lead1", "TASK-001", "").unwrap();

        let err = board
            .update_task("lead1", "TASK-001", "assigned", "")
            .unwrap_err();
        assert!(err.caller_message().contains("none (terminal state)"));
    }

    #[test]
    fn failed_retry_path() {
        let (board, store) = setup();
        register(&store, "lead1", "lead");
        register(&store, "dev1", "coder");
        board.create_task("lead1", "T", "", "dev1", "").unwrap();
        board
            .update_task("dev1", "TASK-001", "in_progress", "")
            .unwrap();
        board
            .update_task("dev1", "TASK-001", "failed", "broke")
            .unwrap();
        board
            .update_task("lead1", "TASK-001", "assigned", "")
            .unwrap();
        assert_eq!(task_status(&store, "TASK-001"), "assigned");
    }

    #[test]
    fn list_hides_completed_by_default_and_warns_on_dead_assignee() {
        let (board, store) = setup();
        register(&store, "lead1", "lead");
        register(&store, "dev1", "coder");
        board.create_task("lead1", "done-one", "", "dev1", "").unwrap();
        board
            .update_task("dev1", "TASK-001", "in_progress", "")
            .unwrap();
        board
            .submit_for_review("dev1", "TASK-001", "s", "", "")
            .unwrap();
        board.approve_task("lead1", "TASK-001", "").unwrap();

        board.create_task("lead1", "live-one", "", "dev1", "").unwrap();
        board
            .update_task("dev1", "TASK-002", "in_progress", "")
            .unwrap();
        // Stale heartbeat far past the dead threshold.
        let old = (Utc::now() - chrono::Duration::seconds(3600)).to_rfc3339();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE agents SET heartbeat_at = ?1 WHERE name = 'dev1'",
                    params![old],
                )?;
                Ok(())
            })
            .unwrap();

        let listed: Vec<Task> = serde_json::from_str(&board.list_tasks("", "", "").unwrap()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "TASK-002");
        assert_eq!(
            listed[0].warning.as_deref(),
            Some("assigned agent appears dead")
        );

        let completed: Vec<Task> =
            serde_json::from_str(&board.list_tasks("completed", "", "").unwrap()).unwrap();
        assert_eq!(completed.len(), 1);
    }
}
