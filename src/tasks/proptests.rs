//! Property-based tests for the task transition graph

use super::*;
use crate::db::TaskStatus;
use crate::notify::Notifier;
use crate::session::SessionRegistry;
use proptest::prelude::*;

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::Assigned),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Review),
        Just(TaskStatus::Completed),
        Just(TaskStatus::Failed),
    ]
}

fn board_with_task() -> (TaskBoard, Store) {
    let store = Store::open_in_memory().unwrap();
    let sessions = SessionRegistry::new();
    let notifier = Notifier::new(store.clone(), sessions);
    let board = TaskBoard::new(store.clone(), notifier);
    store
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO agents (name, registered_at, last_seen, role)
                 VALUES ('lead1', 't', 't', 'lead')",
                [],
            )?;
            conn.execute(
                "INSERT INTO agents (name, registered_at, last_seen, role)
                 VALUES ('dev1', 't', 't', 'coder')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
    board.create_task("lead1", "prop", "", "dev1", "").unwrap();
    (board, store)
}

fn current_status(store: &Store) -> TaskStatus {
    let raw: String = store
        .with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT status FROM tasks WHERE id = 'TASK-001'",
                [],
                |r| r.get(0),
            )?)
        })
        .unwrap();
    TaskStatus::parse(&raw).unwrap()
}

proptest! {
    /// The authority lookup agrees exactly with the table.
    #[test]
    fn authority_matches_table(from in arb_status(), to in arb_status()) {
        let expected = TRANSITIONS
            .iter()
            .find(|(f, t, _)| *f == from && *t == to)
            .map(|(_, _, a)| *a);
        prop_assert_eq!(transition_authority(from, to), expected);
    }

    /// Every edge's source lists the edge target in its valid-next set.
    #[test]
    fn valid_next_is_consistent(from in arb_status(), to in arb_status()) {
        let in_table = transition_authority(from, to).is_some();
        prop_assert_eq!(valid_next(from).contains(&to), in_table);
    }

    /// Driving a live board with arbitrary attempts only ever produces
    /// status sequences that are paths in the transition graph.
    #[test]
    fn status_history_is_a_graph_path(attempts in proptest::collection::vec(
        (prop_oneof![Just("lead1"), Just("dev1")], arb_status()),
        0..25,
    )) {
        let (board, store) = board_with_task();
        let mut history = vec![current_status(&store)];

        for (actor, target) in attempts {
            let before = current_status(&store);
            let outcome = board.update_task(actor, "TASK-001", target.as_str(), "");
            let after = current_status(&store);

            if outcome.is_ok() {
                prop_assert_eq!(after, target);
                prop_assert!(transition_authority(before, target).is_some());
                history.push(after);
            } else {
                // Rejected attempts must not move the task.
                prop_assert_eq!(after, before);
            }
        }

        for pair in history.windows(2) {
            prop_assert!(transition_authority(pair[0], pair[1]).is_some());
        }
    }
}

#[test]
fn completed_has_no_outgoing_edges() {
    assert!(valid_next(TaskStatus::Completed).is_empty());
}
