//! Resolver: maps user-supplied task references to a
//! canonical record.
//!
//! Each candidate form (opaque id, display id, short-id prefix) is a
//! dedicated lookup, tried in a fixed order, rather than one fuzzy
//! "guess the shape" regex.

use rusqlite::Connection;

use crate::errors::WorkflowError;
use crate::store::models::Task;
use crate::store::tasks;

/// Minimum length of a short-id reference the Resolver will attempt to
/// match as a prefix
const MIN_SHORT_ID_LEN: usize = 4;

pub enum Resolution {
    Found(Task),
    Ambiguous(Vec<Task>),
    NotFound,
}

/// `Resolve(ref) -> {record} | Ambiguous | NotFound`
pub fn resolve(conn: &Connection, reference: &str) -> Result<Resolution, WorkflowError> {
    // Full opaque id: exact match.
    if let Ok(task) = tasks::find_by_id(conn, reference) {
        return Ok(Resolution::Found(task));
    }

    // Display id of form <PREFIX>-<N>.
    if let Some((prefix, seq_str)) = reference.rsplit_once('-') {
        if let Ok(seq) = seq_str.parse::<i64>() {
            if !prefix.is_empty() {
                if let Some(task) = tasks::find_by_display(conn, prefix, seq)? {
                    return Ok(Resolution::Found(task));
                }
            }
        }
    }

    // Prefix-unique short id (minimum 4 characters of the opaque id).
    if reference.len() >= MIN_SHORT_ID_LEN {
        let candidates = tasks::find_by_id_prefix(conn, reference)?;
        return Ok(match candidates.len() {
            0 => Resolution::NotFound,
            1 => Resolution::Found(candidates.into_iter().next().unwrap()),
            _ => Resolution::Ambiguous(candidates),
        });
    }

    Ok(Resolution::NotFound)
}

/// Resolves a reference for callers that need exactly one task or an
/// error: collapses `Ambiguous`/`NotFound` into `WorkflowError` variants.
pub fn must_resolve(conn: &Connection, reference: &str) -> Result<Task, WorkflowError> {
    match resolve(conn, reference)? {
        Resolution::Found(task) => Ok(task),
        Resolution::NotFound => Err(WorkflowError::NotFound),
        Resolution::Ambiguous(candidates) => Err(WorkflowError::Ambiguous {
            candidates: candidates.iter().map(|t| t.display_id.clone()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Bus;
    use crate::errors::StoreError;
    use crate::store::Store;
    use crate::store::boards;
    use crate::store::models::ResumeMode;
    use crate::store::tasks::{self, NewTask};

    fn setup() -> (Store, String) {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let board = store
            .run_in_transaction(|tx| boards::create(tx, "Work", "WRK", vec![], None, ResumeMode::Command))
            .unwrap();
        (store, board.id)
    }

    #[test]
    fn resolves_by_full_opaque_id() {
        let (store, board_id) = setup();
        let task = store
            .run_in_transaction(|tx| {
                tasks::create(
                    tx,
                    &board_id,
                    NewTask {
                        title: "T".into(),
                        ..Default::default()
                    },
                )
            })
            .unwrap();
        let found = store.read::<_, WorkflowError, _>(|conn| must_resolve(conn, &task.id)).unwrap();
        assert_eq!(found.id, task.id);
    }

    #[test]
    fn resolves_by_display_id() {
        let (store, board_id) = setup();
        let task = store
            .run_in_transaction(|tx| {
                tasks::create(
                    tx,
                    &board_id,
                    NewTask {
                        title: "T".into(),
                        ..Default::default()
                    },
                )
            })
            .unwrap();
        let found = store
            .read::<_, WorkflowError, _>(|conn| must_resolve(conn, &task.display_id))
            .unwrap();
        assert_eq!(found.id, task.id);
    }

    #[test]
    fn unique_short_id_prefix_resolves_to_its_one_match() {
        let (store, board_id) = setup();
        let t1 = store
            .run_in_transaction(|tx| {
                tasks::create(tx, &board_id, NewTask { title: "A".into(), ..Default::default() })
            })
            .unwrap();
        let shared_prefix = &t1.id[..4];
        let found = store
            .read::<_, WorkflowError, _>(|conn| must_resolve(conn, shared_prefix))
            .unwrap();
        assert_eq!(found.id, t1.id);
    }

    #[test]
    fn ambiguous_short_id_lists_every_candidate() {
        // Real ids are random, so two tasks sharing a prefix can't be
        // arranged through the public API; rewrite one id directly to force
        // the collision this branch needs.
        let (store, board_id) = setup();
        let t1 = store
            .run_in_transaction(|tx| {
                tasks::create(tx, &board_id, NewTask { title: "A".into(), ..Default::default() })
            })
            .unwrap();
        let t2 = store
            .run_in_transaction(|tx| {
                tasks::create(tx, &board_id, NewTask { title: "B".into(), ..Default::default() })
            })
            .unwrap();
        let collided_id = format!("{}{}", &t1.id[..4], &t2.id[4..]);
        store
            .run_in_transaction(|tx| {
                tx.conn
                    .execute(
                        "UPDATE tasks SET id = ?1 WHERE id = ?2",
                        rusqlite::params![collided_id, t2.id],
                    )
                    .map(|_| ())
                    .map_err(StoreError::from)
            })
            .unwrap();

        let result = store
            .read::<_, WorkflowError, _>(|conn| resolve(conn, &t1.id[..4]))
            .unwrap();
        match result {
            Resolution::Ambiguous(candidates) => assert_eq!(candidates.len(), 2),
            _ => panic!("expected Ambiguous, got a different resolution"),
        }

        let err = store.read::<_, WorkflowError, _>(|conn| must_resolve(conn, &t1.id[..4]));
        assert!(matches!(err, Err(WorkflowError::Ambiguous { .. })));
    }

    #[test]
    fn not_found_for_unknown_reference() {
        let (store, _board_id) = setup();
        let result = store.read::<_, WorkflowError, _>(|conn| must_resolve(conn, "zzzzzzzzzzzzzzz"));
        assert!(matches!(result, Err(WorkflowError::NotFound)));
    }
}
