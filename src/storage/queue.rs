//! Durable index work queue.
//!
//! Decouples "something changed" from "re-derive its symbols". Items are
//! created by the synchronizer and the watcher and drained by the index
//! processor in bounded batches.

use rusqlite::Connection;

use super::models::{now_unix, QueueItem, QueueStatus};
use crate::error::StorageError;
use crate::Result;

const ITEM_COLUMNS: &str = "id, project_id, node_id, rel_path, status, enqueued_at, error";

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    let status: String = row.get(4)?;
    Ok(QueueItem {
        id: row.get(0)?,
        project_id: row.get(1)?,
        node_id: row.get(2)?,
        rel_path: row.get(3)?,
        status: QueueStatus::parse(&status).unwrap_or(QueueStatus::Failed),
        enqueued_at: row.get(5)?,
        error: row.get(6)?,
    })
}

/// Enqueue a work item for a filesystem node.
///
/// Skips the insert when an identical Pending item already exists for the
/// node, so a burst of flushes cannot pile up duplicate work.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn enqueue(conn: &Connection, project_id: i64, node_id: i64, rel_path: &str) -> Result<i64> {
    let pending: Option<i64> = conn
        .query_row(
            "SELECT id FROM index_queue WHERE node_id = ? AND status = 'Pending'",
            [node_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StorageError::Database(other.to_string())),
        })?;

    if let Some(id) = pending {
        return Ok(id);
    }

    conn.execute(
        "INSERT INTO index_queue (project_id, node_id, rel_path, status, enqueued_at) \
         VALUES (?, ?, ?, 'Pending', ?)",
        rusqlite::params![project_id, node_id, rel_path, now_unix()],
    )
    .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(conn.last_insert_rowid())
}

/// Fetch the next batch of Pending items, oldest first, optionally scoped
/// to one project.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_pending(
    conn: &Connection,
    project_id: Option<i64>,
    batch_size: usize,
) -> Result<Vec<QueueItem>> {
    let batch = i64::try_from(batch_size).unwrap_or(i64::MAX);

    let mut stmt;
    let items = if let Some(project_id) = project_id {
        stmt = conn
            .prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM index_queue \
                 WHERE status = 'Pending' AND project_id = ? \
                 ORDER BY enqueued_at, id LIMIT ?"
            ))
            .map_err(|e| StorageError::Database(e.to_string()))?;
        stmt.query_map(rusqlite::params![project_id, batch], row_to_item)
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
    } else {
        stmt = conn
            .prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM index_queue WHERE status = 'Pending' \
                 ORDER BY enqueued_at, id LIMIT ?"
            ))
            .map_err(|e| StorageError::Database(e.to_string()))?;
        stmt.query_map([batch], row_to_item)
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
    };

    items.map_err(|e| StorageError::Database(e.to_string()).into())
}

/// Move an item to a new status, storing an error message for failures.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn set_status(
    conn: &Connection,
    item_id: i64,
    status: QueueStatus,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE index_queue SET status = ?, error = ? WHERE id = ?",
        rusqlite::params![status.as_str(), error, item_id],
    )
    .map_err(|e| StorageError::Database(e.to_string()))?;
    Ok(())
}

/// Count items per status, for the status command and tests.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn count_by_status(conn: &Connection, status: QueueStatus) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM index_queue WHERE status = ?",
        [status.as_str()],
        |row| row.get(0),
    )
    .map_err(|e| StorageError::Database(e.to_string()).into())
}

/// Recover items left in Processing by a previous crash.
///
/// An item never re-enters Pending; instead each stuck item is marked
/// Failed with an explanatory message and a fresh Pending item is
/// enqueued for the same node. Returns the number of recovered items.
///
/// # Errors
///
/// Returns an error if a database operation fails.
pub fn recover_interrupted(conn: &Connection) -> Result<usize> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM index_queue WHERE status = 'Processing'"
        ))
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let stuck = stmt
        .query_map([], row_to_item)
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    for item in &stuck {
        set_status(
            conn,
            item.id,
            QueueStatus::Failed,
            Some("interrupted by restart"),
        )?;
        enqueue(conn, item.project_id, item.node_id, &item.rel_path)?;
    }

    if !stuck.is_empty() {
        tracing::warn!(count = stuck.len(), "Re-enqueued interrupted queue items");
    }

    Ok(stuck.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{migrate, Database};

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| migrate(conn)).unwrap();
        db
    }

    #[test]
    fn test_enqueue_and_get_pending() {
        let db = setup_db();

        db.with_conn(|conn| {
            enqueue(conn, 1, 10, "src/a.cs")?;
            enqueue(conn, 1, 11, "src/b.cs")?;
            enqueue(conn, 2, 12, "c.cs")?;

            let all = get_pending(conn, None, 20)?;
            assert_eq!(all.len(), 3);
            assert_eq!(all[0].rel_path, "src/a.cs");

            let scoped = get_pending(conn, Some(2), 20)?;
            assert_eq!(scoped.len(), 1);
            assert_eq!(scoped[0].node_id, 12);

            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_enqueue_dedups_pending() {
        let db = setup_db();

        db.with_conn(|conn| {
            let first = enqueue(conn, 1, 10, "src/a.cs")?;
            let second = enqueue(conn, 1, 10, "src/a.cs")?;
            assert_eq!(first, second);
            assert_eq!(get_pending(conn, None, 20)?.len(), 1);

            // A completed item does not block a new one
            set_status(conn, first, QueueStatus::Completed, None)?;
            let third = enqueue(conn, 1, 10, "src/a.cs")?;
            assert_ne!(first, third);

            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_batch_size_limit() {
        let db = setup_db();

        db.with_conn(|conn| {
            for node_id in 0..30 {
                enqueue(conn, 1, node_id, "x.cs")?;
            }
            assert_eq!(get_pending(conn, None, 20)?.len(), 20);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_status_transitions() {
        let db = setup_db();

        db.with_conn(|conn| {
            let id = enqueue(conn, 1, 10, "a.cs")?;

            set_status(conn, id, QueueStatus::Processing, None)?;
            assert_eq!(count_by_status(conn, QueueStatus::Processing)?, 1);
            assert!(get_pending(conn, None, 20)?.is_empty());

            set_status(conn, id, QueueStatus::Failed, Some("parse failure: boom"))?;
            assert_eq!(count_by_status(conn, QueueStatus::Failed)?, 1);

            let error: String = conn
                .query_row("SELECT error FROM index_queue WHERE id = ?", [id], |row| {
                    row.get(0)
                })
                .unwrap();
            assert!(error.contains("boom"));

            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_recover_interrupted() {
        let db = setup_db();

        db.with_conn(|conn| {
            let id = enqueue(conn, 1, 10, "a.cs")?;
            set_status(conn, id, QueueStatus::Processing, None)?;

            let recovered = recover_interrupted(conn)?;
            assert_eq!(recovered, 1);

            assert_eq!(count_by_status(conn, QueueStatus::Failed)?, 1);
            let pending = get_pending(conn, None, 20)?;
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].node_id, 10);
            assert_ne!(pending[0].id, id);

            Ok(())
        })
        .unwrap();
    }
}
