//! Applies coalesced change events to the persisted tree and queue.

use std::path::Path;
use std::time::SystemTime;

use rusqlite::Connection;

use super::events::{WatchEvent, WatchEventKind};
use crate::storage::{self, Database, Project};
use crate::sync::FilterPolicy;
use crate::Result;

fn unix_secs(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(0))
        .unwrap_or(0)
}

/// Apply a drained batch of events in one transaction.
///
/// Returns the number of queue items created. Changed paths are upserted
/// into the tree and enqueued; removed paths have their deletion items
/// enqueued before the node rows disappear, so the processor can still
/// find and remove their declarations.
///
/// # Errors
///
/// Returns an error if a database operation fails.
pub fn flush(
    db: &Database,
    project: &Project,
    policy: &FilterPolicy,
    events: &[WatchEvent],
) -> Result<usize> {
    let root = Path::new(&project.root_path);

    db.with_transaction(|conn| {
        let mut enqueued = 0;
        for event in events {
            enqueued += match event.kind {
                WatchEventKind::Changed => apply_changed(conn, project, policy, root, event)?,
                WatchEventKind::Removed => apply_removed(conn, project, event)?,
            };
        }
        Ok(enqueued)
    })
}

fn apply_changed(
    conn: &Connection,
    project: &Project,
    policy: &FilterPolicy,
    root: &Path,
    event: &WatchEvent,
) -> Result<usize> {
    let abs = root.join(&event.rel_path);

    // The path may have vanished again since the event fired; a later
    // remove notification will clean up the node if one exists.
    let Ok(metadata) = std::fs::metadata(&abs) else {
        return Ok(0);
    };

    // New directories materialize as ancestors of the files inside them.
    if metadata.is_dir() {
        return Ok(0);
    }

    let name = event.rel_path.rsplit('/').next().unwrap_or(&event.rel_path);
    if !policy.allows_file(name) {
        return Ok(0);
    }

    let size = i64::try_from(metadata.len()).unwrap_or(0);
    let modified = metadata.modified().map(unix_secs).unwrap_or(0);
    let created = metadata.created().map(unix_secs).unwrap_or(modified);

    let node = storage::get_or_create_file(
        conn,
        project.id,
        &event.rel_path,
        size,
        created,
        modified,
    )?;
    if let Some(id) = node.id {
        storage::update_node_stat(conn, id, size, modified)?;
        storage::enqueue(conn, project.id, id, &event.rel_path)?;
        tracing::debug!(path = %event.rel_path, "Enqueued changed file");
        return Ok(1);
    }

    Ok(0)
}

fn apply_removed(conn: &Connection, project: &Project, event: &WatchEvent) -> Result<usize> {
    let Some(node) = storage::get_by_path(conn, project.id, &event.rel_path)? else {
        // Never tracked (filtered, or already gone): nothing to do.
        return Ok(0);
    };

    let mut enqueued = 0;

    if node.is_dir {
        for child in storage::get_subtree(conn, project.id, &event.rel_path)? {
            if !child.is_dir {
                if let Some(id) = child.id {
                    storage::enqueue(conn, project.id, id, &child.rel_path)?;
                    enqueued += 1;
                }
            }
        }
    } else if let Some(id) = node.id {
        storage::enqueue(conn, project.id, id, &event.rel_path)?;
        enqueued += 1;
    }

    if let Some(id) = node.id {
        // Child rows go with it via the parent_id cascade.
        storage::delete_node(conn, id)?;
    }
    tracing::debug!(path = %event.rel_path, items = enqueued, "Removed path from tree");

    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterSettings;
    use crate::storage::{get_or_create_project, init_storage, QueueStatus};
    use std::fs;
    use tempfile::TempDir;

    fn setup(tmp: &TempDir) -> (Database, Project, FilterPolicy) {
        let db = Database::open_in_memory().unwrap();
        init_storage(&db).unwrap();
        let project = db
            .with_conn(|conn| {
                Ok(get_or_create_project(
                    conn,
                    "demo",
                    &tmp.path().to_string_lossy(),
                )?)
            })
            .unwrap();
        let policy = FilterPolicy::from_settings(&FilterSettings::default());
        (db, project, policy)
    }

    fn changed(rel: &str) -> WatchEvent {
        WatchEvent {
            rel_path: rel.to_string(),
            kind: WatchEventKind::Changed,
        }
    }

    fn removed(rel: &str) -> WatchEvent {
        WatchEvent {
            rel_path: rel.to_string(),
            kind: WatchEventKind::Removed,
        }
    }

    #[test]
    fn test_changed_file_creates_node_and_queue_item() {
        let tmp = TempDir::new().unwrap();
        let (db, project, policy) = setup(&tmp);

        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/Foo.cs"), "class A {}").unwrap();

        let count = flush(&db, &project, &policy, &[changed("src/Foo.cs")]).unwrap();
        assert_eq!(count, 1);

        db.with_conn(|conn| {
            let node = storage::get_by_path(conn, project.id, "src/Foo.cs")?.unwrap();
            assert!(!node.is_dir);
            assert!(storage::get_by_path(conn, project.id, "src")?.unwrap().is_dir);
            assert_eq!(storage::count_by_status(conn, QueueStatus::Pending)?, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_filtered_file_ignored() {
        let tmp = TempDir::new().unwrap();
        let (db, project, policy) = setup(&tmp);

        fs::write(tmp.path().join(".env"), "SECRET=1").unwrap();

        let count = flush(&db, &project, &policy, &[changed(".env")]).unwrap();
        assert_eq!(count, 0);

        db.with_conn(|conn| {
            assert!(storage::get_by_path(conn, project.id, ".env")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_removed_file_enqueues_before_delete() {
        let tmp = TempDir::new().unwrap();
        let (db, project, policy) = setup(&tmp);

        fs::write(tmp.path().join("Foo.cs"), "class A {}").unwrap();
        flush(&db, &project, &policy, &[changed("Foo.cs")]).unwrap();

        let node_id = db
            .with_conn(|conn| {
                let node = storage::get_by_path(conn, project.id, "Foo.cs")?.unwrap();
                Ok(node.id.unwrap())
            })
            .unwrap();

        fs::remove_file(tmp.path().join("Foo.cs")).unwrap();
        let count = flush(&db, &project, &policy, &[removed("Foo.cs")]).unwrap();
        assert_eq!(count, 1);

        db.with_conn(|conn| {
            assert!(storage::get_by_path(conn, project.id, "Foo.cs")?.is_none());
            // The deletion item still names the vanished node
            let pending = storage::get_pending(conn, Some(project.id), 20)?;
            assert!(pending.iter().any(|item| item.node_id == node_id));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_removed_directory_enqueues_each_file() {
        let tmp = TempDir::new().unwrap();
        let (db, project, policy) = setup(&tmp);

        fs::create_dir_all(tmp.path().join("src/sub")).unwrap();
        fs::write(tmp.path().join("src/One.cs"), "class A {}").unwrap();
        fs::write(tmp.path().join("src/sub/Two.cs"), "class B {}").unwrap();
        flush(
            &db,
            &project,
            &policy,
            &[changed("src/One.cs"), changed("src/sub/Two.cs")],
        )
        .unwrap();

        db.with_conn(|conn| {
            // Drain the two creation items out of the way
            for item in storage::get_pending(conn, None, 20)? {
                storage::set_status(conn, item.id, QueueStatus::Completed, None)?;
            }
            Ok(())
        })
        .unwrap();

        fs::remove_dir_all(tmp.path().join("src")).unwrap();
        let count = flush(&db, &project, &policy, &[removed("src")]).unwrap();
        assert_eq!(count, 2);

        db.with_conn(|conn| {
            assert!(storage::get_by_project(conn, project.id)?.is_empty());
            assert_eq!(storage::count_by_status(conn, QueueStatus::Pending)?, 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_untracked_removal_is_noop() {
        let tmp = TempDir::new().unwrap();
        let (db, project, policy) = setup(&tmp);

        let count = flush(&db, &project, &policy, &[removed("never/Seen.cs")]).unwrap();
        assert_eq!(count, 0);
    }
}
