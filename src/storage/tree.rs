//! Filesystem tree repository.
//!
//! Persisted store of file and directory nodes per project, keyed by
//! project-relative path. Path comparisons are case-insensitive (the
//! `rel_path` column is `COLLATE NOCASE`).

use rusqlite::Connection;

use super::models::{now_unix, FileSystemNode};
use crate::error::StorageError;
use crate::Result;

const NODE_COLUMNS: &str = "id, project_id, parent_id, name, rel_path, is_dir, size, extension, \
                            created_at, modified_at";

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileSystemNode> {
    Ok(FileSystemNode {
        id: Some(row.get(0)?),
        project_id: row.get(1)?,
        parent_id: row.get(2)?,
        name: row.get(3)?,
        rel_path: row.get(4)?,
        is_dir: row.get(5)?,
        size: row.get(6)?,
        extension: row.get(7)?,
        created_at: row.get(8)?,
        modified_at: row.get(9)?,
    })
}

/// Get all nodes for a project.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_by_project(conn: &Connection, project_id: i64) -> Result<Vec<FileSystemNode>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM fs_nodes WHERE project_id = ? ORDER BY rel_path"
        ))
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let nodes = stmt
        .query_map([project_id], row_to_node)
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(nodes)
}

/// Get a node by project and relative path (case-insensitive).
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_by_path(
    conn: &Connection,
    project_id: i64,
    rel_path: &str,
) -> Result<Option<FileSystemNode>> {
    let result = conn.query_row(
        &format!("SELECT {NODE_COLUMNS} FROM fs_nodes WHERE project_id = ? AND rel_path = ?"),
        rusqlite::params![project_id, rel_path],
        row_to_node,
    );

    match result {
        Ok(node) => Ok(Some(node)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StorageError::Database(e.to_string()).into()),
    }
}

/// Get a node by id.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<FileSystemNode>> {
    let result = conn.query_row(
        &format!("SELECT {NODE_COLUMNS} FROM fs_nodes WHERE id = ?"),
        [id],
        row_to_node,
    );

    match result {
        Ok(node) => Ok(Some(node)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StorageError::Database(e.to_string()).into()),
    }
}

/// Get all nodes under a directory path, the directory excluded.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_subtree(
    conn: &Connection,
    project_id: i64,
    dir_rel_path: &str,
) -> Result<Vec<FileSystemNode>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM fs_nodes WHERE project_id = ? AND rel_path LIKE ? \
             ORDER BY rel_path"
        ))
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let pattern = format!("{dir_rel_path}/%");
    let nodes = stmt
        .query_map(rusqlite::params![project_id, pattern], row_to_node)
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(nodes)
}

/// Insert a node and return it with its assigned id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn insert_node(conn: &Connection, node: &FileSystemNode) -> Result<FileSystemNode> {
    conn.execute(
        "INSERT INTO fs_nodes (project_id, parent_id, name, rel_path, is_dir, size, extension, \
         created_at, modified_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            node.project_id,
            node.parent_id,
            node.name,
            node.rel_path,
            node.is_dir,
            node.size,
            node.extension,
            node.created_at,
            node.modified_at,
        ],
    )
    .map_err(|e| StorageError::Database(e.to_string()))?;

    let mut inserted = node.clone();
    inserted.id = Some(conn.last_insert_rowid());
    Ok(inserted)
}

/// Refresh size and modification time of an existing node.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn update_node_stat(conn: &Connection, id: i64, size: i64, modified_at: i64) -> Result<()> {
    conn.execute(
        "UPDATE fs_nodes SET size = ?, modified_at = ? WHERE id = ?",
        rusqlite::params![size, modified_at, id],
    )
    .map_err(|e| StorageError::Database(e.to_string()))?;
    Ok(())
}

/// Delete a node by id.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn delete_node(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM fs_nodes WHERE id = ?", [id])
        .map_err(|e| StorageError::Database(e.to_string()))?;
    Ok(())
}

/// Get or create the node for a file, creating any missing ancestor
/// directory nodes along the way.
///
/// A deep new file can arrive from the watcher before its parent
/// directories are known, so each ancestor is resolved or inserted
/// shallowest-first before the file node itself.
///
/// # Errors
///
/// Returns an error if a database operation fails.
pub fn get_or_create_file(
    conn: &Connection,
    project_id: i64,
    rel_path: &str,
    size: i64,
    created_at: i64,
    modified_at: i64,
) -> Result<FileSystemNode> {
    if let Some(existing) = get_by_path(conn, project_id, rel_path)? {
        return Ok(existing);
    }

    let parent_id = ensure_ancestors(conn, project_id, rel_path)?;

    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    let node = FileSystemNode::new(
        project_id,
        name,
        rel_path,
        false,
        size,
        created_at,
        modified_at,
    )
    .with_parent(parent_id);

    insert_node(conn, &node)
}

/// Resolve or create every ancestor directory of `rel_path`, returning the
/// id of the immediate parent (None for root-level paths).
fn ensure_ancestors(conn: &Connection, project_id: i64, rel_path: &str) -> Result<Option<i64>> {
    let Some(parent_path) = rel_path.rsplit_once('/').map(|(dir, _)| dir) else {
        return Ok(None);
    };

    let mut parent_id: Option<i64> = None;
    let mut current = String::new();

    for component in parent_path.split('/') {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(component);

        if let Some(existing) = get_by_path(conn, project_id, &current)? {
            parent_id = existing.id;
        } else {
            let now = now_unix();
            let dir = FileSystemNode::new(project_id, component, &current, true, 0, now, now)
                .with_parent(parent_id);
            let inserted = insert_node(conn, &dir)?;
            parent_id = inserted.id;
        }
    }

    Ok(parent_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{get_or_create_project, migrate, Database};

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let project_id = db
            .with_conn(|conn| {
                migrate(conn)?;
                Ok(get_or_create_project(conn, "demo", "/demo")?.id)
            })
            .unwrap();
        (db, project_id)
    }

    #[test]
    fn test_insert_and_get_by_path() {
        let (db, project_id) = setup();

        db.with_conn(|conn| {
            let node = FileSystemNode::new(project_id, "Foo.cs", "src/Foo.cs", false, 10, 1, 2);
            let inserted = insert_node(conn, &node)?;
            assert!(inserted.id.is_some());

            let found = get_by_path(conn, project_id, "src/Foo.cs")?.unwrap();
            assert_eq!(found.id, inserted.id);
            assert_eq!(found.extension, Some("cs".to_string()));

            // Case-insensitive lookup
            let found_ci = get_by_path(conn, project_id, "SRC/FOO.CS")?.unwrap();
            assert_eq!(found_ci.id, inserted.id);

            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_get_or_create_file_builds_ancestors() {
        let (db, project_id) = setup();

        db.with_conn(|conn| {
            let file = get_or_create_file(conn, project_id, "a/b/c/Deep.cs", 5, 1, 2)?;

            let a = get_by_path(conn, project_id, "a")?.unwrap();
            let b = get_by_path(conn, project_id, "a/b")?.unwrap();
            let c = get_by_path(conn, project_id, "a/b/c")?.unwrap();

            assert!(a.is_dir && b.is_dir && c.is_dir);
            assert_eq!(a.parent_id, None);
            assert_eq!(b.parent_id, a.id);
            assert_eq!(c.parent_id, b.id);
            assert_eq!(file.parent_id, c.id);

            // Second call resolves the same row
            let again = get_or_create_file(conn, project_id, "a/b/c/Deep.cs", 5, 1, 2)?;
            assert_eq!(again.id, file.id);
            assert_eq!(get_by_project(conn, project_id)?.len(), 4);

            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_update_node_stat() {
        let (db, project_id) = setup();

        db.with_conn(|conn| {
            let node = insert_node(
                conn,
                &FileSystemNode::new(project_id, "a.cs", "a.cs", false, 1, 1, 1),
            )?;
            update_node_stat(conn, node.id.unwrap(), 99, 42)?;

            let updated = get_by_id(conn, node.id.unwrap())?.unwrap();
            assert_eq!(updated.size, 99);
            assert_eq!(updated.modified_at, 42);

            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_get_subtree() {
        let (db, project_id) = setup();

        db.with_conn(|conn| {
            get_or_create_file(conn, project_id, "src/a/One.cs", 0, 0, 0)?;
            get_or_create_file(conn, project_id, "src/Two.cs", 0, 0, 0)?;
            get_or_create_file(conn, project_id, "other/Three.cs", 0, 0, 0)?;

            let subtree = get_subtree(conn, project_id, "src")?;
            let paths: Vec<_> = subtree.iter().map(|n| n.rel_path.as_str()).collect();

            assert_eq!(paths, vec!["src/Two.cs", "src/a", "src/a/One.cs"]);

            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_node_cascades_to_children() {
        let (db, project_id) = setup();

        db.with_conn(|conn| {
            get_or_create_file(conn, project_id, "src/a/One.cs", 0, 0, 0)?;
            let src = get_by_path(conn, project_id, "src")?.unwrap();

            delete_node(conn, src.id.unwrap())?;

            assert!(get_by_path(conn, project_id, "src/a")?.is_none());
            assert!(get_by_path(conn, project_id, "src/a/One.cs")?.is_none());

            Ok(())
        })
        .unwrap();
    }
}
