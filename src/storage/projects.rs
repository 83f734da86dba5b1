//! Project repository.

use rusqlite::Connection;

use super::models::{now_unix, Project};
use crate::error::StorageError;
use crate::Result;

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        root_path: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Get a project by id.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_project(conn: &Connection, id: i64) -> Result<Option<Project>> {
    let result = conn.query_row(
        "SELECT id, name, root_path, created_at FROM projects WHERE id = ?",
        [id],
        row_to_project,
    );

    match result {
        Ok(project) => Ok(Some(project)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StorageError::Database(e.to_string()).into()),
    }
}

/// Get a project by name.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_project_by_name(conn: &Connection, name: &str) -> Result<Option<Project>> {
    let result = conn.query_row(
        "SELECT id, name, root_path, created_at FROM projects WHERE name = ?",
        [name],
        row_to_project,
    );

    match result {
        Ok(project) => Ok(Some(project)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StorageError::Database(e.to_string()).into()),
    }
}

/// Get or create a project by its root path.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn get_or_create_project(conn: &Connection, name: &str, root_path: &str) -> Result<Project> {
    let existing = conn.query_row(
        "SELECT id, name, root_path, created_at FROM projects WHERE root_path = ?",
        [root_path],
        row_to_project,
    );

    match existing {
        Ok(project) => Ok(project),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            let created_at = now_unix();
            conn.execute(
                "INSERT INTO projects (name, root_path, created_at) VALUES (?, ?, ?)",
                rusqlite::params![name, root_path, created_at],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

            Ok(Project {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                root_path: root_path.to_string(),
                created_at,
            })
        }
        Err(e) => Err(StorageError::Database(e.to_string()).into()),
    }
}

/// List all registered projects.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn list_projects(conn: &Connection) -> Result<Vec<Project>> {
    let mut stmt = conn
        .prepare("SELECT id, name, root_path, created_at FROM projects ORDER BY id")
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let projects = stmt
        .query_map([], row_to_project)
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(projects)
}
