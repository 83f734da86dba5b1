//! Symbol repositories: interned identifiers, declaration kinds, and the
//! per-file declaration tree.
//!
//! Declaration rows are created and deleted exclusively by the index
//! processor while handling one queue item; nothing else mutates them.

use std::collections::HashMap;

use rusqlite::Connection;

use super::models::{DeclKind, Declaration};
use crate::error::StorageError;
use crate::Result;

const DECL_COLUMNS: &str =
    "id, parent_id, project_id, node_id, identifier_id, kind_id, line_start, line_end";

fn row_to_declaration(row: &rusqlite::Row<'_>) -> rusqlite::Result<Declaration> {
    Ok(Declaration {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        project_id: row.get(2)?,
        node_id: row.get(3)?,
        identifier_id: row.get(4)?,
        kind_id: row.get(5)?,
        line_start: row.get(6)?,
        line_end: row.get(7)?,
    })
}

/// Intern an identifier name: same text, same id, created lazily.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn intern_identifier(conn: &Connection, name: &str) -> Result<i64> {
    let existing = conn.query_row("SELECT id FROM identifiers WHERE name = ?", [name], |row| {
        row.get(0)
    });

    match existing {
        Ok(id) => Ok(id),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            conn.execute("INSERT INTO identifiers (name) VALUES (?)", [name])
                .map_err(|e| StorageError::Database(e.to_string()))?;
            Ok(conn.last_insert_rowid())
        }
        Err(e) => Err(StorageError::Database(e.to_string()).into()),
    }
}

/// Load the seeded kind rows as a `DeclKind` -> row id map.
///
/// # Errors
///
/// Returns an error if the database query fails or the set is incomplete.
pub fn kind_ids(conn: &Connection) -> Result<HashMap<DeclKind, i64>> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM identifier_kinds")
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let mut map = HashMap::new();
    for (id, name) in rows {
        if let Some(kind) = DeclKind::parse(&name) {
            map.insert(kind, id);
        }
    }

    for kind in DeclKind::ALL {
        if !map.contains_key(&kind) {
            return Err(StorageError::not_found("identifier_kind", kind.as_str()).into());
        }
    }

    Ok(map)
}

/// A declaration candidate to be looked up or inserted.
#[derive(Debug, Clone)]
pub struct DeclarationCandidate {
    pub parent_id: Option<i64>,
    pub project_id: i64,
    pub node_id: i64,
    pub identifier_id: i64,
    pub kind_id: i64,
    pub line_start: i64,
    pub line_end: i64,
}

/// Get or create a declaration row keyed by (parent, identifier, kind,
/// file node). An existing match has only its line span refreshed.
///
/// # Errors
///
/// Returns an error if a database operation fails.
pub fn get_or_create_declaration(
    conn: &Connection,
    candidate: &DeclarationCandidate,
) -> Result<i64> {
    let existing = conn.query_row(
        "SELECT id FROM declarations \
         WHERE node_id = ? AND identifier_id = ? AND kind_id = ? AND parent_id IS ?",
        rusqlite::params![
            candidate.node_id,
            candidate.identifier_id,
            candidate.kind_id,
            candidate.parent_id,
        ],
        |row| row.get::<_, i64>(0),
    );

    match existing {
        Ok(id) => {
            conn.execute(
                "UPDATE declarations SET line_start = ?, line_end = ? WHERE id = ?",
                rusqlite::params![candidate.line_start, candidate.line_end, id],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
            Ok(id)
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            conn.execute(
                "INSERT INTO declarations (parent_id, project_id, node_id, identifier_id, \
                 kind_id, line_start, line_end) VALUES (?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    candidate.parent_id,
                    candidate.project_id,
                    candidate.node_id,
                    candidate.identifier_id,
                    candidate.kind_id,
                    candidate.line_start,
                    candidate.line_end,
                ],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
            Ok(conn.last_insert_rowid())
        }
        Err(e) => Err(StorageError::Database(e.to_string()).into()),
    }
}

/// Get all declarations for a file node.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_by_file_node(conn: &Connection, node_id: i64) -> Result<Vec<Declaration>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {DECL_COLUMNS} FROM declarations WHERE node_id = ? ORDER BY id"
        ))
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let declarations = stmt
        .query_map([node_id], row_to_declaration)
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(declarations)
}

/// Delete all declarations for a file node. Returns the number removed.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn delete_by_file_node(conn: &Connection, node_id: i64) -> Result<usize> {
    let deleted = conn
        .execute("DELETE FROM declarations WHERE node_id = ?", [node_id])
        .map_err(|e| StorageError::Database(e.to_string()))?;
    Ok(deleted)
}

/// Delete one declaration by id; children cascade.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn delete_declaration(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM declarations WHERE id = ?", [id])
        .map_err(|e| StorageError::Database(e.to_string()))?;
    Ok(())
}
