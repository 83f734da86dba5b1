//! Read-side queries over the index.
//!
//! Everything here is a plain read: declaration listings for the query
//! command and counts for the status command. Source text is fetched
//! from disk on demand using the stored line spans, never persisted.

use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;

use crate::error::StorageError;
use crate::storage::{self, DeclKind, QueueStatus};
use crate::{Error, Result};

/// One declaration joined with its name, kind, and file path.
#[derive(Debug, Clone, Serialize)]
pub struct DeclarationSummary {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub kind: DeclKind,
    pub rel_path: String,
    pub line_start: i64,
    pub line_end: i64,
}

/// Optional narrowing for [`list_declarations`].
#[derive(Debug, Clone, Default)]
pub struct DeclarationFilter {
    /// Case-insensitive substring match on the declaration name.
    pub name_contains: Option<String>,
    pub kind: Option<DeclKind>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// List declarations for a project, optionally narrowed by name and kind.
///
/// Results are ordered by file path, then position in the file.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn list_declarations(
    conn: &Connection,
    project_id: i64,
    filter: &DeclarationFilter,
) -> Result<Vec<DeclarationSummary>> {
    let mut sql = String::from(
        "SELECT d.id, d.parent_id, i.name, k.name, n.rel_path, d.line_start, d.line_end \
         FROM declarations d \
         JOIN identifiers i ON i.id = d.identifier_id \
         JOIN identifier_kinds k ON k.id = d.kind_id \
         JOIN fs_nodes n ON n.id = d.node_id \
         WHERE d.project_id = ?",
    );
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(project_id)];

    if let Some(ref substring) = filter.name_contains {
        sql.push_str(" AND i.name LIKE ?");
        params.push(Box::new(format!("%{substring}%")));
    }
    if let Some(kind) = filter.kind {
        sql.push_str(" AND k.name = ?");
        params.push(Box::new(kind.as_str()));
    }

    sql.push_str(" ORDER BY n.rel_path, d.line_start, d.id LIMIT ? OFFSET ?");
    let limit = filter
        .limit
        .and_then(|l| i64::try_from(l).ok())
        .unwrap_or(-1);
    params.push(Box::new(limit));
    params.push(Box::new(i64::try_from(filter.offset).unwrap_or(0)));

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, parent_id, name, kind_name, rel_path, line_start, line_end) in rows {
        let kind = DeclKind::parse(&kind_name)
            .ok_or_else(|| StorageError::not_found("identifier_kind", kind_name.clone()))?;
        out.push(DeclarationSummary {
            id,
            parent_id,
            name,
            kind,
            rel_path,
            line_start,
            line_end,
        });
    }

    Ok(out)
}

/// Read the source text of a declaration from disk.
///
/// `line_start` and `line_end` are zero-based and inclusive, matching
/// the stored spans.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the span lies beyond
/// the end of the file.
pub fn declaration_source(
    root: &Path,
    rel_path: &str,
    line_start: i64,
    line_end: i64,
) -> Result<String> {
    let text = std::fs::read_to_string(root.join(rel_path))?;

    let start = usize::try_from(line_start)
        .map_err(|_| Error::internal(format!("bad line span {line_start}..{line_end}")))?;
    let end = usize::try_from(line_end)
        .map_err(|_| Error::internal(format!("bad line span {line_start}..{line_end}")))?;

    let lines: Vec<&str> = text.lines().collect();
    if start > end || end >= lines.len() {
        return Err(Error::internal(format!(
            "span {line_start}..{line_end} out of range for '{rel_path}' ({} lines)",
            lines.len()
        )));
    }

    Ok(lines[start..=end].join("\n"))
}

/// Queue counts for one project, for the status command.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub name: String,
    pub root_path: String,
    pub nodes: i64,
    pub declarations: i64,
}

/// Overall index status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub projects: Vec<ProjectStatus>,
    pub queue_pending: i64,
    pub queue_processing: i64,
    pub queue_completed: i64,
    pub queue_failed: i64,
}

/// Build the status report: per-project sizes and queue depths.
///
/// # Errors
///
/// Returns an error if a database query fails.
pub fn status_report(conn: &Connection) -> Result<StatusReport> {
    let mut projects = Vec::new();
    for project in storage::list_projects(conn)? {
        let nodes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM fs_nodes WHERE project_id = ?",
                [project.id],
                |row| row.get(0),
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let declarations: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM declarations WHERE project_id = ?",
                [project.id],
                |row| row.get(0),
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        projects.push(ProjectStatus {
            name: project.name,
            root_path: project.root_path,
            nodes,
            declarations,
        });
    }

    Ok(StatusReport {
        projects,
        queue_pending: storage::count_by_status(conn, QueueStatus::Pending)?,
        queue_processing: storage::count_by_status(conn, QueueStatus::Processing)?,
        queue_completed: storage::count_by_status(conn, QueueStatus::Completed)?,
        queue_failed: storage::count_by_status(conn, QueueStatus::Failed)?,
    })
}
