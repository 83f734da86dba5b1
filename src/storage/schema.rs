//! Database schema definitions and migrations.
//!
//! Provides versioned schema migrations for safe database upgrades.

use rusqlite::Connection;

use super::models::DeclKind;
use crate::error::StorageError;
use crate::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Run all pending migrations.
///
/// # Errors
///
/// Returns an error if migrations fail.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| StorageError::Migration(format!("failed to create migrations table: {e}")))?;

    let current_version = get_current_version(conn)?;
    tracing::info!(
        current = current_version,
        target = SCHEMA_VERSION,
        "Checking database migrations"
    );

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    seed_identifier_kinds(conn)?;

    Ok(())
}

/// Get the current schema version.
fn get_current_version(conn: &Connection) -> Result<i32> {
    let result = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(version) => Ok(version),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(StorageError::Migration(format!("failed to get version: {e}")).into()),
    }
}

/// Record a migration as applied.
fn record_migration(conn: &Connection, version: i32) -> Result<()> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let now_i64 = i64::try_from(now).unwrap_or_default();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)",
        rusqlite::params![version, now_i64],
    )
    .map_err(|e| StorageError::Migration(format!("failed to record migration: {e}")))?;

    Ok(())
}

/// Migration v1: Initial schema with all tables.
///
/// Queue items and declarations reference `fs_nodes.id` without a foreign
/// key: a deletion queue item must outlive the node row it points at so
/// the processor can still remove the node's declarations.
fn migrate_v1(conn: &Connection) -> Result<()> {
    tracing::info!("Applying migration v1: Initial schema");

    conn.execute_batch(
        r"
        -- Projects (root folders being indexed)
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            root_path TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );

        -- Filesystem nodes (files and directories, project-relative)
        CREATE TABLE IF NOT EXISTS fs_nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            parent_id INTEGER REFERENCES fs_nodes(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            rel_path TEXT NOT NULL COLLATE NOCASE,
            is_dir INTEGER NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            extension TEXT,
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            UNIQUE(project_id, rel_path)
        );

        CREATE INDEX IF NOT EXISTS idx_fs_nodes_project ON fs_nodes(project_id);
        CREATE INDEX IF NOT EXISTS idx_fs_nodes_parent ON fs_nodes(parent_id);

        -- Durable indexing work queue
        CREATE TABLE IF NOT EXISTS index_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            node_id INTEGER NOT NULL,
            rel_path TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Pending'
                CHECK(status IN ('Pending', 'Processing', 'Completed', 'Failed')),
            enqueued_at INTEGER NOT NULL,
            error TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_queue_status ON index_queue(status, project_id);
        CREATE INDEX IF NOT EXISTS idx_queue_node ON index_queue(node_id);

        -- Interned declaration names
        CREATE TABLE IF NOT EXISTS identifiers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        -- Closed set of declaration kinds, seeded once
        CREATE TABLE IF NOT EXISTS identifier_kinds (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        -- Per-file declaration tree
        CREATE TABLE IF NOT EXISTS declarations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_id INTEGER REFERENCES declarations(id) ON DELETE CASCADE,
            project_id INTEGER NOT NULL,
            node_id INTEGER NOT NULL,
            identifier_id INTEGER NOT NULL REFERENCES identifiers(id),
            kind_id INTEGER NOT NULL REFERENCES identifier_kinds(id),
            line_start INTEGER NOT NULL,
            line_end INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_declarations_node ON declarations(node_id);
        CREATE INDEX IF NOT EXISTS idx_declarations_project ON declarations(project_id);
        CREATE INDEX IF NOT EXISTS idx_declarations_identifier ON declarations(identifier_id);
        ",
    )
    .map_err(|e| StorageError::Migration(format!("v1 migration failed: {e}")))?;

    record_migration(conn, 1)?;
    tracing::info!("Migration v1 complete");

    Ok(())
}

/// Seed the fixed set of identifier kinds. Idempotent.
fn seed_identifier_kinds(conn: &Connection) -> Result<()> {
    for kind in DeclKind::ALL {
        conn.execute(
            "INSERT OR IGNORE INTO identifier_kinds (name) VALUES (?)",
            [kind.as_str()],
        )
        .map_err(|e| StorageError::Migration(format!("failed to seed kinds: {e}")))?;
    }
    Ok(())
}

/// Verify all expected tables exist.
///
/// # Errors
///
/// Returns an error if any expected table is missing from the schema.
pub fn verify_schema(conn: &Connection) -> Result<()> {
    let tables = [
        "projects",
        "fs_nodes",
        "index_queue",
        "identifiers",
        "identifier_kinds",
        "declarations",
    ];

    for table in tables {
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?",
                [table],
                |_| Ok(true),
            )
            .unwrap_or(false);

        if !exists {
            return Err(StorageError::Migration(format!("table '{table}' not found")).into());
        }
    }

    tracing::debug!("Schema verification passed");
    Ok(())
}
