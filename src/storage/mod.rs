//! `SQLite` storage for the filesystem tree, work queue, and symbol index.
//!
//! This module provides persistent storage for:
//! - Projects and their filesystem nodes
//! - The durable index work queue
//! - Interned identifiers, declaration kinds, and declaration trees

mod connection;
mod models;
mod projects;
mod queue;
mod schema;
mod symbols;
mod tree;

pub use connection::Database;
pub use models::{
    extension_of, now_unix, DeclKind, Declaration, FileSystemNode, Project, QueueItem, QueueStatus,
};
pub use projects::{get_or_create_project, get_project, get_project_by_name, list_projects};
pub use queue::{count_by_status, enqueue, get_pending, recover_interrupted, set_status};
pub use schema::{migrate, verify_schema, SCHEMA_VERSION};
pub use symbols::{
    delete_by_file_node, delete_declaration, get_by_file_node, get_or_create_declaration,
    intern_identifier, kind_ids, DeclarationCandidate,
};
pub use tree::{
    delete_node, get_by_id, get_by_path, get_by_project, get_or_create_file, get_subtree,
    insert_node, update_node_stat,
};

/// Initialize storage with migrations.
///
/// # Errors
///
/// Returns an error if database initialization fails.
pub fn init_storage(db: &Database) -> crate::Result<()> {
    db.with_conn(|conn| {
        migrate(conn)?;
        verify_schema(conn)?;
        tracing::info!("Storage initialized, schema version {SCHEMA_VERSION}");
        Ok(())
    })
}
