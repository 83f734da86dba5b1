//! Full filesystem reconciliation.
//!
//! Compares the persisted tree for a project against the real filesystem
//! and applies the difference: the authority used at startup and for a
//! manual resync, as opposed to the watcher's incremental event handling.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::filter::FilterPolicy;
use crate::error::SyncError;
use crate::storage::{self, Database, FileSystemNode, Project};
use crate::Result;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub duration_ms: u64,
}

/// Transient node built from a real directory entry.
#[derive(Debug)]
struct ScannedEntry {
    name: String,
    rel_path: String,
    is_dir: bool,
    size: i64,
    created_at: i64,
    modified_at: i64,
}

impl ScannedEntry {
    fn depth(&self) -> usize {
        self.rel_path.split('/').count()
    }
}

fn unix_secs(time: std::io::Result<SystemTime>) -> i64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(0))
        .unwrap_or(0)
}

/// Reject paths that could escape the project root or smuggle shell
/// metacharacters into downstream tooling. Rejected paths are skipped
/// with a logged reason, never a crash.
fn is_rel_path_safe(rel_path: &str) -> bool {
    if rel_path
        .chars()
        .any(|c| matches!(c, ';' | '|' | '&' | '$' | '`' | '\n' | '\r' | '\0'))
    {
        return false;
    }

    rel_path
        .split('/')
        .all(|component| !component.is_empty() && component != "." && component != "..")
}

/// Walk the real filesystem under `root`, applying the filter policy.
///
/// Blocked directories are pruned (their subtree is never scanned);
/// unreadable entries are logged and skipped.
fn scan_tree(root: &Path, policy: &FilterPolicy) -> HashMap<String, ScannedEntry> {
    let mut scanned = HashMap::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !policy.is_folder_blocked(&entry.file_name().to_string_lossy())
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        // The root itself is not a node.
        if entry.depth() == 0 {
            continue;
        }

        let Ok(rel) = entry.path().strip_prefix(root) else {
            tracing::warn!(path = %entry.path().display(), "Entry escapes project root, skipping");
            continue;
        };
        let rel_path = rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");

        if !is_rel_path_safe(&rel_path) {
            tracing::warn!(path = %rel_path, "Rejected suspicious path");
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry.file_type().is_dir();

        if !is_dir && !policy.allows_file(&name) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(path = %rel_path, error = %e, "Failed to stat entry, skipping");
                continue;
            }
        };

        let size = if is_dir {
            0
        } else {
            i64::try_from(metadata.len()).unwrap_or(0)
        };
        let modified_at = unix_secs(metadata.modified());
        let created_at = match metadata.created() {
            Ok(t) => unix_secs(Ok(t)),
            Err(_) => modified_at,
        };

        scanned.insert(
            rel_path.to_lowercase(),
            ScannedEntry {
                name,
                rel_path,
                is_dir,
                size,
                created_at,
                modified_at,
            },
        );
    }

    scanned
}

/// Reconcile the persisted tree for `project` against the real filesystem.
///
/// Deletes are applied first (files before directories, directories
/// deepest-first), adds shallowest-first so a parent always has an id
/// before its children are linked, updates last. Newly added and changed
/// files are enqueued for indexing; deleted files get a deletion queue
/// item before their node row is removed so the processor can drop their
/// declarations.
///
/// # Errors
///
/// Returns `SyncError::RootPathMissing` if the project root does not
/// exist; storage errors if persisting changes fails.
pub fn synchronize(
    db: &Database,
    project: &Project,
    policy: &FilterPolicy,
    cancel: &CancellationToken,
) -> Result<SyncReport> {
    let started = Instant::now();
    let root = Path::new(&project.root_path);

    if !root.is_dir() {
        return Err(SyncError::RootPathMissing {
            path: project.root_path.clone(),
        }
        .into());
    }

    let persisted = db.with_conn(|conn| storage::get_by_project(conn, project.id))?;
    let mut persisted_map: HashMap<String, FileSystemNode> = persisted
        .into_iter()
        .map(|node| (node.rel_path.to_lowercase(), node))
        .collect();

    let scanned = scan_tree(root, policy);

    // Diff on case-insensitive relative path.
    let mut to_add: Vec<&ScannedEntry> = Vec::new();
    let mut to_update: Vec<(i64, &ScannedEntry)> = Vec::new();
    for (key, entry) in &scanned {
        match persisted_map.get(key) {
            None => to_add.push(entry),
            Some(node) => {
                if !entry.is_dir
                    && (node.size != entry.size || node.modified_at != entry.modified_at)
                {
                    to_update.push((node.id.unwrap_or_default(), entry));
                }
            }
        }
    }
    let mut to_delete: Vec<FileSystemNode> = persisted_map
        .values()
        .filter(|node| !scanned.contains_key(&node.rel_path.to_lowercase()))
        .cloned()
        .collect();

    let mut report = SyncReport::default();

    // Deletes: files first, then directories deepest-first, so no
    // directory is removed while a child row still references it.
    to_delete.sort_by(|a, b| {
        a.is_dir
            .cmp(&b.is_dir)
            .then(b.depth().cmp(&a.depth()))
            .then(a.rel_path.cmp(&b.rel_path))
    });

    db.with_transaction(|conn| {
        for node in &to_delete {
            let Some(node_id) = node.id else { continue };
            if !node.is_dir {
                storage::enqueue(conn, project.id, node_id, &node.rel_path)?;
            }
            storage::delete_node(conn, node_id)?;
            report.deleted += 1;
        }
        Ok(())
    })?;
    for node in &to_delete {
        persisted_map.remove(&node.rel_path.to_lowercase());
    }

    // Adds: grouped by depth, shallowest first. Each level is persisted
    // before the next so parent ids are always resolved.
    to_add.sort_by_key(|entry| (entry.depth(), entry.rel_path.clone()));
    let mut level_start = 0;
    while level_start < to_add.len() {
        if cancel.is_cancelled() {
            tracing::info!(project = %project.name, "Sync cancelled between levels");
            report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            return Ok(report);
        }

        let depth = to_add[level_start].depth();
        let level_end = to_add[level_start..]
            .iter()
            .position(|entry| entry.depth() != depth)
            .map_or(to_add.len(), |offset| level_start + offset);

        let level = &to_add[level_start..level_end];
        db.with_transaction(|conn| {
            for entry in level {
                let parent_id = entry
                    .rel_path
                    .rsplit_once('/')
                    .and_then(|(dir, _)| persisted_map.get(&dir.to_lowercase()))
                    .and_then(|parent| parent.id);

                let node = FileSystemNode::new(
                    project.id,
                    &entry.name,
                    &entry.rel_path,
                    entry.is_dir,
                    entry.size,
                    entry.created_at,
                    entry.modified_at,
                )
                .with_parent(parent_id);

                let inserted = storage::insert_node(conn, &node)?;
                if !inserted.is_dir {
                    if let Some(node_id) = inserted.id {
                        storage::enqueue(conn, project.id, node_id, &inserted.rel_path)?;
                    }
                }
                persisted_map.insert(inserted.rel_path.to_lowercase(), inserted);
                report.added += 1;
            }
            Ok(())
        })?;

        level_start = level_end;
    }

    // Updates: refresh size/timestamp and re-derive the file's symbols.
    db.with_transaction(|conn| {
        for (node_id, entry) in &to_update {
            storage::update_node_stat(conn, *node_id, entry.size, entry.modified_at)?;
            storage::enqueue(conn, project.id, *node_id, &entry.rel_path)?;
            report.updated += 1;
        }
        Ok(())
    })?;

    report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    tracing::info!(
        project = %project.name,
        added = report.added,
        updated = report.updated,
        deleted = report.deleted,
        duration_ms = report.duration_ms,
        "Sync complete"
    );

    Ok(report)
}

/// Async wrapper running the reconciliation on the blocking pool.
///
/// # Errors
///
/// Same as [`synchronize`].
pub async fn synchronize_async(
    db: Database,
    project: Project,
    policy: FilterPolicy,
    cancel: CancellationToken,
) -> Result<SyncReport> {
    tokio::task::spawn_blocking(move || synchronize(&db, &project, &policy, &cancel))
        .await
        .map_err(|e| crate::Error::internal(format!("sync task failed: {e}")))?
}
