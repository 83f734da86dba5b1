//! Index processor: drains the queue and derives/repairs declaration trees.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::parser::{DeclarationParser, ParsedDeclaration};
use crate::error::{ProcessorError, StorageError};
use crate::storage::{
    self, Database, DeclKind, DeclarationCandidate, QueueItem, QueueStatus,
};
use crate::Result;

/// Outcome of one processing run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunReport {
    pub files_processed: usize,
    pub files_failed: usize,
    pub duration_ms: u64,
}

impl RunReport {
    fn absorb(&mut self, other: Self) {
        self.files_processed += other.files_processed;
        self.files_failed += other.files_failed;
    }
}

/// Drains pending queue items in bounded batches and reconciles each
/// file's stored declarations against a fresh parse.
///
/// At most one pass runs per project at a time; a second concurrent
/// invocation waits on the project lock instead of racing on the same
/// declaration rows. Different projects process concurrently.
pub struct IndexProcessor {
    db: Database,
    batch_size: usize,
    locks: parking_lot::Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexProcessor {
    /// Create a new processor.
    #[must_use]
    pub fn new(db: Database, batch_size: usize) -> Self {
        Self {
            db,
            batch_size,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn project_lock(&self, project_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .entry(project_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Run until the queue (optionally scoped to one project) is empty.
    ///
    /// A global run visits projects sequentially, so it contends on the
    /// same per-project locks as watcher-triggered runs.
    ///
    /// # Errors
    ///
    /// Returns an error only for whole-run conditions (storage
    /// unavailable); item-level failures are reported in the counts.
    pub async fn run(
        &self,
        project_id: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let mut report = RunReport::default();

        match project_id {
            Some(id) => report.absorb(self.run_project(id, cancel).await?),
            None => {
                let projects = self.db.with_conn(storage::list_projects)?;
                for project in projects {
                    if cancel.is_cancelled() {
                        break;
                    }
                    report.absorb(self.run_project(project.id, cancel).await?);
                }
            }
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if report.files_processed > 0 || report.files_failed > 0 {
            tracing::info!(
                processed = report.files_processed,
                failed = report.files_failed,
                duration_ms = report.duration_ms,
                "Processing run complete"
            );
        }
        Ok(report)
    }

    async fn run_project(
        &self,
        project_id: i64,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().await;

        let mut report = RunReport::default();
        let mut parser = DeclarationParser::new()?;

        'outer: loop {
            if cancel.is_cancelled() {
                break;
            }

            let batch = self
                .db
                .with_conn(|conn| storage::get_pending(conn, Some(project_id), self.batch_size))?;
            if batch.is_empty() {
                break;
            }

            for item in batch {
                // Cancellation is honored between files, never mid-file.
                if cancel.is_cancelled() {
                    break 'outer;
                }

                if self.process_item(&item, &mut parser)? {
                    report.files_processed += 1;
                } else {
                    report.files_failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Process one queue item. Returns false when the item was marked
    /// Failed; one bad file never halts the batch.
    fn process_item(&self, item: &QueueItem, parser: &mut DeclarationParser) -> Result<bool> {
        // Persisted immediately, so a crash mid-run leaves visible
        // evidence rather than a silently lost item.
        self.db
            .with_conn(|conn| storage::set_status(conn, item.id, QueueStatus::Processing, None))?;

        match self.derive(item, parser) {
            Ok(()) => {
                self.db.with_conn(|conn| {
                    storage::set_status(conn, item.id, QueueStatus::Completed, None)
                })?;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(path = %item.rel_path, error = %e, "Failed to index file");
                let message = e.to_string();
                self.db.with_conn(|conn| {
                    storage::set_status(conn, item.id, QueueStatus::Failed, Some(&message))
                })?;
                Ok(false)
            }
        }
    }

    fn derive(&self, item: &QueueItem, parser: &mut DeclarationParser) -> Result<()> {
        let node = self.db.with_conn(|conn| storage::get_by_id(conn, item.node_id))?;

        let Some(node) = node else {
            // The node row is gone: treat as a deletion, not an error.
            let removed = self
                .db
                .with_transaction(|conn| storage::delete_by_file_node(conn, item.node_id))?;
            if removed > 0 {
                tracing::debug!(
                    path = %item.rel_path,
                    declarations = removed,
                    "Removed declarations for deleted file"
                );
            }
            return Ok(());
        };

        // Directories carry no declarations.
        if node.is_dir {
            return Ok(());
        }

        let project = self
            .db
            .with_conn(|conn| storage::get_project(conn, node.project_id))?
            .ok_or(ProcessorError::UnknownProject(node.project_id))?;

        let abs_path = Path::new(&project.root_path).join(&node.rel_path);
        let node_id = node.id.unwrap_or(item.node_id);

        if !abs_path.is_file() {
            self.db
                .with_transaction(|conn| storage::delete_by_file_node(conn, node_id))?;
            return Ok(());
        }

        let source = std::fs::read_to_string(&abs_path)?;
        let declarations = parser.parse(&source)?;

        // One transaction per file: the rebuild is all-or-nothing.
        self.db.with_transaction(|conn| {
            let kinds = storage::kind_ids(conn)?;
            let stored: HashSet<i64> = storage::get_by_file_node(conn, node_id)?
                .iter()
                .map(|d| d.id)
                .collect();

            let mut touched = HashSet::new();
            apply_declarations(
                conn,
                &kinds,
                project.id,
                node_id,
                None,
                &declarations,
                &mut touched,
            )?;

            // Orphans: previously stored minus touched. Removing a
            // renamed method without disturbing its siblings.
            for orphan in stored.difference(&touched) {
                storage::delete_declaration(conn, *orphan)?;
            }

            Ok(())
        })
    }
}

/// Walk a parsed tree, get-or-creating one row per declaration and
/// recording every touched id.
fn apply_declarations(
    conn: &rusqlite::Connection,
    kinds: &HashMap<DeclKind, i64>,
    project_id: i64,
    node_id: i64,
    parent_id: Option<i64>,
    declarations: &[ParsedDeclaration],
    touched: &mut HashSet<i64>,
) -> Result<()> {
    for decl in declarations {
        let identifier_id = storage::intern_identifier(conn, &decl.name)?;
        let kind_id = kinds
            .get(&decl.kind)
            .copied()
            .ok_or_else(|| StorageError::not_found("identifier_kind", decl.kind.as_str()))?;
        let id = storage::get_or_create_declaration(
            conn,
            &DeclarationCandidate {
                parent_id,
                project_id,
                node_id,
                identifier_id,
                kind_id,
                line_start: decl.line_start,
                line_end: decl.line_end,
            },
        )?;
        touched.insert(id);

        apply_declarations(
            conn,
            kinds,
            project_id,
            node_id,
            Some(id),
            &decl.children,
            touched,
        )?;
    }
    Ok(())
}
