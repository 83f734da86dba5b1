//! Debounced per-project filesystem watcher.
//!
//! Raw notification events are pushed into a channel from the backend's
//! callback thread and coalesced here. Every arriving event restarts a
//! quiet timer; the buffer is flushed only after a full quiet window
//! with no further events, so a burst of saves costs one flush.

use std::path::Path;
use std::time::Duration;

use notify::{RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::events::{EventBuffer, WatchEventKind};
use super::handler;
use crate::error::WatcherError;
use crate::storage::{Database, Project};
use crate::sync::FilterPolicy;
use crate::Result;

/// Watches one project root and keeps the tree and queue current.
pub struct ProjectWatcher {
    db: Database,
    project: Project,
    policy: FilterPolicy,
    debounce: Duration,
    trigger_tx: mpsc::UnboundedSender<i64>,
}

impl ProjectWatcher {
    /// Create a watcher for a project root.
    #[must_use]
    pub fn new(
        db: Database,
        project: Project,
        policy: FilterPolicy,
        debounce: Duration,
        trigger_tx: mpsc::UnboundedSender<i64>,
    ) -> Self {
        Self {
            db,
            project,
            policy,
            debounce,
            trigger_tx,
        }
    }

    /// Watch until cancelled.
    ///
    /// Backend errors after startup are logged, never fatal; the
    /// periodic full sync repairs anything a dropped event missed.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial watch registration fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();

        let mut backend =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                let _ = raw_tx.send(result);
            })
            .map_err(|e| WatcherError::WatchFailed {
                path: self.project.root_path.clone(),
                reason: e.to_string(),
            })?;

        backend
            .watch(Path::new(&self.project.root_path), RecursiveMode::Recursive)
            .map_err(|e| WatcherError::WatchFailed {
                path: self.project.root_path.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            project = %self.project.name,
            root = %self.project.root_path,
            "Watching project"
        );

        let mut buffer = EventBuffer::new();
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,

                received = raw_rx.recv() => {
                    let Some(received) = received else { break };
                    match received {
                        Ok(event) => {
                            self.absorb(&mut buffer, &event);
                            // Every event restarts the quiet window.
                            if !buffer.is_empty() {
                                deadline = Some(Instant::now() + self.debounce);
                            }
                        }
                        Err(e) => {
                            // Backend errors drop the registration on some
                            // platforms; re-establish and carry on. The
                            // periodic full sync covers anything missed.
                            tracing::warn!(
                                project = %self.project.name,
                                error = %e,
                                "Watch backend error, re-registering"
                            );
                            let root = Path::new(&self.project.root_path);
                            let _ = backend.unwatch(root);
                            if let Err(e) = backend.watch(root, RecursiveMode::Recursive) {
                                tracing::error!(
                                    project = %self.project.name,
                                    error = %e,
                                    "Failed to re-register watch"
                                );
                            }
                        }
                    }
                }

                () = sleep_until_opt(deadline), if deadline.is_some() => {
                    deadline = None;
                    let events = buffer.drain();
                    match handler::flush(&self.db, &self.project, &self.policy, &events) {
                        Ok(enqueued) if enqueued > 0 => {
                            let _ = self.trigger_tx.send(self.project.id);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(project = %self.project.name, error = %e,
                                "Failed to apply change batch");
                        }
                    }
                }
            }
        }

        tracing::info!(project = %self.project.name, "Watcher stopped");
        Ok(())
    }

    /// Translate a raw backend event into buffered per-path entries.
    fn absorb(&self, buffer: &mut EventBuffer, event: &notify::Event) {
        use notify::EventKind;

        // Access events carry no tree changes.
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }

        let removed = matches!(event.kind, EventKind::Remove(_));
        let root = Path::new(&self.project.root_path);

        for path in &event.paths {
            let Some(rel_path) = relativize(root, path) else {
                continue;
            };
            if self.is_filtered_path(&rel_path) {
                continue;
            }

            // Rename notifications surface as modify events on both the
            // old and new path; disk state decides which side this is.
            let kind = if removed || !path.exists() {
                WatchEventKind::Removed
            } else {
                WatchEventKind::Changed
            };

            buffer.push(rel_path, kind);
        }
    }

    /// Whether any path component names a blocked folder.
    ///
    /// File-name filtering happens at flush time; blocked folders are
    /// cheap to reject before buffering.
    fn is_filtered_path(&self, rel_path: &str) -> bool {
        rel_path
            .split('/')
            .any(|component| self.policy.is_folder_blocked(component))
    }
}

/// Project-relative '/'-separated path, or None for paths outside root.
fn relativize(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut out = String::new();
    for component in rel.components() {
        let std::path::Component::Normal(part) = component else {
            return None;
        };
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(part.to_str()?);
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
