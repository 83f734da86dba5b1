//! Long-running service wiring.
//!
//! Startup order matters: interrupted queue items are recovered first,
//! then each project root is reconciled in full, then the watchers take
//! over incremental maintenance. The processor runs when a watcher
//! flush produced work and on a fallback interval, so items enqueued
//! while the service was down are never stranded.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::processor::IndexProcessor;
use crate::storage::{self, Database, Project};
use crate::sync::{synchronize_async, FilterPolicy};
use crate::watcher::ProjectWatcher;
use crate::Result;

/// Owns the watchers and the processor for the `run` command.
pub struct Coordinator {
    db: Database,
    config: Config,
}

impl Coordinator {
    #[must_use]
    pub fn new(db: Database, config: Config) -> Self {
        Self { db, config }
    }

    /// Register every configured watch dir as a project.
    ///
    /// # Errors
    ///
    /// Returns an error if a database operation fails.
    pub fn register_projects(&self) -> Result<Vec<Project>> {
        let mut projects = Vec::with_capacity(self.config.watch_dirs.len());
        for dir in &self.config.watch_dirs {
            let root_path = dir.to_string_lossy().to_string();
            let name = dir
                .file_name()
                .map_or_else(|| root_path.clone(), |n| n.to_string_lossy().to_string());
            let project = self
                .db
                .with_conn(|conn| storage::get_or_create_project(conn, &name, &root_path))?;
            projects.push(project);
        }
        Ok(projects)
    }

    /// Run until cancelled.
    ///
    /// One unreachable project root fails its own sync and watcher only;
    /// the remaining projects keep running.
    ///
    /// # Errors
    ///
    /// Returns an error if startup recovery or project registration
    /// fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let recovered = self.db.with_conn(storage::recover_interrupted)?;
        if recovered > 0 {
            tracing::info!(count = recovered, "Recovered interrupted queue items");
        }

        let policy = FilterPolicy::from_settings(&self.config.filters);
        let projects = self.register_projects()?;

        for project in &projects {
            let result = synchronize_async(
                self.db.clone(),
                project.clone(),
                policy.clone(),
                cancel.clone(),
            )
            .await;
            if let Err(e) = result {
                tracing::error!(project = %project.name, error = %e, "Initial sync failed");
            }
        }

        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel();
        let debounce = Duration::from_millis(self.config.debounce_ms);

        let mut watcher_handles: Vec<JoinHandle<()>> = Vec::new();
        for project in &projects {
            let watcher = ProjectWatcher::new(
                self.db.clone(),
                project.clone(),
                policy.clone(),
                debounce,
                trigger_tx.clone(),
            );
            let watch_cancel = cancel.clone();
            let name = project.name.clone();
            watcher_handles.push(tokio::spawn(async move {
                if let Err(e) = watcher.run(watch_cancel).await {
                    tracing::error!(project = %name, error = %e, "Watcher failed");
                }
            }));
        }
        drop(trigger_tx);

        let processor = IndexProcessor::new(self.db.clone(), self.config.batch_size);

        // Drain whatever the initial sync enqueued before settling into
        // the event-driven loop.
        if let Err(e) = processor.run(None, &cancel).await {
            tracing::error!(error = %e, "Startup processing run failed");
        }

        let period = Duration::from_secs(self.config.poll_interval_secs);
        let mut poll = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,

                triggered = trigger_rx.recv() => {
                    let Some(project_id) = triggered else { break };
                    if let Err(e) = processor.run(Some(project_id), &cancel).await {
                        tracing::error!(project_id, error = %e, "Processing run failed");
                    }
                }

                _ = poll.tick() => {
                    if let Err(e) = processor.run(None, &cancel).await {
                        tracing::error!(error = %e, "Periodic processing run failed");
                    }
                }
            }
        }

        for handle in watcher_handles {
            let _ = handle.await;
        }

        tracing::info!("Coordinator stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_storage, QueueStatus};
    use std::fs;
    use tempfile::TempDir;

    fn config_for(tmp: &TempDir) -> Config {
        Config {
            watch_dirs: vec![tmp.path().to_path_buf()],
            debounce_ms: 100,
            poll_interval_secs: 1,
            ..Config::default()
        }
    }

    async fn wait_until<F>(db: &Database, mut check: F)
    where
        F: FnMut(&rusqlite::Connection) -> Result<bool>,
    {
        for _ in 0..100 {
            let done = db.with_conn(|conn| check(conn)).unwrap();
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("condition never satisfied");
    }

    #[tokio::test]
    async fn test_startup_syncs_and_processes() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(
            tmp.path().join("src/Foo.cs"),
            "namespace App { class Widget { void Run() {} } }",
        )
        .unwrap();

        let db = Database::open_in_memory().unwrap();
        init_storage(&db).unwrap();

        let cancel = CancellationToken::new();
        let coordinator = Coordinator::new(db.clone(), config_for(&tmp));
        let handle = tokio::spawn(coordinator.run(cancel.clone()));

        wait_until(&db, |conn| {
            Ok(storage::count_by_status(conn, QueueStatus::Completed)? >= 1)
        })
        .await;

        db.with_conn(|conn| {
            let project = storage::get_project_by_name(conn, &tmp_name(&tmp))?.unwrap();
            let node = storage::get_by_path(conn, project.id, "src/Foo.cs")?.unwrap();
            let decls = storage::get_by_file_node(conn, node.id.unwrap())?;
            assert_eq!(decls.len(), 3);
            Ok(())
        })
        .unwrap();

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_watcher_feeds_processor() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        init_storage(&db).unwrap();

        let cancel = CancellationToken::new();
        let coordinator = Coordinator::new(db.clone(), config_for(&tmp));
        let handle = tokio::spawn(coordinator.run(cancel.clone()));

        // Give the watcher time to register before writing
        tokio::time::sleep(Duration::from_millis(300)).await;
        fs::write(tmp.path().join("Late.cs"), "class Late { int X { get; set; } }").unwrap();

        wait_until(&db, |conn| {
            let Some(project) = storage::get_project_by_name(conn, &tmp_name(&tmp))? else {
                return Ok(false);
            };
            let Some(node) = storage::get_by_path(conn, project.id, "Late.cs")? else {
                return Ok(false);
            };
            Ok(!storage::get_by_file_node(conn, node.id.unwrap_or(0))?.is_empty())
        })
        .await;

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_missing_root_does_not_kill_others() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("Ok.cs"), "class Ok {}").unwrap();

        let db = Database::open_in_memory().unwrap();
        init_storage(&db).unwrap();

        let config = Config {
            watch_dirs: vec![
                std::path::PathBuf::from("/definitely/not/here"),
                tmp.path().to_path_buf(),
            ],
            debounce_ms: 100,
            poll_interval_secs: 1,
            ..Config::default()
        };

        let cancel = CancellationToken::new();
        let coordinator = Coordinator::new(db.clone(), config);
        let handle = tokio::spawn(coordinator.run(cancel.clone()));

        wait_until(&db, |conn| {
            Ok(storage::count_by_status(conn, QueueStatus::Completed)? >= 1)
        })
        .await;

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    fn tmp_name(tmp: &TempDir) -> String {
        tmp.path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}
