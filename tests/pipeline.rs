//! End-to-end pipeline tests: reconcile a real directory, drain the
//! queue, and check the resulting filesystem and declaration trees.

use std::collections::HashSet;
use std::fs;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use codemap::config::FilterSettings;
use codemap::processor::IndexProcessor;
use codemap::query::{self, DeclarationFilter};
use codemap::storage::{self, Database, DeclKind, Project, QueueStatus};
use codemap::sync::{synchronize, FilterPolicy};

fn setup(tmp: &TempDir) -> (Database, Project, FilterPolicy) {
    let db = Database::open_in_memory().unwrap();
    storage::init_storage(&db).unwrap();
    let project = db
        .with_conn(|conn| {
            storage::get_or_create_project(conn, "demo", &tmp.path().to_string_lossy())
        })
        .unwrap();
    let policy = FilterPolicy::from_settings(&FilterSettings::default());
    (db, project, policy)
}

async fn sync_and_process(db: &Database, project: &Project, policy: &FilterPolicy) {
    let cancel = CancellationToken::new();
    synchronize(db, project, policy, &cancel).unwrap();
    IndexProcessor::new(db.clone(), 20)
        .run(Some(project.id), &cancel)
        .await
        .unwrap();
}

#[tokio::test]
async fn indexes_new_file_into_nested_declarations() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("src")).unwrap();
    fs::write(
        tmp.path().join("src/Foo.txt"),
        "namespace App\n{\n    class Widget\n    {\n        void Run()\n        {\n        }\n    }\n}\n",
    )
    .unwrap();

    let (db, project, policy) = setup(&tmp);
    sync_and_process(&db, &project, &policy).await;

    db.with_conn(|conn| {
        // Two filesystem nodes: the directory and the file
        let nodes = storage::get_by_project(conn, project.id)?;
        let mut paths: Vec<_> = nodes.iter().map(|n| n.rel_path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(paths, vec!["src", "src/Foo.txt"]);

        // Three declarations with the right parent chain
        let decls = query::list_declarations(conn, project.id, &DeclarationFilter::default())?;
        assert_eq!(decls.len(), 3);
        assert_eq!(decls[0].name, "App");
        assert_eq!(decls[0].kind, DeclKind::Namespace);
        assert_eq!(decls[1].name, "Widget");
        assert_eq!(decls[1].parent_id, Some(decls[0].id));
        assert_eq!(decls[2].name, "Run");
        assert_eq!(decls[2].parent_id, Some(decls[1].id));

        // Spans are zero-based and inclusive
        assert_eq!(decls[0].line_start, 0);
        assert_eq!(decls[0].line_end, 8);

        assert_eq!(storage::count_by_status(conn, QueueStatus::Pending)?, 0);
        Ok(())
    })
    .unwrap();
}

#[tokio::test]
async fn deleting_file_removes_its_declarations() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("Gone.cs"),
        "namespace Doomed { class D {} }",
    )
    .unwrap();
    fs::write(tmp.path().join("Stays.cs"), "class Survivor {}").unwrap();

    let (db, project, policy) = setup(&tmp);
    sync_and_process(&db, &project, &policy).await;

    db.with_conn(|conn| {
        let decls = query::list_declarations(conn, project.id, &DeclarationFilter::default())?;
        assert_eq!(decls.len(), 3);
        Ok(())
    })
    .unwrap();

    fs::remove_file(tmp.path().join("Gone.cs")).unwrap();
    sync_and_process(&db, &project, &policy).await;

    db.with_conn(|conn| {
        assert!(storage::get_by_path(conn, project.id, "Gone.cs")?.is_none());

        let decls = query::list_declarations(conn, project.id, &DeclarationFilter::default())?;
        let names: Vec<_> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Survivor"]);

        assert_eq!(storage::count_by_status(conn, QueueStatus::Failed)?, 0);
        Ok(())
    })
    .unwrap();
}

#[tokio::test]
async fn reprocessing_updates_spans_without_churning_ids() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("Code.cs");
    fs::write(
        &file,
        "namespace N\n{\n    class C\n    {\n        void M1() {}\n        void M2() {}\n    }\n}\n",
    )
    .unwrap();

    let (db, project, policy) = setup(&tmp);
    sync_and_process(&db, &project, &policy).await;

    let before: Vec<(i64, String)> = db
        .with_conn(|conn| {
            Ok(
                query::list_declarations(conn, project.id, &DeclarationFilter::default())?
                    .into_iter()
                    .map(|d| (d.id, d.name))
                    .collect(),
            )
        })
        .unwrap();
    assert_eq!(before.len(), 4);

    // Drop M2 and shift everything down a line
    fs::write(
        &file,
        "\nnamespace N\n{\n    class C\n    {\n        void M1() {}\n    }\n}\n",
    )
    .unwrap();
    sync_and_process(&db, &project, &policy).await;

    db.with_conn(|conn| {
        let after = query::list_declarations(conn, project.id, &DeclarationFilter::default())?;
        assert_eq!(after.len(), 3);

        // Survivors keep their ids; only M2's row is gone
        let before_ids: HashSet<i64> = before.iter().map(|(id, _)| *id).collect();
        for decl in &after {
            assert!(before_ids.contains(&decl.id), "id churn for {}", decl.name);
        }
        assert!(!after.iter().any(|d| d.name == "M2"));

        // Spans were refreshed for the shifted file
        let ns = after.iter().find(|d| d.name == "N").unwrap();
        assert_eq!(ns.line_start, 1);

        Ok(())
    })
    .unwrap();
}

#[tokio::test]
async fn filtered_files_never_reach_the_index() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("node_modules/pkg")).unwrap();
    fs::write(
        tmp.path().join("node_modules/pkg/Dep.cs"),
        "class Hidden {}",
    )
    .unwrap();
    fs::write(tmp.path().join("secrets.key"), "class NotCode {}").unwrap();
    fs::write(tmp.path().join("App.cs"), "class Visible {}").unwrap();

    let (db, project, policy) = setup(&tmp);
    sync_and_process(&db, &project, &policy).await;

    db.with_conn(|conn| {
        let decls = query::list_declarations(conn, project.id, &DeclarationFilter::default())?;
        let names: Vec<_> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Visible"]);
        Ok(())
    })
    .unwrap();
}

#[tokio::test]
async fn interrupted_items_are_recovered_and_reprocessed() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("App.cs"), "class App {}").unwrap();

    let (db, project, policy) = setup(&tmp);
    let cancel = CancellationToken::new();
    synchronize(&db, &project, &policy, &cancel).unwrap();

    // Simulate a crash mid-processing: the item is stuck in Processing
    db.with_conn(|conn| {
        let pending = storage::get_pending(conn, None, 20)?;
        storage::set_status(conn, pending[0].id, QueueStatus::Processing, None)?;
        Ok(())
    })
    .unwrap();

    db.with_conn(storage::recover_interrupted).unwrap();

    IndexProcessor::new(db.clone(), 20)
        .run(Some(project.id), &cancel)
        .await
        .unwrap();

    db.with_conn(|conn| {
        // The stuck item is Failed with a reason; the replacement completed
        assert_eq!(storage::count_by_status(conn, QueueStatus::Failed)?, 1);
        assert_eq!(storage::count_by_status(conn, QueueStatus::Completed)?, 1);

        let decls = query::list_declarations(conn, project.id, &DeclarationFilter::default())?;
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "App");
        Ok(())
    })
    .unwrap();
}
