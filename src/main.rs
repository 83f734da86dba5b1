//! codemap: incremental filesystem and symbol indexer.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use codemap::config::{Config, FilterSettings};
use codemap::coordinator::Coordinator;
use codemap::processor::IndexProcessor;
use codemap::query::{self, DeclarationFilter};
use codemap::storage::{self, Database, DeclKind};
use codemap::sync::{synchronize_async, FilterPolicy};
use codemap::{Error, Result};

#[derive(Parser)]
#[command(name = "codemap", version, about = "Incremental filesystem and symbol indexer")]
struct Cli {
    /// Directory for the SQLite database and other data
    #[arg(long, env = "CODEMAP_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CODEMAP_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "CODEMAP_LOG_JSON", global = true)]
    log_json: bool,

    /// Comma-separated directory names to skip entirely
    #[arg(long, env = "CODEMAP_BLOCKED_FOLDERS", global = true)]
    blocked_folders: Option<String>,

    /// Comma-separated file extensions to skip
    #[arg(long, env = "CODEMAP_BLOCKED_EXTENSIONS", global = true)]
    blocked_extensions: Option<String>,

    /// If set, only these comma-separated extensions are indexed
    #[arg(long, env = "CODEMAP_ALLOWED_EXTENSIONS", global = true)]
    allowed_extensions: Option<String>,

    /// Comma-separated exact file names to skip
    #[arg(long, env = "CODEMAP_BLOCKED_FILE_NAMES", global = true)]
    blocked_file_names: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch project roots and keep the index current
    Run {
        /// Project roots to index and watch
        #[arg(required = true)]
        watch_dirs: Vec<PathBuf>,

        /// Quiet period before a burst of file events is flushed, in ms
        #[arg(long, env = "CODEMAP_DEBOUNCE_MS", default_value_t = 2000)]
        debounce_ms: u64,

        /// Maximum queue items fetched per processing batch
        #[arg(long, env = "CODEMAP_BATCH_SIZE", default_value_t = 20)]
        batch_size: usize,

        /// Fallback processing interval, in seconds
        #[arg(long, env = "CODEMAP_POLL_INTERVAL_SECS", default_value_t = 30)]
        poll_interval_secs: u64,
    },

    /// Reconcile one project root against the index, then exit
    Sync {
        /// Project root to reconcile
        dir: PathBuf,
    },

    /// Drain the pending queue, then exit
    Process {
        /// Limit to one project by name
        #[arg(long)]
        project: Option<String>,

        /// Maximum queue items fetched per processing batch
        #[arg(long, env = "CODEMAP_BATCH_SIZE", default_value_t = 20)]
        batch_size: usize,
    },

    /// List indexed declarations
    Query {
        /// Project name
        project: String,

        /// Case-insensitive substring match on the declaration name
        #[arg(long)]
        name: Option<String>,

        /// Declaration kind (namespace, class, method, property, parameter)
        #[arg(long)]
        kind: Option<String>,

        /// Maximum results
        #[arg(long, default_value_t = 100)]
        limit: usize,

        /// Results to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Include each declaration's source text
        #[arg(long)]
        source: bool,
    },

    /// Show projects, index sizes, and queue depths
    Status,
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn filters_from(cli: &Cli) -> FilterSettings {
    let defaults = FilterSettings::default();
    FilterSettings {
        blocked_folders: cli
            .blocked_folders
            .clone()
            .unwrap_or(defaults.blocked_folders),
        blocked_extensions: cli
            .blocked_extensions
            .clone()
            .unwrap_or(defaults.blocked_extensions),
        allowed_extensions: cli
            .allowed_extensions
            .clone()
            .unwrap_or(defaults.allowed_extensions),
        blocked_file_names: cli
            .blocked_file_names
            .clone()
            .unwrap_or(defaults.blocked_file_names),
    }
}

fn open_database(config: &Config) -> Result<Database> {
    std::fs::create_dir_all(&config.data_dir)?;
    let db = Database::open(&config.database_path())?;
    storage::init_storage(&db)?;
    Ok(db)
}

fn canonicalize_all(dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    dirs.iter()
        .map(|dir| {
            dir.canonicalize()
                .map_err(|e| Error::config(format!("cannot resolve '{}': {e}", dir.display())))
        })
        .collect()
}

fn resolve_project(db: &Database, name: &str) -> Result<storage::Project> {
    db.with_conn(|conn| storage::get_project_by_name(conn, name))?
        .ok_or_else(|| Error::config(format!("unknown project '{name}'")))
}

fn parse_kind(raw: &str) -> Result<DeclKind> {
    match raw.to_lowercase().as_str() {
        "namespace" => Ok(DeclKind::Namespace),
        "class" => Ok(DeclKind::Class),
        "method" => Ok(DeclKind::Method),
        "property" => Ok(DeclKind::Property),
        "parameter" => Ok(DeclKind::Parameter),
        other => Err(Error::config(format!("unknown declaration kind '{other}'"))),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Error::internal(format!("failed to serialize output: {e}")))?;
    println!("{text}");
    Ok(())
}

async fn execute(cli: Cli) -> Result<()> {
    let filters = filters_from(&cli);

    match cli.command {
        Command::Run {
            watch_dirs,
            debounce_ms,
            batch_size,
            poll_interval_secs,
        } => {
            let config = Config {
                data_dir: cli.data_dir,
                log_level: cli.log_level,
                watch_dirs: canonicalize_all(&watch_dirs)?,
                debounce_ms,
                batch_size,
                poll_interval_secs,
                filters,
            };
            config.validate()?;

            let db = open_database(&config)?;
            let cancel = CancellationToken::new();

            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown signal received");
                    signal_cancel.cancel();
                }
            });

            Coordinator::new(db, config).run(cancel).await
        }

        Command::Sync { dir } => {
            let config = Config {
                data_dir: cli.data_dir,
                filters,
                ..Config::default()
            };
            let db = open_database(&config)?;

            let root = canonicalize_all(std::slice::from_ref(&dir))?.remove(0);
            let root_path = root.to_string_lossy().to_string();
            let name = root
                .file_name()
                .map_or_else(|| root_path.clone(), |n| n.to_string_lossy().to_string());
            let project =
                db.with_conn(|conn| storage::get_or_create_project(conn, &name, &root_path))?;

            let policy = FilterPolicy::from_settings(&config.filters);
            let report =
                synchronize_async(db, project, policy, CancellationToken::new()).await?;
            print_json(&report)
        }

        Command::Process {
            project,
            batch_size,
        } => {
            let config = Config {
                data_dir: cli.data_dir,
                filters,
                ..Config::default()
            };
            let db = open_database(&config)?;
            db.with_conn(storage::recover_interrupted)?;

            let project_id = match project {
                Some(ref name) => Some(resolve_project(&db, name)?.id),
                None => None,
            };

            let processor = IndexProcessor::new(db, batch_size);
            let report = processor.run(project_id, &CancellationToken::new()).await?;
            print_json(&report)
        }

        Command::Query {
            project,
            name,
            kind,
            limit,
            offset,
            source,
        } => {
            let config = Config {
                data_dir: cli.data_dir,
                filters,
                ..Config::default()
            };
            let db = open_database(&config)?;
            let project = resolve_project(&db, &project)?;

            let filter = DeclarationFilter {
                name_contains: name,
                kind: kind.as_deref().map(parse_kind).transpose()?,
                limit: Some(limit),
                offset,
            };
            let declarations =
                db.with_conn(|conn| query::list_declarations(conn, project.id, &filter))?;

            if source {
                let root = std::path::Path::new(&project.root_path);
                for decl in &declarations {
                    println!(
                        "{} {} ({}:{}-{})",
                        decl.kind.as_str(),
                        decl.name,
                        decl.rel_path,
                        decl.line_start,
                        decl.line_end
                    );
                    match query::declaration_source(
                        root,
                        &decl.rel_path,
                        decl.line_start,
                        decl.line_end,
                    ) {
                        Ok(text) => println!("{text}\n"),
                        Err(e) => println!("  (source unavailable: {e})\n"),
                    }
                }
                Ok(())
            } else {
                print_json(&declarations)
            }
        }

        Command::Status => {
            let config = Config {
                data_dir: cli.data_dir,
                filters,
                ..Config::default()
            };
            let db = open_database(&config)?;
            let report = db.with_conn(query::status_report)?;
            print_json(&report)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    if let Err(e) = execute(cli).await {
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
