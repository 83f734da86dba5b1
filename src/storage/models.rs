//! Data models for storage operations.
//!
//! This module defines the core data structures used for:
//! - Projects (root folders being indexed)
//! - Filesystem nodes (files and directories)
//! - Index queue items with their status lifecycle
//! - Interned identifiers, declaration kinds, and declaration nodes

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp.
#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(0))
        .unwrap_or(0)
}

/// A root folder being indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier (database primary key).
    pub id: i64,

    /// Display name (usually the root folder name).
    pub name: String,

    /// Absolute root path on disk.
    pub root_path: String,

    /// Unix timestamp when registered.
    pub created_at: i64,
}

/// One file or directory under a project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSystemNode {
    /// Unique identifier (database primary key, None until inserted).
    pub id: Option<i64>,

    /// Owning project.
    pub project_id: i64,

    /// Parent directory node; None for root-level nodes.
    pub parent_id: Option<i64>,

    /// File or directory name.
    pub name: String,

    /// Project-relative path, '/'-separated.
    pub rel_path: String,

    /// Whether this node is a directory.
    pub is_dir: bool,

    /// File size in bytes (0 for directories).
    pub size: i64,

    /// Lowercase extension without the dot; None for directories or
    /// extensionless files.
    pub extension: Option<String>,

    /// Creation timestamp (Unix seconds).
    pub created_at: i64,

    /// Modification timestamp (Unix seconds).
    pub modified_at: i64,
}

impl FileSystemNode {
    /// Create a new node with explicit timestamps.
    ///
    /// The scanner constructs nodes directly with the real on-disk
    /// timestamps; nothing mutates them after construction.
    #[must_use]
    pub fn new(
        project_id: i64,
        name: impl Into<String>,
        rel_path: impl Into<String>,
        is_dir: bool,
        size: i64,
        created_at: i64,
        modified_at: i64,
    ) -> Self {
        let rel_path = rel_path.into();
        let extension = if is_dir {
            None
        } else {
            extension_of(&rel_path)
        };

        Self {
            id: None,
            project_id,
            parent_id: None,
            name: name.into(),
            rel_path,
            is_dir,
            size,
            extension,
            created_at,
            modified_at,
        }
    }

    /// Set the parent node id.
    #[must_use]
    pub const fn with_parent(mut self, parent_id: Option<i64>) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Relative path of the immediate parent directory, if any.
    #[must_use]
    pub fn parent_rel_path(&self) -> Option<&str> {
        self.rel_path.rsplit_once('/').map(|(dir, _)| dir)
    }

    /// Path depth (number of '/'-separated components).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.rel_path.split('/').count()
    }
}

/// Lowercase extension of a relative path, without the dot.
#[must_use]
pub fn extension_of(rel_path: &str) -> Option<String> {
    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        // Dotfiles like `.env` carry no extension.
        return None;
    }
    Some(ext.to_lowercase())
}

/// Status of an index queue item.
///
/// Transitions only Pending -> Processing -> {Completed, Failed}; an item
/// never re-enters Pending. Interrupted work is re-enqueued as a new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    /// Parse the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(Self::Pending),
            "Processing" => Some(Self::Processing),
            "Completed" => Some(Self::Completed),
            "Failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One unit of "this file needs (re)deriving" work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique identifier (database primary key).
    pub id: i64,

    /// Owning project.
    pub project_id: i64,

    /// Filesystem node this work refers to. The node row may already be
    /// gone; the processor then treats the item as a deletion.
    pub node_id: i64,

    /// Project-relative path at enqueue time.
    pub rel_path: String,

    /// Current status.
    pub status: QueueStatus,

    /// Unix timestamp when enqueued.
    pub enqueued_at: i64,

    /// Error message for Failed items.
    pub error: Option<String>,
}

/// One of the five declaration kinds (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclKind {
    Namespace,
    Class,
    Method,
    Property,
    Parameter,
}

impl DeclKind {
    /// All kinds, in seeding order.
    pub const ALL: [Self; 5] = [
        Self::Namespace,
        Self::Class,
        Self::Method,
        Self::Property,
        Self::Parameter,
    ];

    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Class => "Class",
            Self::Method => "Method",
            Self::Property => "Property",
            Self::Parameter => "Parameter",
        }
    }

    /// Parse the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Namespace" => Some(Self::Namespace),
            "Class" => Some(Self::Class),
            "Method" => Some(Self::Method),
            "Property" => Some(Self::Property),
            "Parameter" => Some(Self::Parameter),
            _ => None,
        }
    }
}

/// One node in a file's persisted declaration tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Declaration {
    /// Unique identifier (database primary key).
    pub id: i64,

    /// Parent declaration in the same file; None for top-level.
    pub parent_id: Option<i64>,

    /// Owning project.
    pub project_id: i64,

    /// Filesystem node this declaration belongs to.
    pub node_id: i64,

    /// Interned name id.
    pub identifier_id: i64,

    /// Kind row id.
    pub kind_id: i64,

    /// Zero-based first line of the declaration.
    pub line_start: i64,

    /// Zero-based last line (inclusive).
    pub line_end: i64,
}
