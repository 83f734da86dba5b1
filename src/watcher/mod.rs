//! Debounced filesystem watching.
//!
//! This module provides:
//! - Event coalescing (one pending event per path)
//! - The per-project watcher with its re-arming quiet timer
//! - The flush handler that applies a batch to the tree and queue

mod events;
mod handler;
mod watcher;

pub use events::{EventBuffer, WatchEvent, WatchEventKind};
pub use handler::flush;
pub use watcher::ProjectWatcher;
