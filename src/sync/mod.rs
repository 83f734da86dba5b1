//! Filesystem reconciliation.
//!
//! This module provides:
//! - The filter policy (blocked folders, extensions, file names)
//! - The full-reconciliation synchronizer used at startup and on demand

mod filter;
mod synchronizer;

pub use filter::FilterPolicy;
pub use synchronizer::{synchronize, synchronize_async, SyncReport};
