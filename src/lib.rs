//! Codemap Library
//!
//! Incremental filesystem sync and declaration index engine. Keeps a
//! persisted map of source files and the declarations inside them
//! consistent with a live filesystem tree, without re-scanning the
//! whole codebase on every query.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod processor;
pub mod query;
pub mod storage;
pub mod sync;
pub mod watcher;

pub use config::Config;
pub use error::{Error, Result};
