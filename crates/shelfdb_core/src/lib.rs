//! # ShelfDB Core
//!
//! Connection and session lifecycle coordinator for ShelfDB.
//!
//! ShelfDB offers a simple key-value interface over a versioned,
//! schema-evolving embedded engine. Many [`Shelf`] handles, each bound to a
//! `(database, table)` pair, multiplex onto one shared connection per
//! database; this crate is the coordinator that makes that safe:
//!
//! - One connection per database name, shared through the [`Registry`]
//! - Schema changes (ensuring a table exists) are serialized version bumps:
//!   close the connection, reopen at version + 1, create the table inside
//!   the upgrade transaction
//! - Operations submitted before readiness queue and run in submission order
//! - Failures caused by a sibling reopening the connection are transient and
//!   retried up to a bounded ceiling
//!
//! ## Key Invariants
//!
//! - At most one live connection per database; a higher-version open always
//!   closes the previous connection first
//! - No operation runs before its table's existence is confirmed
//! - Record status is monotonic within a session:
//!   `Uninitialized → Opening → Ready`, then `Ready ⇄ Upgrading`
//! - No queued operation is silently dropped: each eventually runs, retries,
//!   or fails visibly
//!
//! ## Example
//!
//! ```rust,ignore
//! use shelfdb_core::Registry;
//! use shelfdb_engine::MemoryEngine;
//! use std::sync::Arc;
//!
//! let registry = Registry::new(Arc::new(MemoryEngine::new()));
//!
//! // Both shelves share one connection to "app"; each ensures its table.
//! let settings = registry.shelf("app", "settings");
//! let cache = registry.shelf("app", "cache");
//!
//! settings.set("theme", b"dark".to_vec()).await?;
//! cache.set_multiple(vec![("a".into(), b"1".to_vec())]).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod handle;
mod opener;
mod queue;
mod registry;
mod retry;
mod session;

pub use config::{RetryConfig, ShelfConfig, DEFAULT_MAX_ATTEMPTS};
pub use error::{ShelfError, ShelfResult};
pub use handle::Shelf;
pub use registry::{Registry, Status};
