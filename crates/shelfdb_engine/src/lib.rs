//! # ShelfDB Engine
//!
//! Storage engine trait and in-memory implementation for ShelfDB.
//!
//! This crate defines the boundary between the ShelfDB coordinator and the
//! underlying versioned, table-holding key-value engine. The coordinator
//! never interprets engine internals; it only relies on the contracts
//! documented on the traits here.
//!
//! ## Design Principles
//!
//! - The engine is an external collaborator: open/upgrade/transaction
//!   primitives, nothing more
//! - Schema changes happen only inside an upgrade transaction, delivered when
//!   a database is opened above its on-disk version
//! - Opening at a higher version invalidates older connections; the resulting
//!   `ConnectionClosing` failures are transient by contract
//! - Writes within one transaction commit atomically
//!
//! ## Available Engines
//!
//! - [`MemoryEngine`] - In-memory, with scriptable fault injection for tests

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod memory;

pub use engine::{Connection, Engine, OpenEvent, Transaction, TxnMode, UpgradeTransaction};
pub use error::{EngineError, EngineResult};
pub use memory::{FaultKind, MemoryEngine};
