//! Persistent, named cache stores holding request/response snapshots.
//!
//! This module is independent of the interceptor lifecycle:
//! - Stores are addressed by name and created on first open
//! - Entries are keyed by method + URL, with `Vary` honoured on lookup
//! - Only GET requests are ever stored or matched
//! - Whole stores are deleted at once; entries never expire individually

mod key;
#[cfg(test)]
pub mod memory;
mod storage;
mod store;

pub use storage::{CacheStorage, RegistrationRecord, SqliteStorage};
pub use store::CacheStore;
