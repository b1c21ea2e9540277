//! Cache backends for raw feed bytes.
//!
//! [`KeyValueStore`] is the seam the feed cache talks to. Two backends ship
//! with the crate: [`MemoryStore`] (bounded LRU, per process) and
//! [`SqliteStore`] (persistent across runs).

mod sqlite;
mod store;

pub use sqlite::SqliteStore;
pub use store::{CacheError, KeyValueStore, MemoryStore};
