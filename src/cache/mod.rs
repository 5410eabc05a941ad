//! Versioned response store.
//!
//! A storage backend holds named stores (`{name}-{version}`), each mapping a
//! normalized request key to a captured response:
//! - exactly one entry per key, later writes overwrite earlier ones
//! - entries are never deleted one by one, only whole stores are
//! - no freshness metadata is consulted; an entry is valid until its store goes

mod memory;
mod storage;
mod store;
mod traits;

pub use memory::MemoryStorage;
pub use storage::{CacheStorage, SqliteStorage};
pub use store::CacheStore;
pub use traits::{CacheResult, CacheSource, CachedEntry, RequestKey, StoreId};
