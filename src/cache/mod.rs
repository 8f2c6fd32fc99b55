//! Persistent response partitions for offline support.
//!
//! This module provides the storage side of the offline cache:
//! - Named partitions mapping request identity to the latest stored response
//! - Insertion-ordered entries so partitions can be trimmed oldest-first
//! - Registration slots recording which generation is active or waiting

mod eviction;
mod storage;
mod traits;

pub use eviction::enforce_limit;
pub use storage::{CacheStorage, CachedResponse, RegistrationSlot, SqliteStorage};
pub use traits::CacheSource;
