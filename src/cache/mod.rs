//! Named request/response caches.
//!
//! Plays the part of the browser's Cache Storage: each cache has a name,
//! maps normalized request URLs to stored responses, and is never evicted
//! by the agent.

mod storage;

pub use storage::{CacheStorage, CachedResponse, SqliteStorage};
