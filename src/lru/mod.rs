//! Provides a size constrained LRU cache.
//!
//! An LRU cache drops the least recently used entry once it grows beyond its byte
//! budget. The cache in this module is single threaded on purpose: each
//! [Group](crate::group::Group) wraps one behind a mutex, which keeps the hot path
//! free of any internal synchronization.
//!
//! The cache is generic over its values - anything implementing [ByteSize] can be
//! stored. Within this crate that is almost always a
//! [ByteView](crate::byteview::ByteView).
mod lru_cache;

pub use lru_cache::ByteSize;
pub use lru_cache::LruCache;
