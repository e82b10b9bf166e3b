//! Lifts the single threaded LRU into a thread safe store of byte views.
//!
//! The mutex is only ever held for the duration of one LRU operation, which is
//! pure in-memory work. All blocking activities (peer fetches, loader calls)
//! happen outside of it.
use std::fmt;
use std::sync::Mutex;

use crate::byteview::ByteView;
use crate::lru::LruCache;

/// A point-in-time snapshot of a cache's size and traffic counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    /// Number of entries currently stored.
    pub entries: usize,
    /// Bytes accounted for the current entries (keys plus values).
    pub bytes_used: usize,
    /// The byte budget (zero means unbounded).
    pub max_bytes: usize,
    /// Total number of lookups.
    pub reads: usize,
    /// Number of lookups which found an entry.
    pub hits: usize,
    /// Total number of insertions.
    pub writes: usize,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let hit_rate = match self.reads {
            0 => 0.,
            reads => self.hits as f32 / reads as f32 * 100.,
        };
        write!(
            f,
            "{} entries, {} of {}, {} reads, {} writes, {:.1} % hit rate",
            self.entries,
            crate::fmt::format_size(self.bytes_used),
            crate::fmt::format_size(self.max_bytes),
            self.reads,
            self.writes,
            hit_rate
        )
    }
}

/// The local store of a group.
///
/// The inner LRU is only materialized on the first insertion, so an idle group
/// costs next to nothing.
pub(crate) struct MemoryCache {
    max_bytes: usize,
    lru: Mutex<Option<LruCache<ByteView>>>,
}

impl MemoryCache {
    pub(crate) fn new(max_bytes: usize) -> Self {
        MemoryCache {
            max_bytes,
            lru: Mutex::new(None),
        }
    }

    /// Returns a view of the value stored for the given key.
    pub(crate) fn lookup(&self, key: &str) -> Option<ByteView> {
        let mut lru = self.lru.lock().unwrap();
        lru.as_mut()?.get(key).cloned()
    }

    /// Stores the given view, evicting older entries if the budget demands it.
    pub(crate) fn insert(&self, key: &str, value: ByteView) {
        let mut lru = self.lru.lock().unwrap();
        lru.get_or_insert_with(|| LruCache::new(self.max_bytes, None))
            .put(key.to_owned(), value);
    }

    pub(crate) fn stats(&self) -> CacheStats {
        let lru = self.lru.lock().unwrap();
        match lru.as_ref() {
            Some(lru) => CacheStats {
                entries: lru.len(),
                bytes_used: lru.bytes_used(),
                max_bytes: lru.max_bytes(),
                reads: lru.reads(),
                hits: lru.hits(),
                writes: lru.writes(),
            },
            None => CacheStats {
                max_bytes: self.max_bytes,
                ..CacheStats::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use crate::group::cache::MemoryCache;

    #[test]
    fn lookups_before_the_first_insert_miss() {
        let cache = MemoryCache::new(1024);
        assert_eq!(cache.lookup("anything"), None);
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().max_bytes, 1024);
    }

    #[test]
    fn stored_views_can_be_read_back() {
        let cache = MemoryCache::new(1024);

        cache.insert("tom", ByteView::from("630"));
        assert_eq!(cache.lookup("tom").unwrap().to_string(), "630");
        assert_eq!(cache.lookup("jerry"), None);

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.bytes_used, 6);
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.writes, 1);
    }

    #[test]
    fn stats_render_human_readable() {
        let cache = MemoryCache::new(2048);
        cache.insert("key", ByteView::from("value"));

        let rendered = cache.stats().to_string();
        assert_eq!(rendered.contains("1 entries"), true);
        assert_eq!(rendered.contains("2.00 KiB"), true);
    }
}
