use linked_hash_map::LinkedHashMap;

/// Returns the allocated memory in bytes.
pub trait ByteSize {
    /// Returns the amount of allocated memory in bytes.
    ///
    /// Note that most probably this is an approximation and not the exact byte
    /// value. However, it should represent the "largest" part of an instance.
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.capacity()
    }
}

/// Invoked with the key and value of every entry which is evicted to make room.
///
/// Note that the callback only fires for entries dropped by the cache itself, not
/// for entries replaced via [LruCache::put].
pub type EvictionCallback<V> = Box<dyn FnMut(String, V) + Send>;

/// Provides a byte-budgeted LRU cache.
///
/// The cache behaves just like a map as long as its budget permits. Once the
/// accounted memory (the length of each key plus the
/// [allocated_size](ByteSize::allocated_size) of its value) exceeds `max_bytes`,
/// least recently used entries are evicted until the budget holds again. Both
/// lookups and insertions count as a "use" and move the touched entry to the
/// most recently used position.
///
/// A `max_bytes` of zero disables the budget entirely.
///
/// # Examples
/// ```
/// # use callisto::lru::LruCache;
/// let mut lru = LruCache::new(10, None);
///
/// lru.put("a".to_owned(), "0123".to_owned());
/// lru.put("b".to_owned(), "4567".to_owned());
/// assert_eq!(lru.bytes_used(), 10);
///
/// // The third entry pushes the cache over its budget of 10 bytes, so the
/// // least recently used entry ("a") is dropped...
/// lru.put("c".to_owned(), "89ab".to_owned());
/// assert_eq!(lru.get("a"), None);
/// assert_eq!(lru.get("b").is_some(), true);
/// assert_eq!(lru.get("c").is_some(), true);
/// ```
pub struct LruCache<V: ByteSize> {
    max_bytes: usize,
    bytes_used: usize,
    reads: usize,
    hits: usize,
    writes: usize,
    map: LinkedHashMap<String, V>,
    on_evicted: Option<EvictionCallback<V>>,
}

impl<V: ByteSize> LruCache<V> {
    /// Creates a new cache with the given byte budget.
    ///
    /// A `max_bytes` of zero creates an unbounded cache. The optional callback is
    /// invoked for every entry evicted to enforce the budget.
    pub fn new(max_bytes: usize, on_evicted: Option<EvictionCallback<V>>) -> Self {
        LruCache {
            max_bytes,
            bytes_used: 0,
            reads: 0,
            hits: 0,
            writes: 0,
            map: LinkedHashMap::new(),
            on_evicted,
        }
    }

    /// Returns the value stored for the given key, or `None` on a miss.
    ///
    /// A hit marks the entry as most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.reads += 1;

        match self.map.get_refresh(key) {
            Some(value) => {
                self.hits += 1;
                Some(value)
            }
            None => None,
        }
    }

    /// Stores the given value for the given key.
    ///
    /// If the key is already present, its value is replaced and the byte
    /// accounting is adjusted by the size difference. In both cases the entry
    /// becomes the most recently used one. Afterwards, entries are evicted from
    /// the least recently used end until the budget holds.
    pub fn put(&mut self, key: String, value: V) {
        self.writes += 1;

        let value_size = value.allocated_size();
        if let Some(previous) = self.map.remove(&key) {
            self.bytes_used -= previous.allocated_size();
            self.bytes_used += value_size;
        } else {
            self.bytes_used += key.len() + value_size;
        }

        // A fresh insert always lands at the most recently used end, so a
        // replaced entry is re-pinned as well.
        let _ = self.map.insert(key, value);

        while self.max_bytes > 0 && self.bytes_used > self.max_bytes {
            self.remove_oldest();
        }
    }

    /// Evicts the least recently used entry.
    ///
    /// Invokes the eviction callback for the dropped entry. Calling this on an
    /// empty cache is a no-op.
    pub fn remove_oldest(&mut self) {
        if let Some((key, value)) = self.map.pop_front() {
            self.bytes_used -= key.len() + value.allocated_size();
            if let Some(callback) = self.on_evicted.as_mut() {
                callback(key, value);
            }
        }
    }

    /// Returns the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the number of bytes accounted for the current entries.
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Returns the byte budget of this cache (zero means unbounded).
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Returns the total number of lookups performed on this cache.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the number of lookups which found an entry.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Returns the total number of insertions performed on this cache.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Returns the cache hit rate in percent.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            reads => self.hits as f32 / reads as f32 * 100.,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::lru::LruCache;

    #[test]
    fn budget_is_enforced() {
        let mut lru = LruCache::new(10, None);

        // "a" + "0123" and "b" + "4567" account 5 bytes each and fully fit...
        lru.put("a".to_owned(), "0123".to_owned());
        lru.put("b".to_owned(), "4567".to_owned());
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.bytes_used(), 10);

        // ...adding "c" exceeds the budget and evicts exactly the oldest entry.
        lru.put("c".to_owned(), "89ab".to_owned());
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.bytes_used(), 10);
        assert_eq!(lru.get("a"), None);
        assert_eq!(lru.get("b").unwrap(), "4567");
        assert_eq!(lru.get("c").unwrap(), "89ab");
    }

    #[test]
    fn lookups_refresh_recency() {
        let mut lru = LruCache::new(10, None);

        lru.put("a".to_owned(), "0123".to_owned());
        lru.put("b".to_owned(), "4567".to_owned());

        // Touching "a" makes "b" the eviction victim...
        assert_eq!(lru.get("a").is_some(), true);
        lru.put("c".to_owned(), "89ab".to_owned());

        assert_eq!(lru.get("a").is_some(), true);
        assert_eq!(lru.get("b"), None);
        assert_eq!(lru.get("c").is_some(), true);
    }

    #[test]
    fn replacing_a_value_updates_the_accounting() {
        let mut lru = LruCache::new(0, None);

        lru.put("key".to_owned(), "value".to_owned());
        assert_eq!(lru.bytes_used(), 8);

        lru.put("key".to_owned(), "longer value".to_owned());
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.bytes_used(), 15);

        lru.put("key".to_owned(), "".to_owned());
        assert_eq!(lru.bytes_used(), 3);
    }

    #[test]
    fn replacing_a_value_repins_the_entry() {
        let mut lru = LruCache::new(10, None);

        lru.put("a".to_owned(), "0123".to_owned());
        lru.put("b".to_owned(), "4567".to_owned());

        // Overwriting "a" makes it the most recently used entry, so the next
        // eviction drops "b"...
        lru.put("a".to_owned(), "cdef".to_owned());
        lru.put("c".to_owned(), "89ab".to_owned());

        assert_eq!(lru.get("a").unwrap(), "cdef");
        assert_eq!(lru.get("b"), None);
    }

    #[test]
    fn a_zero_budget_disables_eviction() {
        let mut lru = LruCache::new(0, None);

        for index in 0..1024 {
            lru.put(format!("key-{}", index), "X".repeat(128));
        }

        assert_eq!(lru.len(), 1024);
    }

    #[test]
    fn evicted_entries_are_reported() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let listener = evicted.clone();

        let mut lru = LruCache::new(
            10,
            Some(Box::new(move |key, _value: String| {
                listener.lock().unwrap().push(key);
            })),
        );

        lru.put("a".to_owned(), "0123".to_owned());
        lru.put("b".to_owned(), "4567".to_owned());
        lru.put("c".to_owned(), "89ab".to_owned());
        lru.put("d".to_owned(), "cdef".to_owned());

        assert_eq!(*evicted.lock().unwrap(), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn remove_oldest_drops_a_single_entry() {
        let mut lru = LruCache::new(0, None);

        // Removing from an empty cache is harmless...
        lru.remove_oldest();

        lru.put("a".to_owned(), "0123".to_owned());
        lru.put("b".to_owned(), "4567".to_owned());
        lru.remove_oldest();

        assert_eq!(lru.len(), 1);
        assert_eq!(lru.bytes_used(), 5);
        assert_eq!(lru.get("a"), None);
        assert_eq!(lru.get("b").is_some(), true);
    }

    #[test]
    fn metrics_are_recorded() {
        let mut lru = LruCache::new(0, None);

        lru.put("a".to_owned(), "a".to_owned());
        lru.put("b".to_owned(), "b".to_owned());

        assert_eq!(lru.get("a").is_some(), true);
        assert_eq!(lru.get("b").is_some(), true);
        assert_eq!(lru.get("c"), None);
        assert_eq!(lru.get("d"), None);

        assert_eq!(lru.writes(), 2);
        assert_eq!(lru.reads(), 4);
        assert_eq!(lru.hits(), 2);
        assert_eq!(lru.hit_rate().round() as i32, 50);
    }
}
