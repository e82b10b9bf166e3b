//! Maps cache keys onto the node responsible for them.
//!
//! Every node of a cluster builds the same [HashRing] from the same peer list.
//! Each peer is placed on a 32 bit ring at [replicas](DEFAULT_REPLICAS) positions
//! (its "virtual nodes") and a key belongs to the first virtual node found
//! clockwise from the key's own hash. Virtual nodes smooth out the load
//! distribution, and adding or removing a peer only moves the keys adjacent to
//! its virtual nodes instead of reshuffling the whole key space.
//!
//! The ring is a pure data structure: membership changes are performed by
//! building a fresh ring (see [HttpPool::set_peers](crate::http::HttpPool::set_peers)).

use fnv::FnvHashMap;

/// Number of virtual nodes placed on the ring per peer unless configured
/// otherwise.
pub const DEFAULT_REPLICAS: usize = 50;

/// A hash function mapping raw bytes onto the 32 bit ring.
///
/// The default is CRC32 (IEEE). Tests inject deterministic functions here.
pub type RingHash = fn(&[u8]) -> u32;

/// A consistent hash ring over a set of peer identifiers.
///
/// # Examples
/// ```
/// use callisto::hashring::HashRing;
///
/// let mut ring = HashRing::new(50, None);
/// ring.add(&["node-a", "node-b", "node-c"]);
///
/// // Every key is owned by exactly one node and lookups are stable...
/// let owner = ring.get("some key").unwrap().to_owned();
/// assert_eq!(ring.get("some key").unwrap(), owner);
/// ```
pub struct HashRing {
    hash: RingHash,
    replicas: usize,
    keys: Vec<u32>,
    nodes: FnvHashMap<u32, String>,
}

impl HashRing {
    /// Creates an empty ring.
    ///
    /// `replicas` determines how many virtual nodes each peer occupies (at least
    /// one). If no hash function is given, CRC32 (IEEE) is used.
    pub fn new(replicas: usize, hash: Option<RingHash>) -> Self {
        HashRing {
            hash: hash.unwrap_or(crc32fast::hash),
            replicas: replicas.max(1),
            keys: Vec::new(),
            nodes: FnvHashMap::default(),
        }
    }

    /// Places the given peers on the ring.
    ///
    /// Each peer `p` is hashed `replicas` times as `"<i>" + p` for
    /// `i in 0..replicas`. If two virtual nodes collide on the same hash, the
    /// peer added last wins that position.
    pub fn add<S: AsRef<str>>(&mut self, peers: &[S]) {
        for peer in peers {
            let peer = peer.as_ref();
            for index in 0..self.replicas {
                let hash = (self.hash)(format!("{}{}", index, peer).as_bytes());
                self.keys.push(hash);
                let _ = self.nodes.insert(hash, peer.to_owned());
            }
        }

        self.keys.sort_unstable();
    }

    /// Returns the peer responsible for the given key.
    ///
    /// The owner is the peer behind the first virtual node whose hash is greater
    /// than or equal to the key's hash, wrapping around to the start of the ring
    /// if there is none. An empty ring yields `None`.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let index = self.keys.partition_point(|&virtual_node| virtual_node < hash);
        let virtual_node = self.keys[index % self.keys.len()];

        self.nodes.get(&virtual_node).map(|peer| peer.as_str())
    }

    /// Determines if any peer has been placed on the ring.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
