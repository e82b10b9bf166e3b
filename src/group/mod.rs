//! Provides named cache namespaces and the miss resolution pipeline.
//!
//! A [Group] is a named cache with its own byte budget and its own [Loader]. A
//! lookup via [Group::get] walks the following pipeline:
//!
//! 1. Consult the local cache - a hit is returned immediately.
//! 2. On a miss, enter the per-key [singleflight](crate::singleflight) barrier,
//!    so that any number of concurrent requests for a cold key perform exactly
//!    one load.
//! 3. Inside the barrier, ask the registered [PeerPicker](crate::peers::PeerPicker)
//!    (if any) which node owns the key. If a remote node does, fetch the value
//!    from there. A failed peer fetch is logged and falls back to the local
//!    loader.
//! 4. Otherwise invoke the local [Loader].
//!
//! Values obtained by either path are inserted into the local cache before they
//! are returned.
//!
//! Groups live in a process wide registry: [new_group] registers, [get_group]
//! looks up. This mirrors how server handlers resolve the group named in a
//! request path (see [http](crate::http)).
//!
//! # Examples
//! ```
//! use callisto::{new_group, LoaderFn};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let moons = new_group(
//!         "moons",
//!         64 * 1024,
//!         Arc::new(LoaderFn::new(|key: &str| -> anyhow::Result<Vec<u8>> {
//!             Ok(format!("data for {}", key).into_bytes())
//!         })),
//!     );
//!
//!     // The first lookup runs the loader, the second one hits the cache...
//!     assert_eq!(moons.get("europa").await?.to_string(), "data for europa");
//!     assert_eq!(moons.get("europa").await?.to_string(), "data for europa");
//!     Ok(())
//! }
//! ```
mod cache;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use crate::byteview::ByteView;
use crate::group::cache::MemoryCache;
use crate::peers::{PeerGetter, PeerPicker};
use crate::singleflight::Singleflight;

pub use cache::CacheStats;

/// Loads the authoritative value for a key.
///
/// The loader is the data source behind a group: it is invoked whenever a key is
/// neither cached locally nor obtainable from a peer. Typical implementations
/// query a database or compute the value. For simple cases a closure can be
/// wrapped in a [LoaderFn].
#[async_trait]
pub trait Loader: Send + Sync {
    /// Returns the value for the given key.
    ///
    /// Errors are passed through to the caller of [Group::get] verbatim; the
    /// result is not cached in that case.
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts a plain closure into a [Loader].
///
/// # Examples
/// ```
/// use callisto::LoaderFn;
///
/// let loader = LoaderFn::new(|key: &str| -> anyhow::Result<Vec<u8>> {
///     Ok(key.as_bytes().to_vec())
/// });
/// ```
pub struct LoaderFn<F>(F);

impl<F> LoaderFn<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    /// Wraps the given closure.
    pub fn new(callback: F) -> Self {
        LoaderFn(callback)
    }
}

#[async_trait]
impl<F> Loader for LoaderFn<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.0)(key)
    }
}

lazy_static::lazy_static! {
    /// The process wide registry of all groups, keyed by name.
    static ref GROUPS: RwLock<HashMap<String, Arc<Group>>> = RwLock::new(HashMap::new());
}

/// A named cache namespace.
///
/// Groups are created via [new_group] and live for the remainder of the
/// process. All fields are internal; interaction happens through [Group::get],
/// [Group::register_peers] and [Group::stats].
pub struct Group {
    name: String,
    loader: Arc<dyn Loader>,
    main_cache: MemoryCache,
    flights: Singleflight<ByteView>,
    peers: Mutex<Option<Arc<dyn PeerPicker>>>,
}

/// Creates a group and registers it under the given name.
///
/// `cache_bytes` is the byte budget of the group's local cache (zero disables
/// the bound). The loader provides values for keys this node is responsible
/// for.
///
/// # Panics
/// Panics if a group with the same name has already been registered. Reusing a
/// name is a wiring mistake: it would silently orphan the cache of the existing
/// group.
pub fn new_group(name: &str, cache_bytes: usize, loader: Arc<dyn Loader>) -> Arc<Group> {
    let mut groups = GROUPS.write().unwrap();

    if groups.contains_key(name) {
        panic!("a cache group named '{}' is already registered", name);
    }

    let group = Arc::new(Group {
        name: name.to_owned(),
        loader,
        main_cache: MemoryCache::new(cache_bytes),
        flights: Singleflight::default(),
        peers: Mutex::new(None),
    });
    let _ = groups.insert(name.to_owned(), group.clone());

    group
}

/// Returns the group registered under the given name, if any.
pub fn get_group(name: &str) -> Option<Arc<Group>> {
    GROUPS.read().unwrap().get(name).cloned()
}

/// Returns the names of all registered groups.
pub fn group_names() -> Vec<String> {
    GROUPS.read().unwrap().keys().cloned().collect()
}

impl Group {
    /// Returns the name this group is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binds the peer picker used to route keys to their owning nodes.
    ///
    /// Without a picker the group always loads locally.
    ///
    /// # Panics
    /// Panics when called a second time - re-binding the transport of a live
    /// group is a wiring mistake.
    pub fn register_peers(&self, picker: Arc<dyn PeerPicker>) {
        let mut peers = self.peers.lock().unwrap();
        if peers.is_some() {
            panic!("register_peers called more than once for group '{}'", self.name);
        }
        *peers = Some(picker);
    }

    /// Returns the value for the given key.
    ///
    /// Resolution order: local cache, owning peer (if one is registered and the
    /// key maps to a remote node), local loader. Concurrent calls for the same
    /// cold key are coalesced into a single load.
    pub async fn get(&self, key: &str) -> anyhow::Result<ByteView> {
        if key.is_empty() {
            return Err(anyhow::anyhow!("key is required"));
        }

        if let Some(view) = self.main_cache.lookup(key) {
            log::debug!("[{}] cache hit for '{}'", self.name, key);
            return Ok(view);
        }

        self.load(key).await
    }

    /// Returns a snapshot of the local cache's counters.
    pub fn stats(&self) -> CacheStats {
        self.main_cache.stats()
    }

    /// Resolves a miss, deduplicating concurrent loads per key.
    async fn load(&self, key: &str) -> anyhow::Result<ByteView> {
        let outcome = self
            .flights
            .execute(key, || async move {
                if let Some(peer) = self.pick_peer(key) {
                    match self.fetch_from_peer(peer.as_ref(), key).await {
                        Ok(view) => return Ok(view),
                        Err(error) => log::warn!(
                            "[{}] fetching '{}' from its owning peer failed, \
                             falling back to the local loader: {:#}",
                            self.name,
                            key,
                            error
                        ),
                    }
                }

                self.load_locally(key).await
            })
            .await;

        // Joiners share the leader's error as an Arc - rewrap it so that every
        // caller receives an owned error with the same message.
        outcome.map_err(|error| anyhow::anyhow!(error))
    }

    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let peers = self.peers.lock().unwrap();
        peers.as_ref()?.pick_peer(key)
    }

    async fn fetch_from_peer(&self, peer: &dyn PeerGetter, key: &str) -> anyhow::Result<ByteView> {
        let bytes = peer.get(&self.name, key).await?;
        let view = ByteView::new(bytes);
        self.main_cache.insert(key, view.clone());
        Ok(view)
    }

    async fn load_locally(&self, key: &str) -> anyhow::Result<ByteView> {
        let bytes = self.loader.load(key).await?;
        let view = ByteView::new(bytes);
        self.main_cache.insert(key, view.clone());
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::group::{get_group, new_group, Group, Loader, LoaderFn};
    use crate::peers::{PeerGetter, PeerPicker};
    use crate::testing::test_async;

    /// A loader which counts its invocations and takes a moment to answer.
    struct CountingLoader {
        invocations: AtomicUsize,
    }

    #[async_trait]
    impl Loader for CountingLoader {
        async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>> {
            let _ = self.invocations.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(format!("value-of-{}", key).into_bytes())
        }
    }

    /// A picker which always routes to the same getter.
    struct FixedPicker {
        getter: Arc<dyn PeerGetter>,
    }

    impl PeerPicker for FixedPicker {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            Some(self.getter.clone())
        }
    }

    /// A peer which never answers successfully.
    struct UnreachablePeer;

    #[async_trait]
    impl PeerGetter for UnreachablePeer {
        async fn get(&self, _group: &str, _key: &str) -> anyhow::Result<Vec<u8>> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    /// A peer which answers every request with a fixed value.
    struct RecordedPeer {
        invocations: AtomicUsize,
    }

    #[async_trait]
    impl PeerGetter for RecordedPeer {
        async fn get(&self, group: &str, key: &str) -> anyhow::Result<Vec<u8>> {
            let _ = self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}/{} from peer", group, key).into_bytes())
        }
    }

    fn counting_group(name: &str) -> (Arc<Group>, Arc<AtomicUsize>) {
        let invocations = Arc::new(AtomicUsize::new(0));
        let loader_invocations = invocations.clone();
        let group = new_group(
            name,
            2 << 10,
            Arc::new(LoaderFn::new(move |key: &str| -> anyhow::Result<Vec<u8>> {
                let _ = loader_invocations.fetch_add(1, Ordering::SeqCst);
                Ok(format!("value-of-{}", key).into_bytes())
            })),
        );

        (group, invocations)
    }

    #[test]
    fn cached_values_skip_the_loader() {
        test_async(async {
            let (group, invocations) = counting_group("scores_basic");

            assert_eq!(group.get("Tom").await.unwrap().to_string(), "value-of-Tom");
            assert_eq!(invocations.load(Ordering::SeqCst), 1);

            // The second lookup is served from the cache...
            assert_eq!(group.get("Tom").await.unwrap().to_string(), "value-of-Tom");
            assert_eq!(invocations.load(Ordering::SeqCst), 1);

            // ...while a different key consults the loader again.
            assert_eq!(group.get("Sam").await.unwrap().to_string(), "value-of-Sam");
            assert_eq!(invocations.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn the_empty_key_is_rejected() {
        test_async(async {
            let (group, invocations) = counting_group("scores_empty_key");

            let error = group.get("").await.unwrap_err();
            assert_eq!(error.to_string(), "key is required");
            assert_eq!(invocations.load(Ordering::SeqCst), 0);
        });
    }

    #[test]
    fn loader_errors_are_not_cached() {
        test_async(async {
            let invocations = Arc::new(AtomicUsize::new(0));
            let loader_invocations = invocations.clone();
            let group = new_group(
                "scores_failing",
                2 << 10,
                Arc::new(LoaderFn::new(move |key: &str| -> anyhow::Result<Vec<u8>> {
                    let _ = loader_invocations.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("no value for {}", key))
                })),
            );

            assert_eq!(
                group.get("X").await.unwrap_err().to_string(),
                "no value for X"
            );

            // The failure is not remembered - the next lookup tries again.
            assert_eq!(
                group.get("X").await.unwrap_err().to_string(),
                "no value for X"
            );
            assert_eq!(invocations.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn concurrent_lookups_load_once() {
        test_async(async {
            let group = new_group(
                "scores_stampede",
                2 << 10,
                Arc::new(CountingLoader {
                    invocations: AtomicUsize::new(0),
                }),
            );

            let mut tasks = Vec::new();
            for _ in 0..10 {
                let group = group.clone();
                tasks.push(tokio::spawn(
                    async move { group.get("cold").await.unwrap() },
                ));
            }

            for task in tasks {
                assert_eq!(task.await.unwrap().to_string(), "value-of-cold");
            }

            let stats = group.stats();
            assert_eq!(stats.writes, 1);
        });
    }

    #[test]
    fn peer_failures_fall_back_to_the_loader() {
        test_async(async {
            let (group, invocations) = counting_group("scores_fallback");
            group.register_peers(Arc::new(FixedPicker {
                getter: Arc::new(UnreachablePeer),
            }));

            // The peer fails, so the local loader answers...
            assert_eq!(group.get("hot").await.unwrap().to_string(), "value-of-hot");
            assert_eq!(invocations.load(Ordering::SeqCst), 1);

            // ...and the result is cached like any other value.
            assert_eq!(group.get("hot").await.unwrap().to_string(), "value-of-hot");
            assert_eq!(invocations.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn remote_values_are_cached_locally() {
        test_async(async {
            let (group, loader_invocations) = counting_group("scores_remote");
            let peer = Arc::new(RecordedPeer {
                invocations: AtomicUsize::new(0),
            });
            group.register_peers(Arc::new(FixedPicker {
                getter: peer.clone(),
            }));

            assert_eq!(
                group.get("warm").await.unwrap().to_string(),
                "scores_remote/warm from peer"
            );
            assert_eq!(peer.invocations.load(Ordering::SeqCst), 1);

            // The second lookup neither asks the peer nor the loader.
            assert_eq!(
                group.get("warm").await.unwrap().to_string(),
                "scores_remote/warm from peer"
            );
            assert_eq!(peer.invocations.load(Ordering::SeqCst), 1);
            assert_eq!(loader_invocations.load(Ordering::SeqCst), 0);
        });
    }

    #[test]
    fn the_registry_resolves_names() {
        let group = new_group(
            "scores_registry",
            1024,
            Arc::new(LoaderFn::new(|_key: &str| -> anyhow::Result<Vec<u8>> {
                Ok(Vec::new())
            })),
        );

        assert_eq!(
            get_group("scores_registry").unwrap().name(),
            group.name()
        );
        assert_eq!(get_group("unknown").is_none(), true);
        assert_eq!(
            crate::group::group_names().contains(&"scores_registry".to_owned()),
            true
        );
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_names_are_rejected() {
        let loader = Arc::new(LoaderFn::new(|_key: &str| -> anyhow::Result<Vec<u8>> {
            Ok(Vec::new())
        }));

        let _ = new_group("scores_duplicate", 1024, loader.clone());
        let _ = new_group("scores_duplicate", 1024, loader);
    }

    #[test]
    #[should_panic(expected = "more than once")]
    fn the_peer_picker_binds_once() {
        let (group, _) = counting_group("scores_rebind");
        let picker = Arc::new(FixedPicker {
            getter: Arc::new(UnreachablePeer),
        });

        group.register_peers(picker.clone());
        group.register_peers(picker);
    }
}
