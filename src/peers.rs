//! Contracts between a cache group and the transport connecting it to its peers.
//!
//! A [Group](crate::group::Group) never talks to the network itself. Instead it
//! asks a [PeerPicker] which node owns a key and, if that is a remote node,
//! delegates the load to the returned [PeerGetter]. The crate ships an HTTP
//! implementation of both ([HttpPool](crate::http::HttpPool)), but embedders are
//! free to provide their own transport.

use std::sync::Arc;

use async_trait::async_trait;

/// Picks the peer responsible for a key.
pub trait PeerPicker: Send + Sync {
    /// Returns the getter for the node owning the given key.
    ///
    /// Returns `None` if the key is owned by the local node or if no peers are
    /// configured - in both cases the caller should load locally. An
    /// implementation must never return a getter pointing at the local node.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// Fetches a value for a group/key pair from a remote node.
#[async_trait]
pub trait PeerGetter: Send + Sync {
    /// Returns the raw bytes stored for `key` in `group` on the remote node.
    async fn get(&self, group: &str, key: &str) -> anyhow::Result<Vec<u8>>;
}
