//! Connects cache nodes over HTTP.
//!
//! Every node runs one [HttpPool]. The pool plays both sides of the protocol:
//!
//! * As a **server** it answers `GET /<base_path><group>/<key>` with the raw
//!   value bytes, so that peers (and curious humans with `curl`) can read from
//!   this node.
//! * As a **client** it implements [PeerPicker]: it routes each key through the
//!   [HashRing] and hands out an HTTP getter for the owning peer.
//!
//! Group names and keys are URL escaped on the wire. The peer list is replaced
//! wholesale via [HttpPool::set_peers] - there is no incremental membership
//! protocol. When built from a [Config] via [install], the pool re-applies the
//! peer list whenever the config file changes.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Client, Request, Response, Server, StatusCode, Uri};

use crate::config::Config;
use crate::group;
use crate::hashring::HashRing;
use crate::peers::{PeerGetter, PeerPicker};

/// URL prefix under which cache values are served.
///
/// Kept stable so that nodes of mixed deployments agree on the wire format.
pub const DEFAULT_BASE_PATH: &str = "/_gocache/";

/// The HTTP transport of a cache node.
///
/// `self_addr` is the public base URL of this node (e.g.
/// `http://10.0.0.3:1790`) exactly as it appears in the peer lists of the
/// cluster - the pool uses it to recognize keys it owns itself.
pub struct HttpPool {
    self_addr: String,
    base_path: String,
    replicas: usize,
    state: Mutex<PoolState>,
}

/// Ring and clients are replaced together under one lock.
struct PoolState {
    ring: HashRing,
    peers: HashMap<String, Arc<HttpPeer>>,
}

impl HttpPool {
    /// Creates a pool for the node reachable at `self_addr` using the default
    /// base path and virtual node count.
    pub fn new(self_addr: &str) -> Arc<Self> {
        HttpPool::with_base_path(self_addr, DEFAULT_BASE_PATH, crate::hashring::DEFAULT_REPLICAS)
    }

    /// Creates a pool with a custom base path and virtual node count.
    ///
    /// All nodes of a cluster must agree on both values.
    pub fn with_base_path(self_addr: &str, base_path: &str, replicas: usize) -> Arc<Self> {
        Arc::new(HttpPool {
            self_addr: self_addr.to_owned(),
            base_path: base_path.to_owned(),
            replicas,
            state: Mutex::new(PoolState {
                ring: HashRing::new(replicas, None),
                peers: HashMap::new(),
            }),
        })
    }

    /// Replaces the set of known peers.
    ///
    /// The consistent hash ring and the per-peer HTTP clients are rebuilt from
    /// scratch; the previous membership is discarded. The list should contain
    /// this node's own address as well, otherwise the ring will route keys
    /// owned by this node to other peers.
    pub fn set_peers<S: AsRef<str>>(&self, peers: &[S]) {
        let mut state = self.state.lock().unwrap();

        state.ring = HashRing::new(self.replicas, None);
        state.ring.add(peers);

        state.peers = peers
            .iter()
            .map(|peer| {
                let peer = peer.as_ref().to_owned();
                let getter = Arc::new(HttpPeer {
                    base_url: format!("{}{}", peer, self.base_path),
                });
                (peer, getter)
            })
            .collect();

        log::info!(
            "[{}] peer set replaced ({} peers)",
            self.self_addr,
            state.peers.len()
        );
    }

    /// Serves cache lookups on the given address until the server fails.
    pub async fn serve(self: Arc<Self>, address: SocketAddr) -> anyhow::Result<()> {
        let pool = self.clone();
        let service = make_service_fn(move |_connection| {
            let pool = pool.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    let pool = pool.clone();
                    async move { Ok::<_, Infallible>(pool.handle(request).await) }
                }))
            }
        });

        log::info!("[{}] serving cache lookups on {}...", self.self_addr, address);
        Server::try_bind(&address)
            .context("Failed to bind the cache server socket.")?
            .serve(service)
            .await
            .context("The cache server terminated abnormally.")?;

        Ok(())
    }

    /// Handles a single request for `GET /<base_path><group>/<key>`.
    async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let path = request.uri().path().to_owned();
        if !path.starts_with(&self.base_path) {
            log::warn!("[{}] rejecting request for '{}'", self.self_addr, path);
            return plain_response(StatusCode::BAD_REQUEST, "unexpected path");
        }

        // The remainder is "<group>/<key>" with both parts URL escaped, so the
        // first slash is the separator.
        let remainder = &path[self.base_path.len()..];
        let (group_name, key) = match remainder.split_once('/') {
            Some((group_name, key)) if !group_name.is_empty() && !key.is_empty() => {
                (group_name, key)
            }
            _ => return plain_response(StatusCode::BAD_REQUEST, "expected <group>/<key>"),
        };

        let group_name = match urlencoding::decode(group_name) {
            Ok(group_name) => group_name,
            Err(_) => return plain_response(StatusCode::BAD_REQUEST, "malformed group name"),
        };
        let key = match urlencoding::decode(key) {
            Ok(key) => key,
            Err(_) => return plain_response(StatusCode::BAD_REQUEST, "malformed key"),
        };

        let group = match group::get_group(&group_name) {
            Some(group) => group,
            None => {
                return plain_response(
                    StatusCode::NOT_FOUND,
                    format!("no such group: {}", group_name),
                )
            }
        };

        match group.get(&key).await {
            Ok(view) => {
                let mut response = Response::new(Body::from(view.to_vec()));
                let _ = response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
                response
            }
            Err(error) => {
                log::error!(
                    "[{}] lookup of '{}' in '{}' failed: {:#}",
                    self.self_addr,
                    key,
                    group_name,
                    error
                );
                plain_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", error))
            }
        }
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let state = self.state.lock().unwrap();

        let owner = state.ring.get(key)?;
        if owner == self.self_addr {
            return None;
        }

        log::debug!("[{}] key '{}' is owned by {}", self.self_addr, key, owner);
        state.peers.get(owner).map(|peer| {
            let getter: Arc<dyn PeerGetter> = peer.clone();
            getter
        })
    }
}

/// Builds a response with the given status and a plain text body.
fn plain_response(status: StatusCode, message: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(message.into());
    *response.status_mut() = status;
    response
}

/// Reads values from one remote node.
struct HttpPeer {
    base_url: String,
}

#[async_trait]
impl PeerGetter for HttpPeer {
    async fn get(&self, group: &str, key: &str) -> anyhow::Result<Vec<u8>> {
        let url = format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(group),
            urlencoding::encode(key)
        );
        let uri: Uri = url
            .parse()
            .with_context(|| format!("Failed to parse peer url '{}'.", url))?;

        let response = Client::new()
            .get(uri)
            .await
            .with_context(|| format!("Failed to reach peer via '{}'.", url))?;

        if response.status() != StatusCode::OK {
            anyhow::bail!("peer returned status {}", response.status());
        }

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .context("Failed to read the peer response.")?;

        Ok(body.to_vec())
    }
}

/// Builds an [HttpPool] from the given config and keeps it up to date.
///
/// The pool is configured from the `cluster` section of the config. A
/// background task listens for config changes and replaces the peer set
/// wholesale whenever the file is reloaded. Must be called within a tokio
/// runtime.
pub fn install(config: Arc<Config>) -> Arc<HttpPool> {
    let settings = config.current();
    let pool = HttpPool::with_base_path(
        &settings.cluster.self_addr,
        &settings.cluster.base_path,
        settings.cluster.replicas,
    );
    pool.set_peers(&settings.cluster.peers);

    let watched_pool = pool.clone();
    let _ = tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;

        let mut changes = config.notifier();
        loop {
            match changes.recv().await {
                // A lagged receiver skipped notifications - the current
                // settings still carry the newest peer list.
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    let settings = config.current();
                    watched_pool.set_peers(&settings.cluster.peers);
                }
                Err(RecvError::Closed) => return,
            }
        }
    });

    pool
}
