//! Callisto is a library for running a distributed in-memory key/value cache.
//!
//! # Introduction
//! A **callisto** cluster is a set of equal peers. Every node holds a byte
//! budgeted LRU cache and serves reads over HTTP; keys are assigned to their
//! canonical owner via consistent hashing, so a request arriving at any node
//! either answers from its local cache, forwards to the owning peer, or falls
//! back to a user supplied [Loader] which produces the authoritative value.
//! Concurrent requests for the same cold key are collapsed into a single load,
//! which keeps a cache stampede from ever reaching the backing data source.
//!
//! There is deliberately no write path: values enter a cluster exclusively
//! through loaders. This makes the system trivial to reason about - a cache
//! entry is always a (possibly stale) copy of what the loader returned - and is
//! a perfect fit for read-heavy, expensive-to-compute data like rendered
//! fragments, search metadata or semi-constant masterdata.
//!
//! # Modules
//! * **[group]**: named cache namespaces and the miss resolution pipeline -
//!   this is the embedding API.
//! * **[lru]**: the byte budgeted LRU cache backing each group.
//! * **[hashring]**: consistent hashing used to assign keys to peers.
//! * **[singleflight]**: per-key deduplication of concurrent loads.
//! * **[byteview]**: immutable value snapshots handed out by caches.
//! * **[peers]**: the transport contracts between a group and its peers.
//! * **[http]**: the HTTP implementation of those contracts.
//! * **[config]**: reload-aware YAML configuration (peer lists can change
//!   without a restart).
//!
//! # Example
//! ```no_run
//! use callisto::{new_group, LoaderFn};
//! use callisto::config::Config;
//! use callisto::http;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     callisto::init_logging();
//!
//!     // Create a group which computes values on demand...
//!     let _scores = new_group(
//!         "scores",
//!         64 * 1024 * 1024,
//!         Arc::new(LoaderFn::new(|key: &str| -> anyhow::Result<Vec<u8>> {
//!             Ok(format!("value-of-{}", key).into_bytes())
//!         })),
//!     );
//!
//!     // ...wire the cluster from the config file and serve.
//!     let config = Arc::new(Config::new("config/settings.yml"));
//!     config.load().await?;
//!     config.start_watching();
//!
//!     let settings = config.current();
//!     let pool = http::install(config.clone());
//!     for group in callisto::group_names() {
//!         callisto::get_group(&group)
//!             .expect("group vanished")
//!             .register_peers(pool.clone());
//!     }
//!
//!     pool.serve(settings.server.address().parse()?).await
//! }
//! ```
#![deny(
    warnings,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod byteview;
pub mod config;
pub mod fmt;
pub mod group;
pub mod hashring;
pub mod http;
pub mod lru;
pub mod peers;
pub mod singleflight;

pub use byteview::ByteView;
pub use group::{get_group, group_names, new_group, Group, Loader, LoaderFn};

/// Initializes the logging system.
///
/// Logs are written to stdout, which is all that is needed for a process
/// running inside a container. The date format is digestible by established
/// log collectors.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Guarded by Once as otherwise integration tests might crash when the
    // logging system is initialized several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}
