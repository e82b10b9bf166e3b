//! Contains the system configuration.
//!
//! Settings are loaded from a YAML file (by convention **config/settings.yml**)
//! and parsed into a typed [Settings] value. The file is observed for changes:
//! once a newer version is detected it is re-parsed and a change notification is
//! broadcast, so that components like the [HTTP pool](crate::http) can pick up
//! the new peer list without a restart. Being an in-memory cache, a restart is
//! the most expensive operation there is - we avoid it wherever possible.
//!
//! An invalid config file is rejected as a whole and the previously loaded
//! settings stay active.
//!
//! # Example
//!
//! ```yaml
//! server:
//!     host: 0.0.0.0
//!     port: 1790
//! cluster:
//!     self: "http://10.0.0.3:1790"
//!     replicas: 50
//!     peers:
//!         - "http://10.0.0.2:1790"
//!         - "http://10.0.0.3:1790"
//!         - "http://10.0.0.4:1790"
//! groups:
//!     scores:
//!         max_memory: 64m
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::fmt::parse_size;

/// Fallback port for the cache server.
pub const DEFAULT_PORT: u16 = 1790;

/// Network settings of the local HTTP server.
#[derive(Clone, Debug)]
pub struct ServerSettings {
    /// The IP to bind to.
    pub host: String,
    /// The port to listen on.
    pub port: u16,
}

impl ServerSettings {
    /// Returns the bind address as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Identity and membership settings of this cache node.
#[derive(Clone, Debug)]
pub struct ClusterSettings {
    /// The public base URL of this node, as listed in `peers`.
    pub self_addr: String,
    /// URL prefix under which values are served.
    pub base_path: String,
    /// Virtual nodes per peer on the hash ring.
    pub replicas: usize,
    /// Base URLs of all nodes of the cluster (including this one).
    pub peers: Vec<String>,
}

/// The parsed contents of the config file.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Local server bind settings.
    pub server: ServerSettings,
    /// Cluster identity and peer membership.
    pub cluster: ClusterSettings,
    /// Byte budgets per cache group.
    pub groups: HashMap<String, usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server: ServerSettings {
                host: "0.0.0.0".to_owned(),
                port: DEFAULT_PORT,
            },
            cluster: ClusterSettings {
                self_addr: format!("http://127.0.0.1:{}", DEFAULT_PORT),
                base_path: crate::http::DEFAULT_BASE_PATH.to_owned(),
                replicas: crate::hashring::DEFAULT_REPLICAS,
                peers: Vec::new(),
            },
            groups: HashMap::new(),
        }
    }
}

impl Settings {
    /// Returns the configured byte budget for the given group, if any.
    pub fn group_budget(&self, name: &str) -> Option<usize> {
        self.groups.get(name).copied()
    }

    fn parse(root: &Yaml) -> anyhow::Result<Settings> {
        let defaults = Settings::default();

        let port = match root["server"]["port"].as_i64() {
            None => defaults.server.port,
            Some(port) if (1..=65535).contains(&port) => port as u16,
            Some(port) => anyhow::bail!("'{}' is not a valid server port.", port),
        };
        let host = root["server"]["host"]
            .as_str()
            .unwrap_or(&defaults.server.host)
            .to_owned();

        let self_addr = match root["cluster"]["self"].as_str() {
            Some(self_addr) => self_addr.to_owned(),
            None => format!("http://127.0.0.1:{}", port),
        };
        let base_path = root["cluster"]["base_path"]
            .as_str()
            .unwrap_or(&defaults.cluster.base_path)
            .to_owned();
        if !base_path.starts_with('/') || !base_path.ends_with('/') {
            anyhow::bail!(
                "'{}' is not a valid base path - it must start and end with '/'.",
                base_path
            );
        }

        let replicas = match root["cluster"]["replicas"].as_i64() {
            None => defaults.cluster.replicas,
            Some(replicas) if replicas >= 1 => replicas as usize,
            Some(replicas) => anyhow::bail!("'{}' is not a valid replica count.", replicas),
        };

        let mut peers = Vec::new();
        if let Some(list) = root["cluster"]["peers"].as_vec() {
            for entry in list {
                match entry.as_str() {
                    Some(peer) => peers.push(peer.to_owned()),
                    None => anyhow::bail!("The peer list must only contain strings."),
                }
            }
        }

        let mut groups = HashMap::new();
        if let Some(map) = root["groups"].as_hash() {
            for (name, settings) in map {
                let name = name
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("Group names must be strings."))?;
                let budget = match settings["max_memory"].as_str() {
                    Some(size) => parse_size(size)?,
                    None => 0,
                };
                let _ = groups.insert(name.to_owned(), budget);
            }
        }

        Ok(Settings {
            server: ServerSettings { host, port },
            cluster: ClusterSettings {
                self_addr,
                base_path,
                replicas,
                peers,
            },
            groups,
        })
    }
}

/// Represents the change listener.
///
/// The message itself carries no information - receiving one simply means the
/// settings were replaced and should be re-read via [Config::current].
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Provides access to the system configuration.
///
/// The currently loaded [Settings] are obtained via [Config::current]. The
/// returned snapshot is cheap to fetch but never updated in place, so it should
/// not be stored for long - interested components register a
/// [notifier](Config::notifier) instead.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    settings: ArcSwap<Settings>,
    last_loaded: Mutex<Option<SystemTime>>,
}

impl Config {
    /// Creates a config reading the given file.
    ///
    /// The file is not read yet - call [load](Config::load) or
    /// [load_from_string](Config::load_from_string).
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            tx,
            settings: ArcSwap::new(Arc::new(Settings::default())),
            last_loaded: Mutex::new(None),
        }
    }

    /// Obtains a change notifier which receives a message once the config
    /// changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Returns a snapshot of the currently loaded settings.
    pub fn current(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    /// Reads and parses the underlying file.
    ///
    /// Normally invoked by the change monitor (see
    /// [start_watching](Config::start_watching)) rather than manually.
    pub async fn load(&self) -> anyhow::Result<()> {
        log::info!("Loading config file {}...", &self.filename);

        if let Ok(metadata) = tokio::fs::metadata(&self.filename).await {
            if !metadata.is_file() {
                // Within docker, an unmounted volume shows up as an empty
                // directory. We keep running on defaults in that case.
                log::info!("Config file is not a regular file - continuing with defaults.");
                return Ok(());
            }
        }

        let data = match tokio::fs::read_to_string(&self.filename).await {
            Ok(data) => data,
            Err(error) => {
                return Err(anyhow::anyhow!(
                    "Cannot read config file {}: {}",
                    &self.filename,
                    error
                ));
            }
        };

        let last_modified = tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok());

        self.load_from_string(data.as_str(), last_modified)
    }

    /// Parses the given string as if it were the contents of the config file.
    ///
    /// This is mainly used by tests which do not want to touch the file
    /// system.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::config::Config;
    /// let config = Config::new("unused.yml");
    /// config.load_from_string("
    /// server:
    ///     port: 12345
    /// ", None).unwrap();
    ///
    /// assert_eq!(config.current().server.port, 12345);
    /// ```
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let documents = match YamlLoader::load_from_str(data) {
            Ok(documents) => documents,
            Err(error) => {
                return Err(anyhow::anyhow!(
                    "Cannot parse config file {}: {}",
                    &self.filename,
                    error
                ));
            }
        };

        let settings = match documents.first() {
            Some(root) => Settings::parse(root)?,
            None => Settings::default(),
        };

        self.settings.store(Arc::new(settings));
        *self.last_loaded.lock().unwrap() = last_modified;

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }

    /// Spawns a background task which polls the config file for changes.
    ///
    /// The file's modification timestamp is checked every two seconds; a newer
    /// file is re-loaded and broadcast. Must be called within a tokio runtime.
    pub fn start_watching(self: &Arc<Self>) {
        let config = self.clone();
        let _ = tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;

                let last_modified = tokio::fs::metadata(&config.filename)
                    .await
                    .ok()
                    .filter(|metadata| metadata.is_file())
                    .and_then(|metadata| metadata.modified().ok());
                let last_loaded = *config.last_loaded.lock().unwrap();

                if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded)
                {
                    match config.load().await {
                        Ok(_) => log::info!("System configuration was re-loaded."),
                        Err(error) => {
                            log::error!("Failed to re-load the system config: {:#}", error)
                        }
                    }
                }
            }
        });
    }
}
