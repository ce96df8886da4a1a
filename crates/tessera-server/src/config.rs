//! Node configuration.

use std::path::PathBuf;
use std::time::Duration;

use tessera_store::CachePolicy;

/// Default cadence for coordinator liveness checks.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Default maximum number of concurrent client connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1_000;

/// Everything a node needs to come up.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Advertised host, also part of the node's ring name.
    pub host: String,
    /// Port to listen on. The `host:port` pair must be unique per ring.
    pub port: u16,
    /// Coordinator address to register with. `None` runs the node
    /// unclustered, serving only what it already stores.
    pub coordinator: Option<String>,
    /// Directory for the primary store and replica files.
    pub data_dir: PathBuf,
    /// In-memory cache slots. Zero disables caching.
    pub cache_capacity: usize,
    pub cache_policy: CachePolicy,
    pub heartbeat_interval: Duration,
    pub max_connections: usize,
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port,
            coordinator: None,
            data_dir: data_dir.into(),
            cache_capacity: 0,
            cache_policy: CachePolicy::Fifo,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_coordinator(mut self, addr: impl Into<String>) -> Self {
        self.coordinator = Some(addr.into());
        self
    }

    pub fn with_cache(mut self, policy: CachePolicy, capacity: usize) -> Self {
        self.cache_policy = policy;
        self.cache_capacity = capacity;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// The address the node listens on and advertises.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
