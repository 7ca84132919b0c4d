// src/config/models.rs
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Smallest usable read buffer: one byte of payload plus the reserved slot.
pub const MIN_BUFFER_SIZE: usize = 2;

/// Largest per-connection read buffer (16 MiB).
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Connection slots and channel capacity are both backed by tokio semaphores.
pub const MAX_PERMITS: usize = Semaphore::MAX_PERMITS;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Name of the vertex this process runs as. When set, the listen port
    /// comes from that vertex instead of `server.port`.
    #[serde(default)]
    pub node: Option<String>,

    #[serde(default)]
    pub vertices: Vec<Vertex>,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_accept_backoff_ms")]
    pub accept_backoff_ms: u64,
}

impl ServerConfig {
    pub fn accept_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_limits(
            self.buffer_size,
            self.backlog,
            self.max_connections,
            self.event_capacity,
        )
    }
}

/// Bounds shared by the config file and `ServerBuilder`.
pub fn validate_limits(
    buffer_size: usize,
    backlog: u32,
    max_connections: usize,
    event_capacity: usize,
) -> Result<(), ConfigError> {
    if buffer_size < MIN_BUFFER_SIZE {
        return Err(ConfigError::BufferTooSmall(buffer_size));
    }
    if buffer_size > MAX_BUFFER_SIZE {
        return Err(ConfigError::BufferTooLarge(buffer_size));
    }
    if backlog == 0 {
        return Err(ConfigError::ZeroBacklog);
    }
    if max_connections == 0 {
        return Err(ConfigError::ZeroMaxConnections);
    }
    if max_connections > MAX_PERMITS {
        return Err(ConfigError::TooManyConnections(max_connections));
    }
    if event_capacity == 0 {
        return Err(ConfigError::ZeroEventCapacity);
    }
    if event_capacity > MAX_PERMITS {
        return Err(ConfigError::EventCapacityTooLarge(event_capacity));
    }
    Ok(())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            backlog: default_backlog(),
            buffer_size: default_buffer_size(),
            max_connections: default_max_connections(),
            event_capacity: default_event_capacity(),
            accept_backoff_ms: default_accept_backoff_ms(),
        }
    }
}

/// A node of the topology: a named endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    pub name: String,
    pub ip: String,
    pub port: u16,
}

impl Vertex {
    /// Two vertices clash when they share a name or an endpoint.
    pub fn conflicts_with(&self, other: &Vertex) -> bool {
        self.name == other.name || (self.ip == other.ip && self.port == other.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Buffer size must be at least 2 bytes, got {0}")]
    BufferTooSmall(usize),

    #[error("Buffer size must be at most {} bytes, got {0}", MAX_BUFFER_SIZE)]
    BufferTooLarge(usize),

    #[error("Backlog must be greater than zero")]
    ZeroBacklog,

    #[error("max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("max_connections must be at most {}, got {0}", MAX_PERMITS)]
    TooManyConnections(usize),

    #[error("event_capacity must be greater than zero")]
    ZeroEventCapacity,

    #[error("event_capacity must be at most {}, got {0}", MAX_PERMITS)]
    EventCapacityTooLarge(usize),

    #[error("Ambiguous vertex definition: {name} ({ip}:{port})")]
    AmbiguousVertex { name: String, ip: String, port: u16 },

    #[error("Node '{0}' is not part of the topology")]
    UnknownNode(String),

    #[error("Metrics path must start with '/', got '{0}'")]
    InvalidMetricsPath(String),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;

        for (i, vertex) in self.vertices.iter().enumerate() {
            if self.vertices[..i].iter().any(|seen| seen.conflicts_with(vertex)) {
                return Err(ConfigError::AmbiguousVertex {
                    name: vertex.name.clone(),
                    ip: vertex.ip.clone(),
                    port: vertex.port,
                });
            }
        }

        if let Some(node) = &self.node {
            if self.own_vertex().is_none() {
                return Err(ConfigError::UnknownNode(node.clone()));
            }
        }

        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            return Err(ConfigError::InvalidMetricsPath(self.metrics.path.clone()));
        }

        Ok(())
    }

    /// The vertex named by `node`, if any.
    pub fn own_vertex(&self) -> Option<&Vertex> {
        let node = self.node.as_deref()?;
        self.vertices.iter().find(|v| v.name == node)
    }

    pub fn listen_port(&self) -> u16 {
        self.own_vertex()
            .map(|v| v.port)
            .unwrap_or(self.server.port)
    }
}

fn default_port() -> u16 {
    5000
}

fn default_backlog() -> u32 {
    5
}

fn default_buffer_size() -> usize {
    1024
}

fn default_max_connections() -> usize {
    256
}

fn default_event_capacity() -> usize {
    1024
}

fn default_accept_backoff_ms() -> u64 {
    50
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
