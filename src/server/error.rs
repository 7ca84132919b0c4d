// src/server/error.rs
use crate::config::ConfigError;
use std::io;

/// Failures while setting up the server socket. Once a server is running,
/// errors are reported per connection through `ServerEvent::Closed`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind 0.0.0.0:{port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Failed to listen on bound socket: {0}")]
    Listen(#[source] io::Error),

    #[error("Failed to read local address: {0}")]
    LocalAddr(#[source] io::Error),

    #[error("Invalid server settings: {0}")]
    Config(#[from] ConfigError),
}
