// src/server/event.rs
use std::fmt;

/// Identifies one accepted connection for the lifetime of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side.
    Eof,
    /// A read failed; the message is the underlying io error.
    Error(String),
    /// The server was asked to stop.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Eof => "eof",
            CloseReason::Error(_) => "error",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Error(msg) => write!(f, "error: {}", msg),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Everything a running server reports, delivered in order on one channel.
///
/// For a given connection the sequence is always `Accepted`, any number of
/// `Data`, then exactly one `Closed`. Events of different connections may
/// interleave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Accepted {
        id: ConnectionId,
        address: String,
        port: u16,
    },
    Data {
        id: ConnectionId,
        bytes: Vec<u8>,
    },
    Closed {
        id: ConnectionId,
        reason: CloseReason,
    },
}

impl ServerEvent {
    pub fn connection(&self) -> ConnectionId {
        match self {
            ServerEvent::Accepted { id, .. }
            | ServerEvent::Data { id, .. }
            | ServerEvent::Closed { id, .. } => *id,
        }
    }
}
